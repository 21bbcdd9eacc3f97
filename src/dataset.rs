//! In-memory tabular data handed to the load pipeline.
//!
//! A [`Dataset`] is an ordered list of named columns with a uniform row count.
//! Readers build columns cell by cell through [`ColumnBuilder`], which infers
//! the column kind once all cells are known. Datasets are never mutated in
//! place: every transformation returns a new dataset.

use anyhow::{Result, bail};
use std::collections::HashSet;

/// Marker ClickHouse reads as NULL in TabSeparated input
pub const TSV_NULL: &str = "\\N";

/// A single stored value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text representation used when every value is sent as text.
    /// Nulls become the TabSeparated null marker.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => TSV_NULL.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// Typed JSON representation. Non-finite floats have no JSON form and become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Semantic kind of a column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Text,
    Int64,
    Float64,
    /// A kind the source knew about but the pipeline has no rule for
    /// (booleans, dates, ...). Values are stored as text.
    Other(String),
}

impl ColumnKind {
    /// Name of the kind as inferred on the source side
    pub fn native_name(&self) -> &str {
        match self {
            ColumnKind::Text => "object",
            ColumnKind::Int64 => "int64",
            ColumnKind::Float64 => "float64",
            ColumnKind::Other(name) => name,
        }
    }

    /// Find the most specific kind that accommodates both kinds
    pub fn common_kind(&self, other: &ColumnKind) -> ColumnKind {
        if self == other {
            return self.clone();
        }

        match (self, other) {
            (ColumnKind::Int64, ColumnKind::Float64) | (ColumnKind::Float64, ColumnKind::Int64) => {
                ColumnKind::Float64
            }
            _ => ColumnKind::Text,
        }
    }
}

/// A cell as produced by a reader, before the column kind is known
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    /// Value of a source type without a dedicated kind, already rendered as text
    Typed {
        type_name: &'static str,
        text: String,
    },
}

impl Cell {
    /// Classify a raw text field (CSV and other untyped sources)
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Cell::Null;
        }

        if let Ok(v) = trimmed.parse::<i64>() {
            return Cell::Int(v);
        }

        // Require a digit so words like "inf" or "NaN" stay text
        if trimmed.bytes().any(|b| b.is_ascii_digit())
            && let Ok(v) = trimmed.parse::<f64>()
        {
            return Cell::Float(v);
        }

        Cell::Text(raw.to_string())
    }

    fn kind(&self) -> Option<ColumnKind> {
        match self {
            Cell::Null => None,
            Cell::Int(_) => Some(ColumnKind::Int64),
            Cell::Float(_) => Some(ColumnKind::Float64),
            Cell::Text(_) => Some(ColumnKind::Text),
            Cell::Typed { type_name, .. } => Some(ColumnKind::Other(type_name.to_string())),
        }
    }

    fn into_value(self, kind: &ColumnKind) -> Value {
        match (self, kind) {
            (Cell::Null, _) => Value::Null,
            (Cell::Int(v), ColumnKind::Int64) => Value::Int(v),
            (Cell::Int(v), ColumnKind::Float64) => Value::Float(v as f64),
            (Cell::Float(v), ColumnKind::Float64) => Value::Float(v),
            (Cell::Int(v), _) => Value::Text(v.to_string()),
            (Cell::Float(v), _) => Value::Text(v.to_string()),
            (Cell::Text(s), _) => Value::Text(s),
            (Cell::Typed { text, .. }, _) => Value::Text(text),
        }
    }
}

/// Accumulates the cells of one column and infers its kind on [`finish`](Self::finish)
#[derive(Debug, Clone)]
pub struct ColumnBuilder {
    name: String,
    cells: Vec<Cell>,
}

impl ColumnBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: Vec::new(),
        }
    }

    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn finish(self) -> Column {
        let kind = Self::infer_kind(&self.cells);
        let values = self
            .cells
            .into_iter()
            .map(|cell| cell.into_value(&kind))
            .collect();

        Column {
            name: self.name,
            kind,
            values,
        }
    }

    /// Nulls are ignored, numbers promote to Float64, anything else mixed promotes to Text.
    /// An all-null column is Text.
    fn infer_kind(cells: &[Cell]) -> ColumnKind {
        let mut inferred: Option<ColumnKind> = None;

        for cell in cells {
            let Some(cell_kind) = cell.kind() else {
                continue;
            };

            let next = match inferred {
                None => cell_kind,
                Some(current) => current.common_kind(&cell_kind),
            };

            if next == ColumnKind::Text {
                return ColumnKind::Text;
            }
            inferred = Some(next);
        }

        inferred.unwrap_or(ColumnKind::Text)
    }
}

/// A named column of homogeneous values
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    kind: ColumnKind,
    values: Vec<Value>,
}

impl Column {
    /// Build a column whose kind is already known. Values must agree with `kind`.
    pub fn new(name: impl Into<String>, kind: ColumnKind, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            values,
        }
    }

    pub fn text<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        let values = values.into_iter().map(|v| Value::Text(v.into())).collect();
        Self::new(name, ColumnKind::Text, values)
    }

    pub fn int64(name: impl Into<String>, values: impl IntoIterator<Item = i64>) -> Self {
        let values = values.into_iter().map(Value::Int).collect();
        Self::new(name, ColumnKind::Int64, values)
    }

    pub fn float64(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        let values = values.into_iter().map(Value::Float).collect();
        Self::new(name, ColumnKind::Float64, values)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    fn select(&self, rows: &[usize]) -> Column {
        Column {
            name: self.name.clone(),
            kind: self.kind.clone(),
            values: rows.iter().map(|&i| self.values[i].clone()).collect(),
        }
    }
}

/// An ordered sequence of named columns with a uniform row count
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    columns: Vec<Column>,
    num_rows: usize,
}

impl Dataset {
    /// Create a dataset, checking that all columns have the same length and
    /// that column names are unique.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let num_rows = columns.first().map(Column::len).unwrap_or(0);

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if column.len() != num_rows {
                bail!(
                    "Column '{}' has {} rows, expected {}",
                    column.name,
                    column.len(),
                    num_rows
                );
            }
            if !seen.insert(column.name.as_str()) {
                bail!("Duplicate column name '{}'", column.name);
            }
        }

        Ok(Self { columns, num_rows })
    }

    /// Finish a set of builders into a dataset
    pub fn from_builders(builders: Vec<ColumnBuilder>) -> Result<Self> {
        Self::new(builders.into_iter().map(ColumnBuilder::finish).collect())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// True when the dataset holds no cells at all (no rows or no columns)
    pub fn is_empty(&self) -> bool {
        self.num_rows * self.columns.len() == 0
    }

    /// Contiguous window of rows `[start, start + len)`, clamped to the dataset
    pub fn slice(&self, start: usize, len: usize) -> Dataset {
        let start = start.min(self.num_rows);
        let end = start.saturating_add(len).min(self.num_rows);

        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                kind: c.kind.clone(),
                values: c.values[start..end].to_vec(),
            })
            .collect();

        Dataset {
            columns,
            num_rows: end - start,
        }
    }

    /// Split into contiguous, non-overlapping windows of `size` rows in original
    /// order. The last window may be shorter. A size of zero is treated as one.
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = Dataset> + '_ {
        let size = size.max(1);
        (0..self.num_rows)
            .step_by(size)
            .map(move |start| self.slice(start, size))
    }

    /// Copy of the dataset without exact duplicate rows, keeping first occurrences
    pub fn drop_duplicates(&self) -> Dataset {
        let mut seen = HashSet::with_capacity(self.num_rows);
        let keep: Vec<usize> = (0..self.num_rows)
            .filter(|&row| seen.insert(self.row_text(row)))
            .collect();

        if keep.len() == self.num_rows {
            return self.clone();
        }

        Dataset {
            columns: self.columns.iter().map(|c| c.select(&keep)).collect(),
            num_rows: keep.len(),
        }
    }

    /// Copy of the dataset with its columns renamed positionally
    pub fn with_column_names(&self, names: &[String]) -> Result<Dataset> {
        if names.len() != self.columns.len() {
            bail!(
                "Length mismatch: dataset has {} columns, {} names given",
                self.columns.len(),
                names.len()
            );
        }

        let columns = self
            .columns
            .iter()
            .zip(names)
            .map(|(c, name)| Column {
                name: name.clone(),
                kind: c.kind.clone(),
                values: c.values.clone(),
            })
            .collect();

        Dataset::new(columns)
    }

    /// Every value converted to its text representation, row-major
    pub fn to_text_rows(&self) -> Vec<Vec<String>> {
        (0..self.num_rows).map(|row| self.row_text(row)).collect()
    }

    /// Every row as a JSON object keyed by column name, values keeping their type
    pub fn to_json_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        (0..self.num_rows)
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values[row].to_json()))
                    .collect()
            })
            .collect()
    }

    fn row_text(&self, row: usize) -> Vec<String> {
        self.columns.iter().map(|c| c.values[row].to_text()).collect()
    }
}
