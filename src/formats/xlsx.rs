use anyhow::{Context, Result, anyhow, bail};
use calamine::{Data, DataType, Range, Reader, Xlsx, open_workbook};
use std::path::Path;

use crate::dataset::{Cell, ColumnBuilder, Dataset};
use crate::formats::reader::{DatasetReader, unique_column_names};

/// Which worksheet of a workbook to read
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SheetSelector {
    #[default]
    First,
    Index(usize),
    Name(String),
}

impl SheetSelector {
    /// A number selects by position, anything else by name
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<usize>() {
            Ok(index) => SheetSelector::Index(index),
            Err(_) => SheetSelector::Name(raw.to_string()),
        }
    }

    fn resolve(&self, sheet_names: &[String]) -> Result<String> {
        match self {
            SheetSelector::First => sheet_names
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("Workbook has no sheets")),
            SheetSelector::Index(index) => sheet_names.get(*index).cloned().ok_or_else(|| {
                anyhow!(
                    "Sheet index {} out of range, workbook has {} sheets",
                    index,
                    sheet_names.len()
                )
            }),
            SheetSelector::Name(name) => {
                if sheet_names.contains(name) {
                    Ok(name.clone())
                } else {
                    bail!("Worksheet named '{}' not found in {:?}", name, sheet_names)
                }
            }
        }
    }
}

/// Reads one worksheet. The first row is the header; explicit column names,
/// when given, replace it positionally.
pub struct XlsxReader {
    sheet: SheetSelector,
    column_names: Option<Vec<String>>,
}

impl XlsxReader {
    pub fn new(sheet: SheetSelector, column_names: Option<Vec<String>>) -> Self {
        Self {
            sheet,
            column_names,
        }
    }

    fn range_to_dataset(&self, range: &Range<Data>) -> Result<Dataset> {
        let mut rows = range.rows();

        let Some(header) = rows.next() else {
            return match &self.column_names {
                Some(names) if !names.is_empty() => {
                    bail!("Length mismatch: sheet is empty, {} names given", names.len())
                }
                _ => Ok(Dataset::default()),
            };
        };

        let header: Vec<String> = header
            .iter()
            .map(|cell| match cell {
                Data::Empty => String::new(),
                other => other.to_string(),
            })
            .collect();
        let mut builders: Vec<ColumnBuilder> = unique_column_names(header.iter().map(String::as_str))
            .into_iter()
            .map(ColumnBuilder::new)
            .collect();

        for row in rows {
            for (builder, cell) in builders.iter_mut().zip(row) {
                builder.push(sheet_cell(cell));
            }
        }

        let dataset = Dataset::from_builders(builders)?;
        match &self.column_names {
            Some(names) => dataset.with_column_names(names),
            None => Ok(dataset),
        }
    }
}

fn sheet_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty => Cell::Null,
        Data::Int(v) => Cell::Int(*v),
        // Whole numbers stored as floats are integers
        Data::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Cell::Int(*v as i64),
        Data::Float(v) => Cell::Float(*v),
        Data::String(s) => Cell::Text(s.clone()),
        Data::Bool(b) => Cell::Typed {
            type_name: "Bool",
            text: b.to_string(),
        },
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(datetime) => Cell::Typed {
                type_name: "DateTime",
                text: datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            },
            None => Cell::Text(cell.to_string()),
        },
        Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(e) => Cell::Text(format!("{:?}", e)),
    }
}

impl DatasetReader for XlsxReader {
    fn read(&self, path: &Path) -> Result<Dataset> {
        let mut workbook: Xlsx<_> = open_workbook(path)
            .with_context(|| format!("Failed to open workbook {}", path.display()))?;

        let sheet = self.sheet.resolve(&workbook.sheet_names())?;
        let range = workbook
            .worksheet_range(&sheet)
            .with_context(|| format!("Failed to read sheet '{}' of {}", sheet, path.display()))?;

        self.range_to_dataset(&range)
            .with_context(|| format!("Failed to convert sheet '{}' of {}", sheet, path.display()))
    }
}
