use anyhow::{Result, bail};
use std::fmt;

use crate::dataset::{ColumnKind, Dataset};

/// Storage engine clause used for every created table. Rows are kept in
/// arrival order; no sort or partition key is declared.
pub const TABLE_ENGINE: &str = "ENGINE = MergeTree() ORDER BY tuple()";

/// Map a column's native kind name to a ClickHouse type name.
///
/// `object`, `float64` and `int64` have fixed mappings. Any other name is
/// returned unchanged: it is assumed to already be a valid ClickHouse type,
/// and if it is not the CREATE TABLE call fails at the server.
pub fn map_type(native: &str) -> &str {
    match native {
        "object" => "String",
        "float64" => "Float64",
        "int64" => "Int64",
        other => other,
    }
}

/// Map a ClickHouse type name back to the column kind used in datasets
pub fn kind_for_clickhouse_type(type_name: &str) -> ColumnKind {
    let inner = type_name
        .strip_prefix("Nullable(")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(type_name);

    match inner {
        "String" => ColumnKind::Text,
        t if t.starts_with("FixedString(") || t.starts_with("LowCardinality(String") => {
            ColumnKind::Text
        }
        t if t.starts_with("Int") || t.starts_with("UInt") => ColumnKind::Int64,
        t if t.starts_with("Float") => ColumnKind::Float64,
        _ => ColumnKind::Other(type_name.to_string()),
    }
}

/// A validated table identifier, `name` or `database.name`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    database: Option<String>,
    name: String,
}

impl TableName {
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('.').collect();

        let (database, name) = match parts.as_slice() {
            [name] => (None, *name),
            [database, name] => (Some(*database), *name),
            _ => bail!("Invalid table name '{}': expected 'name' or 'database.name'", raw),
        };

        for part in database.iter().chain(std::iter::once(&name)) {
            if !is_identifier(part) {
                bail!(
                    "Invalid table name '{}': '{}' is not a valid identifier",
                    raw,
                    part
                );
            }
        }

        Ok(Self {
            database: database.map(str::to_string),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database {
            Some(database) => write!(f, "{}.{}", database, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote a column name for use in generated SQL
pub fn quote_column(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// A column in a table spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub clickhouse_type: String,
}

/// Table name plus the ordered column definitions used to create it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub table: TableName,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Derive the column definitions from a dataset, one per column in dataset order
    pub fn from_dataset(table: TableName, dataset: &Dataset) -> Self {
        Self {
            table,
            columns: build_columns(dataset),
        }
    }

    /// Generate the comma separated column definition clause
    pub fn column_clause(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} {}", quote_column(&c.name), c.clickhouse_type))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether a dataset's columns line up with this spec by name and order
    pub fn matches(&self, dataset: &Dataset) -> bool {
        self.column_names() == dataset.column_names()
    }

    pub fn create_ddl(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}) {}",
            self.table,
            self.column_clause(),
            TABLE_ENGINE
        )
    }
}

/// Build (column name, ClickHouse type) pairs for every column, preserving order
pub fn build_columns(dataset: &Dataset) -> Vec<ColumnSpec> {
    dataset
        .columns()
        .iter()
        .map(|c| ColumnSpec {
            name: c.name().to_string(),
            clickhouse_type: map_type(c.kind().native_name()).to_string(),
        })
        .collect()
}

pub fn drop_ddl(table: &TableName) -> String {
    format!("DROP TABLE IF EXISTS {}", table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, Value};

    fn sample_dataset() -> Dataset {
        Dataset::new(vec![
            Column::text("name", ["a"]),
            Column::int64("id", [1]),
            Column::float64("score", [1.5]),
            Column::new("flag", ColumnKind::Other("Bool".to_string()), vec![Value::Text("true".into())]),
        ])
        .unwrap()
    }

    #[test]
    fn test_map_type() {
        let test_cases = [
            ("object", "String", "text kind"),
            ("float64", "Float64", "float kind"),
            ("int64", "Int64", "integer kind"),
            ("Bool", "Bool", "passthrough"),
            ("datetime64[ns]", "datetime64[ns]", "unknown passthrough"),
            ("", "", "empty passthrough"),
        ];

        for (input, expected, description) in test_cases {
            assert_eq!(map_type(input), expected, "Failed: {}", description);
        }
    }

    #[test]
    fn test_kind_for_clickhouse_type() {
        assert_eq!(kind_for_clickhouse_type("String"), ColumnKind::Text);
        assert_eq!(kind_for_clickhouse_type("Nullable(String)"), ColumnKind::Text);
        assert_eq!(kind_for_clickhouse_type("Int64"), ColumnKind::Int64);
        assert_eq!(kind_for_clickhouse_type("UInt8"), ColumnKind::Int64);
        assert_eq!(kind_for_clickhouse_type("Float32"), ColumnKind::Float64);
        assert_eq!(
            kind_for_clickhouse_type("DateTime"),
            ColumnKind::Other("DateTime".to_string())
        );
    }

    #[test]
    fn test_build_columns_preserves_order() {
        let columns = build_columns(&sample_dataset());
        let pairs: Vec<(&str, &str)> = columns
            .iter()
            .map(|c| (c.name.as_str(), c.clickhouse_type.as_str()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("name", "String"),
                ("id", "Int64"),
                ("score", "Float64"),
                ("flag", "Bool"),
            ]
        );
    }

    #[test]
    fn test_build_columns_empty_dataset() {
        assert!(build_columns(&Dataset::default()).is_empty());
    }

    #[test]
    fn test_table_name_parse() {
        let test_cases = [
            ("csv_table", true, "plain"),
            ("_t1", true, "leading underscore"),
            ("analytics.events", true, "qualified"),
            ("1table", false, "leading digit"),
            ("bad-name", false, "dash"),
            ("a.b.c", false, "too many parts"),
            ("", false, "empty"),
            ("t; DROP TABLE x", false, "injection"),
        ];

        for (input, valid, description) in test_cases {
            assert_eq!(
                TableName::parse(input).is_ok(),
                valid,
                "Failed: {} - input '{}'",
                description,
                input
            );
        }

        assert_eq!(
            TableName::parse("analytics.events").unwrap().to_string(),
            "analytics.events"
        );
    }

    #[test]
    fn test_create_ddl() {
        let spec = TableSpec::from_dataset(TableName::parse("t").unwrap(), &sample_dataset());
        assert_eq!(
            spec.create_ddl(),
            "CREATE TABLE IF NOT EXISTS t (`name` String, `id` Int64, `score` Float64, `flag` Bool) \
             ENGINE = MergeTree() ORDER BY tuple()"
        );
        assert_eq!(drop_ddl(&spec.table), "DROP TABLE IF EXISTS t");
    }

    #[test]
    fn test_quote_column() {
        assert_eq!(quote_column("plain"), "`plain`");
        assert_eq!(quote_column("with space"), "`with space`");
        assert_eq!(quote_column("tick`name"), "`tick\\`name`");
    }

    #[test]
    fn test_spec_matches_dataset() {
        let dataset = sample_dataset();
        let spec = TableSpec::from_dataset(TableName::parse("t").unwrap(), &dataset);
        assert!(spec.matches(&dataset));

        let renamed = dataset
            .with_column_names(&["a".into(), "b".into(), "c".into(), "d".into()])
            .unwrap();
        assert!(!spec.matches(&renamed));
    }
}
