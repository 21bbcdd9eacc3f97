//! Read-side helpers over the [`Database`] seam.

use anyhow::{Context, Result, anyhow};

use super::client::{Database, QueryResult};
use super::schema::{ColumnSpec, TableName, kind_for_clickhouse_type, quote_column};
use crate::dataset::{Column, ColumnKind, Dataset, Value};

fn column_list(columns: &[String]) -> String {
    if columns.is_empty() {
        return "*".to_string();
    }
    columns
        .iter()
        .map(|c| quote_column(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT <columns> FROM <table>`; an empty column list selects everything
pub async fn select(db: &dyn Database, table: &TableName, columns: &[String]) -> Result<Dataset> {
    let sql = format!("SELECT {} FROM {}", column_list(columns), table);
    let result = db
        .query(&sql)
        .await
        .with_context(|| format!("Failed to select from {}", table))?;
    result_to_dataset(result)
}

/// `SELECT <columns> FROM <table> WHERE <c1> = <v1> AND <c2> = <v2>`.
///
/// The values are interpolated into the statement verbatim as SQL literals:
/// strings must be passed with their quotes (`'abc'`) and nothing is escaped.
/// Never pass untrusted input here.
pub async fn select_where(
    db: &dyn Database,
    table: &TableName,
    columns: &[String],
    first: (&str, &str),
    second: (&str, &str),
) -> Result<Dataset> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = {} AND {} = {}",
        column_list(columns),
        table,
        quote_column(first.0),
        first.1,
        quote_column(second.0),
        second.1
    );
    let result = db
        .query(&sql)
        .await
        .with_context(|| format!("Failed to select from {}", table))?;
    result_to_dataset(result)
}

/// Column names and types of an existing table
pub async fn describe(db: &dyn Database, table: &TableName) -> Result<Vec<ColumnSpec>> {
    let result = db
        .query(&format!("DESCRIBE TABLE {}", table))
        .await
        .with_context(|| format!("Failed to describe {}", table))?;

    let position = |name: &str| {
        result
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| anyhow!("DESCRIBE result has no '{}' column", name))
    };
    let name_idx = position("name")?;
    let type_idx = position("type")?;

    result
        .rows
        .iter()
        .map(|row| {
            Ok(ColumnSpec {
                name: row[name_idx].clone().unwrap_or_default(),
                clickhouse_type: row[type_idx].clone().unwrap_or_default(),
            })
        })
        .collect()
}

pub async fn count_rows(db: &dyn Database, table: &TableName) -> Result<u64> {
    let result = db
        .query(&format!("SELECT count() FROM {}", table))
        .await
        .with_context(|| format!("Failed to count rows in {}", table))?;

    let raw = result
        .rows
        .first()
        .and_then(|row| row.first())
        .cloned()
        .flatten()
        .ok_or_else(|| anyhow!("count() on {} returned no value", table))?;

    raw.parse::<u64>()
        .with_context(|| format!("count() on {} returned '{}'", table, raw))
}

/// Convert a query result into a dataset, mapping ClickHouse types back to column kinds
fn result_to_dataset(result: QueryResult) -> Result<Dataset> {
    let mut columns = Vec::with_capacity(result.columns.len());

    for (idx, (name, type_name)) in result.columns.iter().zip(&result.types).enumerate() {
        let raw: Vec<Option<&str>> = result.rows.iter().map(|row| row[idx].as_deref()).collect();
        let kind = kind_for_clickhouse_type(type_name);

        let typed = match kind {
            ColumnKind::Int64 => parse_all(&raw, |s| s.parse::<i64>().ok().map(Value::Int)),
            ColumnKind::Float64 => parse_all(&raw, |s| s.parse::<f64>().ok().map(Value::Float)),
            _ => None,
        };

        let column = match typed {
            Some(values) => Column::new(name.clone(), kind, values),
            // Values that do not fit the mapped kind are kept as text
            None => {
                let kind = match kind {
                    ColumnKind::Other(_) => kind,
                    _ => ColumnKind::Text,
                };
                let values = raw
                    .iter()
                    .map(|v| v.map_or(Value::Null, |s| Value::Text(s.to_string())))
                    .collect();
                Column::new(name.clone(), kind, values)
            }
        };
        columns.push(column);
    }

    Dataset::new(columns)
}

fn parse_all(raw: &[Option<&str>], parse: impl Fn(&str) -> Option<Value>) -> Option<Vec<Value>> {
    raw.iter()
        .map(|v| match v {
            None => Some(Value::Null),
            Some(s) => parse(s),
        })
        .collect()
}
