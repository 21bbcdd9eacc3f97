//! In-memory stand-in for ClickHouse used by tests.
//!
//! Understands exactly the SQL this crate generates: DROP/CREATE with the
//! MergeTree clause, inserts with an explicit column list, `count()`,
//! `DESCRIBE TABLE` and simple equality selects. Every call is recorded.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::client::{Database, DbError, InsertBatch, InsertRows, QueryResult};
use super::schema::TableName;
use super::tsv;

/// ClickHouse exception codes the fake reports
const UNKNOWN_TABLE: u32 = 60;
const NO_SUCH_COLUMN_IN_TABLE: u32 = 16;
const SYNTAX_ERROR: u32 = 62;
const NETWORK_ERROR: u32 = 210;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Execute(String),
    Insert { table: String, batch: InsertBatch },
    Query(String),
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<(String, String)>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    tables: HashMap<String, MemoryTable>,
    /// Inserts still allowed to succeed; `None` never fails
    inserts_before_failure: Option<usize>,
}

#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

fn server_error(code: u32, message: String) -> DbError {
    DbError::Server {
        status: 500,
        code: Some(code),
        message: format!("Code: {}. DB::Exception: {}", code, message),
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Execute(sql) if sql.starts_with("CREATE TABLE")))
            .count()
    }

    pub fn drop_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Execute(sql) if sql.starts_with("DROP TABLE")))
            .count()
    }

    pub fn inserts(&self) -> Vec<InsertBatch> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Insert { batch, .. } => Some(batch),
                _ => None,
            })
            .collect()
    }

    pub fn insert_sizes(&self) -> Vec<usize> {
        self.inserts().iter().map(InsertBatch::len).collect()
    }

    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.state.lock().unwrap().tables.get(name).cloned()
    }

    /// Make every following insert fail with a server error
    pub fn fail_inserts(&self, fail: bool) {
        self.state.lock().unwrap().inserts_before_failure = fail.then_some(0);
    }

    /// Let `n` more inserts succeed, then fail every one after them
    pub fn fail_inserts_after(&self, n: usize) {
        self.state.lock().unwrap().inserts_before_failure = Some(n);
    }

    /// Append rows behind the loader's back, as a concurrent writer would
    pub fn append_rows(&self, name: &str, rows: Vec<Vec<Option<String>>>) {
        if let Some(table) = self.state.lock().unwrap().tables.get_mut(name) {
            table.rows.extend(rows);
        }
    }

    fn run_ddl(state: &mut State, sql: &str) -> Result<(), DbError> {
        if let Some(name) = sql.strip_prefix("DROP TABLE IF EXISTS ") {
            state.tables.remove(name.trim());
            return Ok(());
        }

        if let Some(rest) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let (name, rest) = rest
                .split_once(" (")
                .ok_or_else(|| server_error(SYNTAX_ERROR, format!("cannot parse: {}", sql)))?;
            let (clause, _engine) = rest
                .rsplit_once(") ENGINE")
                .ok_or_else(|| server_error(SYNTAX_ERROR, format!("missing engine: {}", sql)))?;

            let columns = parse_column_clause(clause)
                .ok_or_else(|| server_error(SYNTAX_ERROR, format!("bad columns: {}", clause)))?;
            if columns.is_empty() {
                return Err(server_error(
                    SYNTAX_ERROR,
                    format!("table {} must have at least one column", name),
                ));
            }

            state
                .tables
                .entry(name.to_string())
                .or_insert_with(|| MemoryTable {
                    columns,
                    rows: Vec::new(),
                });
            return Ok(());
        }

        Err(server_error(SYNTAX_ERROR, format!("unsupported statement: {}", sql)))
    }

    fn run_query(state: &State, sql: &str) -> Result<QueryResult, DbError> {
        let sql = sql.trim().trim_end_matches(';');

        if let Some(name) = sql.strip_prefix("DESCRIBE TABLE ") {
            let table = lookup(state, name.trim())?;
            return Ok(QueryResult {
                columns: vec!["name".to_string(), "type".to_string()],
                types: vec!["String".to_string(), "String".to_string()],
                rows: table
                    .columns
                    .iter()
                    .map(|(n, t)| vec![Some(n.clone()), Some(t.clone())])
                    .collect(),
            });
        }

        if let Some(name) = sql.strip_prefix("SELECT count() FROM ") {
            let table = lookup(state, name.trim())?;
            return Ok(QueryResult {
                columns: vec!["count()".to_string()],
                types: vec!["UInt64".to_string()],
                rows: vec![vec![Some(table.rows.len().to_string())]],
            });
        }

        if let Some(rest) = sql.strip_prefix("SELECT ") {
            let (cols, rest) = rest
                .split_once(" FROM ")
                .ok_or_else(|| server_error(SYNTAX_ERROR, format!("cannot parse: {}", sql)))?;
            let (name, filter) = match rest.split_once(" WHERE ") {
                Some((name, filter)) => (name.trim(), Some(filter)),
                None => (rest.trim(), None),
            };
            let table = lookup(state, name)?;

            let selected: Vec<usize> = if cols.trim() == "*" {
                (0..table.columns.len()).collect()
            } else {
                cols.split(',')
                    .map(|c| column_index(table, c))
                    .collect::<Result<_, _>>()?
            };

            let mut conditions = Vec::new();
            if let Some(filter) = filter {
                for predicate in filter.split(" AND ") {
                    let (col, literal) = predicate.split_once('=').ok_or_else(|| {
                        server_error(SYNTAX_ERROR, format!("bad predicate: {}", predicate))
                    })?;
                    conditions.push((column_index(table, col)?, unquote_literal(literal)));
                }
            }

            let rows = table
                .rows
                .iter()
                .filter(|row| {
                    conditions
                        .iter()
                        .all(|(idx, value)| row[*idx].as_deref() == Some(value.as_str()))
                })
                .map(|row| selected.iter().map(|&i| row[i].clone()).collect())
                .collect();

            return Ok(QueryResult {
                columns: selected.iter().map(|&i| table.columns[i].0.clone()).collect(),
                types: selected.iter().map(|&i| table.columns[i].1.clone()).collect(),
                rows,
            });
        }

        Err(server_error(SYNTAX_ERROR, format!("unsupported query: {}", sql)))
    }
}

fn lookup<'a>(state: &'a State, name: &str) -> Result<&'a MemoryTable, DbError> {
    state
        .tables
        .get(name)
        .ok_or_else(|| server_error(UNKNOWN_TABLE, format!("Table {} does not exist", name)))
}

fn column_index(table: &MemoryTable, raw: &str) -> Result<usize, DbError> {
    let name = raw.trim().trim_matches('`');
    table
        .columns
        .iter()
        .position(|(n, _)| n == name)
        .ok_or_else(|| {
            server_error(
                NO_SUCH_COLUMN_IN_TABLE,
                format!("There is no column {} in table", name),
            )
        })
}

fn unquote_literal(raw: &str) -> String {
    let raw = raw.trim();
    raw.strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .unwrap_or(raw)
        .to_string()
}

/// Parse "`a` String, `b` Nullable(Int64)" into (name, type) pairs
fn parse_column_clause(clause: &str) -> Option<Vec<(String, String)>> {
    let mut columns = Vec::new();
    let mut rest = clause.trim();

    while !rest.is_empty() {
        let after_tick = rest.strip_prefix('`')?;
        let end = after_tick.find('`')?;
        let name = after_tick[..end].to_string();
        rest = after_tick[end + 1..].trim_start();

        let mut depth = 0usize;
        let mut split_at = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    split_at = i;
                    break;
                }
                _ => {}
            }
        }

        columns.push((name, rest[..split_at].trim().to_string()));
        rest = rest[split_at..].trim_start_matches(',').trim_start();
    }

    Some(columns)
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn execute(&self, sql: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Execute(sql.to_string()));
        Self::run_ddl(&mut state, sql)
    }

    async fn insert(&self, table: &TableName, batch: InsertBatch) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let name = table.to_string();
        state.calls.push(Call::Insert {
            table: name.clone(),
            batch: batch.clone(),
        });

        match state.inserts_before_failure {
            Some(0) => return Err(server_error(NETWORK_ERROR, "connection reset".to_string())),
            Some(n) => state.inserts_before_failure = Some(n - 1),
            None => {}
        }

        let target = state
            .tables
            .get_mut(&name)
            .ok_or_else(|| server_error(UNKNOWN_TABLE, format!("Table {} does not exist", name)))?;

        let table_columns: Vec<&str> = target.columns.iter().map(|(n, _)| n.as_str()).collect();
        if table_columns != batch.columns {
            return Err(server_error(
                NO_SUCH_COLUMN_IN_TABLE,
                format!(
                    "insert columns {:?} do not match table columns {:?}",
                    batch.columns, table_columns
                ),
            ));
        }

        match batch.rows {
            InsertRows::Text(rows) => {
                for row in rows {
                    target
                        .rows
                        .push(row.iter().map(|field| tsv::unescape(field)).collect());
                }
            }
            InsertRows::Typed(rows) => {
                for row in rows {
                    let values = batch
                        .columns
                        .iter()
                        .map(|c| match row.get(c) {
                            None | Some(serde_json::Value::Null) => None,
                            Some(serde_json::Value::String(s)) => Some(s.clone()),
                            Some(other) => Some(other.to_string()),
                        })
                        .collect();
                    target.rows.push(values);
                }
            }
        }

        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<QueryResult, DbError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Query(sql.to_string()));
        Self::run_query(&state, sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_column_clause() {
        let columns = parse_column_clause("`a` String, `b c` Decimal(10, 2), `d` Int64").unwrap();
        assert_eq!(
            columns,
            vec![
                ("a".to_string(), "String".to_string()),
                ("b c".to_string(), "Decimal(10, 2)".to_string()),
                ("d".to_string(), "Int64".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_insert_into_missing_table_fails() {
        let db = MemoryDatabase::new();
        let batch = InsertBatch {
            columns: vec!["a".to_string()],
            rows: InsertRows::Text(vec![vec!["1".to_string()]]),
        };

        let err = db
            .insert(&TableName::parse("t").unwrap(), batch)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(UNKNOWN_TABLE));
    }
}
