use async_trait::async_trait;
use reqwest::{
    Client, StatusCode,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::schema::{TableName, quote_column};
use super::tsv;
use crate::config::{CONNECT_TIMEOUT, ConnectionSettings};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum DbError {
    #[error("cannot reach ClickHouse at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("ClickHouse rejected the request (HTTP {status}): {message}")]
    Server {
        status: u16,
        code: Option<u32>,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to encode rows: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unexpected response from ClickHouse: {0}")]
    Protocol(String),
}

impl DbError {
    fn server(status: StatusCode, body: &str) -> Self {
        DbError::Server {
            status: status.as_u16(),
            code: parse_error_code(body),
            message: body.trim().to_string(),
        }
    }

    /// ClickHouse exception code, when the server reported one
    pub fn code(&self) -> Option<u32> {
        match self {
            DbError::Server { code, .. } => *code,
            _ => None,
        }
    }
}

/// Extract N from the `Code: N.` prefix of a ClickHouse exception body
fn parse_error_code(body: &str) -> Option<u32> {
    let start = body.find("Code: ")? + "Code: ".len();
    let digits: String = body[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

// ============================================================================
// Database Seam
// ============================================================================

/// Rows of an insert, either fully stringified or typed
#[derive(Debug, Clone, PartialEq)]
pub enum InsertRows {
    Text(Vec<Vec<String>>),
    Typed(Vec<serde_json::Map<String, serde_json::Value>>),
}

/// One INSERT call: explicit column list plus the rows
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatch {
    pub columns: Vec<String>,
    pub rows: InsertRows,
}

impl InsertBatch {
    pub fn len(&self) -> usize {
        match &self.rows {
            InsertRows::Text(rows) => rows.len(),
            InsertRows::Typed(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_column(c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Result of a read query; cells are text, `None` for NULL
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub types: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Operations the loader needs from the target database
#[async_trait]
pub trait Database: Send + Sync {
    /// Run a statement that returns no rows (DDL)
    async fn execute(&self, sql: &str) -> Result<(), DbError>;

    /// Insert all rows of the batch in one call
    async fn insert(&self, table: &TableName, batch: InsertBatch) -> Result<(), DbError>;

    async fn query(&self, sql: &str) -> Result<QueryResult, DbError>;
}

// ============================================================================
// ClickHouse HTTP Client
// ============================================================================

/// Client for the ClickHouse HTTP interface
pub struct ClickHouseClient {
    client: Client,
    base_url: Url,
    database: String,
}

impl ClickHouseClient {
    /// Build a client without contacting the server
    pub fn new(settings: &ConnectionSettings) -> Result<Self, DbError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-clickhouse-user"),
            HeaderValue::from_str(&settings.user)?,
        );
        let mut key = HeaderValue::from_str(&settings.password)?;
        key.set_sensitive(true);
        headers.insert(HeaderName::from_static("x-clickhouse-key"), key);

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(headers)
            .tcp_nodelay(true)
            .build()?;

        let base_url = Url::parse(&format!("http://{}:{}/", settings.host, settings.port))?;

        Ok(Self {
            client,
            base_url,
            database: settings.database.clone(),
        })
    }

    /// Build a client and verify the server answers
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self, DbError> {
        let client = Self::new(settings)?;
        client.ping().await?;
        info!(
            "Connected to ClickHouse at {} (database {})",
            client.base_url, client.database
        );
        Ok(client)
    }

    async fn ping(&self) -> Result<(), DbError> {
        let result = self.query("SELECT 1").await?;
        if result.rows.first().and_then(|r| r.first()).cloned().flatten() != Some("1".to_string()) {
            return Err(DbError::Protocol(format!(
                "unexpected ping result: {:?}",
                result.rows
            )));
        }
        Ok(())
    }

    /// POST `body` with an optional `query` URL parameter and return the response text
    async fn post(&self, query: Option<&str>, body: String) -> Result<String, DbError> {
        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("database", &self.database);
            if let Some(query) = query {
                pairs.append_pair("query", query);
            }
        }

        let response = self
            .client
            .post(url)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    DbError::Connection {
                        url: self.base_url.to_string(),
                        source: e,
                    }
                } else {
                    DbError::Http(e)
                }
            })?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(DbError::server(status, &text));
        }

        Ok(text)
    }
}

#[async_trait]
impl Database for ClickHouseClient {
    async fn execute(&self, sql: &str) -> Result<(), DbError> {
        debug!("Executing: {}", sql);
        self.post(None, sql.to_string()).await?;
        Ok(())
    }

    async fn insert(&self, table: &TableName, batch: InsertBatch) -> Result<(), DbError> {
        if batch.is_empty() {
            return Ok(());
        }
        let column_list = batch.column_list();

        let (format, body) = match &batch.rows {
            InsertRows::Text(rows) => ("TabSeparated", tsv::encode_rows(rows)),
            InsertRows::Typed(rows) => {
                let mut body = String::new();
                for row in rows {
                    body.push_str(&serde_json::to_string(row)?);
                    body.push('\n');
                }
                ("JSONEachRow", body)
            }
        };

        let statement = format!("INSERT INTO {} ({}) FORMAT {}", table, column_list, format);
        debug!("{} ({} rows, {} bytes)", statement, batch.len(), body.len());

        self.post(Some(&statement), body).await?;
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<QueryResult, DbError> {
        debug!("Querying: {}", sql);
        let body = format!("{} FORMAT TabSeparatedWithNamesAndTypes", sql.trim_end());
        let text = self.post(None, body).await?;
        parse_tsv_with_names_and_types(&text)
    }
}

/// Parse a `TabSeparatedWithNamesAndTypes` response body
fn parse_tsv_with_names_and_types(text: &str) -> Result<QueryResult, DbError> {
    let mut lines = text.lines();

    let columns: Vec<String> = match lines.next() {
        Some(line) => tsv::split_line(line).into_iter().flatten().collect(),
        None => return Err(DbError::Protocol("missing column names".to_string())),
    };
    let types: Vec<String> = match lines.next() {
        Some(line) => tsv::split_line(line).into_iter().flatten().collect(),
        None => return Err(DbError::Protocol("missing column types".to_string())),
    };

    if columns.len() != types.len() {
        return Err(DbError::Protocol(format!(
            "{} column names but {} column types",
            columns.len(),
            types.len()
        )));
    }

    let mut rows = Vec::new();
    for line in lines {
        let row = tsv::split_line(line);
        if row.len() != columns.len() {
            return Err(DbError::Protocol(format!(
                "row has {} fields, expected {}",
                row.len(),
                columns.len()
            )));
        }
        rows.push(row);
    }

    Ok(QueryResult {
        columns,
        types,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_code() {
        let body = "Code: 60. DB::Exception: Table default.missing does not exist. (UNKNOWN_TABLE)";
        assert_eq!(parse_error_code(body), Some(60));
        assert_eq!(parse_error_code("no code here"), None);
    }

    #[test]
    fn test_parse_query_response() {
        let text = "name\tcount()\nString\tUInt64\nalice\t3\n\\N\t0\n";
        let result = parse_tsv_with_names_and_types(text).unwrap();

        assert_eq!(result.columns, vec!["name", "count()"]);
        assert_eq!(result.types, vec!["String", "UInt64"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Some("alice".to_string()), Some("3".to_string())],
                vec![None, Some("0".to_string())],
            ]
        );
    }

    #[test]
    fn test_parse_query_response_without_rows() {
        let result = parse_tsv_with_names_and_types("a\tb\nString\tInt64\n").unwrap();
        assert_eq!(result.columns.len(), 2);
        assert!(result.rows.is_empty());
    }

    #[test]
    fn test_parse_query_response_rejects_ragged_rows() {
        let result = parse_tsv_with_names_and_types("a\tb\nString\tInt64\nx\n");
        assert!(matches!(result, Err(DbError::Protocol(_))));
    }

    #[test]
    fn test_insert_batch_column_list() {
        let batch = InsertBatch {
            columns: vec!["a".to_string(), "b c".to_string()],
            rows: InsertRows::Text(vec![]),
        };
        assert_eq!(batch.column_list(), "`a`, `b c`");
        assert!(batch.is_empty());
    }

    #[test]
    fn test_server_error_carries_code() {
        let err = DbError::server(
            StatusCode::NOT_FOUND,
            "Code: 60. DB::Exception: Table default.t does not exist.\n",
        );
        assert_eq!(err.code(), Some(60));
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_empty_insert_makes_no_request() {
        let settings = ConnectionSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..ConnectionSettings::default()
        };
        let client = ClickHouseClient::new(&settings).unwrap();
        let batch = InsertBatch {
            columns: vec!["a".to_string()],
            rows: InsertRows::Text(vec![]),
        };

        // Nothing listens on port 1, so any request would fail
        client
            .insert(&TableName::parse("t").unwrap(), batch)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_is_connection_error() {
        let settings = ConnectionSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..ConnectionSettings::default()
        };

        let result = ClickHouseClient::connect(&settings).await;
        assert!(matches!(result, Err(DbError::Connection { .. })));
    }
}
