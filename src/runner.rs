//! High-level runner API for the ClickHouse loader.
//!
//! This module provides a simplified public interface that hides client setup,
//! file readers and job orchestration. It is the primary API for library users
//! and for the CLI.
//!
//! Every call opens its own connection and releases it when it returns.

use anyhow::{Context, Result};
use derive_builder::Builder;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{CSV_TABLE_NAME, JSON_TABLE_NAME, PARQUET_TABLE_NAME, XLSX_TABLE_NAME};
use crate::db::{ClickHouseClient, Database, TableName, query};
use crate::loader::{LoadJob, Source};

pub use crate::config::{ConnectionSettings, DEFAULT_CHUNK_ROWS, DEFAULT_LOG_DIR};
pub use crate::dataset::{ColumnKind, Dataset, Value};
pub use crate::db::schema::ColumnSpec;
pub use crate::formats::{DelimitedConfig, Format, SheetSelector};
pub use crate::loader::chunked::RowCountCheck;
pub use crate::loader::{InsertMode, LoadOptions, LoadOptionsBuilder, LoadReport};
pub use crate::telemetry::init_logging;

/// Arguments for one load run
#[derive(Debug, Clone, Builder)]
pub struct LoadArgs {
    #[builder(default)]
    pub connection: ConnectionSettings,

    /// A file, or a directory whose files with the format's extension are loaded
    #[builder(setter(into))]
    pub source: PathBuf,
    pub format: Format,
    /// Target table, `name` or `database.name`
    #[builder(setter(into))]
    pub table: String,
    /// Drop and recreate the table before the first insert
    #[builder(default = "true")]
    pub drop: bool,

    #[builder(default)]
    pub delimited: DelimitedConfig,
    #[builder(default)]
    pub sheet: SheetSelector,
    /// Replace the header row of spreadsheet sources
    #[builder(default)]
    pub column_names: Option<Vec<String>>,

    #[builder(default)]
    pub options: LoadOptions,
}

impl LoadArgs {
    fn to_source(&self) -> Source {
        let path = self.source.clone();
        match self.format {
            Format::Csv => Source::Csv {
                path,
                delimited: self.delimited.clone(),
            },
            Format::Json => Source::Json { path },
            Format::Xlsx => Source::Xlsx {
                path,
                sheet: self.sheet.clone(),
                column_names: self.column_names.clone(),
            },
            Format::Parquet => Source::Parquet { path },
        }
    }
}

/// Table a format loads into when none is named
pub fn default_table(format: Format) -> &'static str {
    match format {
        Format::Csv => CSV_TABLE_NAME,
        Format::Json => JSON_TABLE_NAME,
        Format::Xlsx => XLSX_TABLE_NAME,
        Format::Parquet => PARQUET_TABLE_NAME,
    }
}

async fn connect(settings: &ConnectionSettings) -> Result<ClickHouseClient> {
    ClickHouseClient::connect(settings).await.with_context(|| {
        format!(
            "Failed to connect to ClickHouse at {}:{} as {}",
            settings.host, settings.port, settings.user
        )
    })
}

/// Run a load to completion.
///
/// The job runs as one background task; Ctrl-C cancels it. Chunks inserted
/// before a failure or cancellation stay in the table.
///
/// # Example
///
/// ```no_run
/// use clickhouse_loader::runner::{Format, LoadArgsBuilder, run_load};
///
/// # async fn example() -> anyhow::Result<()> {
/// let args = LoadArgsBuilder::default()
///     .source("data/csv")
///     .format(Format::Csv)
///     .table("csv_table")
///     .build()?;
///
/// let report = run_load(args).await?;
/// println!("Loaded {} rows in {:?}", report.rows_inserted, report.duration);
/// # Ok(())
/// # }
/// ```
pub async fn run_load(args: LoadArgs) -> Result<LoadReport> {
    let client = connect(&args.connection)
        .await
        .inspect_err(|e| error!("Load into {} failed: {:#}", args.table, e))?;
    run_load_with(Arc::new(client), args).await
}

pub(crate) async fn run_load_with(db: Arc<dyn Database>, args: LoadArgs) -> Result<LoadReport> {
    let table = TableName::parse(&args.table)?;
    let job = LoadJob::new(table, args.drop, args.to_source());

    let mut handle = job.spawn(db, args.options);
    info!("Load job {} started", handle.job_id());

    tokio::select! {
        report = handle.join() => report,
        Ok(()) = tokio::signal::ctrl_c() => {
            handle.cancel();
            handle.join().await
        }
    }
}

/// Column names and types of a table
pub async fn describe_table(connection: &ConnectionSettings, table: &str) -> Result<Vec<ColumnSpec>> {
    let table = TableName::parse(table)?;
    let client = connect(connection).await?;
    query::describe(&client, &table).await
}

pub async fn count_rows(connection: &ConnectionSettings, table: &str) -> Result<u64> {
    let table = TableName::parse(table)?;
    let client = connect(connection).await?;
    query::count_rows(&client, &table).await
}

/// Equality filter on two columns, `(column, literal)` each. Literals are
/// pasted into the statement unescaped, so string values need their quotes.
pub type WhereFilter = [(String, String); 2];

/// Read columns of a table, all of them when `columns` is empty
pub async fn select_rows(
    connection: &ConnectionSettings,
    table: &str,
    columns: &[String],
    filter: Option<&WhereFilter>,
) -> Result<Dataset> {
    let table = TableName::parse(table)?;
    let client = connect(connection).await?;
    select_rows_with(&client, &table, columns, filter).await
}

pub(crate) async fn select_rows_with(
    db: &dyn Database,
    table: &TableName,
    columns: &[String],
    filter: Option<&WhereFilter>,
) -> Result<Dataset> {
    match filter {
        Some([(c1, v1), (c2, v2)]) => {
            query::select_where(
                db,
                table,
                columns,
                (c1.as_str(), v1.as_str()),
                (c2.as_str(), v2.as_str()),
            )
            .await
        }
        None => query::select(db, table, columns).await,
    }
}
