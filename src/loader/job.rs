//! One load job: a source, a target table and a drop policy, executed once.

use anyhow::{Context, Result};
use derive_builder::Builder;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

use super::chunked::{RowCountCheck, TableLoader};
use super::manager::{InsertMode, UploadManager};
use super::task::LoadHandle;
use crate::config::DEFAULT_CHUNK_ROWS;
use crate::dataset::Dataset;
use crate::db::client::DbError;
use crate::db::{Database, TableName};
use crate::formats::json::{self, JsonObject};
use crate::formats::{
    DatasetReader, DelimitedConfig, DelimitedReader, Format, JsonReader, ParquetReader,
    SheetSelector, XlsxReader, discover_files,
};

/// Where the rows of a job come from. Every path may name one file or a
/// directory of files with the format's extension.
#[derive(Debug, Clone)]
pub enum Source {
    Csv {
        path: PathBuf,
        delimited: DelimitedConfig,
    },
    Json {
        path: PathBuf,
    },
    Xlsx {
        path: PathBuf,
        sheet: SheetSelector,
        column_names: Option<Vec<String>>,
    },
    Parquet {
        path: PathBuf,
    },
}

impl Source {
    pub fn format(&self) -> Format {
        match self {
            Source::Csv { .. } => Format::Csv,
            Source::Json { .. } => Format::Json,
            Source::Xlsx { .. } => Format::Xlsx,
            Source::Parquet { .. } => Format::Parquet,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Source::Csv { path, .. }
            | Source::Json { path }
            | Source::Xlsx { path, .. }
            | Source::Parquet { path } => path,
        }
    }

    fn reader(&self) -> Arc<dyn DatasetReader> {
        match self {
            Source::Csv { delimited, .. } => Arc::new(DelimitedReader::new(delimited.clone())),
            Source::Json { .. } => Arc::new(JsonReader),
            Source::Xlsx {
                sheet,
                column_names,
                ..
            } => Arc::new(XlsxReader::new(sheet.clone(), column_names.clone())),
            Source::Parquet { .. } => Arc::new(ParquetReader),
        }
    }
}

/// Tuning shared by every job of a run
#[derive(Debug, Clone, Builder)]
pub struct LoadOptions {
    #[builder(default = "DEFAULT_CHUNK_ROWS")]
    pub chunk_rows: usize,
    #[builder(default)]
    pub insert_mode: InsertMode,
    #[builder(default)]
    pub verify_row_count: bool,
    /// Hide the progress bar
    #[builder(default)]
    pub quiet: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            chunk_rows: DEFAULT_CHUNK_ROWS,
            insert_mode: InsertMode::default(),
            verify_row_count: false,
            quiet: false,
        }
    }
}

/// Result of a completed load job
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub job_id: String,
    pub table: String,
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub rows_inserted: u64,
    pub table_created: bool,
    pub row_count_check: RowCountCheck,
    pub inserts: usize,
    pub insert_p50_ms: Option<u64>,
    pub insert_p90_ms: Option<u64>,
    pub insert_p99_ms: Option<u64>,
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct FileTally {
    loaded: usize,
    skipped: usize,
}

pub struct LoadJob {
    job_id: String,
    table: TableName,
    drop: bool,
    source: Source,
}

impl LoadJob {
    pub fn new(table: TableName, drop: bool, source: Source) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            table,
            drop,
            source,
        }
    }

    /// Run the job to completion on the current task. Any failure is logged
    /// once, naming the table, before it is returned.
    pub async fn run(self, db: Arc<dyn Database>, options: &LoadOptions) -> Result<LoadReport> {
        let table = self.table.clone();
        self.execute(db, options).await.inspect_err(|e| {
            match server_code(e) {
                Some(code) => error!("Load into {} failed (code {}): {:#}", table, code, e),
                None => error!("Load into {} failed: {:#}", table, e),
            }
        })
    }

    /// Run the job as a background task
    pub fn spawn(self, db: Arc<dyn Database>, options: LoadOptions) -> LoadHandle {
        let job_id = self.job_id.clone();
        let handle = tokio::spawn(async move { self.run(db, &options).await });
        LoadHandle::new(job_id, handle)
    }

    async fn execute(self, db: Arc<dyn Database>, options: &LoadOptions) -> Result<LoadReport> {
        let start_time = Instant::now();
        info!(
            "Starting load job {}: {} -> {}",
            self.job_id,
            self.source.path().display(),
            self.table
        );

        let files = discover_files(self.source.path(), self.source.format())?;
        info!("Found {} {} files", files.len(), self.source.format().extension());

        let manager = UploadManager::new(db, self.table.clone(), options.insert_mode);
        let mut loader = TableLoader::new(manager, self.drop, options.chunk_rows)
            .with_row_count_check(options.verify_row_count)
            .with_progress(!options.quiet)?;

        let tally = match &self.source {
            Source::Json { .. } => self.load_combined(files, &mut loader).await?,
            _ => self.load_each(&files, &mut loader).await?,
        };

        let summary = loader.finish().await?;
        info!(
            "{} files written to {}, rows={}",
            tally.loaded, self.table, summary.rows_inserted
        );

        let (p50, p90, p99) = summary.stats.get_percentiles();
        Ok(LoadReport {
            job_id: self.job_id,
            table: self.table.to_string(),
            files_loaded: tally.loaded,
            files_skipped: tally.skipped,
            rows_inserted: summary.rows_inserted,
            table_created: summary.schema.is_some(),
            row_count_check: summary.row_count_check,
            inserts: summary.stats.inserts,
            insert_p50_ms: p50,
            insert_p90_ms: p90,
            insert_p99_ms: p99,
            duration: start_time.elapsed(),
        })
    }

    /// Load files one at a time. A failing file stops the job; files loaded
    /// before it stay in the table.
    async fn load_each(&self, files: &[PathBuf], loader: &mut TableLoader) -> Result<FileTally> {
        let reader = self.source.reader();
        let dedupe = matches!(self.source, Source::Csv { .. });
        let mut tally = FileTally::default();

        for path in files {
            let label = file_label(path);
            let result: Result<u64> = async {
                let dataset = read_blocking(Arc::clone(&reader), path.clone()).await?;
                let dataset = if dedupe {
                    dataset.drop_duplicates()
                } else {
                    dataset
                };
                loader.load(&label, &dataset).await
            }
            .await;

            match result {
                Ok(0) => tally.skipped += 1,
                Ok(_) => tally.loaded += 1,
                Err(e) => {
                    return Err(e.context(format!(
                        "Failed to load {} into {} ({} files already loaded)",
                        label, self.table, tally.loaded
                    )));
                }
            }
        }

        Ok(tally)
    }

    /// Parse every file first, then load the union of their rows in one pass.
    /// A malformed file aborts before any database call.
    async fn load_combined(&self, files: Vec<PathBuf>, loader: &mut TableLoader) -> Result<FileTally> {
        let file_count = files.len();
        let (objects, contributing) = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut objects: Vec<JsonObject> = Vec::new();
            let mut contributing = 0;
            for path in &files {
                let parsed = json::read_objects(path)?;
                if !parsed.is_empty() {
                    contributing += 1;
                }
                objects.extend(parsed);
            }
            Ok((objects, contributing))
        })
        .await
        .context("JSON parsing task failed")??;

        let dataset = json::objects_to_dataset(&objects)?;
        let label = file_label(self.source.path());
        let loaded = loader.load(&label, &dataset).await?;

        let loaded_files = if loaded > 0 { contributing } else { 0 };
        Ok(FileTally {
            loaded: loaded_files,
            skipped: file_count - loaded_files,
        })
    }
}

async fn read_blocking(reader: Arc<dyn DatasetReader>, path: PathBuf) -> Result<Dataset> {
    tokio::task::spawn_blocking(move || reader.read(&path))
        .await
        .context("File reader task failed")?
}

/// ClickHouse exception code carried anywhere in the error chain
fn server_code(err: &anyhow::Error) -> Option<u32> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DbError>())
        .and_then(DbError::code)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
