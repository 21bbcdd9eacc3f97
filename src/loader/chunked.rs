use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use super::manager::UploadManager;
use crate::dataset::Dataset;
use crate::db::schema::TableSpec;
use crate::telemetry::InsertStats;

/// Whether the target table has been created by this loader yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaState {
    Pending,
    Established(TableSpec),
}

/// Outcome of the optional post-load row count check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowCountCheck {
    /// Not requested, or no table was created
    Skipped,
    Matched { rows: u64 },
    Mismatch { expected: u64, actual: u64 },
}

/// What a loader did over its whole lifetime
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub schema: Option<TableSpec>,
    pub rows_inserted: u64,
    pub row_count_check: RowCountCheck,
    pub stats: InsertStats,
}

/// Drives table creation and chunked inserts for a sequence of datasets.
///
/// The first non-empty chunk of the first non-empty dataset creates the table
/// with the caller's drop policy; every chunk, that one included, is then
/// inserted. Later datasets append to the established table.
pub struct TableLoader {
    manager: UploadManager,
    drop: bool,
    chunk_rows: usize,
    verify_row_count: bool,
    state: SchemaState,
    baseline_rows: u64,
    rows_inserted: u64,
    stats: InsertStats,
    progress: Option<ProgressBar>,
}

impl TableLoader {
    pub fn new(manager: UploadManager, drop: bool, chunk_rows: usize) -> Self {
        Self {
            manager,
            drop,
            chunk_rows: chunk_rows.max(1),
            verify_row_count: false,
            state: SchemaState::Pending,
            baseline_rows: 0,
            rows_inserted: 0,
            stats: InsertStats::new(),
            progress: None,
        }
    }

    /// Compare the table's row count with what was inserted when finishing
    pub fn with_row_count_check(mut self, verify: bool) -> Self {
        self.verify_row_count = verify;
        self
    }

    /// Show a row progress bar on the terminal
    pub fn with_progress(mut self, show: bool) -> Result<Self> {
        if show {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "[{elapsed_precise}] Rows: [{bar:30.green/blue}] {human_pos}/{human_len} ({percent}%) | {msg}",
                    )
                    .map_err(|e| anyhow!("Invalid progress template: {}", e))?
                    .progress_chars("=>-"),
            );
            self.progress = Some(bar);
        }
        Ok(self)
    }

    /// Load one dataset labelled `source` (a file name, usually). Empty
    /// datasets are skipped with a log line and cause no database call.
    /// Returns the number of rows inserted. Rows of chunks inserted before a
    /// failing chunk are counted in the loader's total.
    pub async fn load(&mut self, source: &str, dataset: &Dataset) -> Result<u64> {
        if dataset.is_empty() {
            info!("{}, size 0, skipped", source);
            return Ok(0);
        }

        if let SchemaState::Established(spec) = &self.state
            && !spec.matches(dataset)
        {
            warn!(
                "{} columns {:?} differ from {} columns {:?}, the insert may be rejected",
                source,
                dataset.column_names(),
                self.manager.table(),
                spec.column_names()
            );
        }

        if let Some(bar) = &self.progress {
            bar.inc_length(dataset.num_rows() as u64);
        }

        let chunk_count = dataset.num_rows().div_ceil(self.chunk_rows);
        let mut loaded = 0u64;
        for (index, chunk) in dataset.chunks(self.chunk_rows).enumerate() {
            if self.state == SchemaState::Pending {
                self.establish(&chunk).await?;
            }

            let started = Instant::now();
            let rows = self.manager.insert(&chunk).await.with_context(|| {
                format!(
                    "Chunk {} of {} from {} failed, {} rows already in {}",
                    index + 1,
                    chunk_count,
                    source,
                    self.rows_inserted,
                    self.manager.table()
                )
            })?;
            self.stats.record(rows, started.elapsed());

            loaded += rows as u64;
            self.rows_inserted += rows as u64;
            if let Some(bar) = &self.progress {
                bar.inc(rows as u64);
                if let (Some(p50), Some(p90), Some(p99)) = self.stats.get_percentiles() {
                    bar.set_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
                }
            }
        }

        info!(
            "{} ok {} cols {} rows",
            source,
            dataset.num_columns(),
            dataset.num_rows()
        );

        Ok(loaded)
    }

    async fn establish(&mut self, chunk: &Dataset) -> Result<()> {
        let spec = self.manager.ensure_table(chunk, self.drop).await?;
        if self.verify_row_count {
            self.baseline_rows = self.manager.count_rows().await?;
        }
        self.state = SchemaState::Established(spec);
        Ok(())
    }

    /// Finish the load: optionally verify the row count and report statistics
    pub async fn finish(self) -> Result<LoadSummary> {
        if let Some(bar) = &self.progress {
            bar.finish();
        }

        let schema = match self.state {
            SchemaState::Established(spec) => Some(spec),
            SchemaState::Pending => None,
        };

        let row_count_check = if self.verify_row_count && schema.is_some() {
            let expected = self.baseline_rows + self.rows_inserted;
            let actual = self.manager.count_rows().await?;
            if actual == expected {
                info!(
                    "{} row count verified: len_source={}; len_table={}",
                    self.manager.table(),
                    self.rows_inserted,
                    actual
                );
                RowCountCheck::Matched { rows: actual }
            } else {
                warn!(
                    "{} row count mismatch: expected {} rows (inserted {}), table has {}",
                    self.manager.table(),
                    expected,
                    self.rows_inserted,
                    actual
                );
                RowCountCheck::Mismatch { expected, actual }
            }
        } else {
            RowCountCheck::Skipped
        };

        if let (Some(p50), Some(p90), Some(p99)) = self.stats.get_percentiles() {
            info!(
                "{} inserts into {}: p50 {}ms, p90 {}ms, p99 {}ms",
                self.stats.inserts,
                self.manager.table(),
                p50,
                p90,
                p99
            );
        }

        Ok(LoadSummary {
            schema,
            rows_inserted: self.rows_inserted,
            row_count_check,
            stats: self.stats,
        })
    }
}
