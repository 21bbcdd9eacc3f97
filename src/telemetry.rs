//! Logging setup and insert statistics.
//!
//! The binary installs one subscriber writing to stdout and to a per-run log
//! file. Library code only emits `tracing` events; without an installed
//! subscriber they are discarded.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_FILE_PREFIX;

/// Create `<dir>/loader<unix-timestamp>.log`, creating the directory if needed
fn create_log_file(log_dir: &Path) -> Result<(PathBuf, File)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let path = log_dir.join(format!(
        "{}{}.log",
        LOG_FILE_PREFIX,
        chrono::Utc::now().timestamp()
    ));
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;

    Ok((path, file))
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("clickhouse_loader={}", level)))
}

/// Install the process-wide subscriber: stdout (warnings only when quiet) and
/// a timestamped log file that always records info and above. Returns the
/// log file path.
pub fn init_logging(log_dir: &Path, quiet: bool) -> Result<PathBuf> {
    let (path, file) = create_log_file(log_dir)?;

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(filter(if quiet { "warn" } else { "info" }));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(filter("info"));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(path)
}

/// Durations and sizes of insert calls made by one job
#[derive(Debug, Default, Clone)]
pub struct InsertStats {
    pub inserts: usize,
    pub rows_inserted: u64,
    pub insert_durations_ms: Vec<u64>,
}

impl InsertStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rows: usize, duration: Duration) {
        self.inserts += 1;
        self.rows_inserted += rows as u64;
        self.insert_durations_ms.push(duration.as_millis() as u64);
    }

    /// Calculate percentile from insert durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.insert_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.insert_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}

#[cfg(test)]
pub mod capture {
    //! Scoped log capture for tests

    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing::subscriber::DefaultGuard;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }

        /// Number of captured lines containing `needle`
        pub fn count(&self, needle: &str) -> usize {
            self.contents()
                .lines()
                .filter(|line| line.contains(needle))
                .count()
        }
    }

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Capture events on the current thread until the guard is dropped
    pub fn capture() -> (LogBuffer, DefaultGuard) {
        let buffer = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (buffer, guard)
    }
}
