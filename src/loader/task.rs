use anyhow::{Result, anyhow, bail};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::job::LoadReport;

/// A load job running as one background task
pub struct LoadHandle {
    job_id: String,
    handle: JoinHandle<Result<LoadReport>>,
}

impl LoadHandle {
    pub(crate) fn new(job_id: String, handle: JoinHandle<Result<LoadReport>>) -> Self {
        Self { job_id, handle }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Stop the job at its next await point. Chunks already inserted stay in
    /// the table.
    pub fn cancel(&self) {
        warn!("Cancelling load job {}", self.job_id);
        self.handle.abort();
    }

    /// Wait for the job and return its report. After a cancel this reports
    /// the cancellation.
    pub async fn join(&mut self) -> Result<LoadReport> {
        match (&mut self.handle).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => bail!("Load job {} was cancelled", self.job_id),
            Err(e) => {
                error!("Load job {} panicked: {}", self.job_id, e);
                Err(anyhow!("Load job {} panicked: {}", self.job_id, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_reports_cancellation() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Err(anyhow!("unreachable"))
        });
        let mut load = LoadHandle::new("job-1".to_string(), handle);

        assert_eq!(load.job_id(), "job-1");
        load.cancel();

        let err = load.join().await.unwrap_err();
        assert!(err.to_string().contains("job-1 was cancelled"));
    }

    #[tokio::test]
    async fn test_join_reports_panic() {
        let handle = tokio::spawn(async {
            if true {
                panic!("boom");
            }
            Err(anyhow!("unreachable"))
        });
        let mut load = LoadHandle::new("job-2".to_string(), handle);

        let err = load.join().await.unwrap_err();
        assert!(err.to_string().contains("job-2 panicked"));
    }
}
