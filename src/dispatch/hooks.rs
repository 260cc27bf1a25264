//! Progress and cancellation handles given to the reconstructor.
//!
//! Both are plain handles onto the job store, scoped to one job and one
//! worker generation. They never hold the store lock across a call back
//! into the reconstructor.

use std::sync::Arc;

use tracing::debug;

use crate::reconstruct::ReconstructError;
use crate::state::JobUpdate;
use crate::store::JobStore;

/// Writes progress reports back into the store.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    store: Arc<JobStore>,
    job_id: String,
    generation: u64,
}

impl ProgressSink {
    pub fn new(store: Arc<JobStore>, job_id: impl Into<String>, generation: u64) -> Self {
        Self {
            store,
            job_id: job_id.into(),
            generation,
        }
    }

    /// Record `percent` (0-100) and a short step description.
    ///
    /// Reports arriving after the job reached a terminal status, or from a
    /// superseded worker, are dropped.
    pub fn report(&self, percent: u8, message: &str) {
        debug!(job_id = %self.job_id, percent, message, "progress");
        self.store
            .update(&self.job_id, self.generation, JobUpdate::progress(percent, message));
    }
}

/// Read side of the cooperative cancellation flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    store: Arc<JobStore>,
    job_id: String,
    generation: u64,
}

impl CancellationToken {
    pub fn new(store: Arc<JobStore>, job_id: impl Into<String>, generation: u64) -> Self {
        Self {
            store,
            job_id: job_id.into(),
            generation,
        }
    }

    /// Whether cancellation has been requested for this job.
    pub fn is_requested(&self) -> bool {
        self.store.is_cancel_requested(&self.job_id, self.generation)
    }

    /// Checkpoint: `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<(), ReconstructError> {
        if self.is_requested() {
            Err(ReconstructError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{JobRecord, JobStatus};
    use std::path::PathBuf;

    fn store_with_job() -> (Arc<JobStore>, u64) {
        let store = Arc::new(JobStore::in_memory());
        let gen = store.insert(JobRecord::new(
            "job-1",
            PathBuf::from("in.png"),
            PathBuf::from("out.png"),
        ));
        store.update("job-1", gen, JobUpdate::status(JobStatus::Running));
        (store, gen)
    }

    #[test]
    fn test_report_updates_store() {
        let (store, gen) = store_with_job();
        let sink = ProgressSink::new(Arc::clone(&store), "job-1", gen);

        sink.report(35, "preprocessing");
        let rec = store.get("job-1").unwrap();
        assert_eq!(rec.progress, 35);
        assert_eq!(rec.message, "preprocessing");
    }

    #[test]
    fn test_report_while_cancelling_keeps_status() {
        let (store, gen) = store_with_job();
        let sink = ProgressSink::new(Arc::clone(&store), "job-1", gen);
        store.cancel("job-1");

        sink.report(70, "running model");
        let rec = store.get("job-1").unwrap();
        assert_eq!(rec.status, JobStatus::Cancelling);
        assert_eq!(rec.progress, 70);
        assert_eq!(rec.message, "cancelling");
    }

    #[test]
    fn test_token_follows_cancel() {
        let (store, gen) = store_with_job();
        let token = CancellationToken::new(Arc::clone(&store), "job-1", gen);

        assert!(!token.is_requested());
        assert!(token.check().is_ok());

        store.cancel("job-1");
        assert!(token.is_requested());
        assert!(matches!(token.check(), Err(ReconstructError::Cancelled)));
    }

    #[test]
    fn test_superseded_token_reads_cancelled() {
        let (store, gen) = store_with_job();
        let token = CancellationToken::new(Arc::clone(&store), "job-1", gen);

        store.insert(JobRecord::new(
            "job-1",
            PathBuf::from("other.png"),
            PathBuf::from("out.png"),
        ));
        assert!(token.is_requested());
    }
}
