//! Job lifecycle manager
//!
//! The public face of the lane. Opening a manager loads persisted records
//! and reconciles interrupted ones before any new job can be accepted.
//!
//! ## Lifecycle
//!
//! ```text
//! enqueue ──► queued ──► running ──► completed
//!               │          │    └──► failed
//!               │          ▼
//!               └──► cancelling ──► cancelled
//! ```
//!
//! Every accepted job runs on its own worker thread; callers observe it only
//! through snapshots returned by [`JobManager::get`] and [`JobManager::list`].

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::config::LaneConfig;
use crate::dispatch::Dispatcher;
use crate::reconstruct::{Reconstructor, ReconstructorInfo};
use crate::state::{now_utc, JobRecord, JobStatus, JobUpdate};
use crate::store::{
    load_and_reconcile, FileJobPersistence, JobPersistence, JobStore, NoopPersistence,
    PersistError, ReconcileReport,
};

/// How often the wait helpers re-read the store.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors from accepting a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job id must not be empty")]
    EmptyJobId,

    #[error("job id {0:?} may only use letters, digits, '-', '_' and '.'")]
    InvalidJobId(String),

    #[error("could not start worker for job {job_id}: {source}")]
    Spawn {
        job_id: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Errors from looking up a job's result.
#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {job_id} is {status}, not completed")]
    NotCompleted { job_id: String, status: JobStatus },

    #[error("output file missing: {}", .0.display())]
    OutputMissing(PathBuf),
}

/// Job ids name files on disk; reject empty ids and anything path-like.
pub fn check_job_id(job_id: &str) -> Result<(), JobError> {
    if job_id.is_empty() {
        return Err(JobError::EmptyJobId);
    }
    let safe = job_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !safe || job_id == "." || job_id == ".." {
        return Err(JobError::InvalidJobId(job_id.to_string()));
    }
    Ok(())
}

pub struct JobManager {
    store: Arc<JobStore>,
    dispatcher: Dispatcher,
    outputs_dir: PathBuf,
    reconcile_report: ReconcileReport,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("store", &self.store)
            .field("outputs_dir", &self.outputs_dir)
            .finish_non_exhaustive()
    }
}

impl JobManager {
    /// Load, reconcile and restore persisted jobs, then accept work.
    pub fn open(
        config: &LaneConfig,
        reconstructor: Arc<dyn Reconstructor>,
        persistence: Arc<dyn JobPersistence>,
    ) -> Result<Self, JobError> {
        let (records, report) = load_and_reconcile(persistence.as_ref(), now_utc())?;
        info!(summary = %report.summary(), "job state reconciled");

        let store = Arc::new(JobStore::new(persistence));
        store.restore(records);

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            reconstructor,
            config.jobs.max_concurrent_jobs,
        );

        Ok(Self {
            store,
            dispatcher,
            outputs_dir: config.directories.outputs_path(),
            reconcile_report: report,
        })
    }

    /// Open with file persistence under the state directory, or none when
    /// `jobs.persist` is off.
    pub fn from_config(
        config: &LaneConfig,
        reconstructor: Arc<dyn Reconstructor>,
    ) -> Result<Self, JobError> {
        let persistence: Arc<dyn JobPersistence> = if config.jobs.persist {
            Arc::new(FileJobPersistence::open(config.directories.state_path())?)
        } else {
            Arc::new(NoopPersistence)
        };
        Self::open(config, reconstructor, persistence)
    }

    /// What startup reconciliation found.
    pub fn reconcile_report(&self) -> &ReconcileReport {
        &self.reconcile_report
    }

    /// Where the output for `job_id` will be written.
    pub fn output_path_for(&self, job_id: &str) -> PathBuf {
        self.outputs_dir.join(format!("{}.png", job_id))
    }

    /// Accept a job and start its worker.
    ///
    /// Re-using an id overwrites the previous record; the previous worker, if
    /// any, can no longer write to it.
    pub fn enqueue(&self, job_id: &str, input_path: impl Into<PathBuf>) -> Result<(), JobError> {
        check_job_id(job_id)?;

        let record = JobRecord::new(job_id, input_path.into(), self.output_path_for(job_id));
        let generation = self.store.insert(record);
        info!(job_id, generation, "job queued");

        match self.dispatcher.dispatch(job_id, generation) {
            // Detached: the worker reports through the store
            Ok(_handle) => Ok(()),
            Err(source) => {
                error!(job_id, error = %source, "failed to spawn worker");
                self.store.update(
                    job_id,
                    generation,
                    JobUpdate::status(JobStatus::Failed)
                        .with_message("failed")
                        .with_error(format!("worker could not be started: {}", source)),
                );
                Err(JobError::Spawn {
                    job_id: job_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Snapshot of a job.
    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.store.get(job_id)
    }

    /// Snapshot of every job, sorted by id.
    pub fn list(&self) -> Vec<JobRecord> {
        self.store.list()
    }

    /// Request cooperative cancellation.
    ///
    /// True exactly once for a non-terminal job; false for unknown jobs,
    /// terminal jobs and repeated requests.
    pub fn cancel(&self, job_id: &str) -> bool {
        let accepted = self.store.cancel(job_id);
        if accepted {
            info!(job_id, "cancellation requested");
        }
        accepted
    }

    /// Request cancellation of every active job. Returns the ids accepted.
    pub fn cancel_all(&self) -> Vec<String> {
        self.store
            .active_ids()
            .into_iter()
            .filter(|id| self.cancel(id))
            .collect()
    }

    /// Number of queued, running or cancelling jobs.
    pub fn active_count(&self) -> usize {
        self.store.active_ids().len()
    }

    /// Output of a completed job, checked to still exist on disk.
    pub fn result_path(&self, job_id: &str) -> Result<PathBuf, ResultError> {
        let record = self
            .store
            .get(job_id)
            .ok_or_else(|| ResultError::NotFound(job_id.to_string()))?;

        if record.status != JobStatus::Completed {
            return Err(ResultError::NotCompleted {
                job_id: record.job_id,
                status: record.status,
            });
        }
        if !record.output_path.is_file() {
            return Err(ResultError::OutputMissing(record.output_path));
        }
        Ok(record.output_path)
    }

    /// Block until `job_id` is terminal or `timeout` passes.
    ///
    /// Returns the terminal snapshot, or `None` on timeout or unknown job.
    pub fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Option<JobRecord> {
        let deadline = Instant::now() + timeout;
        loop {
            let record = self.store.get(job_id)?;
            if record.is_terminal() {
                return Some(record);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Block until no job is active or `timeout` passes. True when idle.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.active_count() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
        true
    }

    /// Reconstructor description for health checks.
    pub fn reconstructor_info(&self) -> ReconstructorInfo {
        self.dispatcher.reconstructor().describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct::PassThroughReconstructor;
    use std::fs;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> LaneConfig {
        let mut config = LaneConfig::default();
        config.directories.data_dir = tmp.path().to_path_buf();
        config
    }

    fn manager(tmp: &TempDir) -> JobManager {
        JobManager::open(
            &config(tmp),
            Arc::new(PassThroughReconstructor::default()),
            Arc::new(NoopPersistence),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_ids() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);

        assert!(matches!(mgr.enqueue("", "in.png"), Err(JobError::EmptyJobId)));
        assert!(matches!(
            mgr.enqueue("../x", "in.png"),
            Err(JobError::InvalidJobId(_))
        ));
        assert!(mgr.list().is_empty());
    }

    #[test]
    fn test_output_path_layout() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        assert_eq!(mgr.output_path_for("abc"), tmp.path().join("outputs/abc.png"));
    }

    #[test]
    fn test_result_path() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        let input = tmp.path().join("in.png");
        fs::write(&input, crate::test_images::png_bytes()).unwrap();

        assert!(matches!(mgr.result_path("nope"), Err(ResultError::NotFound(_))));

        mgr.enqueue("job-1", &input).unwrap();
        let done = mgr.wait_for_terminal("job-1", Duration::from_secs(5)).unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        let path = mgr.result_path("job-1").unwrap();
        assert_eq!(path, done.output_path);
        assert!(image::open(&path).is_ok());

        fs::remove_file(&path).unwrap();
        assert!(matches!(
            mgr.result_path("job-1"),
            Err(ResultError::OutputMissing(_))
        ));
    }

    #[test]
    fn test_result_of_failed_job() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);

        mgr.enqueue("job-1", tmp.path().join("missing.png")).unwrap();
        let done = mgr.wait_for_terminal("job-1", Duration::from_secs(5)).unwrap();
        assert_eq!(done.status, JobStatus::Failed);

        match mgr.result_path("job-1") {
            Err(ResultError::NotCompleted { status, .. }) => assert_eq!(status, JobStatus::Failed),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_wait_for_unknown_job() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        assert!(mgr.wait_for_terminal("ghost", Duration::from_millis(50)).is_none());
        assert!(mgr.wait_for_idle(Duration::from_millis(50)));
    }
}
