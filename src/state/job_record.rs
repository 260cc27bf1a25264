//! Job record and its state machine
//!
//! Job states: queued → running → {completed | failed | cancelled}
//! with cancelling as intermediate state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use recon_protocol::ops::JobState;

use super::TerminalState;

/// Error string stored on jobs that were interrupted by a restart.
pub const INTERRUPTED_ERROR: &str = "interrupted by service restart; resubmit the job";

/// Fallback error text for a failure reported without a diagnostic.
const UNKNOWN_FAILURE: &str = "job failed without a diagnostic";

/// Job status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is queued, waiting for its worker
    Queued,
    /// Worker is executing the job
    Running,
    /// Cancellation has been requested (intermediate state)
    Cancelling,
    /// Job completed successfully
    Completed,
    /// Job failed
    Failed,
    /// Job was cancelled
    Cancelled,
}

impl TerminalState for JobStatus {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl JobStatus {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        match (self, target) {
            // From queued
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued, JobStatus::Cancelling) => true,
            (JobStatus::Queued, JobStatus::Cancelled) => true, // Cancelled before a slot opened
            (JobStatus::Queued, JobStatus::Failed) => true, // Worker never started

            // From running
            (JobStatus::Running, JobStatus::Cancelling) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Cancelled) => true,

            // From cancelling
            (JobStatus::Cancelling, JobStatus::Cancelled) => true,
            (JobStatus::Cancelling, JobStatus::Failed) => true,
            (JobStatus::Cancelling, JobStatus::Completed) => true, // Finished before the checkpoint

            // Terminal states cannot transition
            _ => false,
        }
    }

    /// Queued, running or cancelling
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Lowercase name used in records and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<JobStatus> for JobState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => JobState::Queued,
            JobStatus::Running => JobState::Running,
            JobStatus::Cancelling => JobState::Cancelling,
            JobStatus::Completed => JobState::Completed,
            JobStatus::Failed => JobState::Failed,
            JobStatus::Cancelled => JobState::Cancelled,
        }
    }
}

/// Errors for job state operations
#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job is in terminal state {0}")]
    TerminalState(JobStatus),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A single reconstruction job.
///
/// This is also the persisted document: one flat JSON object per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identifier
    pub job_id: String,

    /// Current lifecycle state
    pub status: JobStatus,

    /// Completion estimate, 0-100
    pub progress: u8,

    /// Human-readable current step
    pub message: String,

    /// Uploaded source image
    pub input_path: PathBuf,

    /// Where the reconstructed image is written
    pub output_path: PathBuf,

    /// Cooperative cancellation flag
    pub cancel_requested: bool,

    /// Diagnostic, present only when failed
    pub error: Option<String>,

    /// When the worker picked the job up
    pub start_time: Option<DateTime<Utc>>,

    /// Wall-clock duration of the run
    pub elapsed_seconds: Option<f64>,
}

/// A partial update merged into a record under the store lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub elapsed_seconds: Option<f64>,
}

impl JobUpdate {
    /// Progress report from the collaborator
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        Self {
            progress: Some(percent),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Status change
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, percent: u8) -> Self {
        self.progress = Some(percent);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_elapsed(mut self, seconds: f64) -> Self {
        self.elapsed_seconds = Some(seconds);
        self
    }
}

impl JobRecord {
    /// Create a new job in queued state
    pub fn new(job_id: impl Into<String>, input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            progress: 0,
            message: "queued".to_string(),
            input_path,
            output_path,
            cancel_requested: false,
            error: None,
            start_time: None,
            elapsed_seconds: None,
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_status: JobStatus) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::TerminalState(self.status));
        }
        if !self.status.can_transition_to(new_status) {
            return Err(JobStateError::InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }

        self.status = new_status;
        Ok(())
    }

    /// Worker pickup (queued → running).
    ///
    /// A job whose cancel already landed keeps its cancelling status so the
    /// worker's first checkpoint can honor it.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::TerminalState(self.status));
        }
        if self.status == JobStatus::Queued {
            self.transition(JobStatus::Running)?;
            self.message = "starting".to_string();
        }
        self.start_time = Some(at);
        Ok(())
    }

    /// Request cancellation (queued/running → cancelling)
    pub fn request_cancel(&mut self) -> Result<(), JobStateError> {
        self.transition(JobStatus::Cancelling)?;
        self.cancel_requested = true;
        self.message = "cancelling".to_string();
        Ok(())
    }

    /// Force a non-terminal record left behind by a previous process to failed.
    pub fn interrupt(&mut self, now: DateTime<Utc>) -> Result<(), JobStateError> {
        self.transition(JobStatus::Failed)?;
        self.message = "interrupted".to_string();
        self.error = Some(INTERRUPTED_ERROR.to_string());
        if self.elapsed_seconds.is_none() {
            self.elapsed_seconds = self
                .start_time
                .map(|start| (now - start).num_milliseconds().max(0) as f64 / 1000.0);
        }
        Ok(())
    }

    /// Merge a partial update.
    ///
    /// The status change is validated first so a rejected update leaves the
    /// record untouched. Progress never moves backwards and `error` is kept
    /// only on failed records.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::TerminalState(self.status));
        }
        if let Some(status) = update.status {
            if status != self.status {
                self.transition(status)?;
            }
        }

        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        // A pending cancel keeps its message until the job settles
        if let Some(message) = update.message {
            if self.status != JobStatus::Cancelling {
                self.message = message;
            }
        }
        if let Some(elapsed) = update.elapsed_seconds {
            self.elapsed_seconds = Some(elapsed);
        }

        if self.status == JobStatus::Failed {
            let error = update
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_FAILURE.to_string());
            self.error = Some(error);
        }

        Ok(())
    }

    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), JobStateError> {
        let json = self.to_json()?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, JobStateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(job_id: &str) -> JobRecord {
        JobRecord::new(
            job_id,
            PathBuf::from("uploads/in.png"),
            PathBuf::from(format!("outputs/{}.png", job_id)),
        )
    }

    #[test]
    fn test_new_record() {
        let rec = record("job-1");
        assert_eq!(rec.status, JobStatus::Queued);
        assert_eq!(rec.progress, 0);
        assert_eq!(rec.message, "queued");
        assert!(!rec.cancel_requested);
        assert!(rec.error.is_none());
        assert!(rec.start_time.is_none());
    }

    #[test]
    fn test_happy_path() {
        let mut rec = record("job-1");
        rec.start(Utc::now()).unwrap();
        assert_eq!(rec.status, JobStatus::Running);
        assert_eq!(rec.message, "starting");
        assert!(rec.start_time.is_some());

        rec.apply(JobUpdate::progress(40, "preprocessing")).unwrap();
        rec.apply(JobUpdate::status(JobStatus::Completed).with_progress(100))
            .unwrap();
        assert_eq!(rec.status, JobStatus::Completed);
        assert_eq!(rec.progress, 100);
        assert!(rec.error.is_none());
    }

    #[test]
    fn test_start_keeps_pending_cancel() {
        let mut rec = record("job-1");
        rec.request_cancel().unwrap();
        rec.start(Utc::now()).unwrap();

        assert_eq!(rec.status, JobStatus::Cancelling);
        assert_eq!(rec.message, "cancelling");
        assert!(rec.start_time.is_some());
    }

    #[test]
    fn test_cancel_only_once() {
        let mut rec = record("job-1");
        rec.start(Utc::now()).unwrap();
        assert!(rec.request_cancel().is_ok());
        assert!(rec.cancel_requested);
        assert!(matches!(
            rec.request_cancel(),
            Err(JobStateError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_progress_after_cancel_keeps_cancelling_message() {
        let mut rec = record("job-1");
        rec.start(Utc::now()).unwrap();
        rec.apply(JobUpdate::progress(20, "reading input")).unwrap();
        rec.request_cancel().unwrap();

        rec.apply(JobUpdate::progress(35, "preprocessing")).unwrap();
        assert_eq!(rec.status, JobStatus::Cancelling);
        assert_eq!(rec.progress, 35);
        assert_eq!(rec.message, "cancelling");

        rec.apply(JobUpdate::status(JobStatus::Cancelled).with_message("cancelled by user"))
            .unwrap();
        assert_eq!(rec.message, "cancelled by user");
    }

    #[test]
    fn test_cancelling_can_complete() {
        let mut rec = record("job-1");
        rec.start(Utc::now()).unwrap();
        rec.request_cancel().unwrap();

        // Collaborator returned before reaching a checkpoint
        rec.apply(JobUpdate::status(JobStatus::Completed)).unwrap();
        assert_eq!(rec.status, JobStatus::Completed);
    }

    #[test]
    fn test_terminal_is_absorbing() {
        let mut rec = record("job-1");
        rec.start(Utc::now()).unwrap();
        rec.apply(JobUpdate::status(JobStatus::Cancelled)).unwrap();

        for status in [JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
            assert!(matches!(
                rec.apply(JobUpdate::status(status)),
                Err(JobStateError::TerminalState(JobStatus::Cancelled))
            ));
        }
        assert!(rec.apply(JobUpdate::progress(80, "late")).is_err());
        assert!(rec.request_cancel().is_err());
        assert_eq!(rec.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_invalid_transition_leaves_record_untouched() {
        let mut rec = record("job-1");
        let result = rec.apply(JobUpdate::status(JobStatus::Completed).with_progress(100));
        assert!(result.is_err());
        assert_eq!(rec.status, JobStatus::Queued);
        assert_eq!(rec.progress, 0);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut rec = record("job-1");
        rec.start(Utc::now()).unwrap();
        rec.apply(JobUpdate::progress(60, "inference")).unwrap();
        rec.apply(JobUpdate::progress(30, "stale")).unwrap();
        assert_eq!(rec.progress, 60);
        assert_eq!(rec.message, "stale");

        rec.apply(JobUpdate::progress(250, "overflow")).unwrap();
        assert_eq!(rec.progress, 100);
    }

    #[test]
    fn test_error_only_on_failed() {
        let mut rec = record("job-1");
        rec.start(Utc::now()).unwrap();
        rec.apply(JobUpdate::progress(10, "x").with_error("ignored"))
            .unwrap();
        assert!(rec.error.is_none());

        rec.apply(JobUpdate::status(JobStatus::Failed).with_error(""))
            .unwrap();
        assert_eq!(rec.error.as_deref(), Some(UNKNOWN_FAILURE));
    }

    #[test]
    fn test_interrupt() {
        let mut rec = record("job-1");
        let start = Utc::now() - Duration::seconds(4);
        rec.start(start).unwrap();
        rec.apply(JobUpdate::progress(35, "preprocessing")).unwrap();

        rec.interrupt(start + Duration::seconds(4)).unwrap();
        assert_eq!(rec.status, JobStatus::Failed);
        assert_eq!(rec.error.as_deref(), Some(INTERRUPTED_ERROR));
        assert_eq!(rec.progress, 35);
        assert_eq!(rec.elapsed_seconds, Some(4.0));
    }

    #[test]
    fn test_interrupt_rejects_terminal() {
        let mut rec = record("job-1");
        rec.start(Utc::now()).unwrap();
        rec.apply(JobUpdate::status(JobStatus::Completed)).unwrap();
        assert!(rec.interrupt(Utc::now()).is_err());
        assert_eq!(rec.status, JobStatus::Completed);
    }

    #[test]
    fn test_serialization_uses_flat_field_names() {
        let rec = record("job-456");
        let json = rec.to_json().unwrap();

        for field in [
            "job_id",
            "status",
            "progress",
            "message",
            "input_path",
            "output_path",
            "cancel_requested",
            "error",
            "start_time",
            "elapsed_seconds",
        ] {
            assert!(json.contains(&format!("\"{}\"", field)), "missing {}", field);
        }
        assert!(json.contains("\"status\": \"queued\""));
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job-1.json");

        let mut rec = record("job-1");
        rec.start(Utc::now()).unwrap();
        rec.write_to_file(&path).unwrap();

        let loaded = JobRecord::from_file(&path).unwrap();
        assert_eq!(loaded, rec);
        assert!(!dir.path().join("job-1.json.tmp").exists());
    }

    #[test]
    fn test_status_maps_to_wire_state() {
        assert_eq!(JobState::from(JobStatus::Cancelling), JobState::Cancelling);
        assert_eq!(JobState::from(JobStatus::Failed).as_str(), "failed");
    }
}
