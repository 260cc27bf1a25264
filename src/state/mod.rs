//! Job state machine implementation
//!
//! Job states: queued → running → {completed | failed | cancelled}
//! with cancelling as the intermediate state observed while a cancel
//! request is pending.

mod job_record;

pub use job_record::{JobRecord, JobStateError, JobStatus, JobUpdate, INTERRUPTED_ERROR};

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}
