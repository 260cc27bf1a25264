//! Cancel operation types.
//!
//! Cancellation is a request: the worker stops at its next checkpoint.

use serde::{Deserialize, Serialize};
use super::status::JobState;

/// Cancel request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    /// The job ID to cancel.
    pub job_id: String,
}

/// Cancel response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    /// The job ID.
    pub job_id: String,
    /// Job state after the cancel request.
    pub status: JobState,
    /// Whether cancellation was acknowledged.
    pub cancelled: bool,
}
