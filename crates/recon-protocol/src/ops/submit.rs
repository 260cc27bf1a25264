//! Submit operation types.
//!
//! A job is submitted either by pointing at an existing file or by sending
//! the image inline as base64.

use serde::{Deserialize, Serialize};
use super::status::JobState;

/// Submit request payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Caller-chosen job ID. A fresh ID is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Path to an image already on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    /// Original filename of an inline upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Inline image bytes, standard base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
}

/// Submit response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// The job ID.
    pub job_id: String,
    /// State right after acceptance.
    pub status: JobState,
}
