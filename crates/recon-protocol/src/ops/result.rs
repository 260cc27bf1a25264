//! Result operation types.

use serde::{Deserialize, Serialize};

/// Result request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRequest {
    /// The job ID.
    pub job_id: String,
}

/// Result response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultResponse {
    /// The job ID.
    pub job_id: String,
    /// Absolute path of the reconstructed image.
    pub output_path: String,
    /// File name offered for download.
    pub filename: String,
    /// Size of the output in bytes.
    pub size_bytes: u64,
    /// Media type of the output.
    pub media_type: String,
}
