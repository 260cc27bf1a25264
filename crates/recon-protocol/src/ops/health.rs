//! Health operation types.

use serde::{Deserialize, Serialize};

/// Health response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok" when the lane answers.
    pub status: String,
    /// Lane version.
    pub version: String,
    /// Name of the active reconstructor.
    pub reconstructor: String,
    /// Whether a model is loaded.
    pub model_loaded: bool,
    /// Device used for reconstruction ("cpu" or "cuda").
    pub device: String,
    /// Jobs currently queued, running or cancelling.
    pub active_jobs: usize,
}
