//! Config operation types.

use serde::{Deserialize, Serialize};

/// Config response payload: the limits a front end should enforce
/// before submitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub upload: UploadLimits,
}

/// Upload limits in effect for this lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadLimits {
    /// Maximum upload size in megabytes, as configured.
    pub max_size_mb: f64,
    /// The same limit in bytes.
    pub max_size_bytes: u64,
    /// Accepted filename extensions, lowercase with a leading dot.
    pub allowed_extensions: Vec<String>,
    /// Media types whose content is accepted.
    pub allowed_media_types: Vec<String>,
}
