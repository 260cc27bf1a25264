//! Error types for the RPC protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned in RPC error responses.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, missing required fields, or invalid field values.
    InvalidRequest,
    /// Protocol version is outside the supported range.
    UnsupportedProtocol,
    /// Unknown operation requested.
    UnknownOperation,
    /// Job not found.
    JobNotFound,
    /// Result requested before the job completed.
    JobNotCompleted,
    /// Job completed but its output file is gone.
    ResultMissing,
    /// Cancellation rejected because the job already finished.
    CancelRejected,
    /// Uploaded file failed validation.
    InvalidUpload,
    /// Upload exceeds the maximum allowed size.
    PayloadTooLarge,
    /// Unexpected server-side failure.
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::UnsupportedProtocol => write!(f, "UNSUPPORTED_PROTOCOL"),
            Self::UnknownOperation => write!(f, "UNKNOWN_OPERATION"),
            Self::JobNotFound => write!(f, "JOB_NOT_FOUND"),
            Self::JobNotCompleted => write!(f, "JOB_NOT_COMPLETED"),
            Self::ResultMissing => write!(f, "RESULT_MISSING"),
            Self::CancelRejected => write!(f, "CANCEL_REJECTED"),
            Self::InvalidUpload => write!(f, "INVALID_UPLOAD"),
            Self::PayloadTooLarge => write!(f, "PAYLOAD_TOO_LARGE"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// RPC error response payload.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable, single-line error message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Create a new RPC error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new RPC error with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create an UNSUPPORTED_PROTOCOL error.
    pub fn unsupported_protocol(version: i32, min: i32, max: i32) -> Self {
        Self::with_data(
            ErrorCode::UnsupportedProtocol,
            format!("protocol_version {} is outside supported range [{}, {}]", version, min, max),
            serde_json::json!({
                "requested": version,
                "min": min,
                "max": max
            }),
        )
    }

    /// Create an UNKNOWN_OPERATION error.
    pub fn unknown_operation(op: &str) -> Self {
        Self::with_data(
            ErrorCode::UnknownOperation,
            format!("unknown operation: {}", op),
            serde_json::json!({ "op": op }),
        )
    }

    /// Create a JOB_NOT_FOUND error.
    pub fn job_not_found(job_id: &str) -> Self {
        Self::with_data(
            ErrorCode::JobNotFound,
            format!("job '{}' not found", job_id),
            serde_json::json!({ "job_id": job_id }),
        )
    }

    /// Create a JOB_NOT_COMPLETED error.
    pub fn job_not_completed(job_id: &str, status: &str) -> Self {
        Self::with_data(
            ErrorCode::JobNotCompleted,
            format!("job '{}' is not completed (status: {})", job_id, status),
            serde_json::json!({ "job_id": job_id, "status": status }),
        )
    }

    /// Create a RESULT_MISSING error.
    pub fn result_missing(job_id: &str) -> Self {
        Self::with_data(
            ErrorCode::ResultMissing,
            format!("result for job '{}' is missing", job_id),
            serde_json::json!({ "job_id": job_id }),
        )
    }

    /// Create a CANCEL_REJECTED error.
    pub fn cancel_rejected(job_id: &str, status: &str) -> Self {
        Self::with_data(
            ErrorCode::CancelRejected,
            format!("job '{}' cannot be cancelled (status: {})", job_id, status),
            serde_json::json!({ "job_id": job_id, "status": status }),
        )
    }

    /// Create an INVALID_UPLOAD error.
    pub fn invalid_upload(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidUpload, message)
    }

    /// Create a PAYLOAD_TOO_LARGE error.
    pub fn payload_too_large(size: u64, max: u64) -> Self {
        Self::with_data(
            ErrorCode::PayloadTooLarge,
            format!("payload size {} exceeds maximum {}", size, max),
            serde_json::json!({ "size": size, "max_bytes": max }),
        )
    }

    /// Create an INTERNAL error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::JobNotCompleted).unwrap();
        assert_eq!(json, "\"JOB_NOT_COMPLETED\"");
        assert_eq!(ErrorCode::JobNotCompleted.to_string(), "JOB_NOT_COMPLETED");
    }

    #[test]
    fn test_display_includes_code() {
        let err = RpcError::job_not_found("j1");
        assert_eq!(err.to_string(), "JOB_NOT_FOUND: job 'j1' not found");
        assert_eq!(err.data.unwrap()["job_id"], "j1");
    }

    #[test]
    fn test_data_omitted_when_absent() {
        let err = RpcError::invalid_request("bad");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("data").is_none());
    }
}
