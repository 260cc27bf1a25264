//! RPC request types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// RPC request envelope.
///
/// Each request occupies exactly one line on the input stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol version spoken by the caller.
    pub protocol_version: i32,
    /// Operation name.
    pub op: String,
    /// Caller-chosen request ID for correlation.
    pub request_id: String,
    /// Operation-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RpcRequest {
    /// Build a request for the current protocol version.
    pub fn new(op: impl Into<String>, request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_MAX,
            op: op.into(),
            request_id: request_id.into(),
            payload,
        }
    }

    /// Decode the payload into an operation-specific request type.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            RpcError::invalid_request(format!("invalid {} request: {}", self.op, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::StatusRequest;
    use crate::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let req: RpcRequest =
            serde_json::from_str(r#"{"protocol_version":1,"op":"health","request_id":"r1"}"#).unwrap();
        assert!(req.payload.is_null());
    }

    #[test]
    fn test_parse_payload() {
        let req = RpcRequest::new("status", "r2", json!({"job_id": "abc"}));
        let status: StatusRequest = req.parse_payload().unwrap();
        assert_eq!(status.job_id, "abc");
    }

    #[test]
    fn test_parse_payload_reports_op() {
        let req = RpcRequest::new("status", "r3", json!({"nope": 1}));
        let err = req.parse_payload::<StatusRequest>().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        assert!(err.message.contains("status"));
    }
}
