//! Operation-specific types.

pub mod submit;
pub mod status;
pub mod cancel;
pub mod result;
pub mod health;
pub mod config;

pub use submit::{SubmitRequest, SubmitResponse};
pub use status::{JobState, JobView, ListResponse, StatusRequest};
pub use cancel::{CancelRequest, CancelResponse};
pub use result::{ResultRequest, ResultResponse};
pub use health::HealthResponse;
pub use config::{ConfigResponse, UploadLimits};

/// Known operation names.
pub mod names {
    pub const HEALTH: &str = "health";
    pub const SUBMIT: &str = "submit";
    pub const STATUS: &str = "status";
    pub const CANCEL: &str = "cancel";
    pub const RESULT: &str = "result";
    pub const LIST: &str = "list";
    pub const CONFIG: &str = "config";
}
