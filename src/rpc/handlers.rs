//! Per-operation request handlers.

use std::path::Path;

use base64::Engine;
use recon_protocol::ops::{
    CancelRequest, CancelResponse, ConfigResponse, HealthResponse, JobState, JobView,
    ListResponse, ResultRequest, ResultResponse, StatusRequest, SubmitRequest, SubmitResponse,
    UploadLimits,
};
use recon_protocol::{RpcError, RpcRequest, LANE_VERSION};
use serde::Serialize;
use tracing::{info, warn};

use crate::manager::{check_job_id, JobError, JobManager, ResultError};
use crate::state::JobRecord;
use crate::upload::{ImageKind, UploadError, UploadValidator};

/// Outputs are always written as PNG.
const RESULT_MEDIA_TYPE: &str = "image/png";

fn to_payload<T: Serialize>(response: &T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(response)
        .map_err(|e| RpcError::internal(format!("failed to serialize response: {}", e)))
}

pub(crate) fn job_view(record: &JobRecord) -> JobView {
    JobView {
        job_id: record.job_id.clone(),
        status: record.status.into(),
        progress: record.progress,
        message: record.message.clone(),
        input_path: record.input_path.display().to_string(),
        output_path: record.output_path.display().to_string(),
        cancel_requested: record.cancel_requested,
        error: record.error.clone(),
        start_time: record.start_time,
        elapsed_seconds: record.elapsed_seconds,
    }
}

fn upload_error(e: UploadError) -> RpcError {
    match e {
        UploadError::TooLarge { size, max } => RpcError::payload_too_large(size, max),
        UploadError::Io { .. } => RpcError::internal(e.to_string()),
        other => RpcError::invalid_upload(other.to_string()),
    }
}

fn job_error(e: JobError) -> RpcError {
    match e {
        JobError::EmptyJobId | JobError::InvalidJobId(_) => RpcError::invalid_request(e.to_string()),
        other => RpcError::internal(other.to_string()),
    }
}

pub fn health(manager: &JobManager) -> Result<serde_json::Value, RpcError> {
    let info = manager.reconstructor_info();
    to_payload(&HealthResponse {
        status: "ok".to_string(),
        version: LANE_VERSION.to_string(),
        reconstructor: info.name,
        model_loaded: info.model_loaded,
        device: info.device,
        active_jobs: manager.active_count(),
    })
}

/// Upload limits a front end checks before submitting.
pub fn config(uploads: &UploadValidator) -> Result<serde_json::Value, RpcError> {
    to_payload(&ConfigResponse {
        upload: UploadLimits {
            max_size_mb: uploads.max_size_mb(),
            max_size_bytes: uploads.max_bytes(),
            allowed_extensions: uploads.allowed_extensions().to_vec(),
            allowed_media_types: ImageKind::ALL
                .iter()
                .map(|k| k.media_type().to_string())
                .collect(),
        },
    })
}

/// Store the upload, then enqueue a job for it.
pub fn submit(
    request: &RpcRequest,
    manager: &JobManager,
    uploads: &UploadValidator,
) -> Result<serde_json::Value, RpcError> {
    let req: SubmitRequest = request.parse_payload()?;

    let job_id = match req.job_id {
        Some(id) => id,
        None => uuid::Uuid::new_v4().simple().to_string(),
    };
    check_job_id(&job_id).map_err(job_error)?;

    let stored = match (req.input_path, req.filename, req.data_base64) {
        (Some(path), None, None) => uploads.import(&job_id, Path::new(&path)),
        (None, Some(filename), Some(data)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| RpcError::invalid_upload(format!("invalid base64 data: {}", e)))?;
            uploads.save(&job_id, &filename, &bytes)
        }
        _ => {
            return Err(RpcError::invalid_request(
                "submit needs either input_path or filename with data_base64",
            ))
        }
    }
    .map_err(upload_error)?;

    manager.enqueue(&job_id, stored).map_err(job_error)?;
    let status: JobState = manager
        .get(&job_id)
        .map(|r| r.status.into())
        .ok_or_else(|| RpcError::internal(format!("job {} vanished after enqueue", job_id)))?;

    info!(job_id = %job_id, "job submitted");
    to_payload(&SubmitResponse { job_id, status })
}

pub fn status(request: &RpcRequest, manager: &JobManager) -> Result<serde_json::Value, RpcError> {
    let req: StatusRequest = request.parse_payload()?;
    let record = manager
        .get(&req.job_id)
        .ok_or_else(|| RpcError::job_not_found(&req.job_id))?;
    to_payload(&job_view(&record))
}

pub fn cancel(request: &RpcRequest, manager: &JobManager) -> Result<serde_json::Value, RpcError> {
    let req: CancelRequest = request.parse_payload()?;

    if !manager.cancel(&req.job_id) {
        return Err(match manager.get(&req.job_id) {
            Some(record) => {
                warn!(job_id = %req.job_id, status = %record.status, "cancel rejected");
                RpcError::cancel_rejected(&req.job_id, record.status.as_str())
            }
            None => RpcError::job_not_found(&req.job_id),
        });
    }

    let status: JobState = manager
        .get(&req.job_id)
        .map(|r| r.status.into())
        .ok_or_else(|| RpcError::job_not_found(&req.job_id))?;
    to_payload(&CancelResponse {
        job_id: req.job_id,
        status,
        cancelled: true,
    })
}

pub fn result(request: &RpcRequest, manager: &JobManager) -> Result<serde_json::Value, RpcError> {
    let req: ResultRequest = request.parse_payload()?;

    let path = manager.result_path(&req.job_id).map_err(|e| match e {
        ResultError::NotFound(id) => RpcError::job_not_found(&id),
        ResultError::NotCompleted { job_id, status } => {
            RpcError::job_not_completed(&job_id, status.as_str())
        }
        ResultError::OutputMissing(path) => {
            warn!(job_id = %req.job_id, path = %path.display(), "result file missing");
            RpcError::result_missing(&req.job_id)
        }
    })?;

    let size_bytes = path
        .metadata()
        .map(|m| m.len())
        .map_err(|_| RpcError::result_missing(&req.job_id))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    to_payload(&ResultResponse {
        job_id: req.job_id,
        output_path: path.display().to_string(),
        filename,
        size_bytes,
        media_type: RESULT_MEDIA_TYPE.to_string(),
    })
}

pub fn list(manager: &JobManager) -> Result<serde_json::Value, RpcError> {
    to_payload(&ListResponse {
        jobs: manager.list().iter().map(job_view).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaneConfig;
    use crate::dispatch::{CancellationToken, ProgressSink};
    use crate::reconstruct::{PassThroughReconstructor, ReconstructError, Reconstructor, ReconstructorInfo};
    use crate::state::JobStatus;
    use crate::store::NoopPersistence;
    use recon_protocol::ErrorCode;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use crate::test_images::{jpeg_bytes, png_bytes};
    use tempfile::TempDir;

    /// Parks until cancelled.
    struct Stubborn;

    impl Reconstructor for Stubborn {
        fn reconstruct(
            &self,
            _input: &Path,
            _output: &Path,
            progress: &ProgressSink,
            cancel: &CancellationToken,
        ) -> Result<(), ReconstructError> {
            progress.report(10, "waiting");
            while !cancel.is_requested() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(ReconstructError::Cancelled)
        }

        fn describe(&self) -> ReconstructorInfo {
            ReconstructorInfo {
                name: "stubborn".to_string(),
                model_loaded: true,
                device: "cuda:0".to_string(),
            }
        }
    }

    struct Fixture {
        tmp: TempDir,
        manager: JobManager,
        uploads: UploadValidator,
    }

    fn fixture(reconstructor: Arc<dyn Reconstructor>) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let mut config = LaneConfig::default();
        config.directories.data_dir = tmp.path().to_path_buf();
        let manager = JobManager::open(&config, reconstructor, Arc::new(NoopPersistence)).unwrap();
        let uploads = UploadValidator::new(&config.upload, config.directories.uploads_path());
        Fixture {
            tmp,
            manager,
            uploads,
        }
    }

    fn request(op: &str, payload: serde_json::Value) -> RpcRequest {
        RpcRequest::new(op, "req-1", payload)
    }

    #[test]
    fn test_health() {
        let f = fixture(Arc::new(Stubborn));
        let payload = health(&f.manager).unwrap();
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["reconstructor"], "stubborn");
        assert_eq!(payload["model_loaded"], true);
        assert_eq!(payload["device"], "cuda:0");
        assert_eq!(payload["active_jobs"], 0);
    }

    #[test]
    fn test_config_reports_upload_limits() {
        let tmp = TempDir::new().unwrap();
        let mut lane = LaneConfig::default();
        lane.upload.max_size_mb = 2.5;
        lane.upload.allowed_extensions = vec![".PNG".to_string(), ".webp".to_string()];
        let uploads = UploadValidator::new(&lane.upload, tmp.path().join("uploads"));

        let payload = config(&uploads).unwrap();
        let upload = &payload["upload"];
        assert_eq!(upload["max_size_mb"], 2.5);
        assert_eq!(upload["max_size_bytes"], 2_621_440);
        assert_eq!(upload["allowed_extensions"], json!([".png", ".webp"]));
        assert_eq!(
            upload["allowed_media_types"],
            json!(["image/png", "image/jpeg", "image/webp"])
        );
    }

    #[test]
    fn test_submit_base64_then_result() {
        let f = fixture(Arc::new(PassThroughReconstructor::default()));
        let data = base64::engine::general_purpose::STANDARD.encode(jpeg_bytes());

        let payload = submit(
            &request("submit", json!({"filename": "scan.jpg", "data_base64": data})),
            &f.manager,
            &f.uploads,
        )
        .unwrap();
        let job_id = payload["job_id"].as_str().unwrap().to_string();
        assert_eq!(job_id.len(), 32);
        assert!(f.tmp.path().join(format!("uploads/{}_scan.jpg", job_id)).exists());

        let done = f.manager.wait_for_terminal(&job_id, Duration::from_secs(5)).unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        let payload = result(&request("result", json!({"job_id": job_id})), &f.manager).unwrap();
        assert_eq!(payload["filename"], format!("{}.png", job_id));
        assert_eq!(payload["media_type"], "image/png");
        let written = std::fs::read(&done.output_path).unwrap();
        assert_eq!(payload["size_bytes"], written.len());
        assert!(written.starts_with(b"\x89PNG\r\n\x1a\n"));
    }

    #[test]
    fn test_submit_rejections() {
        let f = fixture(Arc::new(PassThroughReconstructor::default()));

        let err = submit(&request("submit", json!({})), &f.manager, &f.uploads).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        let err = submit(
            &request("submit", json!({"filename": "a.png", "data_base64": "!!!"})),
            &f.manager,
            &f.uploads,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUpload);

        let err = submit(
            &request("submit", json!({"job_id": "../etc", "input_path": "/tmp/x.png"})),
            &f.manager,
            &f.uploads,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);

        let err = submit(
            &request("submit", json!({"input_path": "/definitely/not/here.png"})),
            &f.manager,
            &f.uploads,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUpload);
        assert!(f.manager.list().is_empty());
    }

    #[test]
    fn test_submit_too_large() {
        let f = fixture(Arc::new(PassThroughReconstructor::default()));
        let big = vec![0u8; (f.uploads.max_bytes() + 1) as usize];
        let data = base64::engine::general_purpose::STANDARD.encode(big);

        let err = submit(
            &request("submit", json!({"filename": "a.png", "data_base64": data})),
            &f.manager,
            &f.uploads,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::PayloadTooLarge);
    }

    #[test]
    fn test_status_cancel_and_result_errors() {
        let f = fixture(Arc::new(Stubborn));
        let input = f.tmp.path().join("in.png");
        std::fs::write(&input, png_bytes()).unwrap();
        f.manager.enqueue("job-1", &input).unwrap();

        let err = status(&request("status", json!({"job_id": "ghost"})), &f.manager).unwrap_err();
        assert_eq!(err.code, ErrorCode::JobNotFound);

        let err = result(&request("result", json!({"job_id": "job-1"})), &f.manager).unwrap_err();
        assert_eq!(err.code, ErrorCode::JobNotCompleted);

        let payload = cancel(&request("cancel", json!({"job_id": "job-1"})), &f.manager).unwrap();
        assert_eq!(payload["cancelled"], true);
        // The worker may already have honored it
        assert!(payload["status"] == "cancelling" || payload["status"] == "cancelled");

        let err = cancel(&request("cancel", json!({"job_id": "job-1"})), &f.manager).unwrap_err();
        assert_eq!(err.code, ErrorCode::CancelRejected);

        let done = f.manager.wait_for_terminal("job-1", Duration::from_secs(5)).unwrap();
        assert_eq!(done.status, JobStatus::Cancelled);

        let payload = status(&request("status", json!({"job_id": "job-1"})), &f.manager).unwrap();
        assert_eq!(payload["status"], "cancelled");
        assert!(payload.get("error").is_none());

        let err = cancel(&request("cancel", json!({"job_id": "ghost"})), &f.manager).unwrap_err();
        assert_eq!(err.code, ErrorCode::JobNotFound);
    }
}
