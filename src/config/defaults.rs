//! Built-in lane defaults (layer 1)
//!
//! Hardcoded defaults for all configuration values.

use serde_json::json;

/// Root of all runtime data (default: "data")
pub const DEFAULT_DATA_DIR: &str = "data";

/// Maximum upload size in megabytes (default: 10)
pub const DEFAULT_UPLOAD_MAX_SIZE_MB: f64 = 10.0;

/// Accepted image extensions, lowercase with the leading dot
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp"];

/// Concurrency cap for running jobs (default: 0 = unbounded)
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 0;

/// Hours between cleanup passes (default: 1)
pub const DEFAULT_CLEANUP_INTERVAL_HOURS: f64 = 1.0;

/// Age after which uploads and outputs are deleted (default: 1 hour)
pub const DEFAULT_CLEANUP_MAX_AGE_HOURS: f64 = 1.0;

/// Log level when neither config nor RUST_LOG says otherwise
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Device label reported by the reconstructor
pub const DEFAULT_DEVICE: &str = "cpu";

/// Built-in defaults as a JSON layer for merging.
///
/// Directory entries other than `data_dir` are left out so they derive from
/// whatever `data_dir` ends up being after all layers are merged.
pub fn builtin_layer() -> serde_json::Value {
    json!({
        "directories": {
            "data_dir": DEFAULT_DATA_DIR
        },
        "upload": {
            "max_size_mb": DEFAULT_UPLOAD_MAX_SIZE_MB,
            "allowed_extensions": DEFAULT_ALLOWED_EXTENSIONS
        },
        "jobs": {
            "max_concurrent_jobs": DEFAULT_MAX_CONCURRENT_JOBS,
            "persist": true,
            "step_delay_ms": 0
        },
        "reconstructor": {
            "device": DEFAULT_DEVICE
        },
        "cleanup": {
            "enabled": true,
            "interval_hours": DEFAULT_CLEANUP_INTERVAL_HOURS,
            "max_age_hours": DEFAULT_CLEANUP_MAX_AGE_HOURS
        },
        "logging": {
            "level": DEFAULT_LOG_LEVEL
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_layer() {
        let value = builtin_layer();

        assert_eq!(value["directories"]["data_dir"], "data");
        assert_eq!(value["upload"]["max_size_mb"], 10.0);
        assert_eq!(value["upload"]["allowed_extensions"][3], ".webp");
        assert_eq!(value["jobs"]["max_concurrent_jobs"], 0);
        assert_eq!(value["cleanup"]["enabled"], true);
        assert!(value["directories"].get("uploads_dir").is_none());
    }
}
