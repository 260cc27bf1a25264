//! Lane configuration
//!
//! Three layers, later ones winning:
//! 1. Built-in defaults
//! 2. TOML file (`recon.toml` or `--config`)
//! 3. `RECON_*` environment variables

mod defaults;
mod effective;
mod merge;

pub use defaults::*;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, DEFAULT_CONFIG_FILE};
pub use merge::{deep_merge, merge_layers};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Typed lane configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub directories: DirectoriesConfig,
    pub upload: UploadConfig,
    pub jobs: JobsConfig,
    pub reconstructor: ReconstructorConfig,
    pub cleanup: CleanupConfig,
    pub logging: LoggingConfig,
}

/// Where uploads, outputs and job records live.
///
/// Unset subdirectories derive from `data_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoriesConfig {
    pub data_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploads_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            uploads_dir: None,
            outputs_dir: None,
            state_dir: None,
        }
    }
}

impl DirectoriesConfig {
    pub fn uploads_path(&self) -> PathBuf {
        self.uploads_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("uploads"))
    }

    pub fn outputs_path(&self) -> PathBuf {
        self.outputs_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("outputs"))
    }

    /// Directory holding one JSON record per job
    pub fn state_path(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("jobs"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_size_mb: f64,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_mb: DEFAULT_UPLOAD_MAX_SIZE_MB,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl UploadConfig {
    pub fn max_size_bytes(&self) -> u64 {
        (self.max_size_mb * 1024.0 * 1024.0) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// 0 = unbounded
    pub max_concurrent_jobs: usize,
    /// Mirror job records to the state directory
    pub persist: bool,
    /// Artificial pause between pass-through steps
    pub step_delay_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            persist: true,
            step_delay_ms: 0,
        }
    }
}

impl JobsConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructorConfig {
    pub device: String,
}

impl Default for ReconstructorConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval_hours: f64,
    pub max_age_hours: f64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: DEFAULT_CLEANUP_INTERVAL_HOURS,
            max_age_hours: DEFAULT_CLEANUP_MAX_AGE_HOURS,
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        hours_to_duration(self.interval_hours).unwrap_or(Duration::MAX)
    }

    pub fn max_age(&self) -> Duration {
        hours_to_duration(self.max_age_hours).unwrap_or(Duration::MAX)
    }
}

/// `None` when the value is negative, not finite, or too large for a `Duration`
fn hours_to_duration(hours: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(hours * 3600.0).ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl LaneConfig {
    /// Reject values the lane cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.upload.max_size_mb.is_finite() && self.upload.max_size_mb > 0.0) {
            return Err(ConfigError::ValidationError(
                "upload.max_size_mb must be a positive number".to_string(),
            ));
        }

        if self.upload.allowed_extensions.is_empty() {
            return Err(ConfigError::ValidationError(
                "upload.allowed_extensions must not be empty".to_string(),
            ));
        }
        if let Some(bad) = self
            .upload
            .allowed_extensions
            .iter()
            .find(|e| !e.starts_with('.') || e.len() < 2)
        {
            return Err(ConfigError::ValidationError(format!(
                "upload.allowed_extensions entry {:?} must look like \".png\"",
                bad
            )));
        }

        for (key, hours) in [
            ("cleanup.interval_hours", self.cleanup.interval_hours),
            ("cleanup.max_age_hours", self.cleanup.max_age_hours),
        ] {
            if !(hours.is_finite() && hours > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be a positive number",
                    key
                )));
            }
            if hours_to_duration(hours).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "{} = {} is too large",
                    key, hours
                )));
            }
        }

        if self.reconstructor.device.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "reconstructor.device must not be empty".to_string(),
            ));
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }

    /// Copy that keeps job records in memory only.
    ///
    /// The state directory belongs to the long-lived `serve` process; a
    /// one-shot run must neither reconcile nor overwrite its records.
    pub fn without_persistence(&self) -> LaneConfig {
        let mut config = self.clone();
        config.jobs.persist = false;
        config
    }

    /// Create the uploads, outputs and (when persisting) state directories
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        let mut dirs = vec![
            self.directories.uploads_path(),
            self.directories.outputs_path(),
        ];
        if self.jobs.persist {
            dirs.push(self.directories.state_path());
        }

        for dir in dirs {
            fs::create_dir_all(&dir)
                .map_err(|e| ConfigError::IoError(format!("{}: {}", dir.display(), e)))?;
        }
        Ok(())
    }
}
