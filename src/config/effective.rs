//! Effective configuration with provenance
//!
//! The effective config captures the merged configuration plus
//! information about where each layer came from.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use super::defaults::builtin_layer;
use super::merge::{merge_layers, set_path, toml_to_json};
use super::LaneConfig;

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "recon.toml";

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Env,
}

/// A contributing config layer
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path, for file layers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Variables that contributed, for the environment layer
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
}

impl ConfigSource {
    /// One-line description, e.g. `file ./recon.toml`
    pub fn describe(&self) -> String {
        match self.origin {
            ConfigOrigin::Builtin => "builtin defaults".to_string(),
            ConfigOrigin::File => match &self.path {
                Some(path) => format!("file {}", path.display()),
                None => "file".to_string(),
            },
            ConfigOrigin::Env => format!("env {}", self.variables.join(", ")),
        }
    }
}

/// How an environment value is parsed before it lands in the JSON layer
#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Text,
    Unsigned,
    Float,
}

/// Environment variable → config key path
const ENV_OVERRIDES: &[(&str, &str, EnvKind)] = &[
    ("RECON_DATA_DIR", "directories.data_dir", EnvKind::Text),
    ("RECON_UPLOADS_DIR", "directories.uploads_dir", EnvKind::Text),
    ("RECON_OUTPUTS_DIR", "directories.outputs_dir", EnvKind::Text),
    ("RECON_STATE_DIR", "directories.state_dir", EnvKind::Text),
    ("RECON_UPLOAD_MAX_SIZE_MB", "upload.max_size_mb", EnvKind::Float),
    ("RECON_MAX_CONCURRENT_JOBS", "jobs.max_concurrent_jobs", EnvKind::Unsigned),
    ("RECON_LOG_LEVEL", "logging.level", EnvKind::Text),
    ("RECON_DEVICE", "reconstructor.device", EnvKind::Text),
];

/// Merged configuration with the layers that produced it
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The typed, validated configuration
    pub config: LaneConfig,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Load from the process environment.
    ///
    /// An explicit `config_path` must exist; otherwise `recon.toml` in the
    /// working directory is used when present.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match config_path {
            Some(path) if !path.exists() => {
                return Err(ConfigError::IoError(format!(
                    "config file not found: {}",
                    path.display()
                )))
            }
            Some(path) => Some(path.to_path_buf()),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                fallback.exists().then_some(fallback)
            }
        };

        Self::build(file.as_deref(), std::env::vars())
    }

    /// Build from explicit layers: defaults, an optional TOML file, then
    /// environment variables.
    pub fn build<I>(file: Option<&Path>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut layers = vec![builtin_layer()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            variables: Vec::new(),
        }];

        if let Some(path) = file {
            layers.push(Self::load_toml_file(path)?);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_path_buf()),
                variables: Vec::new(),
            });
        }

        let (env_layer, variables) = Self::env_layer(env)?;
        if !variables.is_empty() {
            layers.push(env_layer);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Env,
                path: None,
                variables,
            });
        }

        let merged = merge_layers(layers);
        let config: LaneConfig = serde_json::from_value(merged)
            .map_err(|e| ConfigError::ParseError(format!("invalid configuration: {}", e)))?;
        config.validate()?;

        Ok(Self {
            created_at: Utc::now(),
            config,
            sources,
        })
    }

    /// Load and parse a TOML file into a JSON layer
    fn load_toml_file(path: &Path) -> Result<Value, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let toml_value: toml::Value = toml::from_str(&contents).map_err(|e| {
            ConfigError::ParseError(format!("TOML parse error in {}: {}", path.display(), e))
        })?;

        Ok(toml_to_json(toml_value))
    }

    /// Collect recognized `RECON_*` variables into a JSON layer
    fn env_layer<I>(env: I) -> Result<(Value, Vec<String>), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut layer = Value::Object(serde_json::Map::new());
        let mut variables = Vec::new();

        for (name, raw) in env {
            let Some((_, path, kind)) = ENV_OVERRIDES.iter().find(|(var, _, _)| *var == name)
            else {
                continue;
            };

            let invalid = |expected: &str| ConfigError::EnvError {
                var: name.clone(),
                value: raw.clone(),
                reason: format!("expected {}", expected),
            };
            let value = match kind {
                EnvKind::Text => Value::String(raw.clone()),
                EnvKind::Unsigned => raw
                    .trim()
                    .parse::<u64>()
                    .map(Value::from)
                    .map_err(|_| invalid("a non-negative integer"))?,
                EnvKind::Float => raw
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| invalid("a number"))?,
            };

            set_path(&mut layer, path, value);
            variables.push(name);
        }

        variables.sort();
        Ok((layer, variables))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value {value:?} for {var}: {reason}")]
    EnvError {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_build_with_defaults_only() {
        let effective = EffectiveConfig::build(None, Vec::new()).unwrap();

        assert_eq!(effective.config, LaneConfig::default());
        assert_eq!(effective.sources.len(), 1);
        assert_eq!(effective.sources[0].origin, ConfigOrigin::Builtin);
    }

    #[test]
    fn test_load_toml_file() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[jobs]").unwrap();
        writeln!(temp, "max_concurrent_jobs = 2").unwrap();
        writeln!(temp, "[upload]").unwrap();
        writeln!(temp, "allowed_extensions = [\".png\"]").unwrap();

        let effective = EffectiveConfig::build(Some(temp.path()), Vec::new()).unwrap();

        assert_eq!(effective.config.jobs.max_concurrent_jobs, 2);
        assert_eq!(effective.config.upload.allowed_extensions, vec![".png"]);
        // Untouched keys keep their defaults
        assert!(effective.config.jobs.persist);
        assert_eq!(effective.sources[1].origin, ConfigOrigin::File);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[jobs]\nmax_concurrent_jobs = 2").unwrap();

        let effective = EffectiveConfig::build(
            Some(temp.path()),
            env(&[
                ("RECON_MAX_CONCURRENT_JOBS", "6"),
                ("RECON_UPLOAD_MAX_SIZE_MB", "2.5"),
                ("RECON_STATE_DIR", "/srv/recon/state"),
                ("HOME", "/root"),
            ]),
        )
        .unwrap();

        let config = &effective.config;
        assert_eq!(config.jobs.max_concurrent_jobs, 6);
        assert_eq!(config.upload.max_size_mb, 2.5);
        assert_eq!(config.directories.state_path(), PathBuf::from("/srv/recon/state"));
        assert_eq!(
            effective.sources[2].variables,
            vec![
                "RECON_MAX_CONCURRENT_JOBS",
                "RECON_STATE_DIR",
                "RECON_UPLOAD_MAX_SIZE_MB"
            ]
        );
    }

    #[test]
    fn test_sources_describe_and_serialize() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[logging]\nlevel = \"debug\"").unwrap();

        let effective = EffectiveConfig::build(
            Some(temp.path()),
            env(&[("RECON_DEVICE", "cuda"), ("RECON_LOG_LEVEL", "warn")]),
        )
        .unwrap();

        let described: Vec<String> = effective.sources.iter().map(|s| s.describe()).collect();
        assert_eq!(described[0], "builtin defaults");
        assert_eq!(described[1], format!("file {}", temp.path().display()));
        assert_eq!(described[2], "env RECON_DEVICE, RECON_LOG_LEVEL");

        let json: serde_json::Value = serde_json::from_str(&effective.to_json().unwrap()).unwrap();
        assert_eq!(json["config"]["logging"]["level"], "warn");
        assert_eq!(json["sources"][0], serde_json::json!({ "origin": "builtin" }));
        assert_eq!(json["sources"][2]["variables"][0], "RECON_DEVICE");
        assert!(json["created_at"].is_string());
    }

    #[test]
    fn test_env_bad_number() {
        let err = EffectiveConfig::build(None, env(&[("RECON_MAX_CONCURRENT_JOBS", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { .. }));
        assert!(err.to_string().contains("RECON_MAX_CONCURRENT_JOBS"));
    }

    #[test]
    fn test_validation_runs_after_merge() {
        let err = EffectiveConfig::build(None, env(&[("RECON_UPLOAD_MAX_SIZE_MB", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("max_size_mb"));
    }

    #[test]
    fn test_toml_parse_error() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[jobs").unwrap();

        let err = EffectiveConfig::build(Some(temp.path()), Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = EffectiveConfig::load(Some(Path::new("/nonexistent/recon.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
