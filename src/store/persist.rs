//! Durable job records.
//!
//! One `<job_id>.json` document per job under the state directory, written
//! with write-then-rename so a crash never leaves a torn record behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::state::{JobRecord, JobStateError};

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write record for job {job_id}: {source}")]
    Write {
        job_id: String,
        #[source]
        source: JobStateError,
    },

    #[error("job id {0:?} cannot be used as a file name")]
    InvalidJobId(String),
}

/// Storage backend for job records.
pub trait JobPersistence: Send + Sync {
    /// Write the full record, replacing any previous version.
    fn save(&self, record: &JobRecord) -> Result<(), PersistError>;

    /// Read every stored record.
    fn load_all(&self) -> Result<Vec<JobRecord>, PersistError>;
}

/// Keeps nothing; state lives only as long as the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersistence;

impl JobPersistence for NoopPersistence {
    fn save(&self, _record: &JobRecord) -> Result<(), PersistError> {
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<JobRecord>, PersistError> {
        Ok(Vec::new())
    }
}

/// One JSON file per job in a directory.
#[derive(Debug, Clone)]
pub struct FileJobPersistence {
    dir: PathBuf,
}

impl FileJobPersistence {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| PersistError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// State directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for `job_id`.
    pub fn record_path(&self, job_id: &str) -> Result<PathBuf, PersistError> {
        if !is_safe_file_stem(job_id) {
            return Err(PersistError::InvalidJobId(job_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", job_id)))
    }
}

impl JobPersistence for FileJobPersistence {
    fn save(&self, record: &JobRecord) -> Result<(), PersistError> {
        let path = self.record_path(&record.job_id)?;
        record
            .write_to_file(&path)
            .map_err(|source| PersistError::Write {
                job_id: record.job_id.clone(),
                source,
            })
    }

    fn load_all(&self) -> Result<Vec<JobRecord>, PersistError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "skipping unreadable state entry");
                    continue;
                }
            };
            let path = entry.path();
            // Leftover temp files from an interrupted write end in `.tmp`
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match JobRecord::from_file(&path) {
                Ok(record) => {
                    debug!(job_id = %record.job_id, status = %record.status, "loaded persisted job");
                    records.push(record);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping corrupt job record");
                }
            }
        }

        records.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(records)
    }
}

/// Job ids become file names; reject anything that could escape the directory.
fn is_safe_file_stem(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id != "."
        && job_id != ".."
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
