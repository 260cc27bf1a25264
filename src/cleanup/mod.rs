//! Age-based cleanup of uploads and outputs.
//!
//! A background thread periodically deletes regular files older than
//! `max_age` from the top level of each watched directory. It does not
//! consult the job store: a completed job whose output was swept reports
//! the output as missing when its result is requested.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::LaneConfig;

/// Result of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    /// Regular files examined
    pub scanned: usize,
    /// Files removed
    pub deleted: usize,
    /// Bytes reclaimed
    pub bytes_reclaimed: u64,
    /// Errors encountered (non-fatal)
    pub errors: Vec<String>,
}

impl CleanupReport {
    fn merge(&mut self, other: CleanupReport) {
        self.scanned += other.scanned;
        self.deleted += other.deleted;
        self.bytes_reclaimed += other.bytes_reclaimed;
        self.errors.extend(other.errors);
    }
}

/// One sweep over a fixed set of directories.
#[derive(Debug, Clone)]
struct Sweep {
    dirs: Vec<PathBuf>,
    max_age: Duration,
}

impl Sweep {
    fn run(&self) -> CleanupReport {
        let now = SystemTime::now();
        let mut report = CleanupReport::default();
        for dir in &self.dirs {
            report.merge(self.sweep_dir(dir, now));
        }
        report
    }

    fn sweep_dir(&self, dir: &Path, now: SystemTime) -> CleanupReport {
        let mut report = CleanupReport::default();
        if !dir.exists() {
            warn!(dir = %dir.display(), "cleanup directory does not exist");
            return report;
        }

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.errors.push(format!("{}: {}", dir.display(), e));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            report.scanned += 1;

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    report.errors.push(format!("{}: {}", entry.path().display(), e));
                    continue;
                }
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or_default();
            if age <= self.max_age {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    report.deleted += 1;
                    report.bytes_reclaimed += metadata.len();
                    debug!(path = %entry.path().display(), age_secs = age.as_secs(), "deleted old file");
                }
                Err(e) => {
                    error!(path = %entry.path().display(), error = %e, "failed to delete old file");
                    report.errors.push(format!("{}: {}", entry.path().display(), e));
                }
            }
        }

        if report.deleted > 0 {
            info!(dir = %dir.display(), deleted = report.deleted, "cleaned up old files");
        }
        report
    }
}

/// Stop flag the background thread sleeps on.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    /// Sleep up to `timeout`; true once stop was requested.
    fn wait(&self, timeout: Duration) -> bool {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = self
            .wake
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
    }
}

/// Periodic cleanup of uploads and outputs.
#[derive(Debug)]
pub struct CleanupService {
    sweep: Sweep,
    interval: Duration,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupService {
    pub fn new(dirs: Vec<PathBuf>, interval: Duration, max_age: Duration) -> Self {
        Self {
            sweep: Sweep { dirs, max_age },
            interval,
            signal: Arc::new(StopSignal::default()),
            handle: None,
        }
    }

    /// Watch the configured uploads and outputs directories.
    pub fn from_config(config: &LaneConfig) -> Self {
        Self::new(
            vec![
                config.directories.uploads_path(),
                config.directories.outputs_path(),
            ],
            config.cleanup.interval(),
            config.cleanup.max_age(),
        )
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start the background thread. Does nothing if already running.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.handle.is_some() {
            warn!("cleanup service already running");
            return Ok(());
        }

        let sweep = self.sweep.clone();
        let interval = self.interval;
        let signal = Arc::clone(&self.signal);
        let handle = thread::Builder::new()
            .name("recon-cleanup".to_string())
            .spawn(move || loop {
                let report = sweep.run();
                for e in &report.errors {
                    error!(error = %e, "cleanup error");
                }
                if signal.wait(interval) {
                    break;
                }
            })?;

        info!(
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.sweep.max_age.as_secs(),
            "cleanup service started"
        );
        self.handle = Some(handle);
        Ok(())
    }

    /// Run one pass on the calling thread.
    pub fn cleanup_now(&self) -> CleanupReport {
        info!("manual cleanup triggered");
        self.sweep.run()
    }

    /// Stop the background thread and wait for it.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.signal.stop();
        if handle.join().is_err() {
            error!("cleanup thread panicked");
        }
        info!("cleanup service stopped");
    }
}

impl Drop for CleanupService {
    fn drop(&mut self) {
        self.stop();
    }
}
