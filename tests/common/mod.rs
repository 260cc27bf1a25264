//! Shared fixtures for integration tests
//!
//! Scripted reconstructors and a helper to open a lane in a scratch dir.

#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use recon_lane::{
    CancellationToken, JobManager, LaneConfig, ProgressSink, ReconstructError, Reconstructor,
    ReconstructorInfo,
};
use tempfile::TempDir;

/// A small encoded image in `format`.
pub fn image_bytes(format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(6, 4, |x, y| Rgb([x as u8 * 40, y as u8 * 60, 200]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

pub fn png_bytes() -> Vec<u8> {
    image_bytes(ImageFormat::Png)
}

pub const WAIT: Duration = Duration::from_secs(10);

/// A latch the scripted reconstructor parks on.
#[derive(Debug, Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn open(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    /// Park until opened. False if the job was cancelled first.
    fn wait(&self, cancel: &CancellationToken) -> bool {
        let (lock, cvar) = &*self.0;
        let mut open = lock.lock().unwrap();
        while !*open {
            if cancel.is_requested() {
                return false;
            }
            open = cvar.wait_timeout(open, Duration::from_millis(5)).unwrap().0;
        }
        true
    }
}

/// How a scripted run ends after its progress steps.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Copy input to output
    Complete,
    /// Return a generic error
    Fail(String),
    /// Spin on the token until cancelled
    UntilCancelled,
}

/// Reports fixed progress steps, checking the token after each.
#[derive(Debug)]
pub struct Scripted {
    steps: Vec<(u8, String)>,
    outcome: Outcome,
    gate: Option<Gate>,
    step_delay: Duration,
    calls: AtomicUsize,
}

impl Scripted {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            steps: Vec::new(),
            outcome,
            gate: None,
            step_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn step(mut self, percent: u8, message: &str) -> Self {
        self.steps.push((percent, message.to_string()));
        self
    }

    /// Park before the first step until `gate` opens.
    pub fn gated(mut self, gate: &Gate) -> Self {
        self.gate = Some(gate.clone());
        self
    }

    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// How many times `reconstruct` was entered
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reconstructor for Scripted {
    fn reconstruct(
        &self,
        input: &Path,
        output: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), ReconstructError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if !gate.wait(cancel) {
                return Err(ReconstructError::Cancelled);
            }
        }

        for (percent, message) in &self.steps {
            progress.report(*percent, message);
            thread::sleep(self.step_delay);
            cancel.check()?;
        }

        match &self.outcome {
            Outcome::Complete => {
                if let Some(parent) = output.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(input, output)?;
                Ok(())
            }
            Outcome::Fail(message) => Err(ReconstructError::Failed(message.clone())),
            Outcome::UntilCancelled => loop {
                cancel.check()?;
                thread::sleep(Duration::from_millis(2));
            },
        }
    }

    fn describe(&self) -> ReconstructorInfo {
        ReconstructorInfo {
            name: "scripted".to_string(),
            model_loaded: false,
            device: "test".to_string(),
        }
    }
}

/// Scratch directory plus the config pointing into it.
pub struct Lane {
    pub tmp: TempDir,
    pub config: LaneConfig,
}

impl Lane {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = LaneConfig::default();
        config.directories.data_dir = tmp.path().to_path_buf();
        config.ensure_dirs().unwrap();
        Self { tmp, config }
    }

    pub fn with_max_concurrent(max: usize) -> Self {
        let mut lane = Self::new();
        lane.config.jobs.max_concurrent_jobs = max;
        lane
    }

    /// Open a manager with file persistence under the state dir.
    pub fn open(&self, reconstructor: Arc<dyn Reconstructor>) -> JobManager {
        JobManager::from_config(&self.config, reconstructor).unwrap()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.config.directories.state_path()
    }

    /// Write a small PNG named `name` and return its path.
    pub fn input(&self, name: &str) -> PathBuf {
        let path = self.tmp.path().join(name);
        fs::write(&path, png_bytes()).unwrap();
        path
    }
}
