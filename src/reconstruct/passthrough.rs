//! Reconstructor used when no model is available.
//!
//! Walks through the same steps a model-backed run reports, then writes the
//! decoded input back out as an RGB PNG.

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use image::{ImageFormat, ImageReader};
use tracing::{debug, info};

use super::{ReconstructError, Reconstructor, ReconstructorInfo};
use crate::dispatch::{CancellationToken, ProgressSink};

/// Re-encodes the input as PNG, checking for cancellation between steps.
#[derive(Debug, Clone)]
pub struct PassThroughReconstructor {
    device: String,
    step_delay: Duration,
}

impl Default for PassThroughReconstructor {
    fn default() -> Self {
        Self::new("cpu", Duration::ZERO)
    }
}

impl PassThroughReconstructor {
    pub fn new(device: impl Into<String>, step_delay: Duration) -> Self {
        Self {
            device: device.into(),
            step_delay,
        }
    }

    /// Report a step, pause, then honor a pending cancel.
    fn step(
        &self,
        progress: &ProgressSink,
        cancel: &CancellationToken,
        percent: u8,
        message: &str,
    ) -> Result<(), ReconstructError> {
        progress.report(percent, message);
        if !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
        cancel.check()
    }
}

impl Reconstructor for PassThroughReconstructor {
    fn reconstruct(
        &self,
        input: &Path,
        output: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), ReconstructError> {
        info!(input = %input.display(), output = %output.display(), "starting pass-through reconstruction");

        self.step(progress, cancel, 5, "loading model")?;
        self.step(progress, cancel, 15, &format!("model ready on {}", self.device))?;

        self.step(progress, cancel, 20, "reading input")?;
        let reader = ImageReader::open(input).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ReconstructError::InputMissing(input.to_path_buf()),
            _ => ReconstructError::Io(e),
        })?;
        let decoded = reader.with_guessed_format()?.decode()?;

        self.step(progress, cancel, 35, "preprocessing")?;
        let rgb = decoded.to_rgb8();
        debug!(width = rgb.width(), height = rgb.height(), "input converted to RGB");

        self.step(progress, cancel, 70, "running model")?;

        self.step(progress, cancel, 90, "writing output")?;
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        rgb.save_with_format(output, ImageFormat::Png)?;

        self.step(progress, cancel, 100, "done")
    }

    fn describe(&self) -> ReconstructorInfo {
        ReconstructorInfo {
            name: "pass-through".to_string(),
            model_loaded: false,
            device: self.device.clone(),
        }
    }
}
