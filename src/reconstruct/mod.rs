//! Boundary to the image transformation.
//!
//! The lane treats reconstruction as a black box: it hands the implementation
//! an input path, an output path, a progress sink and a cancellation token,
//! and maps the returned result onto a terminal job status.

mod passthrough;

pub use passthrough::PassThroughReconstructor;

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::dispatch::{CancellationToken, ProgressSink};

/// Errors from a reconstruction.
///
/// `Cancelled` is an expected outcome, not a failure: the dispatcher maps it
/// to the cancelled status and records no error.
#[derive(Debug, thiserror::Error)]
pub enum ReconstructError {
    #[error("cancelled")]
    Cancelled,

    #[error("input image not found: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("reconstruction panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

/// What a reconstructor reports about itself for health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconstructorInfo {
    pub name: String,
    pub model_loaded: bool,
    pub device: String,
}

/// A long-running image transformation.
///
/// Implementations must report progress in non-decreasing order and poll
/// `cancel` at their own safe points, returning
/// [`ReconstructError::Cancelled`] when it is set.
pub trait Reconstructor: Send + Sync {
    fn reconstruct(
        &self,
        input: &Path,
        output: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), ReconstructError>;

    fn describe(&self) -> ReconstructorInfo;
}
