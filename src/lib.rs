//! Recon Lane - job lifecycle for long-running image reconstruction
//!
//! This crate accepts reconstruction jobs, runs each on its own worker
//! thread, tracks progress that concurrent readers can poll, supports
//! cooperative cancellation, and persists job records so a restart can
//! reconcile work that was interrupted mid-flight.

pub mod cleanup;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod manager;
pub mod reconstruct;
pub mod rpc;
pub mod signal;
pub mod state;
pub mod store;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_images;

pub use config::{ConfigError, EffectiveConfig, LaneConfig};
pub use dispatch::{CancellationToken, Dispatcher, ProgressSink};
pub use manager::{JobError, JobManager, ResultError};
pub use reconstruct::{PassThroughReconstructor, ReconstructError, Reconstructor, ReconstructorInfo};
pub use rpc::RpcHandler;
pub use state::{JobRecord, JobStatus, JobUpdate};
pub use store::{FileJobPersistence, JobPersistence, JobStore, NoopPersistence, ReconcileReport};
