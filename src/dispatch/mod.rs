//! Execution dispatcher.
//!
//! Every accepted job gets its own OS thread that drives it to a terminal
//! status. The thread is detached: callers observe it only through the store.
//!
//! Worker sequence:
//! 1. Wait for an admission slot when a concurrency cap is configured
//! 2. queued → running, recording `start_time`
//! 3. Honor a cancel that landed before pickup
//! 4. Call the reconstructor with progress and cancellation hooks
//! 5. Map the outcome to completed / cancelled / failed and record `elapsed_seconds`

mod hooks;

pub use hooks::{CancellationToken, ProgressSink};

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::reconstruct::{ReconstructError, Reconstructor};
use crate::state::{now_utc, JobStatus, JobUpdate};
use crate::store::JobStore;

/// How often a worker waiting for a slot re-checks its cancellation flag.
const ADMISSION_POLL: Duration = Duration::from_millis(50);

/// Counting gate bounding the number of jobs inside the reconstructor.
#[derive(Debug)]
pub struct AdmissionGate {
    limit: usize,
    running: Mutex<usize>,
    freed: Condvar,
}

/// Slot held by one worker; released on drop.
#[derive(Debug)]
pub struct AdmissionPermit<'a> {
    gate: &'a AdmissionGate,
}

impl AdmissionGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            running: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Block until a slot frees up. Returns `None` if the job is cancelled
    /// while waiting.
    pub fn acquire(&self, cancel: &CancellationToken) -> Option<AdmissionPermit<'_>> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        while *running >= self.limit {
            if cancel.is_requested() {
                return None;
            }
            running = self
                .freed
                .wait_timeout(running, ADMISSION_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *running += 1;
        Some(AdmissionPermit { gate: self })
    }
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        let mut running = self
            .gate
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *running = running.saturating_sub(1);
        self.gate.freed.notify_one();
    }
}

/// Starts one worker thread per job.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<JobStore>,
    reconstructor: Arc<dyn Reconstructor>,
    gate: Option<Arc<AdmissionGate>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("reconstructor", &self.reconstructor.describe().name)
            .field("gate", &self.gate)
            .finish()
    }
}

impl Dispatcher {
    /// `max_concurrent_jobs == 0` means unbounded.
    pub fn new(
        store: Arc<JobStore>,
        reconstructor: Arc<dyn Reconstructor>,
        max_concurrent_jobs: usize,
    ) -> Self {
        let gate = (max_concurrent_jobs > 0).then(|| Arc::new(AdmissionGate::new(max_concurrent_jobs)));
        Self {
            store,
            reconstructor,
            gate,
        }
    }

    pub fn reconstructor(&self) -> &Arc<dyn Reconstructor> {
        &self.reconstructor
    }

    /// Spawn the worker for `job_id` at `generation`.
    pub fn dispatch(&self, job_id: &str, generation: u64) -> io::Result<JoinHandle<()>> {
        let worker = Worker {
            store: Arc::clone(&self.store),
            reconstructor: Arc::clone(&self.reconstructor),
            gate: self.gate.clone(),
            job_id: job_id.to_string(),
            generation,
        };

        thread::Builder::new()
            .name(format!("recon-job-{}", job_id))
            .spawn(move || worker.run())
    }
}

struct Worker {
    store: Arc<JobStore>,
    reconstructor: Arc<dyn Reconstructor>,
    gate: Option<Arc<AdmissionGate>>,
    job_id: String,
    generation: u64,
}

impl Worker {
    fn run(self) {
        let token = CancellationToken::new(Arc::clone(&self.store), &self.job_id, self.generation);
        let sink = ProgressSink::new(Arc::clone(&self.store), &self.job_id, self.generation);

        let gate = self.gate.clone();
        let _permit = match gate.as_deref() {
            Some(gate) => match gate.acquire(&token) {
                Some(permit) => Some(permit),
                None => {
                    self.finish(
                        Err(ReconstructError::Cancelled),
                        None,
                    );
                    return;
                }
            },
            None => None,
        };

        let started = Instant::now();
        if !self
            .store
            .modify(&self.job_id, self.generation, |r| r.start(now_utc()))
        {
            debug!(job_id = %self.job_id, "job superseded before start");
            return;
        }
        let Some(record) = self.store.get(&self.job_id) else {
            return;
        };
        info!(job_id = %self.job_id, input = %record.input_path.display(), "worker started");

        let outcome = if token.is_requested() {
            Err(ReconstructError::Cancelled)
        } else {
            panic::catch_unwind(AssertUnwindSafe(|| {
                self.reconstructor
                    .reconstruct(&record.input_path, &record.output_path, &sink, &token)
            }))
            .unwrap_or_else(|payload| Err(ReconstructError::Panicked(panic_message(payload))))
        };

        self.finish(outcome, Some(started));
    }

    fn finish(&self, outcome: Result<(), ReconstructError>, started: Option<Instant>) {
        let update = match &outcome {
            Ok(()) => JobUpdate::status(JobStatus::Completed)
                .with_progress(100)
                .with_message("completed"),
            Err(ReconstructError::Cancelled) => {
                JobUpdate::status(JobStatus::Cancelled).with_message("cancelled by user")
            }
            Err(e) => JobUpdate::status(JobStatus::Failed)
                .with_message("failed")
                .with_error(e.to_string()),
        };
        let update = match started {
            Some(started) => update.with_elapsed(started.elapsed().as_secs_f64()),
            None => update,
        };

        if !self.store.update(&self.job_id, self.generation, update) {
            warn!(job_id = %self.job_id, "terminal status not recorded; job was superseded");
            return;
        }

        match outcome {
            Ok(()) => info!(job_id = %self.job_id, "job completed"),
            Err(ReconstructError::Cancelled) => info!(job_id = %self.job_id, "job cancelled"),
            Err(e) => error!(job_id = %self.job_id, error = %e, "job failed"),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
