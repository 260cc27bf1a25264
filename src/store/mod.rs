//! Job record store.
//!
//! Holds the authoritative in-memory map of jobs behind a single mutex.
//! Every read/modify/write goes through the lock and is followed by a
//! best-effort write of the full record to the persistence backend.
//!
//! Each enqueue stamps its entry with a fresh generation number. Worker-side
//! writes carry the generation they were dispatched with, so a worker whose
//! job id has since been re-enqueued can no longer touch the new record.

mod persist;
mod reconcile;

pub use persist::{FileJobPersistence, JobPersistence, NoopPersistence, PersistError};
pub use reconcile::{load_and_reconcile, reconcile_records, ReconcileReport};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::state::{JobRecord, JobStateError, JobUpdate};

/// Generation of entries restored from storage; no worker owns them.
const RESTORED_GENERATION: u64 = 0;

#[derive(Debug)]
struct Entry {
    record: JobRecord,
    generation: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<String, Entry>,
    next_generation: u64,
}

/// Thread-safe job record store.
pub struct JobStore {
    inner: Mutex<StoreInner>,
    persistence: Arc<dyn JobPersistence>,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("jobs", &self.lock().jobs.len())
            .finish_non_exhaustive()
    }
}

impl JobStore {
    /// Create an empty store backed by `persistence`.
    pub fn new(persistence: Arc<dyn JobPersistence>) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                jobs: HashMap::new(),
                next_generation: RESTORED_GENERATION + 1,
            }),
            persistence,
        }
    }

    /// In-memory store with no durable mirror.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(NoopPersistence))
    }

    // A panicking worker must not wedge every other caller.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, record: &JobRecord) {
        if let Err(e) = self.persistence.save(record) {
            warn!(job_id = %record.job_id, error = %e, "failed to persist job record");
        }
    }

    /// Load records recovered at startup. They carry no worker generation.
    pub fn restore(&self, records: Vec<JobRecord>) {
        let mut inner = self.lock();
        for record in records {
            inner.jobs.insert(
                record.job_id.clone(),
                Entry {
                    record,
                    generation: RESTORED_GENERATION,
                },
            );
        }
    }

    /// Insert a fresh record, replacing any previous one with the same id.
    ///
    /// Returns the generation the new worker must present on every write.
    pub fn insert(&self, record: JobRecord) -> u64 {
        let mut inner = self.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        self.persist(&record);
        if let Some(old) = inner.jobs.insert(
            record.job_id.clone(),
            Entry { record, generation },
        ) {
            debug!(job_id = %old.record.job_id, old_status = %old.record.status, "job record replaced");
        }
        generation
    }

    /// Snapshot of a job, or `None` if unknown.
    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.lock().jobs.get(job_id).map(|e| e.record.clone())
    }

    /// Snapshot of every job, sorted by id.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<_> = self.lock().jobs.values().map(|e| e.record.clone()).collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }

    /// Ids of jobs that are queued, running or cancelling.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .lock()
            .jobs
            .values()
            .filter(|e| e.record.status.is_active())
            .map(|e| e.record.job_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Request cancellation.
    ///
    /// Returns false for unknown jobs, terminal jobs, and jobs whose cancel
    /// was already accepted.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.jobs.get_mut(job_id) else {
            return false;
        };

        match entry.record.request_cancel() {
            Ok(()) => {
                self.persist(&entry.record);
                true
            }
            Err(e) => {
                debug!(job_id = %job_id, reason = %e, "cancel rejected");
                false
            }
        }
    }

    /// Apply `f` to the record owned by `generation`, then persist it.
    ///
    /// Returns false when the job is unknown, owned by a newer generation,
    /// or `f` rejects the change (for example on a terminal record).
    pub fn modify<F>(&self, job_id: &str, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut JobRecord) -> Result<(), JobStateError>,
    {
        let mut inner = self.lock();
        let Some(entry) = inner.jobs.get_mut(job_id) else {
            return false;
        };
        if entry.generation != generation {
            debug!(job_id = %job_id, generation, current = entry.generation, "stale write dropped");
            return false;
        }

        match f(&mut entry.record) {
            Ok(()) => {
                self.persist(&entry.record);
                true
            }
            Err(e) => {
                debug!(job_id = %job_id, reason = %e, "update rejected");
                false
            }
        }
    }

    /// Merge `update` into the record owned by `generation`.
    pub fn update(&self, job_id: &str, generation: u64, update: JobUpdate) -> bool {
        self.modify(job_id, generation, |record| record.apply(update))
    }

    /// Cancellation flag as seen by the worker of `generation`.
    ///
    /// A superseded or vanished job reads as cancelled so its worker winds down.
    pub fn is_cancel_requested(&self, job_id: &str, generation: u64) -> bool {
        match self.lock().jobs.get(job_id) {
            Some(entry) if entry.generation == generation => entry.record.cancel_requested,
            _ => true,
        }
    }
}
