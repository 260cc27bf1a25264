//! Startup reconciliation
//!
//! A record persisted in a non-terminal status has no worker after a
//! restart. Every such record is forced to failed with an error that marks
//! it as retryable, and the corrected record is written back before the
//! store accepts new work.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::state::{JobRecord, JobStatus};

use super::persist::JobPersistence;

/// Outcome of reconciling a state directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Records read from storage
    pub loaded: usize,
    /// Jobs forced to failed, with the status they were found in
    pub reconciled: Vec<(String, JobStatus)>,
}

impl ReconcileReport {
    /// Human-readable one-liner
    pub fn summary(&self) -> String {
        if self.reconciled.is_empty() {
            return format!("loaded {} job(s), none interrupted", self.loaded);
        }
        format!(
            "loaded {} job(s), marked {} interrupted job(s) as failed",
            self.loaded,
            self.reconciled.len()
        )
    }
}

/// Force every non-terminal record to failed.
pub fn reconcile_records(
    records: &mut [JobRecord],
    now: DateTime<Utc>,
) -> ReconcileReport {
    let mut report = ReconcileReport {
        loaded: records.len(),
        reconciled: Vec::new(),
    };

    for record in records.iter_mut().filter(|r| !r.is_terminal()) {
        let found = record.status;
        if record.interrupt(now).is_ok() {
            report.reconciled.push((record.job_id.clone(), found));
        }
    }

    report
}

/// Load every persisted record, reconcile, and write corrected records back.
///
/// Write-back failures are logged; the returned records are authoritative
/// for this process either way.
pub fn load_and_reconcile(
    persistence: &dyn JobPersistence,
    now: DateTime<Utc>,
) -> Result<(Vec<JobRecord>, ReconcileReport), super::PersistError> {
    let mut records = persistence.load_all()?;
    let report = reconcile_records(&mut records, now);

    for (job_id, found) in &report.reconciled {
        info!(job_id = %job_id, was = %found, "job interrupted by restart, marked failed");
        if let Some(record) = records.iter().find(|r| &r.job_id == job_id) {
            if let Err(e) = persistence.save(record) {
                warn!(job_id = %job_id, error = %e, "failed to persist reconciled job");
            }
        }
    }

    Ok((records, report))
}
