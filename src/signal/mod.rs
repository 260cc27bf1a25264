//! Signal handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! On the first signal:
//! 1. Request cancellation of every active job
//! 2. Wait up to the grace period for workers to reach a terminal status
//! 3. Exit with code 130
//!
//! A second signal exits immediately. Job records are already persisted on
//! every change, so an immediate exit loses nothing that reconciliation
//! cannot recover.

use std::process;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::manager::JobManager;

/// Default grace period for in-flight jobs to wind down
pub const DEFAULT_GRACE_PERIOD_SECONDS: u64 = 10;

/// Exit code after an interrupt
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Signal handler state
#[derive(Debug)]
pub struct SignalState {
    /// First signal received (shutdown initiated)
    shutdown_requested: AtomicBool,
    /// Second signal received (immediate exit requested)
    immediate_exit: AtomicBool,
    /// Signal count (for tracking double-SIGINT)
    signal_count: AtomicU8,
    /// Grace period for cancellation
    grace_period: Duration,
}

impl SignalState {
    /// Create a new signal state with default grace period
    pub fn new() -> Self {
        Self::with_grace_period(Duration::from_secs(DEFAULT_GRACE_PERIOD_SECONDS))
    }

    /// Create a new signal state with custom grace period
    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            shutdown_requested: AtomicBool::new(false),
            immediate_exit: AtomicBool::new(false),
            signal_count: AtomicU8::new(0),
            grace_period,
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Record a signal and decide what to do about it
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        match count {
            0 => {
                self.shutdown_requested.store(true, Ordering::SeqCst);
                SignalAction::InitiateShutdown
            }
            1 => {
                self.immediate_exit.store(true, Ordering::SeqCst);
                SignalAction::ImmediateExit
            }
            _ => SignalAction::Ignore,
        }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel jobs and exit after the grace period
    InitiateShutdown,
    /// Second signal: exit now
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Installs the process-wide handler for one job manager.
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::with_state(Arc::new(SignalState::new()))
    }

    pub fn with_state(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the handler. Must be called at most once per process.
    pub fn install(&self, manager: Arc<JobManager>) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateShutdown => {
                let cancelled = shutdown(&manager);
                warn!(cancelled, "interrupt received, cancelling active jobs");

                // The handler thread must stay free to see a second signal
                let manager = Arc::clone(&manager);
                let grace = state.grace_period();
                thread::spawn(move || {
                    if manager.wait_for_idle(grace) {
                        info!("all jobs stopped");
                    } else {
                        warn!(grace_secs = grace.as_secs(), "grace period expired with jobs still active");
                    }
                    process::exit(EXIT_CODE_INTERRUPTED);
                });
            }
            SignalAction::ImmediateExit => {
                warn!("second interrupt, exiting immediately");
                process::exit(EXIT_CODE_INTERRUPTED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel every active job; returns how many cancels were accepted.
pub fn shutdown(manager: &JobManager) -> usize {
    manager.cancel_all().len()
}
