//! Shared health state for the /health endpoint.
//! Updated by the orchestrator when a run reaches a terminal stage.

use std::sync::atomic::{AtomicU64, Ordering};

/// Run outcome counters since process start.
#[derive(Default)]
pub struct HealthState {
    pub runs_succeeded: AtomicU64,
    pub runs_failed: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn runs_succeeded(&self) -> u64 {
        self.runs_succeeded.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }
}
