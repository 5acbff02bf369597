use std::sync::Arc;

use chrono::Utc;
use dashmap::{DashMap, DashSet};

use crate::types::{Progress, RunSnapshot, Stage};

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

/// Live progress records keyed by run id. Each write replaces a whole
/// snapshot, so a reader never sees a half-updated record. A record exists
/// only between `insert` at run start and `remove` at run end.
pub struct RunStore {
    runs: DashMap<String, RunSnapshot>,
    /// Runs an executor has taken. A run is executed at most once.
    claimed: DashSet<String>,
}

impl RunStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: DashMap::new(),
            claimed: DashSet::new(),
        })
    }

    /// Insert a fresh `starting` record.
    pub fn insert(&self, run_id: &str) {
        self.runs.insert(
            run_id.to_string(),
            RunSnapshot {
                run_id: run_id.to_string(),
                stage: Stage::Starting,
                step: 0,
                total: 0,
                message: "Run created".to_string(),
                created_at: Utc::now(),
            },
        );
    }

    /// Replace the snapshot for `run_id`, keeping its creation time. A run
    /// without a record is left alone; it has already finished.
    pub fn update(&self, run_id: &str, stage: Stage, step: usize, total: usize, message: impl Into<String>) {
        if let Some(mut entry) = self.runs.get_mut(run_id) {
            let created_at = entry.created_at;
            *entry = RunSnapshot {
                run_id: run_id.to_string(),
                stage,
                step,
                total,
                message: message.into(),
                created_at,
            };
        }
    }

    /// Take the right to execute `run_id`. Succeeds once, and only for a
    /// run that exists and is still `starting`.
    pub fn claim(&self, run_id: &str) -> bool {
        let Some(entry) = self.runs.get(run_id) else {
            return false;
        };
        // holding the read guard keeps `remove` from racing the insert below
        entry.stage == Stage::Starting && self.claimed.insert(run_id.to_string())
    }

    pub fn remove(&self, run_id: &str) {
        self.runs.remove(run_id);
        self.claimed.remove(run_id);
    }

    pub fn snapshot(&self, run_id: &str) -> Option<RunSnapshot> {
        self.runs.get(run_id).map(|r| r.clone())
    }

    /// Snapshot, or the completed sentinel when no record exists.
    pub fn progress(&self, run_id: &str) -> Progress {
        self.snapshot(run_id)
            .map(Progress::Live)
            .unwrap_or_else(Progress::completed)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_insert_update_remove() {
        let store = RunStore::new();
        store.insert("r1");
        let created = store.snapshot("r1").unwrap().created_at;

        store.update("r1", Stage::Scraping, 1, 2, "Collecting recent (1/2)");
        let s = store.snapshot("r1").unwrap();
        assert_eq!((s.stage, s.step, s.total), (Stage::Scraping, 1, 2));
        assert_eq!(s.created_at, created);

        store.remove("r1");
        assert_eq!(store.progress("r1"), Progress::completed());
        assert!(store.is_empty());
    }

    #[test]
    fn update_after_removal_does_not_resurrect() {
        let store = RunStore::new();
        store.insert("r1");
        store.remove("r1");
        store.update("r1", Stage::Failed, 0, 0, "late");
        assert!(store.snapshot("r1").is_none());
    }

    #[test]
    fn unknown_run_reads_as_completed() {
        let store = RunStore::new();
        assert_eq!(store.progress("never-started"), Progress::completed());
    }

    #[test]
    fn claim_succeeds_once_per_started_run() {
        let store = RunStore::new();
        assert!(!store.claim("never-started"));

        store.insert("r1");
        assert!(store.claim("r1"));
        assert!(!store.claim("r1"));

        store.remove("r1");
        assert!(!store.claim("r1"));

        store.insert("r2");
        store.update("r2", Stage::Scraping, 1, 2, "collecting");
        assert!(!store.claim("r2"));
    }
}
