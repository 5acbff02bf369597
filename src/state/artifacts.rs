//! Per-run ownership of transient files. A run creates its own `raw/<id>/`
//! and `processed/<id>/` directories and records any other file a
//! collaborator reports; on exit it deletes exactly those and nothing else,
//! so concurrent runs never touch each other's working files.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::StageError;

pub struct RunArtifacts {
    run_id: String,
    /// Deepest directory holding both data areas. Tracked files must live below it.
    scope: PathBuf,
    raw_dir: PathBuf,
    processed_dir: PathBuf,
    extra: Mutex<Vec<PathBuf>>,
    released: AtomicBool,
}

/// A run id becomes a directory name, so it must be exactly one plain path
/// component.
fn is_plain_name(run_id: &str) -> bool {
    let mut parts = Path::new(run_id).components();
    matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None))
}

fn has_parent_refs(path: &Path) -> bool {
    path.components().any(|c| c == Component::ParentDir)
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

impl RunArtifacts {
    pub async fn create(raw_root: &Path, processed_root: &Path, run_id: &str) -> Result<Self, StageError> {
        if !is_plain_name(run_id) {
            return Err(StageError::Other(format!("run id {run_id:?} is not a plain directory name")));
        }
        let raw_dir = raw_root.join(run_id);
        let processed_dir = processed_root.join(run_id);
        tokio::fs::create_dir_all(&raw_dir).await?;
        tokio::fs::create_dir_all(&processed_dir).await?;
        debug!(run_id, raw = %raw_dir.display(), processed = %processed_dir.display(), "run directories created");
        Ok(Self {
            run_id: run_id.to_string(),
            scope: common_ancestor(raw_root, processed_root),
            raw_dir,
            processed_dir,
            extra: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        })
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Take ownership of a file produced for this run. Paths already under
    /// the run's own directories need no tracking. Directories, paths with
    /// `..` and anything outside the data area are refused.
    pub fn track(&self, path: &Path) -> bool {
        if has_parent_refs(path) || !path.starts_with(&self.scope) {
            warn!(run_id = %self.run_id, path = %path.display(), "refusing to track path outside the data area");
            return false;
        }
        if path.starts_with(&self.raw_dir) || path.starts_with(&self.processed_dir) {
            return true;
        }
        if std::fs::symlink_metadata(path).is_ok_and(|m| m.is_dir()) {
            warn!(run_id = %self.run_id, path = %path.display(), "refusing to track a directory");
            return false;
        }
        if let Ok(mut extra) = self.extra.lock() {
            if !extra.iter().any(|p| p == path) {
                extra.push(path.to_path_buf());
            }
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Delete everything this run owns. Runs once; later calls are no-ops.
    /// Failures are logged and swallowed.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        // tracked extras are single files; only the run's own dirs are removed recursively
        for path in self.take_extra() {
            log_removal(&self.run_id, &path, tokio::fs::remove_file(&path).await);
        }
        for dir in [&self.raw_dir, &self.processed_dir] {
            log_removal(&self.run_id, dir, tokio::fs::remove_dir_all(dir).await);
        }
        debug!(run_id = %self.run_id, "run artifacts released");
    }

    fn take_extra(&self) -> Vec<PathBuf> {
        self.extra
            .lock()
            .map(|mut v| std::mem::take(&mut *v))
            .unwrap_or_default()
    }
}

fn log_removal(run_id: &str, path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(run_id, path = %path.display(), "cleanup failed: {e}"),
    }
}

impl Drop for RunArtifacts {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        for path in self.take_extra() {
            log_removal(&self.run_id, &path, std::fs::remove_file(&path));
        }
        for dir in [&self.raw_dir, &self.processed_dir] {
            log_removal(&self.run_id, dir, std::fs::remove_dir_all(dir));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_removes_only_owned_paths() {
        let root = tempfile::tempdir().unwrap();
        let raw = root.path().join("raw");
        let processed = root.path().join("processed");

        let a = RunArtifacts::create(&raw, &processed, "run-a").await.unwrap();
        let b = RunArtifacts::create(&raw, &processed, "run-b").await.unwrap();

        tokio::fs::write(a.raw_dir().join("shot.png"), b"png").await.unwrap();
        tokio::fs::write(b.processed_dir().join("rows.json"), b"[]").await.unwrap();
        let stray = root.path().join("a_screenshot.png");
        tokio::fs::write(&stray, b"png").await.unwrap();
        a.track(&stray);

        a.release().await;

        assert!(!raw.join("run-a").exists());
        assert!(!processed.join("run-a").exists());
        assert!(!stray.exists());
        assert!(b.processed_dir().join("rows.json").exists());
        assert!(raw.join("run-b").exists());

        b.release().await;
        assert!(!processed.join("run-b").exists());
    }

    #[tokio::test]
    async fn release_is_idempotent_and_tolerates_missing_paths() {
        let root = tempfile::tempdir().unwrap();
        let a = RunArtifacts::create(&root.path().join("raw"), &root.path().join("processed"), "r")
            .await
            .unwrap();
        a.track(&root.path().join("never-written.json"));
        tokio::fs::remove_dir_all(a.raw_dir()).await.unwrap();

        a.release().await;
        a.release().await;
        assert!(a.is_released());
        assert!(!a.processed_dir().exists());
    }

    #[tokio::test]
    async fn drop_cleans_up_unreleased_run() {
        let root = tempfile::tempdir().unwrap();
        let processed = root.path().join("processed");
        {
            let _a = RunArtifacts::create(&root.path().join("raw"), &processed, "dropped")
                .await
                .unwrap();
            assert!(processed.join("dropped").exists());
        }
        assert!(!processed.join("dropped").exists());
    }

    #[tokio::test]
    async fn tracked_directories_and_foreign_paths_survive_release() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        let a = RunArtifacts::create(&data.join("raw"), &data.join("processed"), "run-a")
            .await
            .unwrap();

        let shared = data.join("screenshots");
        tokio::fs::create_dir_all(&shared).await.unwrap();
        tokio::fs::write(shared.join("other_run.png"), b"png").await.unwrap();
        let outside = root.path().join("precious.txt");
        tokio::fs::write(&outside, b"keep").await.unwrap();
        let sneaky = data.join("raw").join("run-a").join("..").join("..").join("..").join("precious.txt");

        assert!(!a.track(&shared));
        assert!(!a.track(&outside));
        assert!(!a.track(&sneaky));
        assert!(a.track(&shared.join("other_run.png")));

        a.release().await;

        assert!(shared.exists());
        assert!(outside.exists());
        assert!(!shared.join("other_run.png").exists());
        assert!(!data.join("raw").join("run-a").exists());
    }

    #[tokio::test]
    async fn run_ids_must_be_plain_names() {
        let root = tempfile::tempdir().unwrap();
        let raw = root.path().join("raw");
        let processed = root.path().join("processed");
        for bad in ["..", ".", "/x", "a/b", ""] {
            assert!(RunArtifacts::create(&raw, &processed, bad).await.is_err(), "{bad:?} accepted");
        }
        assert!(!raw.exists());
    }
}
