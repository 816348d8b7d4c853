//! Per-event work directories.
//!
//! Each logical unit of work (an issue, a pull request, or a standalone
//! event) gets one directory under the configured base path, holding the
//! repository checkout in a fixed `repository` subdirectory. Retries of the
//! same unit reuse the same directory instead of cloning again.

use hookrun_config::WorkDirectoryConfig;
use hookrun_core::{Event, JobId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::lock::{LockGuard, LockInfo, LockTable};
use crate::LockError;

/// Subdirectory of a work directory that holds the source checkout.
pub const REPOSITORY_DIR: &str = "repository";

/// Grants exclusive access to work directories and enforces the disk quota.
#[derive(Debug)]
pub struct WorkDirManager {
    pub(crate) config: WorkDirectoryConfig,
    locks: Arc<LockTable>,
}

impl WorkDirManager {
    pub fn new(config: WorkDirectoryConfig) -> Self {
        Self {
            config,
            locks: Arc::new(LockTable::new()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    pub fn config(&self) -> &WorkDirectoryConfig {
        &self.config
    }

    /// Work directory for `event`: `pr-{N}`, `issue-{N}` or `event-{id}`.
    ///
    /// Pure and deterministic; never touches the filesystem.
    pub fn work_dir_for_event(&self, event: &Event) -> PathBuf {
        self.config.base_path.join(work_dir_name(event))
    }

    /// The repository checkout inside `work_dir`.
    pub fn repository_dir(work_dir: &Path) -> PathBuf {
        work_dir.join(REPOSITORY_DIR)
    }

    /// Create `path` and its repository subdirectory if missing.
    pub async fn ensure_work_dir(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(Self::repository_dir(path)).await?;
        debug!(path = %path.display(), "Work directory ready");
        Ok(())
    }

    /// Lock `path` for `job`, failing fast if another job holds it.
    pub fn acquire_lock(&self, path: &Path, job: JobId) -> Result<LockGuard, LockError> {
        self.locks.acquire(path, job)?;
        Ok(LockGuard::new(self.locks.clone(), path.to_path_buf(), job))
    }

    /// Release `path` if `job` owns it; otherwise the lock is left intact.
    pub fn release_lock(&self, path: &Path, job: JobId) -> bool {
        self.locks.release(path, job)
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.locks.owner(path).is_some()
    }

    pub fn lock_owner(&self, path: &Path) -> Option<LockInfo> {
        self.locks.owner(path)
    }
}

fn work_dir_name(event: &Event) -> String {
    if let Some(number) = event.pull_request_number() {
        format!("pr-{}", number)
    } else if let Some(number) = event.issue_number() {
        format!("issue-{}", number)
    } else {
        format!("event-{}", sanitize(&event.id))
    }
}

/// Keep event ids from escaping the base directory.
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        format!("_{}", cleaned)
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(base: &Path) -> WorkDirManager {
        WorkDirManager::new(WorkDirectoryConfig {
            base_path: base.to_path_buf(),
            ..Default::default()
        })
    }

    #[test]
    fn test_issue_event_path() {
        let mgr = manager(Path::new("/data/work"));
        let event = Event::new("e1", "issues", json!({"issue": {"number": 42}}));

        let dir = mgr.work_dir_for_event(&event);
        assert_eq!(dir, PathBuf::from("/data/work/issue-42"));
        assert_eq!(
            WorkDirManager::repository_dir(&dir),
            PathBuf::from("/data/work/issue-42/repository")
        );
    }

    #[test]
    fn test_pull_request_event_path() {
        let mgr = manager(Path::new("/data/work"));
        let event = Event::new("e1", "pull_request", json!({"pull_request": {"number": 8}}));
        assert_eq!(mgr.work_dir_for_event(&event), PathBuf::from("/data/work/pr-8"));

        let comment = Event::new(
            "e2",
            "issue_comment",
            json!({"issue": {"number": 8, "pull_request": {}}}),
        );
        assert_eq!(mgr.work_dir_for_event(&comment), PathBuf::from("/data/work/pr-8"));
    }

    #[test]
    fn test_other_event_path_uses_id() {
        let mgr = manager(Path::new("/data/work"));
        let event = Event::new("abc-123", "push", json!({"ref": "refs/heads/main"}));
        assert_eq!(
            mgr.work_dir_for_event(&event),
            PathBuf::from("/data/work/event-abc-123")
        );
    }

    #[test]
    fn test_event_id_cannot_escape_base() {
        let mgr = manager(Path::new("/data/work"));
        let event = Event::new("../../etc", "push", json!({}));
        assert_eq!(
            mgr.work_dir_for_event(&event),
            PathBuf::from("/data/work/event-.._.._etc")
        );
        assert_eq!(sanitize(".."), "_..");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn test_path_is_deterministic() {
        let mgr = manager(Path::new("/data/work"));
        let event = Event::from_payload("issues", json!({"issue": {"number": 3}}));
        assert_eq!(mgr.work_dir_for_event(&event), mgr.work_dir_for_event(&event));

        let other = Event::from_payload("push", json!({}));
        assert_eq!(mgr.work_dir_for_event(&other), mgr.work_dir_for_event(&other));
    }

    #[tokio::test]
    async fn test_ensure_work_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let dir = tmp.path().join("issue-1");

        mgr.ensure_work_dir(&dir).await.unwrap();
        std::fs::write(dir.join("repository").join("README"), "keep").unwrap();
        mgr.ensure_work_dir(&dir).await.unwrap();

        assert!(dir.join("repository").is_dir());
        assert_eq!(
            std::fs::read_to_string(dir.join("repository").join("README")).unwrap(),
            "keep"
        );
    }

    #[test]
    fn test_lock_guard_round_trip() {
        let mgr = manager(Path::new("/data/work"));
        let dir = PathBuf::from("/data/work/issue-42");

        let guard = mgr.acquire_lock(&dir, JobId::new(1)).unwrap();
        assert!(mgr.is_locked(&dir));
        assert!(mgr.acquire_lock(&dir, JobId::new(2)).is_err());

        // A stale job cannot release someone else's lock.
        assert!(!mgr.release_lock(&dir, JobId::new(2)));
        assert_eq!(mgr.lock_owner(&dir).unwrap().owner, JobId::new(1));

        drop(guard);
        assert!(!mgr.is_locked(&dir));
        let _guard = mgr.acquire_lock(&dir, JobId::new(2)).unwrap();
    }
}
