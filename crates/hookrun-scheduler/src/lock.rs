//! In-memory work-directory lock table.
//!
//! Locks are never persisted: after a restart every lock is gone, and jobs
//! left processing are reset to pending before polling resumes.

use chrono::{DateTime, Utc};
use hookrun_core::JobId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::LockError;

/// Current holder of a work-directory lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockInfo {
    pub owner: JobId,
    pub acquired_at: DateTime<Utc>,
}

/// Maps work-directory paths to the job holding them.
///
/// All operations are synchronous and complete under a single mutex, so two
/// acquire calls can never interleave.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<PathBuf, LockInfo>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<PathBuf, LockInfo>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the lock for `job`. Re-acquiring a lock the job already holds
    /// succeeds and keeps the original acquisition time.
    pub fn acquire(&self, path: &Path, job: JobId) -> Result<LockInfo, LockError> {
        let mut locks = self.table();
        match locks.get(path) {
            Some(info) if info.owner != job => Err(LockError::Held {
                path: path.to_path_buf(),
                owner: info.owner,
            }),
            Some(info) => Ok(*info),
            None => {
                let info = LockInfo {
                    owner: job,
                    acquired_at: Utc::now(),
                };
                locks.insert(path.to_path_buf(), info);
                debug!(path = %path.display(), job_id = %job, "Acquired work directory lock");
                Ok(info)
            }
        }
    }

    /// Release the lock if `job` owns it. Returns whether a lock was removed.
    pub fn release(&self, path: &Path, job: JobId) -> bool {
        let mut locks = self.table();
        match locks.get(path) {
            Some(info) if info.owner == job => {
                locks.remove(path);
                debug!(path = %path.display(), job_id = %job, "Released work directory lock");
                true
            }
            Some(info) => {
                warn!(
                    path = %path.display(),
                    job_id = %job,
                    owner = %info.owner,
                    "Refusing to release work directory lock held by another job"
                );
                false
            }
            None => {
                warn!(path = %path.display(), job_id = %job, "Released work directory was not locked");
                false
            }
        }
    }

    pub fn owner(&self, path: &Path) -> Option<LockInfo> {
        self.table().get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

/// Holds a work-directory lock and releases it when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard {
    table: Arc<LockTable>,
    path: PathBuf,
    owner: JobId,
}

impl LockGuard {
    pub(crate) fn new(table: Arc<LockTable>, path: PathBuf, owner: JobId) -> Self {
        Self { table, path, owner }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> JobId {
        self.owner
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.table.release(&self.path, self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_conflicts_with_other_owner() {
        let table = LockTable::new();
        let path = Path::new("/work/issue-42");

        table.acquire(path, JobId::new(1)).unwrap();
        let err = table.acquire(path, JobId::new(2)).unwrap_err();
        assert_eq!(
            err,
            LockError::Held {
                path: path.to_path_buf(),
                owner: JobId::new(1)
            }
        );
    }

    #[test]
    fn test_reacquire_by_owner_is_allowed() {
        let table = LockTable::new();
        let path = Path::new("/work/issue-42");

        let first = table.acquire(path, JobId::new(1)).unwrap();
        let second = table.acquire(path, JobId::new(1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_release_by_non_owner_keeps_lock() {
        let table = LockTable::new();
        let path = Path::new("/work/pr-7");

        table.acquire(path, JobId::new(1)).unwrap();
        assert!(!table.release(path, JobId::new(2)));
        assert_eq!(table.owner(path).unwrap().owner, JobId::new(1));

        assert!(table.release(path, JobId::new(1)));
        assert!(table.owner(path).is_none());
        assert!(!table.release(path, JobId::new(1)));
    }

    #[test]
    fn test_distinct_paths_are_independent() {
        let table = LockTable::new();
        table.acquire(Path::new("/work/a"), JobId::new(1)).unwrap();
        table.acquire(Path::new("/work/b"), JobId::new(2)).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let table = Arc::new(LockTable::new());
        let path = PathBuf::from("/work/issue-1");
        table.acquire(&path, JobId::new(5)).unwrap();

        let guard = LockGuard::new(table.clone(), path.clone(), JobId::new(5));
        assert_eq!(guard.owner(), JobId::new(5));
        drop(guard);

        assert!(table.is_empty());
        table.acquire(&path, JobId::new(6)).unwrap();
    }

    #[test]
    fn test_concurrent_acquire_has_single_winner() {
        let table = Arc::new(LockTable::new());
        let path = PathBuf::from("/work/issue-9");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let table = table.clone();
                let path = path.clone();
                std::thread::spawn(move || table.acquire(&path, JobId::new(i)).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
