//! Disk quota enforcement for work directories.
//!
//! When the base directory grows past `max_size_gb * cleanup_threshold_percent / 100`,
//! whole work directories are deleted, least recently accessed first, until
//! usage is back under 80% of `max_size_gb`.
//!
//! Eviction scans the filesystem only and does not consult the lock table, so
//! it can delete the directory of a job that is still processing.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::workdir::WorkDirManager;

/// Bytes per gigabyte (binary units).
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Fraction of the maximum size that cleanup shrinks usage down to.
pub const CLEANUP_TARGET_RATIO: f64 = 0.8;

/// Size and last access time of one work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirUsage {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub accessed: SystemTime,
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub usage_before: u64,
    pub usage_after: u64,
    /// Whether usage crossed the trigger threshold.
    pub triggered: bool,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Snapshot of the base directory.
#[derive(Debug, Default)]
struct Scan {
    total_bytes: u64,
    dirs: Vec<DirUsage>,
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

impl WorkDirManager {
    /// Usage above which cleanup starts.
    pub fn threshold_bytes(&self) -> u64 {
        (self.config.max_size_gb * BYTES_PER_GB * self.config.cleanup_threshold_percent / 100.0)
            as u64
    }

    /// Usage cleanup shrinks down to.
    pub fn target_bytes(&self) -> u64 {
        (self.config.max_size_gb * BYTES_PER_GB * CLEANUP_TARGET_RATIO) as u64
    }

    /// Total size of the base directory tree in bytes.
    pub async fn total_usage(&self) -> io::Result<u64> {
        Ok(self.scan().await?.total_bytes)
    }

    /// Run cleanup if usage exceeds the trigger threshold.
    pub async fn check_and_cleanup(&self) -> io::Result<CleanupReport> {
        let scan = self.scan().await?;
        let threshold = self.threshold_bytes();
        debug!(
            usage_gb = bytes_to_gb(scan.total_bytes),
            threshold_gb = bytes_to_gb(threshold),
            "Checking work directory usage"
        );

        if scan.total_bytes <= threshold {
            return Ok(CleanupReport {
                usage_before: scan.total_bytes,
                usage_after: scan.total_bytes,
                ..Default::default()
            });
        }

        warn!(
            usage_gb = bytes_to_gb(scan.total_bytes),
            threshold_gb = bytes_to_gb(threshold),
            "Work directory usage above threshold, cleaning up"
        );
        Ok(self.evict(scan).await)
    }

    /// Delete the least recently accessed work directories until usage is at
    /// or below the cleanup target, or nothing is left to delete.
    pub async fn cleanup_old_dirs(&self) -> io::Result<CleanupReport> {
        let scan = self.scan().await?;
        Ok(self.evict(scan).await)
    }

    async fn evict(&self, scan: Scan) -> CleanupReport {
        evict_oldest(scan, self.target_bytes(), |path| tokio::fs::remove_dir_all(path)).await
    }

    async fn scan(&self) -> io::Result<Scan> {
        let base = self.config.base_path.clone();
        tokio::task::spawn_blocking(move || scan_base(&base))
            .await
            .map_err(io::Error::other)?
    }

    /// Check usage now, then every `monitor_interval`, until `shutdown`
    /// flips to true.
    pub fn start_monitoring(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = self.clone();
        let period = manager.config.monitor_interval;
        tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Starting work directory monitor");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = manager.check_and_cleanup().await {
                            error!(error = %e, "Work directory quota check failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Work directory monitor stopped");
        })
    }
}

/// Remove directories oldest first with `remove` until `total <= target`.
/// A failed removal is recorded and skipped.
async fn evict_oldest<F, Fut>(mut scan: Scan, target: u64, mut remove: F) -> CleanupReport
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let mut report = CleanupReport {
        usage_before: scan.total_bytes,
        triggered: true,
        ..Default::default()
    };
    let mut total = scan.total_bytes;

    scan.dirs
        .sort_by(|a, b| a.accessed.cmp(&b.accessed).then_with(|| a.path.cmp(&b.path)));

    for dir in scan.dirs {
        if total <= target {
            break;
        }
        match remove(dir.path.clone()).await {
            Ok(()) => {
                total = total.saturating_sub(dir.size_bytes);
                info!(
                    path = %dir.path.display(),
                    freed_gb = bytes_to_gb(dir.size_bytes),
                    "Removed work directory"
                );
                report.removed.push(dir.path);
            }
            Err(e) => {
                error!(path = %dir.path.display(), error = %e, "Failed to remove work directory");
                report.failed.push(dir.path);
            }
        }
    }

    report.usage_after = total;
    info!(
        removed = report.removed.len(),
        failed = report.failed.len(),
        usage_gb = bytes_to_gb(total),
        target_gb = bytes_to_gb(target),
        "Work directory cleanup finished"
    );
    report
}

fn scan_base(base: &Path) -> io::Result<Scan> {
    let mut scan = Scan::default();
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(scan),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if meta.is_dir() {
            // Read the access time before walking, which may update it.
            let accessed = meta
                .accessed()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let size_bytes = dir_size(&path);
            scan.total_bytes += size_bytes;
            scan.dirs.push(DirUsage {
                path,
                size_bytes,
                accessed,
            });
        } else {
            scan.total_bytes += meta.len();
        }
    }
    Ok(scan)
}

/// Recursive size of `path` in bytes. Symlinks are counted, not followed;
/// unreadable entries count as zero.
fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "Cannot read directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.path().symlink_metadata() else {
                continue;
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookrun_config::WorkDirectoryConfig;
    use std::fs::File;
    use std::time::Duration;

    const KB: u64 = 1024;

    /// A manager whose quota is `max_bytes`.
    fn manager(base: &Path, max_bytes: u64, threshold_percent: f64) -> WorkDirManager {
        WorkDirManager::new(WorkDirectoryConfig {
            base_path: base.to_path_buf(),
            max_size_gb: max_bytes as f64 / BYTES_PER_GB,
            cleanup_threshold_percent: threshold_percent,
            monitor_interval: Duration::from_secs(3600),
        })
    }

    /// Create `base/name` holding `size` bytes, last accessed `age` ago.
    fn make_dir(base: &Path, name: &str, size: u64, age: Duration) -> PathBuf {
        let dir = base.join(name);
        std::fs::create_dir_all(dir.join("repository")).unwrap();
        std::fs::write(dir.join("repository").join("blob"), vec![0u8; size as usize]).unwrap();

        let when = SystemTime::now() - age;
        let times = std::fs::FileTimes::new().set_accessed(when).set_modified(when);
        File::open(&dir).unwrap().set_times(times).unwrap();
        dir
    }

    #[test]
    fn test_thresholds_use_binary_gigabytes() {
        let mgr = WorkDirManager::new(WorkDirectoryConfig {
            max_size_gb: 10.0,
            cleanup_threshold_percent: 90.0,
            ..Default::default()
        });
        assert_eq!(mgr.threshold_bytes(), (9.0 * BYTES_PER_GB) as u64);
        assert_eq!(mgr.target_bytes(), 8 * 1024 * 1024 * 1024);
        assert_eq!(bytes_to_gb(1024 * 1024 * 1024), 1.0);
    }

    #[tokio::test]
    async fn test_usage_counts_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        make_dir(tmp.path(), "issue-1", 3 * KB, Duration::from_secs(10));
        make_dir(tmp.path(), "issue-2", 2 * KB, Duration::from_secs(10));
        std::fs::write(tmp.path().join("stray"), vec![0u8; 100]).unwrap();

        let mgr = manager(tmp.path(), 100 * KB, 90.0);
        assert_eq!(mgr.total_usage().await.unwrap(), 5 * KB + 100);
    }

    #[tokio::test]
    async fn test_missing_base_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(&tmp.path().join("missing"), 10 * KB, 90.0);
        let report = mgr.check_and_cleanup().await.unwrap();
        assert_eq!(report.usage_before, 0);
        assert!(!report.triggered);
    }

    #[tokio::test]
    async fn test_below_threshold_does_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = make_dir(tmp.path(), "issue-1", 8 * KB, Duration::from_secs(60));

        let mgr = manager(tmp.path(), 10 * KB, 90.0);
        let report = mgr.check_and_cleanup().await.unwrap();

        assert!(!report.triggered);
        assert!(report.removed.is_empty());
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_evicts_oldest_until_target() {
        // 9.5 units used of 10, threshold 90%: evict down to 8.
        let tmp = tempfile::tempdir().unwrap();
        let oldest = make_dir(tmp.path(), "issue-1", KB, Duration::from_secs(3000));
        let older = make_dir(tmp.path(), "issue-2", KB / 2, Duration::from_secs(2000));
        let newer = make_dir(tmp.path(), "pr-3", 4 * KB, Duration::from_secs(1000));
        let newest = make_dir(tmp.path(), "pr-4", 4 * KB, Duration::from_secs(10));

        let mgr = manager(tmp.path(), 10 * KB, 90.0);
        let report = mgr.check_and_cleanup().await.unwrap();

        assert!(report.triggered);
        assert_eq!(report.usage_before, 9 * KB + KB / 2);
        assert_eq!(report.removed, vec![oldest.clone(), older.clone()]);
        assert_eq!(report.usage_after, 8 * KB);
        assert!(!oldest.exists());
        assert!(!older.exists());
        assert!(newer.exists());
        assert!(newest.exists());
    }

    #[tokio::test]
    async fn test_cleanup_exhausts_candidates() {
        let tmp = tempfile::tempdir().unwrap();
        make_dir(tmp.path(), "issue-1", 2 * KB, Duration::from_secs(100));
        make_dir(tmp.path(), "issue-2", 2 * KB, Duration::from_secs(50));
        // Loose files are never evicted.
        std::fs::write(tmp.path().join("stray"), vec![0u8; 4 * KB as usize]).unwrap();

        let mgr = manager(tmp.path(), 4 * KB, 90.0);
        let report = mgr.cleanup_old_dirs().await.unwrap();

        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.usage_after, 4 * KB);
        assert!(report.usage_after > mgr.target_bytes());
    }

    #[tokio::test]
    async fn test_failed_removal_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let stuck = make_dir(tmp.path(), "issue-1", 2 * KB, Duration::from_secs(400));
        let next = make_dir(tmp.path(), "issue-2", 2 * KB, Duration::from_secs(300));
        let kept = make_dir(tmp.path(), "pr-3", 2 * KB, Duration::from_secs(200));
        make_dir(tmp.path(), "pr-4", 4 * KB, Duration::from_secs(10));

        let mgr = manager(tmp.path(), 10 * KB, 90.0);
        let scan = mgr.scan().await.unwrap();
        let blocked = stuck.clone();
        let report = evict_oldest(scan, mgr.target_bytes(), move |path: PathBuf| {
            let blocked = blocked.clone();
            async move {
                if path == blocked {
                    Err(io::Error::new(io::ErrorKind::PermissionDenied, "busy"))
                } else {
                    tokio::fs::remove_dir_all(path).await
                }
            }
        })
        .await;

        assert_eq!(report.failed, vec![stuck.clone()]);
        assert_eq!(report.removed, vec![next.clone()]);
        assert_eq!(report.usage_after, 8 * KB);
        assert!(stuck.exists());
        assert!(!next.exists());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_eviction_ignores_locks() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = make_dir(tmp.path(), "issue-1", 10 * KB, Duration::from_secs(100));

        let mgr = manager(tmp.path(), 10 * KB, 50.0);
        let _guard = mgr.acquire_lock(&dir, hookrun_core::JobId::new(1)).unwrap();
        let report = mgr.check_and_cleanup().await.unwrap();

        assert_eq!(report.removed, vec![dir.clone()]);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_monitor_runs_immediately_and_stops() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = make_dir(tmp.path(), "issue-1", 10 * KB, Duration::from_secs(100));

        let mgr = Arc::new(manager(tmp.path(), 10 * KB, 50.0));
        let (tx, rx) = watch::channel(false);
        let handle = mgr.start_monitoring(rx);

        for _ in 0..100 {
            if !dir.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!dir.exists());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
