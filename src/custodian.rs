//! Owns every deletion in the downloads directory: age-based sweeps,
//! delayed deletes for served files, and safe name resolution.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FileCustodian {
    root: PathBuf,
    max_age: Duration,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl FileCustodian {
    /// Creates the directory if needed. `root` should be the canonical path
    /// so containment checks and the paths handed out agree.
    pub async fn open(root: impl Into<PathBuf>, max_age: Duration) -> std::io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;

        Ok(Self {
            root,
            max_age,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a client-supplied file name onto a regular file directly inside
    /// the downloads directory.
    pub async fn resolve(&self, filename: &str) -> Option<PathBuf> {
        // Without separators the whole name is the only segment.
        if matches!(filename, "" | "." | "..")
            || filename.contains('/')
            || filename.contains('\\')
        {
            return None;
        }

        let candidate = self.root.join(filename);
        let canonical = tokio::fs::canonicalize(&candidate).await.ok()?;
        if !canonical.starts_with(&self.root) {
            warn!("Blocked file outside downloads directory: {:?}", canonical);
            return None;
        }

        let metadata = tokio::fs::metadata(&canonical).await.ok()?;
        metadata.is_file().then_some(canonical)
    }

    pub async fn sweep_expired(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    warn!("Could not open downloads directory for cleanup: {error}");
                }
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!("Could not iterate downloads directory for cleanup: {error}");
                    break;
                }
            };

            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(error) => {
                    debug!("Could not read metadata of {:?}: {error}", path);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= self.max_age {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => warn!("Could not remove expired file {:?}: {error}", path),
            }
        }

        if removed > 0 {
            info!("Removed {removed} expired file(s)");
        }
        removed
    }

    pub fn schedule_delete(&self, path: PathBuf, delay: Duration) {
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Delayed delete of {:?} cancelled", path);
                }
                _ = tokio::time::sleep(delay) => {
                    remove_quietly(&path).await;
                }
            }
        });
    }

    pub fn pending_deletes(&self) -> usize {
        self.tracker.len()
    }

    pub async fn shutdown(&self) {
        self.tracker.close();
        self.shutdown.cancel();
        self.tracker.wait().await;
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed served file {:?}", path),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => debug!("Could not remove served file {:?}: {error}", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    async fn custodian(dir: &Path) -> FileCustodian {
        FileCustodian::open(dir, Duration::from_secs(3600)).await.unwrap()
    }

    fn write_aged(path: &Path, age: Duration) {
        fs::write(path, b"data").unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("downloads");
        let custodian = custodian(&nested).await;
        assert!(nested.is_dir());
        assert!(custodian.root().is_absolute());
    }

    #[tokio::test]
    async fn resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let custodian = custodian(dir.path()).await;
        for name in ["../../etc/passwd", "a/../../b", "a\\b", "..", "", "/etc/passwd"] {
            assert_eq!(custodian.resolve(name).await, None, "{name:?}");
        }
    }

    #[tokio::test]
    async fn resolve_finds_regular_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let custodian = custodian(dir.path()).await;
        fs::write(dir.path().join("clip_123_abc.mp4"), b"x").unwrap();
        fs::write(dir.path().join("Wait... what_1_abc.mp4"), b"x").unwrap();
        fs::create_dir(dir.path().join("folder")).unwrap();

        let resolved = custodian.resolve("clip_123_abc.mp4").await.unwrap();
        assert!(custodian.resolve("Wait... what_1_abc.mp4").await.is_some());
        assert!(resolved.starts_with(custodian.root()));
        assert_eq!(custodian.resolve("folder").await, None);
        assert_eq!(custodian.resolve("missing.mp4").await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_rejects_symlink_escaping_directory() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.txt");
        fs::write(&secret, b"x").unwrap();
        std::os::unix::fs::symlink(&secret, dir.path().join("link.txt")).unwrap();

        let custodian = custodian(dir.path()).await;
        assert_eq!(custodian.resolve("link.txt").await, None);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let custodian = custodian(dir.path()).await;
        let stale = dir.path().join("stale.mp4");
        let fresh = dir.path().join("fresh.mp4");
        write_aged(&stale, Duration::from_secs(2 * 3600));
        write_aged(&fresh, Duration::from_secs(60));
        fs::create_dir(dir.path().join("subdir")).unwrap();

        assert_eq!(custodian.sweep_expired().await, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(dir.path().join("subdir").exists());
    }

    #[tokio::test]
    async fn scheduled_delete_removes_file_after_delay() {
        let dir = tempfile::tempdir().unwrap();
        let custodian = custodian(dir.path()).await;
        let path = dir.path().join("served.mp3");
        fs::write(&path, b"x").unwrap();

        custodian.schedule_delete(path.clone(), Duration::from_millis(20));
        assert!(path.exists());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn scheduled_delete_of_missing_file_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let custodian = custodian(dir.path()).await;
        custodian.schedule_delete(dir.path().join("gone.mp3"), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(custodian.pending_deletes(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let custodian = custodian(dir.path()).await;
        let path = dir.path().join("kept.mp4");
        fs::write(&path, b"x").unwrap();

        custodian.schedule_delete(path.clone(), Duration::from_secs(600));
        assert_eq!(custodian.pending_deletes(), 1);
        custodian.shutdown().await;

        assert_eq!(custodian.pending_deletes(), 0);
        assert!(path.exists());
    }
}
