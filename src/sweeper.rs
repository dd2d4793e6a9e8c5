use crate::error::AppError;
use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Deletes regular files under `dir` whose last modification is older than
/// `max_age`. Files that disappear or cannot be removed mid-sweep are skipped.
/// Returns the number of files removed.
pub async fn sweep_once(dir: &Path, max_age: Duration) -> Result<usize, AppError> {
    let now = SystemTime::now();
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(event = "sweep_stat_failed", path = %path.display(), error = %err);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(event = "sweep_removed", path = %path.display(), age_secs = age.as_secs());
                removed += 1;
            }
            Err(err) => warn!(event = "sweep_remove_failed", path = %path.display(), error = %err),
        }
    }

    Ok(removed)
}

/// Sweeps immediately, then once per `interval`, for the life of the process.
pub async fn run(dir: PathBuf, interval: Duration, max_age: Duration) {
    info!(
        event = "sweeper_started",
        dir = %dir.display(),
        interval_secs = interval.as_secs(),
        max_age_secs = max_age.as_secs()
    );
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match sweep_once(&dir, max_age).await {
            Ok(0) => debug!(event = "sweep_complete", removed = 0),
            Ok(removed) => info!(event = "sweep_complete", removed),
            Err(err) => warn!(event = "sweep_failed", dir = %dir.display(), error = %err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removes_only_files_older_than_max_age() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("old.mp4"), b"x").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let removed = sweep_once(dir.path(), Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("old.mp4").exists());
    }

    #[tokio::test]
    async fn keeps_recent_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("fresh.mp3"), b"x").await.unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();

        let removed = sweep_once(dir.path(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("fresh.mp3").exists());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let removed = sweep_once(dir.path(), Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert!(dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(sweep_once(&missing, Duration::ZERO).await.is_err());
    }
}
