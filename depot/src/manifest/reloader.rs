//! Manifest Reloader
//!
//! Background task that re-reads the manifest on a fixed period and
//! publishes every successful load.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::cache::SnapshotCache;
use super::loader::{LoadError, ManifestLoader};
use super::types::Snapshot;

/// Owns the write side of a [`SnapshotCache`].
pub struct Reloader {
    loader: Arc<ManifestLoader>,
    cache: Arc<SnapshotCache>,
    interval: Duration,
}

/// Stops the periodic task when asked (or when dropped along with its sender).
pub struct ReloaderHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl Reloader {
    pub fn new(loader: ManifestLoader, cache: Arc<SnapshotCache>, interval: Duration) -> Self {
        Self {
            loader: Arc::new(loader),
            cache,
            interval,
        }
    }

    /// Run one load and publish the result.
    ///
    /// A failed load publishes nothing; whatever snapshot was visible
    /// before stays visible.
    pub async fn reload_once(&self) -> Result<Arc<Snapshot>, LoadError> {
        let loader = Arc::clone(&self.loader);
        let snapshot = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| LoadError::Task(e.to_string()))??;

        let snapshot = Arc::new(snapshot);
        let previous = self.cache.publish(Arc::clone(&snapshot));
        log_change(previous.as_deref(), &snapshot);
        Ok(snapshot)
    }

    /// Load once now, then keep reloading every interval until stopped.
    ///
    /// A failed first load is reported and leaves the cache empty; requests
    /// answer "service unavailable" until a later cycle succeeds.
    pub async fn start(self) -> ReloaderHandle {
        if let Err(e) = self.reload_once().await {
            warn!("Initial manifest load failed: {}", e);
        }

        info!(
            "Manifest reloader started for {:?} (every {:?})",
            self.loader.manifest_path(),
            self.interval
        );

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial load already ran.
            interval.tick().await;

            let mut failures: u64 = 0;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match self.reload_once().await {
                            Ok(_) => {
                                if failures > 0 {
                                    info!("Manifest reload recovered after {} failures", failures);
                                }
                                failures = 0;
                            }
                            Err(e) => {
                                failures += 1;
                                warn!(failures, "Manifest reload failed, keeping previous snapshot: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Manifest reloader stopping");
                        break;
                    }
                }
            }
        });

        ReloaderHandle { shutdown_tx, task }
    }
}

impl ReloaderHandle {
    /// Signal the periodic task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!("Manifest reloader ended abnormally: {}", e);
        }
    }
}

fn log_change(previous: Option<&Snapshot>, current: &Snapshot) {
    if previous.is_some_and(|p| p.same_packages(current)) {
        return;
    }
    match current.latest() {
        Some(latest) => info!(
            version = %latest.version,
            path = %latest.path.display(),
            "Published manifest snapshot ({} versions)",
            current.packages().len()
        ),
        None => info!("Published manifest snapshot with no versions"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServeMode;
    use std::fs;
    use std::path::Path;

    fn write_manifest(dir: &Path, versions: &[(&str, &str)]) {
        let entries: Vec<_> = versions
            .iter()
            .map(|(v, p)| serde_json::json!({"version": v, "path": p}))
            .collect();
        let body = serde_json::json!({ "versions": entries }).to_string();
        // Write-then-rename so a concurrent reload never reads half a file.
        let tmp = dir.join("version.json.tmp");
        fs::write(&tmp, body).unwrap();
        fs::rename(&tmp, dir.join("version.json")).unwrap();
    }

    fn reloader(dir: &Path, cache: Arc<SnapshotCache>, interval: Duration) -> Reloader {
        let loader = ManifestLoader::new(
            dir.join("version.json"),
            dir.to_path_buf(),
            ServeMode::Latest,
        );
        Reloader::new(loader, cache, interval)
    }

    #[tokio::test]
    async fn test_reload_matches_direct_load() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &[("1.0.0", "a.bin"), ("1.1.0", "b.bin")]);
        let cache = Arc::new(SnapshotCache::new());
        let reloader = reloader(dir.path(), Arc::clone(&cache), Duration::from_secs(1));

        reloader.reload_once().await.unwrap();

        let direct = reloader.loader.load().unwrap();
        let published = cache.current().unwrap();
        assert!(published.same_packages(&direct));
        assert_eq!(published.latest().unwrap().version, "1.1.0");
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_last_good_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &[("1.1.0", "b.bin")]);
        let cache = Arc::new(SnapshotCache::new());
        let reloader = reloader(dir.path(), Arc::clone(&cache), Duration::from_secs(1));
        reloader.reload_once().await.unwrap();

        fs::remove_file(dir.path().join("version.json")).unwrap();
        assert!(matches!(
            reloader.reload_once().await,
            Err(LoadError::Io { .. })
        ));
        assert_eq!(cache.current().unwrap().latest().unwrap().version, "1.1.0");

        fs::write(dir.path().join("version.json"), "{ not json").unwrap();
        assert!(reloader.reload_once().await.is_err());
        assert_eq!(cache.current().unwrap().latest().unwrap().version, "1.1.0");

        write_manifest(dir.path(), &[("1.2.0", "c.bin")]);
        reloader.reload_once().await.unwrap();
        assert_eq!(cache.current().unwrap().latest().unwrap().version, "1.2.0");
    }

    #[tokio::test]
    async fn test_failed_initial_load_leaves_cache_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SnapshotCache::new());
        let handle = reloader(dir.path(), Arc::clone(&cache), Duration::from_secs(60))
            .start()
            .await;
        assert!(cache.current().is_none());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_periodic_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &[("1.0.0", "a.bin")]);
        let cache = Arc::new(SnapshotCache::new());
        let handle = reloader(dir.path(), Arc::clone(&cache), Duration::from_millis(20))
            .start()
            .await;
        assert_eq!(cache.current().unwrap().latest().unwrap().version, "1.0.0");

        write_manifest(dir.path(), &[("1.0.0", "a.bin"), ("2.0.0", "b.bin")]);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if cache.current().unwrap().latest().unwrap().version == "2.0.0" {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "reload never observed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_halts_reloading() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &[("1.0.0", "a.bin")]);
        let cache = Arc::new(SnapshotCache::new());
        let handle = reloader(dir.path(), Arc::clone(&cache), Duration::from_millis(10))
            .start()
            .await;
        handle.stop().await;

        write_manifest(dir.path(), &[("9.0.0", "z.bin")]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.current().unwrap().latest().unwrap().version, "1.0.0");
    }
}
