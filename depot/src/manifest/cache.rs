//! Snapshot Cache
//!
//! Single-writer, many-reader holder of the current [`Snapshot`].

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::types::Snapshot;

/// Holds the currently published snapshot.
///
/// Publishing swaps one `Arc` for another, so a reader sees either the old
/// snapshot or the new one in full. A reader's `Arc` keeps its snapshot
/// alive after it has been superseded.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    current: ArcSwapOption<Snapshot>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the visible snapshot. Returns the one it superseded.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> Option<Arc<Snapshot>> {
        self.current.swap(Some(snapshot))
    }

    /// The current snapshot, or `None` before the first successful load.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PackageRef;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn snapshot(n: u64) -> Arc<Snapshot> {
        Arc::new(Snapshot::new(
            PathBuf::from("/srv/packages"),
            vec![PackageRef {
                version: format!("1.0.{n}"),
                precedence: semver::Version::new(1, 0, n),
                relative_path: format!("pkg-{n}.bin"),
                path: PathBuf::from(format!("/srv/packages/pkg-{n}.bin")),
            }],
            Utc::now(),
        ))
    }

    #[test]
    fn test_absent_before_first_publish() {
        let cache = SnapshotCache::new();
        assert!(cache.current().is_none());
    }

    #[test]
    fn test_publish_replaces() {
        let cache = SnapshotCache::new();
        assert!(cache.publish(snapshot(1)).is_none());
        let previous = cache.publish(snapshot(2)).unwrap();
        assert_eq!(previous.latest().unwrap().version, "1.0.1");
        assert_eq!(cache.current().unwrap().latest().unwrap().version, "1.0.2");
    }

    #[test]
    fn test_reader_keeps_superseded_snapshot() {
        let cache = SnapshotCache::new();
        cache.publish(snapshot(1));
        let held = cache.current().unwrap();
        cache.publish(snapshot(2));
        assert_eq!(held.latest().unwrap().version, "1.0.1");
        assert_eq!(held.latest().unwrap().relative_path, "pkg-1.bin");
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_fields() {
        let cache = Arc::new(SnapshotCache::new());
        cache.publish(snapshot(0));
        let stop = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..4u64)
            .map(|w| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..500u64 {
                        cache.publish(snapshot(w * 1000 + i));
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let mut reads = 0u64;
                    while !stop.load(Ordering::Relaxed) || reads < 1000 {
                        let current = cache.current().unwrap();
                        let latest = current.latest().unwrap();
                        let n = latest.precedence.patch;
                        assert_eq!(latest.version, format!("1.0.{n}"));
                        assert_eq!(latest.relative_path, format!("pkg-{n}.bin"));
                        reads += 1;
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
