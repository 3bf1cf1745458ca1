use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Resource paths seen while relaying proxy traffic, in first-seen order.
///
/// Clones share the same set. The set lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    inner: Arc<Mutex<TrackedPaths>>,
}

#[derive(Debug, Default)]
struct TrackedPaths {
    order: Vec<String>,
    seen: HashSet<String>,
}

/// Body of `/proxy-capture`; readable as a capture document by the materializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub resources: Vec<String>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `path` was not tracked yet.
    pub async fn record(&self, path: impl Into<String>) -> bool {
        let path = path.into();
        let mut tracked = self.inner.lock().await;
        if tracked.seen.contains(&path) {
            return false;
        }
        debug!("Tracking {}", path);
        tracked.seen.insert(path.clone());
        tracked.order.push(path);
        true
    }

    pub async fn reset(&self) {
        let mut tracked = self.inner.lock().await;
        tracked.order.clear();
        tracked.seen.clear();
    }

    pub async fn read(&self) -> Vec<String> {
        self.inner.lock().await.order.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            resources: self.read().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_keeps_first_seen_order() {
        let tracker = Tracker::new();
        assert!(tracker.record("/b.css").await);
        assert!(tracker.record("/a.js?ver=1").await);
        assert!(!tracker.record("/b.css").await);
        assert_eq!(tracker.read().await, vec!["/b.css", "/a.js?ver=1"]);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let tracker = Tracker::new();
        tracker.record("/a.png").await;
        tracker.reset().await;
        assert!(tracker.is_empty().await);
        assert!(tracker.record("/a.png").await);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let tracker = Tracker::new();
        let other = tracker.clone();
        other.record("/x").await;
        assert_eq!(tracker.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_deduplicated() {
        let tracker = Tracker::new();
        let mut handles = Vec::new();
        for i in 0..20 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.record(format!("/r{}", i % 5)).await
            }));
        }
        let mut added = 0;
        for handle in handles {
            if handle.await.unwrap() {
                added += 1;
            }
        }
        assert_eq!(added, 5);
        assert_eq!(tracker.len().await, 5);
    }

    #[tokio::test]
    async fn test_snapshot_serializes_as_resources_object() {
        let tracker = Tracker::new();
        tracker.record("/a.png").await;
        let json = serde_json::to_string(&tracker.snapshot().await).unwrap();
        assert_eq!(json, r#"{"resources":["/a.png"]}"#);
    }
}
