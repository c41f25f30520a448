use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

/// Time-stamped set of shard ids shared between the discovery loop and the
/// shard tasks. Every operation takes the same lock, so mutation and
/// iteration never interleave.
#[derive(Debug, Default)]
pub struct ShardTracker {
    data: Mutex<HashMap<String, Instant>>,
}

impl ShardTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records every id with the current time, replacing older timestamps.
    pub fn add_all<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Instant::now();
        let mut data = self.lock();
        for id in ids {
            data.insert(id.into(), now);
        }
    }

    /// Inserts `id` unless it is already tracked. Returns `true` when the
    /// caller now owns the entry.
    pub fn try_claim(&self, id: &str) -> bool {
        let mut data = self.lock();
        if data.contains_key(id) {
            return false;
        }
        data.insert(id.to_string(), Instant::now());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Drops every entry strictly older than `max_age` and returns how many
    /// were removed.
    pub fn expire(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut data = self.lock();
        let before = data.len();
        data.retain(|_, added| {
            now.saturating_duration_since(*added) <= max_age
        });
        before - data.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted copy of the tracked ids.
    pub fn snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_contains_remove() {
        let tracker = ShardTracker::new();
        assert!(tracker.is_empty());
        tracker.add_all(["A", "B"]);
        assert!(tracker.contains("A"));
        assert_eq!(tracker.len(), 2);
        tracker.remove("A");
        tracker.remove("missing");
        assert!(!tracker.contains("A"));
        assert_eq!(tracker.snapshot(), vec!["B".to_string()]);
    }

    #[test]
    fn claim_is_exclusive() {
        let tracker = ShardTracker::new();
        assert!(tracker.try_claim("A"));
        assert!(!tracker.try_claim("A"));
        tracker.remove("A");
        assert!(tracker.try_claim("A"));
    }

    #[tokio::test(start_paused = true)]
    async fn expire_removes_only_older_entries() {
        let tracker = ShardTracker::new();
        tracker.add_all(["old"]);
        tokio::time::advance(Duration::from_secs(60)).await;
        tracker.add_all(["new"]);
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(tracker.expire(Duration::from_secs(45)), 1);
        assert_eq!(tracker.snapshot(), vec!["new".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_is_noop_without_expired_entries() {
        let tracker = ShardTracker::new();
        assert_eq!(tracker.expire(Duration::from_secs(1)), 0);

        tracker.add_all(["A", "B"]);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(tracker.expire(Duration::from_secs(10)), 0);
        assert_eq!(tracker.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn add_all_refreshes_timestamp() {
        let tracker = ShardTracker::new();
        tracker.add_all(["A"]);
        tokio::time::advance(Duration::from_secs(60)).await;
        tracker.add_all(["A"]);
        assert_eq!(tracker.expire(Duration::from_secs(30)), 0);
        assert!(tracker.contains("A"));
    }
}
