//! Future index: time-bucketed ids of tasks that are not due yet.
//!
//! Design:
//! - `BTreeMap<BucketKey, BTreeSet<EntryKey>>`, bucket keys ordered by window
//!   start so due buckets are a prefix of the map
//! - only tasks with `execute_time < horizon_end` are held here; the rest stay
//!   in the task store until the promoter moves the horizon forward
//! - inserts are idempotent (set semantics), which makes duplicate imports
//!   from the store harmless

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use crate::domain::{BucketKey, EntryKey, TaskType};

pub struct FutureIndex {
    granularity_ms: i64,
    buckets: Mutex<BTreeMap<BucketKey, BTreeSet<EntryKey>>>,

    /// Exclusive upper bound of execute times covered by the index.
    horizon_end: AtomicI64,
}

impl FutureIndex {
    pub fn new(granularity_ms: i64, horizon_end: i64) -> Self {
        Self {
            granularity_ms,
            buckets: Mutex::new(BTreeMap::new()),
            horizon_end: AtomicI64::new(horizon_end),
        }
    }

    pub fn granularity_ms(&self) -> i64 {
        self.granularity_ms
    }

    pub fn bucket_for(&self, task_type: TaskType, execute_time: i64) -> BucketKey {
        BucketKey::for_time(task_type, execute_time, self.granularity_ms)
    }

    pub fn horizon_end(&self) -> i64 {
        self.horizon_end.load(Ordering::SeqCst)
    }

    /// Move the horizon forward to `end` (never backwards); returns the
    /// previous value.
    pub fn advance_horizon(&self, end: i64) -> i64 {
        self.horizon_end.fetch_max(end, Ordering::SeqCst)
    }

    /// Undo an `advance_horizon` whose import scan failed. No-op if someone
    /// else moved the horizon in the meantime.
    pub fn retract_horizon(&self, from: i64, to: i64) {
        let _ = self
            .horizon_end
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn covers(&self, execute_time: i64) -> bool {
        execute_time < self.horizon_end()
    }

    /// Returns `false` if the entry was already present.
    pub fn insert(&self, task_type: TaskType, entry: EntryKey) -> bool {
        let key = self.bucket_for(task_type, entry.execute_time);
        self.buckets.lock().entry(key).or_default().insert(entry)
    }

    pub fn remove(&self, task_type: TaskType, entry: &EntryKey) -> bool {
        let key = self.bucket_for(task_type, entry.execute_time);
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(&key) else {
            return false;
        };
        let removed = bucket.remove(entry);
        if bucket.is_empty() {
            buckets.remove(&key);
        }
        removed
    }

    pub fn contains(&self, task_type: TaskType, entry: &EntryKey) -> bool {
        let key = self.bucket_for(task_type, entry.execute_time);
        self.buckets
            .lock()
            .get(&key)
            .is_some_and(|bucket| bucket.contains(entry))
    }

    /// Every bucket whose window has fully elapsed at `now_ms`, oldest first.
    ///
    /// Includes buckets a missed tick left behind.
    pub fn due_buckets(&self, now_ms: i64) -> Vec<BucketKey> {
        let granularity_ms = self.granularity_ms;
        self.buckets
            .lock()
            .keys()
            .take_while(|key| key.is_due(now_ms, granularity_ms))
            .copied()
            .collect()
    }

    /// Atomically take a whole bucket out of the index.
    pub fn detach(&self, key: BucketKey) -> Option<BTreeSet<EntryKey>> {
        self.buckets.lock().remove(&key)
    }

    /// Put entries back after a failed promotion.
    pub fn restore(&self, key: BucketKey, entries: impl IntoIterator<Item = EntryKey>) {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key).or_default();
        bucket.extend(entries);
        if bucket.is_empty() {
            buckets.remove(&key);
        }
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.buckets.lock().values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;

    const G: i64 = 1_000;

    fn entry(priority: i32, execute_time: i64, id: u64) -> EntryKey {
        EntryKey {
            priority,
            execute_time,
            id: TaskId::new(id),
        }
    }

    #[test]
    fn entries_in_the_same_window_share_a_bucket() {
        let index = FutureIndex::new(G, 60_000);
        let t = TaskType::new(1);
        assert!(index.insert(t, entry(1, 5_100, 1)));
        assert!(index.insert(t, entry(1, 5_900, 2)));
        assert!(index.insert(t, entry(1, 6_000, 3)));
        assert!(!index.insert(t, entry(1, 6_000, 3)));

        assert_eq!(index.bucket_count(), 2);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn types_get_separate_buckets() {
        let index = FutureIndex::new(G, 60_000);
        index.insert(TaskType::new(1), entry(1, 5_100, 1));
        index.insert(TaskType::new(2), entry(1, 5_100, 2));
        assert_eq!(index.bucket_count(), 2);
    }

    #[test]
    fn due_buckets_are_those_with_closed_windows_including_missed_ones() {
        let index = FutureIndex::new(G, 60_000);
        let t = TaskType::new(1);
        index.insert(t, entry(1, 1_500, 1));
        index.insert(t, entry(1, 3_500, 2));
        index.insert(t, entry(1, 9_500, 3));

        assert!(index.due_buckets(1_999).is_empty());

        let due: Vec<i64> = index.due_buckets(4_000).iter().map(|k| k.start_ms).collect();
        assert_eq!(due, vec![1_000, 3_000]);
    }

    #[test]
    fn detach_removes_the_bucket_once() {
        let index = FutureIndex::new(G, 60_000);
        let t = TaskType::new(1);
        index.insert(t, entry(5, 1_500, 1));
        index.insert(t, entry(9, 1_700, 2));

        let key = index.bucket_for(t, 1_500);
        let detached: Vec<u64> = index
            .detach(key)
            .unwrap()
            .iter()
            .map(|e| e.id.as_u64())
            .collect();
        assert_eq!(detached, vec![2, 1]);
        assert!(index.detach(key).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn remove_drops_empty_buckets() {
        let index = FutureIndex::new(G, 60_000);
        let t = TaskType::new(1);
        let e = entry(1, 1_500, 1);
        index.insert(t, e);

        assert!(index.contains(t, &e));
        assert!(index.remove(t, &e));
        assert!(!index.remove(t, &e));
        assert_eq!(index.bucket_count(), 0);
    }

    #[test]
    fn restore_puts_entries_back() {
        let index = FutureIndex::new(G, 60_000);
        let t = TaskType::new(1);
        let e = entry(1, 1_500, 1);
        index.insert(t, e);
        let key = index.bucket_for(t, 1_500);

        let entries = index.detach(key).unwrap();
        index.restore(key, entries);
        assert!(index.contains(t, &e));

        index.restore(key, std::iter::empty());
        assert_eq!(index.bucket_count(), 1);
    }

    #[test]
    fn horizon_only_moves_forward_unless_retracted() {
        let index = FutureIndex::new(G, 10_000);
        assert_eq!(index.advance_horizon(20_000), 10_000);
        assert_eq!(index.advance_horizon(15_000), 20_000);
        assert_eq!(index.horizon_end(), 20_000);
        assert!(index.covers(19_999));
        assert!(!index.covers(20_000));

        index.retract_horizon(20_000, 10_000);
        assert_eq!(index.horizon_end(), 10_000);
        // stale retraction is ignored
        index.retract_horizon(20_000, 5_000);
        assert_eq!(index.horizon_end(), 10_000);
    }
}
