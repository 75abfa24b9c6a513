//! Ordering keys shared by the future index and the ready queues.

use std::cmp::Ordering;
use std::fmt;

use super::{TaskId, TaskType};

/// Delivery order of a task among its peers.
///
/// Sorts by descending priority, then ascending execute time, then ascending
/// id, so `BTreeSet<EntryKey>::first()` is always the next task to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub priority: i32,
    pub execute_time: i64,
    pub id: TaskId,
}

impl PartialOrd for EntryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.execute_time.cmp(&other.execute_time))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Time window `[start_ms, start_ms + granularity)` for one task type.
///
/// Field order matters: the derived ordering sorts by window start first, so
/// a range scan over the index yields due buckets oldest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub start_ms: i64,
    pub task_type: TaskType,
}

impl BucketKey {
    pub fn for_time(task_type: TaskType, execute_time: i64, granularity_ms: i64) -> Self {
        Self {
            start_ms: execute_time.div_euclid(granularity_ms) * granularity_ms,
            task_type,
        }
    }

    pub fn end_ms(&self, granularity_ms: i64) -> i64 {
        self.start_ms + granularity_ms
    }

    /// A bucket is due once its whole window has elapsed, so no task in it
    /// can be delivered before its execute time.
    pub fn is_due(&self, now_ms: i64, granularity_ms: i64) -> bool {
        self.end_ms(granularity_ms) <= now_ms
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bucket:{}:{}", self.task_type, self.start_ms)
    }
}
