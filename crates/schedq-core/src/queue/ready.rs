//! Ready queues: one priority-ordered lane per task type.
//!
//! Lanes hold `EntryKey`s only; the task store decides whether an entry is
//! still deliverable when it is popped.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use crate::domain::{EntryKey, TaskType};

#[derive(Default)]
struct Lane {
    entries: BTreeSet<EntryKey>,
    notify: Arc<Notify>,
}

#[derive(Default)]
pub struct ReadyQueue {
    lanes: Mutex<HashMap<TaskType, Lane>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert in priority order and wake everyone waiting on the lane.
    ///
    /// Returns `false` if the entry was already queued.
    pub fn push(&self, task_type: TaskType, entry: EntryKey) -> bool {
        let notify = {
            let mut lanes = self.lanes.lock();
            let lane = lanes.entry(task_type).or_default();
            if !lane.entries.insert(entry) {
                return false;
            }
            Arc::clone(&lane.notify)
        };
        notify.notify_waiters();
        true
    }

    /// Take the front entry. Only one caller can ever receive a given entry.
    pub fn pop(&self, task_type: TaskType) -> Option<EntryKey> {
        self.lanes
            .lock()
            .get_mut(&task_type)
            .and_then(|lane| lane.entries.pop_first())
    }

    pub fn remove(&self, task_type: TaskType, entry: &EntryKey) -> bool {
        self.lanes
            .lock()
            .get_mut(&task_type)
            .is_some_and(|lane| lane.entries.remove(entry))
    }

    pub fn contains(&self, task_type: TaskType, entry: &EntryKey) -> bool {
        self.lanes
            .lock()
            .get(&task_type)
            .is_some_and(|lane| lane.entries.contains(entry))
    }

    pub fn len(&self, task_type: TaskType) -> usize {
        self.lanes
            .lock()
            .get(&task_type)
            .map_or(0, |lane| lane.entries.len())
    }

    pub fn is_empty(&self, task_type: TaskType) -> bool {
        self.len(task_type) == 0
    }

    /// Wake-up handle for consumers of `task_type`.
    ///
    /// Register interest (`Notified::enable`) before checking the lane, or a
    /// push between the check and the wait is missed. Dropping the waiter
    /// removes the lane again if it is empty and nobody else waits on it.
    pub fn waiter(&self, task_type: TaskType) -> LaneWaiter<'_> {
        let notify = Arc::clone(&self.lanes.lock().entry(task_type).or_default().notify);
        LaneWaiter {
            queue: self,
            task_type,
            notify,
        }
    }

    /// Number of lanes currently allocated.
    pub fn lane_count(&self) -> usize {
        self.lanes.lock().len()
    }

    fn release(&self, task_type: TaskType) {
        let mut lanes = self.lanes.lock();
        // the lane's handle plus the releasing waiter's
        let idle = lanes.get(&task_type).is_some_and(|lane| {
            lane.entries.is_empty() && Arc::strong_count(&lane.notify) == 2
        });
        if idle {
            lanes.remove(&task_type);
        }
    }
}

/// Registered interest in one lane; see [`ReadyQueue::waiter`].
pub struct LaneWaiter<'a> {
    queue: &'a ReadyQueue,
    task_type: TaskType,
    notify: Arc<Notify>,
}

impl LaneWaiter<'_> {
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

impl Drop for LaneWaiter<'_> {
    fn drop(&mut self) {
        self.queue.release(self.task_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use std::time::Duration;

    fn entry(priority: i32, execute_time: i64, id: u64) -> EntryKey {
        EntryKey {
            priority,
            execute_time,
            id: TaskId::new(id),
        }
    }

    #[test]
    fn pops_in_priority_order_per_type() {
        let queue = ReadyQueue::new();
        let t = TaskType::new(1);
        queue.push(t, entry(10, 100, 1));
        queue.push(t, entry(90, 300, 2));
        queue.push(t, entry(90, 200, 3));
        queue.push(TaskType::new(2), entry(99, 0, 4));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop(t))
            .map(|e| e.id.as_u64())
            .collect();
        assert_eq!(order, vec![3, 2, 1]);
        assert_eq!(queue.len(TaskType::new(2)), 1);
    }

    #[test]
    fn duplicate_push_is_ignored() {
        let queue = ReadyQueue::new();
        let t = TaskType::new(1);
        assert!(queue.push(t, entry(1, 1, 1)));
        assert!(!queue.push(t, entry(1, 1, 1)));
        assert_eq!(queue.len(t), 1);
    }

    #[test]
    fn remove_and_contains() {
        let queue = ReadyQueue::new();
        let t = TaskType::new(1);
        let e = entry(1, 1, 1);
        queue.push(t, e);
        assert!(queue.contains(t, &e));
        assert!(queue.remove(t, &e));
        assert!(!queue.remove(t, &e));
        assert!(queue.is_empty(t));
        assert!(queue.pop(TaskType::new(42)).is_none());
    }

    #[tokio::test]
    async fn push_wakes_registered_waiter() {
        let queue = Arc::new(ReadyQueue::new());
        let t = TaskType::new(1);
        let waiter = queue.waiter(t);
        let notified = waiter.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let pusher = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue.push(t, entry(1, 1, 1));
            })
        };

        tokio::time::timeout(Duration::from_secs(5), notified)
            .await
            .expect("push should wake the waiter");
        pusher.await.unwrap();
        assert_eq!(queue.len(t), 1);
    }

    #[test]
    fn idle_lanes_are_released_with_their_waiter() {
        let queue = ReadyQueue::new();
        let t = TaskType::new(7);
        {
            let _first = queue.waiter(t);
            let second = queue.waiter(t);
            drop(second);
            // still watched by `_first`
            assert_eq!(queue.lane_count(), 1);
        }
        assert_eq!(queue.lane_count(), 0);

        let waiter = queue.waiter(t);
        queue.push(t, entry(1, 1, 1));
        drop(waiter);
        // lanes holding entries stay
        assert_eq!(queue.lane_count(), 1);
        assert!(queue.pop(t).is_some());
    }
}
