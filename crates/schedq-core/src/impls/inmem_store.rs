//! InMemoryTaskStore - プロセス内の正本
//!
//! # 学習ポイント
//! - HashMap（id → record）+ BTreeSet（execute_time 順の Scheduled 索引）
//! - 状態遷移は 1 つのロックの中で compare-and-set
//! - 同じ `Arc` を新しい Scheduler に渡せば「再起動」を再現できる

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{Task, TaskId, TaskStatus};
use crate::observability::StatusCounts;
use crate::ports::{StoreError, TaskStore, Transition};

/// Record map plus a secondary index of `Scheduled` tasks by execute time.
///
/// Invariant: `(execute_time, id)` is in `scheduled` iff the task's status is
/// `Scheduled`.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    tasks: HashMap<TaskId, Task>,
    scheduled: BTreeSet<(i64, TaskId)>,
}

impl StoreState {
    pub(crate) fn check_insert(&self, task: &Task) -> Result<(), StoreError> {
        if self.tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id));
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, task: Task) -> Result<(), StoreError> {
        self.check_insert(&task)?;
        if task.status == TaskStatus::Scheduled {
            self.scheduled.insert((task.execute_time, task.id));
        }
        self.tasks.insert(task.id, task);
        Ok(())
    }

    /// What `transition` would do, without doing it.
    pub(crate) fn check_transition(&self, id: TaskId, to: TaskStatus) -> Transition {
        match self.tasks.get(&id) {
            None => Transition::Missing,
            Some(task) if task.status.can_transition_to(to) => {
                let mut updated = task.clone();
                updated.status = to;
                Transition::Applied(updated)
            }
            Some(task) => Transition::Rejected(task.clone()),
        }
    }

    /// Unconditional status write; callers validate first (or replay a journal).
    pub(crate) fn set_status(&mut self, id: TaskId, status: TaskStatus) {
        if let Some(task) = self.tasks.get_mut(&id) {
            if task.status == TaskStatus::Scheduled {
                self.scheduled.remove(&(task.execute_time, id));
            }
            task.status = status;
            if status == TaskStatus::Scheduled {
                self.scheduled.insert((task.execute_time, id));
            }
        }
    }

    pub(crate) fn transition(&mut self, id: TaskId, to: TaskStatus) -> Transition {
        let outcome = self.check_transition(id, to);
        if matches!(outcome, Transition::Applied(_)) {
            self.set_status(id, to);
        }
        outcome
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).cloned()
    }

    pub(crate) fn scan_status(&self, status: TaskStatus) -> Vec<Task> {
        let mut found: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.id);
        found
    }

    pub(crate) fn scan_scheduled(&self, from_ms: i64, until_ms: i64) -> Vec<Task> {
        if from_ms >= until_ms {
            return Vec::new();
        }
        self.scheduled
            .range((from_ms, TaskId::MIN)..(until_ms, TaskId::MIN))
            .filter_map(|(_, id)| self.tasks.get(id).cloned())
            .collect()
    }

    pub(crate) fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in self.tasks.values() {
            counts.record(task.status);
        }
        counts
    }

    pub(crate) fn max_id(&self) -> Option<TaskId> {
        self.tasks.keys().max().copied()
    }
}

/// In-memory task store.
///
/// `set_available(false)` makes every call fail with
/// `StoreError::Unavailable`, for exercising outage handling.
#[derive(Debug)]
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
    available: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.state.lock().insert(task.clone())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.ensure_available()?;
        Ok(self.state.lock().get(id))
    }

    async fn transition(&self, id: TaskId, to: TaskStatus) -> Result<Transition, StoreError> {
        self.ensure_available()?;
        Ok(self.state.lock().transition(id, to))
    }

    async fn scan_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        self.ensure_available()?;
        Ok(self.state.lock().scan_status(status))
    }

    async fn scan_scheduled(&self, from_ms: i64, until_ms: i64) -> Result<Vec<Task>, StoreError> {
        self.ensure_available()?;
        Ok(self.state.lock().scan_scheduled(from_ms, until_ms))
    }

    async fn counts(&self) -> Result<StatusCounts, StoreError> {
        self.ensure_available()?;
        Ok(self.state.lock().counts())
    }

    async fn max_id(&self) -> Result<Option<TaskId>, StoreError> {
        self.ensure_available()?;
        Ok(self.state.lock().max_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskType};

    fn task(id: u64, execute_time: i64) -> Task {
        Task::scheduled(
            TaskId::new(id),
            NewTask::new(TaskType::new(1), execute_time),
            0,
        )
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = InMemoryTaskStore::new();
        store.insert(&task(1, 100)).await.unwrap();

        let got = store.get(TaskId::new(1)).await.unwrap().unwrap();
        assert_eq!(got.status, TaskStatus::Scheduled);
        assert!(store.get(TaskId::new(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryTaskStore::new();
        store.insert(&task(1, 100)).await.unwrap();

        let err = store.insert(&task(1, 200)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == TaskId::new(1)));
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = InMemoryTaskStore::new();
        store.insert(&task(1, 100)).await.unwrap();

        let promoted = store.transition(TaskId::new(1), TaskStatus::Ready).await.unwrap();
        assert!(matches!(promoted, Transition::Applied(t) if t.status == TaskStatus::Ready));

        let again = store.transition(TaskId::new(1), TaskStatus::Ready).await.unwrap();
        assert!(matches!(again, Transition::Rejected(t) if t.status == TaskStatus::Ready));

        let missing = store.transition(TaskId::new(9), TaskStatus::Ready).await.unwrap();
        assert_eq!(missing, Transition::Missing);
    }

    #[tokio::test]
    async fn scan_scheduled_is_half_open_and_skips_promoted() {
        let store = InMemoryTaskStore::new();
        for (id, at) in [(1, 100), (2, 200), (3, 300), (4, 200)] {
            store.insert(&task(id, at)).await.unwrap();
        }
        store.transition(TaskId::new(4), TaskStatus::Ready).await.unwrap();

        let ids: Vec<u64> = store
            .scan_scheduled(100, 300)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id.as_u64())
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(store.scan_scheduled(300, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counts_and_max_id() {
        let store = InMemoryTaskStore::new();
        assert_eq!(store.max_id().await.unwrap(), None);
        for id in 1..=3 {
            store.insert(&task(id, 100)).await.unwrap();
        }
        store.transition(TaskId::new(2), TaskStatus::Cancelled).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.scheduled, 2);
        assert_eq!(counts.cancelled, 1);
        assert_eq!(store.max_id().await.unwrap(), Some(TaskId::new(3)));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryTaskStore::new();
        store.set_available(false);
        assert!(matches!(
            store.insert(&task(1, 100)).await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_available(true);
        assert!(store.get(TaskId::new(1)).await.unwrap().is_none());
    }
}
