//! Scheduler - producer / consumer 向けの窓口
//!
//! # フロー
//! - add_task: 検証 → 採番 → TaskStore に insert（write-ahead）→ ready queue / future index
//! - cancel_task: TaskStore の CAS（→ CANCELLED）→ index / queue から best-effort で除去
//! - poll: ready queue から排他的に pop → CAS（READY → CONSUMED）
//!
//! index と queue はキャッシュなので、どちらに入れ損ねても Recovery と
//! Promoter の horizon 取り込みで TaskStore から復元されます。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::domain::{NewTask, SchedulerError, Task, TaskId, TaskStatus, TaskType};
use crate::observability::StatusCounts;
use crate::ports::{Clock, IdGenerator, StoreError, TaskStore, Transition};
use crate::queue::{FutureIndex, ReadyQueue};

/// Cap for poll timeouts too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    index: FutureIndex,
    ready: ReadyQueue,
}

impl Scheduler {
    /// Wire a scheduler with empty in-memory structures. Call
    /// [`recover`](Self::recover) before serving if `store` may hold tasks.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let granularity_ms = config.granularity_ms as i64;
        let horizon_end = clock.now_ms().saturating_add(config.horizon_ms as i64);
        Self {
            config,
            store,
            clock,
            ids,
            index: FutureIndex::new(granularity_ms, horizon_end),
            ready: ReadyQueue::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register a task for execution at `request.execute_time`.
    ///
    /// The task is durable in the store before this returns; the returned id
    /// is never handed out again.
    pub async fn add_task(&self, request: NewTask) -> Result<TaskId, SchedulerError> {
        let now_ms = self.clock.now_ms();
        self.validate(&request, now_ms)?;

        let id = self.ids.next_id();
        let task = Task::scheduled(id, request, now_ms);
        self.store.insert(&task).await?;

        let immediate_until = now_ms.saturating_add(self.config.immediate_threshold_ms as i64);
        if task.execute_time <= immediate_until {
            if let Err(err) = self.make_ready(&task).await {
                // Left SCHEDULED in the store; the promoter retries it from
                // the already due bucket.
                warn!(task_id = %id, error = %err, "immediate promotion failed, indexing instead");
                self.index.insert(task.task_type, task.entry());
            }
        } else if self.index.covers(task.execute_time) {
            self.index.insert(task.task_type, task.entry());
        }

        debug!(
            task_id = %id,
            task_type = %task.task_type,
            priority = task.priority,
            execute_time = task.execute_time,
            "task added"
        );
        Ok(id)
    }

    /// Cancel a pending task. Returns `false` if the task is unknown or
    /// already consumed or cancelled.
    pub async fn cancel_task(&self, id: TaskId) -> Result<bool, SchedulerError> {
        match self.store.transition(id, TaskStatus::Cancelled).await? {
            Transition::Applied(task) => {
                let entry = task.entry();
                self.index.remove(task.task_type, &entry);
                self.ready.remove(task.task_type, &entry);
                debug!(task_id = %id, task_type = %task.task_type, "task cancelled");
                Ok(true)
            }
            Transition::Rejected(task) => {
                let err = SchedulerError::AlreadyTerminal {
                    id,
                    status: task.status,
                };
                debug!(task_id = %id, reason = %err, "cancel ignored");
                Ok(false)
            }
            Transition::Missing => {
                debug!(task_id = %id, reason = %SchedulerError::NotFound(id), "cancel ignored");
                Ok(false)
            }
        }
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task, SchedulerError> {
        self.store
            .get(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))
    }

    /// Take up to `max_count` ready tasks of `task_type`, marking them
    /// `CONSUMED`.
    ///
    /// Waits at most `timeout` for a task to become ready and returns as soon
    /// as at least one was taken; an empty result means the timeout expired.
    /// Timeouts past the range of `Instant` are capped at about 30 years.
    pub async fn poll(
        &self,
        task_type: TaskType,
        max_count: i32,
        timeout: Duration,
    ) -> Result<Vec<Task>, SchedulerError> {
        if !task_type.is_valid() {
            return Err(SchedulerError::InvalidArgument(format!(
                "task_type must be >= 0, got {task_type}"
            )));
        }
        if max_count <= 0 {
            return Err(SchedulerError::InvalidArgument(format!(
                "max_count must be > 0, got {max_count}"
            )));
        }
        let max_count = max_count as usize;
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let waiter = self.ready.waiter(task_type);
        let mut taken = Vec::new();

        loop {
            let notified = waiter.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.take_ready(task_type, max_count, &mut taken).await?;
            if !taken.is_empty() {
                return Ok(taken);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(taken);
            }
        }
    }

    pub async fn counts(&self) -> Result<StatusCounts, SchedulerError> {
        Ok(self.store.counts().await?)
    }

    /// Entries waiting in the ready queue of `task_type`.
    pub fn ready_len(&self, task_type: TaskType) -> usize {
        self.ready.len(task_type)
    }

    /// Entries held by the future index.
    pub fn indexed_len(&self) -> usize {
        self.index.len()
    }

    pub fn horizon_end(&self) -> i64 {
        self.index.horizon_end()
    }

    fn validate(&self, request: &NewTask, now_ms: i64) -> Result<(), SchedulerError> {
        if !request.task_type.is_valid() {
            return Err(SchedulerError::InvalidArgument(format!(
                "task_type must be >= 0, got {}",
                request.task_type
            )));
        }
        if request.priority < 0 {
            return Err(SchedulerError::InvalidArgument(format!(
                "priority must be >= 0, got {}",
                request.priority
            )));
        }
        if request.parameters.len() > self.config.max_payload_bytes {
            return Err(SchedulerError::InvalidArgument(format!(
                "parameters are {} bytes, limit is {}",
                request.parameters.len(),
                self.config.max_payload_bytes
            )));
        }
        let grace_ms = self.config.grace_ms as i64;
        if request.execute_time < now_ms.saturating_sub(grace_ms) {
            return Err(SchedulerError::InvalidSchedule {
                execute_time: request.execute_time,
                now_ms,
                grace_ms,
            });
        }
        Ok(())
    }

    /// Pop and consume until `taken` holds `max_count` tasks or the lane is
    /// empty. Entries whose CAS is rejected are dropped.
    async fn take_ready(
        &self,
        task_type: TaskType,
        max_count: usize,
        taken: &mut Vec<Task>,
    ) -> Result<(), SchedulerError> {
        while taken.len() < max_count {
            let Some(entry) = self.ready.pop(task_type) else {
                break;
            };
            match self.store.transition(entry.id, TaskStatus::Consumed).await {
                Ok(Transition::Applied(task)) => taken.push(task),
                Ok(Transition::Rejected(task)) => {
                    debug!(task_id = %entry.id, status = ?task.status, "dropping stale ready entry");
                }
                Ok(Transition::Missing) => {
                    warn!(task_id = %entry.id, "ready entry without a stored task");
                }
                Err(err) => {
                    self.ready.push(task_type, entry);
                    // Tasks already marked CONSUMED must reach the caller.
                    if taken.is_empty() {
                        return Err(err.into());
                    }
                    warn!(task_id = %entry.id, error = %err, "poll cut short by store error");
                    break;
                }
            }
        }
        Ok(())
    }

    /// CAS `SCHEDULED → READY` and queue the task. Returns `false` when the
    /// task was no longer `SCHEDULED`.
    pub(crate) async fn make_ready(&self, task: &Task) -> Result<bool, StoreError> {
        match self.store.transition(task.id, TaskStatus::Ready).await? {
            Transition::Applied(task) => {
                self.ready.push(task.task_type, task.entry());
                Ok(true)
            }
            Transition::Rejected(_) | Transition::Missing => Ok(false),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn ids(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    pub(crate) fn index(&self) -> &FutureIndex {
        &self.index
    }

    pub(crate) fn ready(&self) -> &ReadyQueue {
        &self.ready
    }
}
