//! Startup reconciliation of the in-memory structures against the task store.

use serde::Serialize;
use tracing::{info, warn};

use crate::app::Scheduler;
use crate::domain::{SchedulerError, Task, TaskStatus};

/// Entries repaired by [`Scheduler::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// In-horizon `SCHEDULED` tasks put back into the future index.
    pub reindexed: usize,
    /// `SCHEDULED` tasks whose execute time passed while nobody was promoting.
    pub promoted_overdue: usize,
    /// `READY` tasks whose queue entry was lost.
    pub requeued_ready: usize,
}

impl RecoveryReport {
    pub fn repaired(&self) -> usize {
        self.reindexed + self.promoted_overdue + self.requeued_ready
    }
}

impl Scheduler {
    /// Rebuild the future index and ready queues from the store.
    ///
    /// Safe to run on a live scheduler: every repair is idempotent and goes
    /// through the store's compare-and-set.
    pub async fn recover(&self) -> Result<RecoveryReport, SchedulerError> {
        if let Some(max_id) = self.store().max_id().await? {
            self.ids().advance_past(max_id);
        }

        let now_ms = self.clock().now_ms();
        let horizon_end = self.index().horizon_end();
        let mut report = RecoveryReport::default();

        for task in self.store().scan_status(TaskStatus::Scheduled).await? {
            let entry = task.entry();
            if task.execute_time <= now_ms {
                self.index().remove(task.task_type, &entry);
                if self.make_ready(&task).await? {
                    report_repair(&task, "overdue while not promoted");
                    report.promoted_overdue += 1;
                }
            } else if task.execute_time < horizon_end
                && self.index().insert(task.task_type, entry)
            {
                report_repair(&task, "missing from future index");
                report.reindexed += 1;
            }
        }

        for task in self.store().scan_status(TaskStatus::Ready).await? {
            if self.ready().push(task.task_type, task.entry()) {
                report_repair(&task, "missing from ready queue");
                report.requeued_ready += 1;
            }
        }

        info!(
            reindexed = report.reindexed,
            promoted_overdue = report.promoted_overdue,
            requeued_ready = report.requeued_ready,
            "recovery finished"
        );
        Ok(report)
    }
}

fn report_repair(task: &Task, detail: &str) {
    let err = SchedulerError::IndexInconsistency {
        id: task.id,
        detail: detail.to_string(),
    };
    warn!(task_id = %task.id, task_type = %task.task_type, error = %err, "repaired");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::domain::{NewTask, TaskId, TaskType};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{IdGenerator, ManualClock, SnowflakeGenerator, TaskStore};
    use std::sync::Arc;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;
    const T: TaskType = TaskType::new(4);

    fn scheduler(store: Arc<InMemoryTaskStore>, clock: Arc<ManualClock>) -> Scheduler {
        let ids = Arc::new(SnowflakeGenerator::new(clock.clone(), 0).unwrap());
        Scheduler::new(SchedulerConfig::default(), store, clock, ids)
    }

    #[tokio::test]
    async fn rebuilds_index_and_queues_from_the_store() {
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(ManualClock::at_ms(NOW));

        let before = scheduler(store.clone(), clock.clone());
        let soon = before.add_task(NewTask::new(T, NOW + 5_000)).await.unwrap();
        let later = before.add_task(NewTask::new(T, NOW + 60_000)).await.unwrap();
        let ready = before.add_task(NewTask::new(T, NOW)).await.unwrap();
        drop(before);

        clock.advance(Duration::from_secs(10));
        let after = scheduler(store.clone(), clock.clone());
        let report = after.recover().await.unwrap();

        assert_eq!(
            report,
            RecoveryReport {
                reindexed: 1,
                promoted_overdue: 1,
                requeued_ready: 1,
            }
        );
        assert_eq!(after.get_task(soon).await.unwrap().status, TaskStatus::Ready);
        assert_eq!(after.get_task(later).await.unwrap().status, TaskStatus::Scheduled);
        assert_eq!(after.indexed_len(), 1);

        let polled: Vec<TaskId> = after
            .poll(T, 10, Duration::ZERO)
            .await
            .unwrap()
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(polled.len(), 2);
        assert!(polled.contains(&soon) && polled.contains(&ready));
    }

    #[tokio::test]
    async fn second_run_repairs_nothing() {
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(ManualClock::at_ms(NOW));
        let s = scheduler(store, clock);
        s.add_task(NewTask::new(T, NOW + 5_000)).await.unwrap();
        s.add_task(NewTask::new(T, NOW)).await.unwrap();

        assert_eq!(s.recover().await.unwrap().repaired(), 0);
    }

    #[tokio::test]
    async fn ids_continue_past_persisted_ones_under_a_lagging_clock() {
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(ManualClock::at_ms(NOW));
        let first = scheduler(store.clone(), clock.clone());
        let old = first.add_task(NewTask::new(T, NOW + 5_000)).await.unwrap();

        clock.set_ms(NOW - 60_000);
        let second = scheduler(store.clone(), clock.clone());
        second.recover().await.unwrap();
        assert!(second.ids().next_id() > old);
        assert!(store.max_id().await.unwrap() == Some(old));
    }

    #[tokio::test]
    async fn store_outage_fails_recovery() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.set_available(false);
        let s = scheduler(store, Arc::new(ManualClock::at_ms(NOW)));
        assert!(matches!(
            s.recover().await,
            Err(SchedulerError::StoreUnavailable(_))
        ));
    }
}
