//! Promoter - due bucket を ready queue に移す定期ループ
//!
//! # 1 tick のフロー
//! 1. `start + granularity <= now` の bucket を古い順に列挙（取りこぼした tick 分も含む）
//! 2. bucket ごとに PromotionLease を取得（他で保持中ならスキップ、次の tick で再試行）
//! 3. bucket を index から detach
//! 4. SCHEDULED のものだけ CAS で READY にして ready queue へ push
//! 5. horizon を進め、新たに horizon 内に入ったタスクを TaskStore から取り込む
//!
//! tick は起動直後に 1 回、以降は bucket 境界（granularity の倍数）ごと。
//! 境界に揃えることで配信の遅れは最大 1 granularity に収まる。
//!
//! # 障害時
//! - store エラーでは未処理の entry を index に戻し、tick はエラーを返す
//! - run ループは backoff で再試行し、終了しない
//! - 連続失敗が `failure_escalation_threshold` に達したら `error` で記録

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::app::Scheduler;
use crate::domain::{BucketKey, SchedulerError, TaskStatus};
use crate::ports::{PromotionLease, Transition};
use crate::queue::RetryPolicy;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Buckets detached and processed.
    pub buckets: usize,
    /// Entries moved to a ready queue.
    pub promoted: usize,
    /// Entries no longer `SCHEDULED` when their bucket came due.
    pub dropped: usize,
    /// Due buckets left alone because another holder owns the lease.
    pub skipped: usize,
    /// Tasks pulled into the index as the horizon advanced.
    pub imported: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Promoter {
    scheduler: Arc<Scheduler>,
    lease: Arc<dyn PromotionLease>,
    holder: String,
    retry: RetryPolicy,
    /// One tick at a time; the horizon import relies on it.
    tick_lock: Mutex<()>,
}

impl Promoter {
    pub fn new(scheduler: Arc<Scheduler>, lease: Arc<dyn PromotionLease>) -> Self {
        let retry = scheduler.config().retry_policy();
        Self {
            scheduler,
            lease,
            holder: format!("promoter-{}", Ulid::new()),
            retry,
            tick_lock: Mutex::new(()),
        }
    }

    /// Lease holder id of this promoter.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        let _guard = self.tick_lock.lock().await;
        let now_ms = self.scheduler.clock().now_ms();
        let ttl = self.scheduler.config().lease_ttl();
        let mut report = TickReport::default();

        for key in self.scheduler.index().due_buckets(now_ms) {
            if !self.lease.try_acquire(key, &self.holder, ttl).await? {
                debug!(bucket = %key, "bucket leased elsewhere, skipping");
                report.skipped += 1;
                continue;
            }

            let promoted = self.promote_bucket(key, &mut report).await;
            if let Err(err) = self.lease.release(key, &self.holder).await {
                warn!(bucket = %key, error = %err, "failed to release promotion lease");
            }
            promoted?;
        }

        report.imported = self.import_horizon(now_ms).await?;

        if !report.is_idle() {
            debug!(
                buckets = report.buckets,
                promoted = report.promoted,
                dropped = report.dropped,
                skipped = report.skipped,
                imported = report.imported,
                "promoter tick"
            );
        }
        Ok(report)
    }

    /// Start the periodic loop on the current runtime.
    pub fn spawn(self: Arc<Self>) -> PromoterHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        PromoterHandle { shutdown_tx, join }
    }

    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let config = self.scheduler.config();
        let mut failures: u32 = 0;
        let mut first = true;

        info!(holder = %self.holder, granularity_ms = config.granularity_ms, "promoter started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let delay = if failures > 0 {
                self.retry.next_delay(failures)
            } else if first {
                Duration::ZERO
            } else {
                self.until_next_boundary()
            };
            first = false;

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.tick().await {
                Ok(_) => {
                    if failures > 0 {
                        info!(failures, "promoter recovered");
                    }
                    failures = 0;
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    if failures >= config.failure_escalation_threshold {
                        error!(failures, error = %err, "promoter keeps failing");
                    } else {
                        warn!(failures, error = %err, "promoter tick failed");
                    }
                }
            }
        }

        info!(holder = %self.holder, "promoter stopped");
    }

    /// Time until the scheduler clock reaches the next multiple of the
    /// granularity, where the bucket that just closed becomes due.
    fn until_next_boundary(&self) -> Duration {
        let granularity_ms = self.scheduler.index().granularity_ms().max(1);
        let now_ms = self.scheduler.clock().now_ms();
        let remaining = granularity_ms - now_ms.rem_euclid(granularity_ms);
        Duration::from_millis(remaining.unsigned_abs())
    }

    async fn promote_bucket(
        &self,
        key: BucketKey,
        report: &mut TickReport,
    ) -> Result<(), SchedulerError> {
        let index = self.scheduler.index();
        let Some(entries) = index.detach(key) else {
            return Ok(());
        };
        report.buckets += 1;

        let store = self.scheduler.store();
        let ready = self.scheduler.ready();
        let mut pending = entries.into_iter();
        while let Some(entry) = pending.next() {
            match store.transition(entry.id, TaskStatus::Ready).await {
                Ok(Transition::Applied(task)) => {
                    ready.push(task.task_type, task.entry());
                    report.promoted += 1;
                }
                Ok(Transition::Rejected(task)) => {
                    debug!(task_id = %entry.id, status = ?task.status, "dropping non-scheduled entry");
                    report.dropped += 1;
                }
                Ok(Transition::Missing) => {
                    warn!(task_id = %entry.id, bucket = %key, "indexed task missing from store");
                    report.dropped += 1;
                }
                Err(err) => {
                    index.restore(key, std::iter::once(entry).chain(pending));
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Advance the horizon to `now + horizon` and index the `SCHEDULED` tasks
    /// that fall into the newly covered window.
    async fn import_horizon(&self, now_ms: i64) -> Result<usize, SchedulerError> {
        let index = self.scheduler.index();
        let target = now_ms.saturating_add(self.scheduler.config().horizon_ms as i64);
        let previous = index.advance_horizon(target);
        if target <= previous {
            return Ok(0);
        }

        let tasks = match self.scheduler.store().scan_scheduled(previous, target).await {
            Ok(tasks) => tasks,
            Err(err) => {
                index.retract_horizon(target, previous);
                return Err(err.into());
            }
        };

        let mut imported = 0;
        for task in tasks {
            if index.insert(task.task_type, task.entry()) {
                imported += 1;
            }
        }
        Ok(imported)
    }
}

/// Handle to a running promoter loop.
pub struct PromoterHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PromoterHandle {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the loop and wait for the in-flight tick to finish.
    pub async fn shutdown(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            warn!(error = %err, "promoter task ended abnormally");
        }
    }
}
