//! SchedulerBuilder - スケジューラの構築とワイヤリング
//!
//! # 起動時の流れ
//! - 設定を検証（Fail-fast）
//! - 未指定のポートをデフォルト実装で埋める
//!   （store_path があれば FileTaskStore、なければ InMemoryTaskStore）
//! - Recovery を実行してから返す

use std::sync::Arc;

use tracing::info;

use crate::app::{Promoter, RecoveryReport, Scheduler};
use crate::config::{ConfigError, SchedulerConfig};
use crate::domain::SchedulerError;
use crate::impls::{FileTaskStore, InMemoryTaskStore, LocalLeaseManager};
use crate::ports::{Clock, IdGenerator, PromotionLease, SnowflakeGenerator, StoreError, SystemClock, TaskStore};

/// SchedulerBuilder は Scheduler と Promoter を組み立てる
///
/// # 使用例
/// ```ignore
/// let app = SchedulerBuilder::new(SchedulerConfig::load()?)
///     .with_clock(clock)
///     .build()
///     .await?;
/// let promoter = Arc::clone(&app.promoter).spawn();
/// ```
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    lease: Option<Arc<dyn PromotionLease>>,
}

/// BuildError はスケジューラ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open task store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            ids: None,
            lease: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Share a lease manager between schedulers that share a store.
    pub fn with_lease(mut self, lease: Arc<dyn PromotionLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    pub async fn build(self) -> Result<SchedulerApp, BuildError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store: Arc<dyn TaskStore> = match (self.store, &self.config.store_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileTaskStore::open(path).await?),
            (None, None) => Arc::new(InMemoryTaskStore::new()),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(SnowflakeGenerator::new(
                Arc::clone(&clock),
                self.config.shard_id,
            )?),
        };
        let lease = self
            .lease
            .unwrap_or_else(|| Arc::new(LocalLeaseManager::new(Arc::clone(&clock))));

        let scheduler = Arc::new(Scheduler::new(self.config, store, clock, ids));
        let recovery = scheduler.recover().await?;
        let promoter = Arc::new(Promoter::new(Arc::clone(&scheduler), lease));

        info!(
            granularity_ms = scheduler.config().granularity_ms,
            horizon_ms = scheduler.config().horizon_ms,
            holder = promoter.holder(),
            repaired = recovery.repaired(),
            "scheduler ready"
        );

        Ok(SchedulerApp {
            scheduler,
            promoter,
            recovery,
        })
    }
}

/// A recovered scheduler and its (not yet started) promoter.
pub struct SchedulerApp {
    pub scheduler: Arc<Scheduler>,
    pub promoter: Arc<Promoter>,
    pub recovery: RecoveryReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskStatus, TaskType};
    use crate::ports::ManualClock;

    const NOW: i64 = 1_700_000_000_000;

    #[tokio::test]
    async fn build_with_defaults() {
        let app = SchedulerBuilder::new(SchedulerConfig::default())
            .build()
            .await
            .unwrap();
        assert_eq!(app.recovery, RecoveryReport::default());
        assert!(app.promoter.holder().starts_with("promoter-"));
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let config = SchedulerConfig {
            granularity_ms: 0,
            ..Default::default()
        };
        let result = SchedulerBuilder::new(config).build().await;
        assert!(matches!(result, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }

    #[tokio::test]
    async fn store_path_selects_the_file_store_and_recovers_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = SchedulerConfig {
            store_path: Some(dir.path().join("tasks.jsonl")),
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::at_ms(NOW));

        let first = SchedulerBuilder::new(config.clone())
            .with_clock(clock.clone())
            .build()
            .await
            .unwrap();
        let id = first
            .scheduler
            .add_task(NewTask::new(TaskType::new(1), NOW + 2_000))
            .await
            .unwrap();
        drop(first);

        let second = SchedulerBuilder::new(config)
            .with_clock(clock)
            .build()
            .await
            .unwrap();
        assert_eq!(second.recovery.reindexed, 1);
        assert_eq!(
            second.scheduler.get_task(id).await.unwrap().status,
            TaskStatus::Scheduled
        );
    }
}
