//! TaskStore port - 正本（source of truth）
//!
//! TaskStore はタスクの全レコードとステータスを管理します。
//! Future index と ready queue はここから再構築可能です。
//!
//! # 実装
//! - InMemoryTaskStore（テスト・単一プロセス用）
//! - FileTaskStore（JSON Lines のジャーナル、再起動後に replay）

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Task, TaskId, TaskStatus};
use crate::observability::StatusCounts;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("duplicate task id {0}")]
    Duplicate(TaskId),
}

/// Result of a compare-and-set status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The change took effect; carries the updated record.
    Applied(Task),

    /// The current status does not allow the change; carries the record as is.
    Rejected(Task),

    /// No task with that id.
    Missing,
}

/// TaskStore は状態の正本
///
/// # 設計原則
/// - 新規タスクの insert は index/queue への登録より先（write-ahead）
/// - ステータス変更は `transition` の compare-and-set のみ
///   （`TaskStatus::can_transition_to` を満たさない変更は Rejected）
/// - 失敗した操作は何も書かない（部分的な状態を残さない）
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    async fn transition(&self, id: TaskId, to: TaskStatus) -> Result<Transition, StoreError>;

    /// All tasks currently in `status`, ordered by id.
    async fn scan_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;

    /// `Scheduled` tasks with `from_ms <= execute_time < until_ms`, ordered by
    /// execute time.
    async fn scan_scheduled(&self, from_ms: i64, until_ms: i64) -> Result<Vec<Task>, StoreError>;

    async fn counts(&self) -> Result<StatusCounts, StoreError>;

    async fn max_id(&self) -> Result<Option<TaskId>, StoreError>;
}
