//! Errors - スケジューラのエラー分類
//!
//! - 呼び出し側の入力不正: InvalidArgument / InvalidSchedule
//! - 参照先なし: NotFound（cancel では `false` として扱う）
//! - 終端状態: AlreadyTerminal（cancel では `false` として扱う）
//! - バックエンド障害: StoreUnavailable（部分的な書き込みは残さない）
//! - 整合性の自己修復: IndexInconsistency（Recovery がログに出すだけ）

use thiserror::Error;

use super::{TaskId, TaskStatus};
use crate::ports::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid schedule: execute_time={execute_time} is older than now={now_ms} - grace {grace_ms}ms")]
    InvalidSchedule {
        execute_time: i64,
        now_ms: i64,
        grace_ms: i64,
    },

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("{id} is already terminal ({status:?})")]
    AlreadyTerminal { id: TaskId, status: TaskStatus },

    #[error("task store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("index inconsistency for {id}: {detail}")]
    IndexInconsistency { id: TaskId, detail: String },
}

impl SchedulerError {
    /// Errors a retry loop can expect to clear up on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_convert_and_are_transient() {
        let err: SchedulerError = StoreError::Unavailable("down".into()).into();
        assert!(err.is_transient());
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn caller_errors_are_not_transient() {
        let err = SchedulerError::InvalidArgument("priority".into());
        assert!(!err.is_transient());
    }
}
