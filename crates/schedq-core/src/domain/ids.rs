//! Domain identifiers (strongly-typed IDs).
//!
//! Task ids cross RPC boundaries as plain `int64`, so `TaskId` is a
//! transparent 64-bit newtype. Allocation is the job of
//! [`IdGenerator`](crate::ports::IdGenerator); this module only gives the
//! value a type so it cannot be confused with a task type or a timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a scheduled task.
///
/// Ordering follows allocation order, which is also the final tie-breaker
/// when two ready tasks share priority and execute time.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub const MIN: TaskId = TaskId(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
