use serde::{Deserialize, Serialize};
use std::fmt;

use super::bucket::{BucketKey, EntryKey};
use super::{TaskId, TaskStatus};

/// Category of a task; selects the consumer pool and partitions the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(i32);

impl TaskType {
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Negative types are reserved and rejected on submission.
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Producer-side request for a deferred task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: TaskType,
    pub priority: i32,
    /// Opaque payload; the scheduler never looks inside.
    pub parameters: Vec<u8>,
    /// Epoch milliseconds.
    pub execute_time: i64,
}

impl NewTask {
    pub fn new(task_type: TaskType, execute_time: i64) -> Self {
        Self {
            task_type,
            priority: 0,
            parameters: Vec::new(),
            execute_time,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameters(mut self, parameters: impl Into<Vec<u8>>) -> Self {
        self.parameters = parameters.into();
        self
    }
}

/// A persisted task record. The task store owns the authoritative copy;
/// the future index and ready queues hold [`EntryKey`]s only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub priority: i32,
    pub parameters: Vec<u8>,
    pub execute_time: i64,
    pub status: TaskStatus,
    pub created_time: i64,
}

impl Task {
    /// Build the initial `Scheduled` record for an accepted request.
    pub fn scheduled(id: TaskId, request: NewTask, created_time: i64) -> Self {
        Self {
            id,
            task_type: request.task_type,
            priority: request.priority,
            parameters: request.parameters,
            execute_time: request.execute_time,
            status: TaskStatus::Scheduled,
            created_time,
        }
    }

    pub fn entry(&self) -> EntryKey {
        EntryKey {
            priority: self.priority,
            execute_time: self.execute_time,
            id: self.id,
        }
    }

    pub fn bucket(&self, granularity_ms: i64) -> BucketKey {
        BucketKey::for_time(self.task_type, self.execute_time, granularity_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_copies_request_fields() {
        let req = NewTask::new(TaskType::new(100), 5_000)
            .with_priority(50)
            .with_parameters(b"task test".to_vec());
        let task = Task::scheduled(TaskId::new(1), req, 1_000);

        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.task_type, TaskType::new(100));
        assert_eq!(task.priority, 50);
        assert_eq!(task.parameters, b"task test");
        assert_eq!(task.execute_time, 5_000);
        assert_eq!(task.created_time, 1_000);
    }

    #[test]
    fn negative_task_type_is_invalid() {
        assert!(TaskType::new(0).is_valid());
        assert!(!TaskType::new(-1).is_valid());
    }

    #[test]
    fn task_roundtrips_through_json() {
        let task = Task::scheduled(
            TaskId::new(9),
            NewTask::new(TaskType::new(3), 42).with_parameters(vec![0u8, 255]),
            1,
        );
        let s = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&s).unwrap();
        assert_eq!(back, task);
    }
}
