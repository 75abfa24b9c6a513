//! Task counts by status, as reported by `Scheduler::counts`.

use serde::{Deserialize, Serialize};

use crate::domain::TaskStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub scheduled: usize,
    pub ready: usize,
    pub consumed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Scheduled => self.scheduled += 1,
            TaskStatus::Ready => self.ready += 1,
            TaskStatus::Consumed => self.consumed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.scheduled + self.ready + self.consumed + self.cancelled
    }

    /// Tasks that can still be delivered.
    pub fn pending(&self) -> usize {
        self.scheduled + self.ready
    }
}
