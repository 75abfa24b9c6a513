//! Task lifecycle status.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// State transitions:
/// - Scheduled -> Ready -> Consumed
/// - Scheduled -> Cancelled
/// - Ready -> Cancelled (best-effort, may lose the race to a consumer)
///
/// Nothing ever moves backwards. The task store enforces this with
/// [`TaskStatus::can_transition_to`] inside its compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for its execute time (in the future index or store only).
    Scheduled,

    /// Due and sitting in the ready queue of its type.
    Ready,

    /// Handed to a consumer by `poll`.
    Consumed,

    /// Withdrawn by the producer.
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Scheduled,
        TaskStatus::Ready,
        TaskStatus::Consumed,
        TaskStatus::Cancelled,
    ];

    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Consumed | TaskStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Scheduled, TaskStatus::Ready)
                | (TaskStatus::Ready, TaskStatus::Consumed)
                | (TaskStatus::Scheduled, TaskStatus::Cancelled)
                | (TaskStatus::Ready, TaskStatus::Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::promote(TaskStatus::Scheduled, TaskStatus::Ready)]
    #[case::consume(TaskStatus::Ready, TaskStatus::Consumed)]
    #[case::cancel_scheduled(TaskStatus::Scheduled, TaskStatus::Cancelled)]
    #[case::cancel_ready(TaskStatus::Ready, TaskStatus::Cancelled)]
    fn allowed_transitions(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_ready(TaskStatus::Scheduled, TaskStatus::Consumed)]
    #[case::unpromote(TaskStatus::Ready, TaskStatus::Scheduled)]
    #[case::uncancel(TaskStatus::Cancelled, TaskStatus::Scheduled)]
    #[case::cancel_consumed(TaskStatus::Consumed, TaskStatus::Cancelled)]
    #[case::consume_cancelled(TaskStatus::Cancelled, TaskStatus::Consumed)]
    #[case::self_loop(TaskStatus::Ready, TaskStatus::Ready)]
    fn rejected_transitions(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn terminal_states_have_no_exit() {
        for from in TaskStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in TaskStatus::ALL {
                assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let s = serde_json::to_string(&TaskStatus::Cancelled).unwrap();
        assert_eq!(s, "\"CANCELLED\"");
    }
}
