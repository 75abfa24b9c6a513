//! Domain model (ids, task records, lifecycle status, ordering keys, errors).

pub mod bucket;
pub mod errors;
pub mod ids;
pub mod state;
pub mod task;

pub use bucket::{BucketKey, EntryKey};
pub use errors::SchedulerError;
pub use ids::TaskId;
pub use state::TaskStatus;
pub use task::{NewTask, Task, TaskType};
