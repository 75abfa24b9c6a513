//! Queue module: future index, ready queues, and retry policy.

mod future_index;
mod ready;
mod retry;

pub use future_index::FutureIndex;
pub use ready::{LaneWaiter, ReadyQueue};
pub use retry::RetryPolicy;
