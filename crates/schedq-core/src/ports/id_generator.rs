//! IdGenerator port - ID 生成の抽象化
//!
//! `add_task` は永続化のコミット前に ID を同期的に返す必要があるため、
//! DB の自動採番ではなく、ここで明示的に採番します。
//!
//! # 実装
//! - **SnowflakeGenerator**: 時刻 + shard + sequence の 64-bit ID

use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::{SchedulerError, TaskId};
use crate::ports::Clock;

/// 2023-01-01T00:00:00Z; keeps the 42-bit timestamp field good for ~139 years.
pub const CUSTOM_EPOCH_MS: i64 = 1_672_531_200_000;

const SHARD_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
pub const MAX_SHARD: u16 = (1 << SHARD_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

/// IdGenerator は一意かつ単調増加の task id を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の producer から同時に呼ばれる）
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> TaskId;

    /// Make every later id strictly greater than `id`.
    ///
    /// Recovery calls this with the largest persisted id so a restart under
    /// a lagging clock never hands out an id twice.
    fn advance_past(&self, _id: TaskId) {}
}

#[derive(Debug)]
struct SnowflakeState {
    last_ms: i64,
    sequence: u64,
}

/// `(ms since CUSTOM_EPOCH) << 22 | shard << 12 | sequence`
///
/// If the clock goes backwards the generator keeps counting from the last
/// timestamp it used, and borrows the next millisecond when the sequence
/// overflows, so ids never decrease.
pub struct SnowflakeGenerator {
    clock: Arc<dyn Clock>,
    shard: u64,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeGenerator {
    pub fn new(clock: Arc<dyn Clock>, shard: u16) -> Result<Self, SchedulerError> {
        if shard > MAX_SHARD {
            return Err(SchedulerError::InvalidArgument(format!(
                "shard id {shard} exceeds {MAX_SHARD}"
            )));
        }
        Ok(Self {
            clock,
            shard: u64::from(shard),
            state: Mutex::new(SnowflakeState {
                last_ms: -1,
                sequence: 0,
            }),
        })
    }

    fn compose(&self, ms: i64, sequence: u64) -> TaskId {
        TaskId::new(((ms as u64) << (SHARD_BITS + SEQUENCE_BITS)) | (self.shard << SEQUENCE_BITS) | sequence)
    }

    /// Split an id into its `(timestamp, sequence)` fields.
    fn decompose(id: TaskId) -> (i64, u64) {
        let raw = id.as_u64();
        (
            (raw >> (SHARD_BITS + SEQUENCE_BITS)) as i64,
            raw & MAX_SEQUENCE,
        )
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn next_id(&self) -> TaskId {
        let now = (self.clock.now_ms() - CUSTOM_EPOCH_MS).max(0);
        let mut state = self.state.lock();
        if now > state.last_ms {
            state.last_ms = now;
            state.sequence = 0;
        } else if state.sequence == MAX_SEQUENCE {
            state.last_ms += 1;
            state.sequence = 0;
        } else {
            state.sequence += 1;
        }
        self.compose(state.last_ms, state.sequence)
    }

    fn advance_past(&self, id: TaskId) {
        let (ms, sequence) = Self::decompose(id);
        let mut state = self.state.lock();
        if ms > state.last_ms || (ms == state.last_ms && sequence > state.sequence) {
            state.last_ms = ms;
            state.sequence = sequence;
        }
    }
}
