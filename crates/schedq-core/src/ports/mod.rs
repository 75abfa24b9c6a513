//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（永続ストア、分散ロック、時計）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - Future index / ready queue はプロセス内のキャッシュ（再構築可能）

pub mod clock;
pub mod id_generator;
pub mod lease;
pub mod task_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, SnowflakeGenerator};
pub use self::lease::PromotionLease;
pub use self::task_store::{StoreError, TaskStore, Transition};
