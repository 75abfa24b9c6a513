//! App - アプリケーション層
//!
//! このモジュールは、ports と queue を組み合わせてスケジューラを実装します。
//!
//! # 主要コンポーネント
//! - **Scheduler**: add_task / cancel_task / get_task / poll の窓口
//! - **Promoter**: due bucket を ready queue に移す定期ループ
//! - **Recovery**: 起動時に TaskStore から index / queue を再構築
//! - **SchedulerBuilder**: 設定からのワイヤリング
//! - **WorkerGroup**: poll → handler 実行

pub mod builder;
pub mod promoter;
pub mod recovery;
pub mod scheduler;
pub mod worker;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, SchedulerApp, SchedulerBuilder};
pub use self::promoter::{Promoter, PromoterHandle, TickReport};
pub use self::recovery::RecoveryReport;
pub use self::scheduler::Scheduler;
pub use self::worker::{HandlerRegistry, TaskHandler, WorkerError, WorkerGroup, WorkerOptions};
