//! schedq-core
//!
//! Delayed task scheduling: tasks are registered for a future execute time,
//! promoted into per-type ready queues when due, and polled by workers.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, bucket, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, PromotionLease, Clock, IdGenerator）
//! - **impls**: ports の実装（InMemoryTaskStore, FileTaskStore, LocalLeaseManager）
//! - **queue**: プロセス内の構造（FutureIndex, ReadyQueue, RetryPolicy）
//! - **app**: アプリケーションロジック（Scheduler, Promoter, Recovery, builder, worker）
//! - **config**: 設定の読み込み
//! - **observability**: status counts

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{Promoter, PromoterHandle, Scheduler, SchedulerApp, SchedulerBuilder};
pub use config::SchedulerConfig;
pub use domain::{NewTask, SchedulerError, Task, TaskId, TaskStatus, TaskType};
pub use observability::StatusCounts;
