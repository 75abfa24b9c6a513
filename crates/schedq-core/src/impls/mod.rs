//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: プロセス内の正本（テスト・単一プロセス用）
//! - **FileTaskStore**: JSON Lines ジャーナルによる永続ストア
//! - **LocalLeaseManager**: プロセス内の bucket リース

pub mod file_store;
pub mod inmem_store;
pub mod local_lease;

pub use self::file_store::FileTaskStore;
pub use self::inmem_store::InMemoryTaskStore;
pub use self::local_lease::LocalLeaseManager;
