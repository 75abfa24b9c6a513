//! Worker - poll したタスクを type ごとの handler に渡す
//!
//! - handler は起動時に HandlerRegistry に登録（実行中は不変）
//! - poll は timeout 付きなので、shutdown の確認は poll ごとに行う
//! - poll した時点で CONSUMED（at-most-once）。handler の失敗はログのみで再配送しない

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::Scheduler;
use crate::domain::{SchedulerError, Task, TaskType};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// A handler for one task type.
///
/// Receives the consumed `Task` and decodes `parameters` however it likes.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), WorkerError>;
}

/// Registry of handlers (task_type -> handler).
///
/// Built during initialization, shared immutably afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), WorkerError> {
        if self.handlers.contains_key(&task_type) {
            return Err(WorkerError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: TaskType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type)
    }

    pub fn task_types(&self) -> impl Iterator<Item = TaskType> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// `max_count` passed to each poll.
    pub batch_size: i32,
    /// Upper bound on one poll, and so on shutdown latency.
    pub poll_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_timeout: Duration::from_millis(500),
        }
    }
}

/// Worker group handle.
/// - `shutdown_and_join()` で全ワーカーを止めて終了を待つ
/// - 処理中の batch は最後まで handler に渡してから止まる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers for every task type in `registry`.
    pub fn spawn(
        n: usize,
        registry: Arc<HandlerRegistry>,
        scheduler: Arc<Scheduler>,
        options: WorkerOptions,
    ) -> Result<Self, WorkerError> {
        if options.batch_size <= 0 {
            return Err(SchedulerError::InvalidArgument(format!(
                "batch_size must be > 0, got {}",
                options.batch_size
            ))
            .into());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::with_capacity(n * registry.len());

        for task_type in registry.task_types() {
            let handler = registry
                .get(task_type)
                .cloned()
                .ok_or(WorkerError::HandlerNotFound(task_type))?;

            for worker_id in 0..n {
                let worker = Worker {
                    worker_id,
                    task_type,
                    handler: Arc::clone(&handler),
                    scheduler: Arc::clone(&scheduler),
                    options: options.clone(),
                };
                let rx = shutdown_rx.clone();
                joins.push(tokio::spawn(async move { worker.run(rx).await }));
            }
        }

        info!(workers = joins.len(), task_types = registry.len(), "worker group started");
        Ok(Self { shutdown_tx, joins })
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers. In-flight handlers are not cancelled.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                warn!(error = %err, "worker ended abnormally");
            }
        }
    }
}

struct Worker {
    worker_id: usize,
    task_type: TaskType,
    handler: Arc<dyn TaskHandler>,
    scheduler: Arc<Scheduler>,
    options: WorkerOptions,
}

impl Worker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let (worker_id, task_type) = (self.worker_id, self.task_type);

        while !*shutdown_rx.borrow() {
            let tasks = match self
                .scheduler
                .poll(task_type, self.options.batch_size, self.options.poll_timeout)
                .await
            {
                Ok(tasks) => tasks,
                Err(err) => {
                    warn!(worker_id, %task_type, error = %err, "poll failed");
                    // back off for one poll period, but wake on shutdown
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(self.options.poll_timeout) => {}
                    }
                    continue;
                }
            };

            for task in tasks {
                match self.handler.handle(&task).await {
                    Ok(()) => debug!(worker_id, task_id = %task.id, %task_type, "task handled"),
                    Err(err) => warn!(
                        worker_id,
                        task_id = %task.id,
                        %task_type,
                        error = %err,
                        "handler failed, task will not be redelivered"
                    ),
                }
            }
        }
    }
}
