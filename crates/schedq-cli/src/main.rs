use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use schedq_core::ports::{Clock, SystemClock};
use schedq_core::app::{HandlerRegistry, TaskHandler, WorkerError, WorkerGroup, WorkerOptions};
use schedq_core::{NewTask, Scheduler, SchedulerBuilder, SchedulerConfig, Task, TaskId, TaskType};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Scenario A: one article per type, five seconds apart.
const PUBLISH_TYPES: [i32; 5] = [100, 101, 102, 103, 104];
/// Scenario B: scheduled and withdrawn before it is due.
const WITHDRAWN_TYPE: i32 = 200;

#[derive(Debug, Serialize, Deserialize)]
struct PublishNews {
    news_id: u64,
    title: String,
}

/// 外部サービスへの通知（ここでは broadcast で代用）
#[derive(Debug, Clone)]
enum NewsEvent {
    PublishScheduled { news_id: u64, task_id: TaskId },
    PublishWithdrawn { news_id: u64, task_id: TaskId },
}

/// producer：記事の公開予約 / 取り消しを scheduler に流し、成功したら event を出す
struct NewsPublisher {
    scheduler: Arc<Scheduler>,
    events: broadcast::Sender<NewsEvent>,
}

impl NewsPublisher {
    async fn schedule(
        &self,
        task_type: TaskType,
        news: &PublishNews,
        publish_at_ms: i64,
    ) -> Result<TaskId, BoxError> {
        let request = NewTask::new(task_type, publish_at_ms)
            .with_priority(50)
            .with_parameters(serde_json::to_vec(news)?);
        let task_id = self.scheduler.add_task(request).await?;
        // no subscribers is fine
        let _ = self.events.send(NewsEvent::PublishScheduled {
            news_id: news.news_id,
            task_id,
        });
        Ok(task_id)
    }

    async fn withdraw(&self, news_id: u64, task_id: TaskId) -> Result<bool, BoxError> {
        let cancelled = self.scheduler.cancel_task(task_id).await?;
        if cancelled {
            let _ = self
                .events
                .send(NewsEvent::PublishWithdrawn { news_id, task_id });
        }
        Ok(cancelled)
    }
}

struct PublishNewsHandler;

#[async_trait]
impl TaskHandler for PublishNewsHandler {
    async fn handle(&self, task: &Task) -> Result<(), WorkerError> {
        let news: PublishNews = serde_json::from_slice(&task.parameters)
            .map_err(|e| WorkerError::Handler(format!("json decode: {e}")))?;
        let late_ms = SystemClock.now_ms() - task.execute_time;
        println!(
            "published news {} ({:?}) type={} task={} late={}ms",
            news.news_id, news.title, task.task_type, task.id, late_ms
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) 設定から scheduler を組み立て、promoter を起動
    let config = SchedulerConfig::load()?;
    let app = SchedulerBuilder::new(config).build().await?;
    let scheduler = Arc::clone(&app.scheduler);
    let promoter = Arc::clone(&app.promoter).spawn();

    // (B) handler を登録して worker を起動
    let mut registry = HandlerRegistry::new();
    for task_type in PUBLISH_TYPES.into_iter().chain([WITHDRAWN_TYPE]) {
        registry.register(TaskType::new(task_type), Arc::new(PublishNewsHandler))?;
    }
    let workers = WorkerGroup::spawn(
        2,
        Arc::new(registry),
        Arc::clone(&scheduler),
        WorkerOptions::default(),
    )?;

    // (C) event の購読者（本来は他サービスへの通知）
    let (events, mut rx) = broadcast::channel(64);
    let listener = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(NewsEvent::PublishScheduled { news_id, task_id }) => {
                    info!(news_id, %task_id, "news publish scheduled")
                }
                Ok(NewsEvent::PublishWithdrawn { news_id, task_id }) => {
                    info!(news_id, %task_id, "news publish withdrawn")
                }
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "listener lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    let publisher = NewsPublisher {
        scheduler: Arc::clone(&scheduler),
        events,
    };

    // (D) Scenario A: 5 種類の記事を 5 秒おきに公開予約
    let now = SystemClock.now_ms();
    for (i, task_type) in PUBLISH_TYPES.into_iter().enumerate() {
        let news = PublishNews {
            news_id: 1_000 + i as u64,
            title: "task test".to_string(),
        };
        let task_id = publisher
            .schedule(TaskType::new(task_type), &news, now + 5_000 * i as i64)
            .await?;
        info!(%task_id, task_type, "publish scheduled");
    }

    // (E) Scenario B: 予約してすぐ取り消す（handler は呼ばれない）
    let withdrawn = PublishNews {
        news_id: 2_000,
        title: "withdrawn".to_string(),
    };
    let task_id = publisher
        .schedule(TaskType::new(WITHDRAWN_TYPE), &withdrawn, now + 5_000)
        .await?;
    let cancelled = publisher.withdraw(withdrawn.news_id, task_id).await?;
    info!(%task_id, cancelled, "publish withdrawn");

    // (F) 全部配り終えるか Ctrl-C まで待つ
    let drained = async {
        loop {
            match scheduler.counts().await {
                Ok(counts) if counts.pending() == 0 => break,
                Ok(_) => {}
                Err(err) => warn!(error = %err, "counts unavailable"),
            }
            sleep(Duration::from_millis(200)).await;
        }
    };
    tokio::select! {
        _ = drained => info!("all tasks delivered"),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    let counts = scheduler.counts().await?;
    println!(
        "counts: scheduled={} ready={} consumed={} cancelled={}",
        counts.scheduled, counts.ready, counts.consumed, counts.cancelled
    );

    // (G) graceful shutdown
    workers.shutdown_and_join().await;
    promoter.shutdown().await;
    drop(publisher);
    if let Err(err) = listener.await {
        warn!(error = %err, "listener ended abnormally");
    }
    Ok(())
}
