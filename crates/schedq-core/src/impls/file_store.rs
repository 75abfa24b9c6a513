//! FileTaskStore - JSON Lines ジャーナルによる永続ストア
//!
//! # フロー
//! 1. open(): ジャーナルを先頭から replay してメモリ上の StoreState を復元
//! 2. insert / transition: 検証 → ジャーナルに追記 → fsync → メモリに反映
//! 3. 書き込みに失敗したらメモリは変更しない（部分的な状態を残さない）
//! 4. 追記か fsync が失敗したらファイルを追記前の長さに戻す。戻せなければ
//!    再 open までストアを使用不可にする
//!
//! 末尾の 1 行だけが壊れている場合は書き込み途中のクラッシュとみなし、
//! 警告を出して無視します。途中の行が壊れている場合はエラーです。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::inmem_store::StoreState;
use crate::domain::{Task, TaskId, TaskStatus};
use crate::observability::StatusCounts;
use crate::ports::{StoreError, TaskStore, Transition};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Insert { task: Task },
    Status { id: TaskId, status: TaskStatus },
}

struct Journal {
    state: StoreState,
    file: File,
    /// Length of the journal up to the last durable record.
    len: u64,
    /// Set when a failed append could not be rolled back.
    broken: bool,
    #[cfg(test)]
    fault: Option<Fault>,
}

impl Journal {
    fn new(state: StoreState, file: File, len: u64) -> Self {
        Self {
            state,
            file,
            len,
            broken: false,
            #[cfg(test)]
            fault: None,
        }
    }

    fn usable(&self, path: &Path) -> Result<(), StoreError> {
        if self.broken {
            return Err(StoreError::Unavailable(format!(
                "journal {} needs a reopen after a failed rollback",
                path.display()
            )));
        }
        Ok(())
    }

    /// Append one record durably. On failure the file is cut back to its
    /// previous length, so a failed operation leaves nothing to replay.
    async fn append(&mut self, path: &Path, record: &JournalRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        if let Err(err) = self.write_synced(&line).await {
            if let Err(rollback) = self.rollback().await {
                self.broken = true;
                error!(
                    path = %path.display(),
                    error = %rollback,
                    "journal rollback failed, store disabled until reopened"
                );
            } else {
                warn!(path = %path.display(), error = %err, "journal append rolled back");
            }
            return Err(err);
        }
        self.len += line.len() as u64;
        Ok(())
    }

    #[cfg(not(test))]
    async fn write_synced(&mut self, line: &[u8]) -> Result<(), StoreError> {
        self.write_durably(line).await
    }

    #[cfg(test)]
    async fn write_synced(&mut self, line: &[u8]) -> Result<(), StoreError> {
        match self.fault {
            Some(fault) => fault.write(&mut self.file, line).await,
            None => self.write_durably(line).await,
        }
    }

    async fn write_durably(&mut self, line: &[u8]) -> Result<(), StoreError> {
        self.file.write_all(line).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        #[cfg(test)]
        self.fault_on_rollback()?;
        self.file.set_len(self.len).await?;
        self.file.sync_all().await?;
        Ok(())
    }

    #[cfg(test)]
    fn fault_on_rollback(&self) -> Result<(), StoreError> {
        if self.fault == Some(Fault::Stuck) {
            return Err(StoreError::Io(std::io::Error::other("injected rollback failure")));
        }
        Ok(())
    }
}

/// Write failures for tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// Half the line reaches the file, then the write fails.
    Torn,
    /// The whole line is written but the sync fails.
    Unsynced,
    /// Torn write that cannot be rolled back either.
    Stuck,
}

#[cfg(test)]
impl Fault {
    async fn write(self, file: &mut File, line: &[u8]) -> Result<(), StoreError> {
        let written = match self {
            Fault::Torn | Fault::Stuck => &line[..line.len() / 2],
            Fault::Unsynced => line,
        };
        file.write_all(written).await?;
        file.flush().await?;
        Err(StoreError::Io(std::io::Error::other("injected write failure")))
    }
}

pub struct FileTaskStore {
    path: PathBuf,
    journal: Mutex<Journal>,
    available: AtomicBool,
}

impl FileTaskStore {
    /// Open (or create) the journal at `path` and replay it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let (state, intact) = replay(&path, &contents)?;
                if let Some(intact) = intact {
                    // cut the torn tail so later appends start on a clean line
                    tokio::fs::write(&path, intact).await?;
                }
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let len = file.metadata().await?.len();

        Ok(Self {
            path,
            journal: Mutex::new(Journal::new(state, file, len)),
            available: AtomicBool::new(true),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "journal {} switched off",
                self.path.display()
            )))
        }
    }

    async fn readable(&self) -> Result<MutexGuard<'_, Journal>, StoreError> {
        self.ensure_available()?;
        let journal = self.journal.lock().await;
        journal.usable(&self.path)?;
        Ok(journal)
    }

    #[cfg(test)]
    async fn inject(&self, fault: Option<Fault>) {
        self.journal.lock().await.fault = fault;
    }
}

/// Rebuild the state from journal text.
///
/// The second value is the intact prefix of the journal when the last line
/// had to be dropped.
fn replay(path: &Path, contents: &str) -> Result<(StoreState, Option<String>), StoreError> {
    let mut state = StoreState::default();
    let mut intact = None;
    let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
    let last = lines.len().saturating_sub(1);

    for (n, line) in lines.iter().enumerate() {
        let record: JournalRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) if n == last => {
                warn!(path = %path.display(), error = %e, "ignoring torn journal tail");
                intact = Some(lines[..n].iter().map(|l| format!("{l}\n")).collect());
                break;
            }
            Err(e) => return Err(e.into()),
        };
        match record {
            JournalRecord::Insert { task } => {
                if let Err(e) = state.insert(task) {
                    warn!(path = %path.display(), error = %e, "skipping duplicate journal insert");
                }
            }
            JournalRecord::Status { id, status } => state.set_status(id, status),
        }
    }

    let counts = state.counts();
    info!(
        path = %path.display(),
        records = lines.len(),
        scheduled = counts.scheduled,
        ready = counts.ready,
        "replayed task journal"
    );
    Ok((state, intact))
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut journal = self.journal.lock().await;
        journal.usable(&self.path)?;
        journal.state.check_insert(task)?;
        journal
            .append(&self.path, &JournalRecord::Insert { task: task.clone() })
            .await?;
        journal.state.insert(task.clone())?;
        debug!(task_id = %task.id, "journaled insert");
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.readable().await?.state.get(id))
    }

    async fn transition(&self, id: TaskId, to: TaskStatus) -> Result<Transition, StoreError> {
        self.ensure_available()?;
        let mut journal = self.journal.lock().await;
        journal.usable(&self.path)?;
        let outcome = journal.state.check_transition(id, to);
        if matches!(outcome, Transition::Applied(_)) {
            journal
                .append(&self.path, &JournalRecord::Status { id, status: to })
                .await?;
            journal.state.set_status(id, to);
        }
        Ok(outcome)
    }

    async fn scan_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        Ok(self.readable().await?.state.scan_status(status))
    }

    async fn scan_scheduled(&self, from_ms: i64, until_ms: i64) -> Result<Vec<Task>, StoreError> {
        Ok(self.readable().await?.state.scan_scheduled(from_ms, until_ms))
    }

    async fn counts(&self) -> Result<StatusCounts, StoreError> {
        Ok(self.readable().await?.state.counts())
    }

    async fn max_id(&self) -> Result<Option<TaskId>, StoreError> {
        Ok(self.readable().await?.state.max_id())
    }
}
