//! 多设备共享的账号队列。
//!
//! 一把锁同时保护记录列表、扫描游标、已处理集合与文件搬移，
//! 保证同一账号在 `reset()` 之前最多被领取一次。

use crate::config::QueueSettings;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid account folder: {0}")]
    InvalidFolder(PathBuf),
    #[error("unknown account: {0}")]
    UnknownAccount(String),
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 账号处理状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    Pending,
    Succeeded,
    Failed(String),
    /// 文件已损坏并被删除。
    Discarded,
}

/// 一个账号凭据文件。`id` 为文件名。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: String,
    pub path: PathBuf,
    pub outcome: AccountOutcome,
}

/// 队列状态快照。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub folder: Option<PathBuf>,
    pub total: usize,
    pub processed: usize,
    pub remaining: usize,
    pub accounts: Vec<AccountRecord>,
}

#[derive(Debug, Default)]
struct QueueState {
    folder: Option<PathBuf>,
    records: Vec<AccountRecord>,
    cursor: usize,
    processed: HashSet<String>,
}

impl QueueState {
    fn find_mut(&mut self, id: &str) -> Result<&mut AccountRecord, QueueError> {
        self.records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| QueueError::UnknownAccount(id.to_string()))
    }
}

/// 线程安全的账号队列，支持断点续跑。
#[derive(Debug)]
pub struct SharedAccountQueue {
    settings: QueueSettings,
    state: Mutex<QueueState>,
}

impl Default for SharedAccountQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

impl SharedAccountQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 扫描目录中符合扩展名的文件，按文件名排序后替换当前队列，并清空游标与已处理集合。
    pub fn load(&self, folder: impl AsRef<Path>) -> Result<usize, QueueError> {
        let folder = folder.as_ref();
        if !folder.is_dir() {
            return Err(QueueError::InvalidFolder(folder.to_path_buf()));
        }
        let entries = fs::read_dir(folder).map_err(|source| QueueError::Io {
            action: "read",
            path: folder.to_path_buf(),
            source,
        })?;

        let ext = self.settings.extension.trim_start_matches('.');
        let mut records: Vec<AccountRecord> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
            })
            .filter_map(|path| {
                let id = path.file_name()?.to_string_lossy().into_owned();
                Some(AccountRecord {
                    id,
                    path,
                    outcome: AccountOutcome::Pending,
                })
            })
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let count = records.len();
        let mut state = self.lock();
        *state = QueueState {
            folder: Some(folder.to_path_buf()),
            records,
            cursor: 0,
            processed: HashSet::new(),
        };
        info!(folder = %folder.display(), count, "loaded accounts into shared queue");
        Ok(count)
    }

    /// 取下一个未处理的账号；队列耗尽返回 `None`。
    pub fn get_next(&self) -> Option<AccountRecord> {
        let mut state = self.lock();
        while state.cursor < state.records.len() {
            let index = state.cursor;
            state.cursor += 1;
            let record = &state.records[index];
            if !state.processed.contains(&record.id) {
                return Some(record.clone());
            }
        }
        None
    }

    /// 记录处理结果并加入已处理集合。重复调用以最后一次为准。
    pub fn mark_processed(&self, id: &str, result: Result<(), String>) -> Result<(), QueueError> {
        let mut state = self.lock();
        let record = state.find_mut(id)?;
        record.outcome = match result {
            Ok(()) => AccountOutcome::Succeeded,
            Err(msg) => AccountOutcome::Failed(msg),
        };
        state.processed.insert(id.to_string());
        Ok(())
    }

    /// 只把游标拨回开头，保留已处理集合，续跑时自动跳过已完成的账号。
    pub fn prepare_for_resume(&self) {
        self.lock().cursor = 0;
    }

    /// 清空游标与已处理集合，开始新一轮。
    pub fn reset(&self) {
        let mut state = self.lock();
        state.cursor = 0;
        state.processed.clear();
        for record in &mut state.records {
            record.outcome = AccountOutcome::Pending;
        }
    }

    pub fn total_count(&self) -> usize {
        self.lock().records.len()
    }

    pub fn processed_count(&self) -> usize {
        self.lock().processed.len()
    }

    pub fn remaining_count(&self) -> usize {
        let state = self.lock();
        state.records.len() - state.processed.len()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            folder: state.folder.clone(),
            total: state.records.len(),
            processed: state.processed.len(),
            remaining: state.records.len() - state.processed.len(),
            accounts: state.records.clone(),
        }
    }

    /// 完成目录：配置的 `done_folder`，否则为账号所在目录下的 `done/`。
    pub fn done_folder_for(&self, source: &Path) -> PathBuf {
        match &self.settings.done_folder {
            Some(folder) => folder.clone(),
            None => source.parent().unwrap_or(Path::new(".")).join("done"),
        }
    }

    /// 把账号文件移到完成目录，并更新记录中的路径。
    pub fn move_to_done(&self, id: &str) -> Result<PathBuf, QueueError> {
        let mut state = self.lock();
        let record = state.find_mut(id)?;
        let source = record.path.clone();
        let folder = self.done_folder_for(&source);
        fs::create_dir_all(&folder).map_err(|source| QueueError::Io {
            action: "create",
            path: folder.clone(),
            source,
        })?;

        let dest = folder.join(&record.id);
        move_file(&source, &dest).map_err(|err| QueueError::Io {
            action: "move",
            path: source.clone(),
            source: err,
        })?;
        record.path = dest.clone();
        info!(account = id, dest = %dest.display(), "moved to done folder");
        Ok(dest)
    }

    /// 删除损坏的账号文件。记录保留并标记为 `Discarded`，同时计入已处理，
    /// 因此 `remaining = total - processed` 依然成立。
    pub fn delete(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let record = state.find_mut(id)?;
        match fs::remove_file(&record.path) {
            Ok(()) => info!(account = id, "deleted broken account file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(account = id, "account file already gone")
            }
            Err(source) => {
                return Err(QueueError::Io {
                    action: "delete",
                    path: record.path.clone(),
                    source,
                });
            }
        }
        record.outcome = AccountOutcome::Discarded;
        state.processed.insert(id.to_string());
        Ok(())
    }
}

/// 先尝试 rename，跨文件系统时退回复制后删除。
fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(_) if source.exists() => {
            fs::copy(source, dest)?;
            fs::remove_file(source)
        }
        Err(err) => Err(err),
    }
}
