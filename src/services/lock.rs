use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{AppError, Result};

/// Per-file single-writer table.
///
/// Entries are held weakly: once the last guard and waiter for a file
/// are dropped, the lock is freed and pruned on a later acquire.
pub struct FileLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
    wait: Duration,
}

/// Held while a file is being mutated
pub struct FileGuard {
    _guard: OwnedMutexGuard<()>,
}

impl FileLocks {
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            wait,
        }
    }

    fn entry(&self, file_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(file_id).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(file_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Wait for exclusive access to `file_id`; `Conflict` if another
    /// mutation holds it longer than the configured wait.
    pub async fn acquire(&self, file_id: &str) -> Result<FileGuard> {
        let lock = self.entry(file_id);
        match tokio::time::timeout(self.wait, lock.lock_owned()).await {
            Ok(guard) => Ok(FileGuard { _guard: guard }),
            Err(_) => {
                tracing::warn!("Timed out waiting for lock on file {}", file_id);
                Err(AppError::Conflict(format!(
                    "File {} is being modified by another request",
                    file_id
                )))
            }
        }
    }

    /// Number of files with a live lock
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|lock| lock.strong_count() > 0).count()
    }
}
