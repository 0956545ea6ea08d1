use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use async_trait::async_trait;

use super::{EthereumHead, EthereumLog, Storage, StorageError};

/// Keeps every row in memory, for tests and dry runs
#[derive(Clone, Default)]
pub struct MemoryStorage {
    heads: Arc<Mutex<Vec<EthereumHead>>>,
    logs: Arc<Mutex<Vec<EthereumLog>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heads(&self) -> Vec<EthereumHead> {
        lock(&self.heads).clone()
    }

    pub fn logs(&self) -> Vec<EthereumLog> {
        lock(&self.logs).clone()
    }

    /// While set, every insert fails with [`StorageError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory storage switched off".to_string()));
        }
        Ok(())
    }
}

// a poisoned lock only means another writer panicked mid-push, the rows are still usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert_head(&self, head: &EthereumHead) -> Result<(), StorageError> {
        self.check()?;
        lock(&self.heads).push(head.clone());
        Ok(())
    }

    async fn insert_log(&self, log: &EthereumLog) -> Result<(), StorageError> {
        self.check()?;
        lock(&self.logs).push(log.clone());
        Ok(())
    }
}
