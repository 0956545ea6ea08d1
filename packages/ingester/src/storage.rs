//! Append-only persistence of observed chain activity

pub mod memory;
pub mod postgres;
pub mod records;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use records::{EthereumHead, EthereumLog};

pub type SharedStorage = Arc<dyn Storage>;

/// Safe for concurrent writers, every insert is its own unit of work
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn insert_head(&self, head: &EthereumHead) -> Result<(), StorageError>;

    async fn insert_log(&self, log: &EthereumLog) -> Result<(), StorageError>;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{field} does not fit a bigint column: {value}")]
    Overflow { field: &'static str, value: u64 },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
