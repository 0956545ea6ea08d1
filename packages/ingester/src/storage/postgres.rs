use std::time::Duration;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::instrument;

use super::{EthereumHead, EthereumLog, Storage, StorageError};

/// The `ethereum_head` / `ethereum_log` tables on a pooled PostgreSQL connection
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    #[instrument(skip(database_url), fields(subsys = "Storage"))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Runs the embedded migrations from `migrations/`
    #[instrument(skip(self), fields(subsys = "Storage"))]
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn bigint(field: &'static str, value: u64) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::Overflow { field, value })
}

#[async_trait]
impl Storage for PostgresStorage {
    #[instrument(level = "debug", skip(self, head), fields(subsys = "Storage", number = %head.number))]
    async fn insert_head(&self, head: &EthereumHead) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO ethereum_head
                (block_hash, parent_hash, uncle_hash, coinbase, root, tx_hash, receipt_hash, bloom,
                 difficulty, number, gas_limit, gas_used, time, extra, mix_digest, nonce)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9::numeric, $10::numeric, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(head.block_hash.as_slice())
        .bind(head.parent_hash.as_slice())
        .bind(head.uncle_hash.as_slice())
        .bind(head.coinbase.as_slice())
        .bind(head.root.as_slice())
        .bind(head.tx_hash.as_slice())
        .bind(head.receipt_hash.as_slice())
        .bind(head.bloom.as_slice())
        .bind(&head.difficulty)
        .bind(&head.number)
        .bind(bigint("gas_limit", head.gas_limit)?)
        .bind(bigint("gas_used", head.gas_used)?)
        .bind(bigint("time", head.time)?)
        .bind(&head.extra[..])
        .bind(head.mix_digest.as_slice())
        .bind(head.nonce.as_slice())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(level = "debug", skip(self, log), fields(subsys = "Storage", address = %log.address))]
    async fn insert_log(&self, log: &EthereumLog) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO ethereum_log
                (address, topics, data, block_number, tx_hash, tx_index, block_hash, "index", removed, "type")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(log.address.as_slice())
        .bind(log.topics.as_slice())
        .bind(&log.data[..])
        .bind(bigint("block_number", log.block_number)?)
        .bind(log.tx_hash.as_slice())
        .bind(bigint("tx_index", log.tx_index)?)
        .bind(log.block_hash.as_slice())
        .bind(bigint("index", log.index)?)
        .bind(log.removed)
        .bind(&log.kind)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
