//! The seam between the ingester and the chain's RPC transport

pub mod error;
pub mod evm;
pub mod filter;
pub mod subscription;

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, TxHash};
use alloy_rpc_types_eth::{Header, Log, Transaction};
use async_trait::async_trait;

pub use error::ChainError;
pub use evm::EvmChainClient;
pub use filter::LogFilter;
pub use subscription::{Subscription, SubscriptionEvent, SubscriptionSink, Unsubscriber};

pub type SharedChainClient = Arc<dyn ChainClient>;

/// Subscribe and call primitives over one chain connection
///
/// There is no retry in here, retry policy belongs to the callers.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    async fn subscribe_logs(&self, filter: LogFilter) -> Result<Subscription<Log>, ChainError>;

    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>, ChainError>;

    async fn transaction_by_hash(&self, hash: TxHash) -> Result<Option<Transaction>, ChainError>;

    /// `eth_call` against the latest block
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, ChainError>;
}
