use alloy_primitives::{Address, Bytes, TxHash, B256};
use alloy_provider::{DynProvider, Provider};
use alloy_rpc_types_eth::{Header, Log, Transaction, TransactionInput, TransactionRequest};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::instrument;
use utils::evm_client::EvmQueryClient;

use super::{ChainClient, ChainError, LogFilter, Subscription, SubscriptionSink};

/// [`ChainClient`] over an alloy websocket provider
///
/// Every subscription gets its own forwarding task, which lives until the
/// subscription handle is released or the transport ends the stream.
#[derive(Clone, Debug)]
pub struct EvmChainClient {
    client: EvmQueryClient,
    buffer: usize,
}

impl EvmChainClient {
    pub fn new(client: EvmQueryClient, buffer: usize) -> Self {
        Self { client, buffer }
    }

    fn provider(&self) -> &DynProvider {
        &self.client.provider
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    #[instrument(level = "debug", skip(self), fields(subsys = "ChainClient"))]
    async fn subscribe_logs(&self, filter: LogFilter) -> Result<Subscription<Log>, ChainError> {
        let inner = self
            .provider()
            .subscribe_logs(&filter.to_filter())
            .await
            .map_err(|e| ChainError::subscribe("logs", e))?;

        let (subscription, sink) = Subscription::channel(self.buffer);
        tokio::spawn(forward(
            "logs",
            self.provider().clone(),
            *inner.local_id(),
            inner.into_stream(),
            sink,
        ));

        Ok(subscription)
    }

    #[instrument(level = "debug", skip(self), fields(subsys = "ChainClient"))]
    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>, ChainError> {
        let inner = self
            .provider()
            .subscribe_blocks()
            .await
            .map_err(|e| ChainError::subscribe("newHeads", e))?;

        let (subscription, sink) = Subscription::channel(self.buffer);
        tokio::spawn(forward(
            "newHeads",
            self.provider().clone(),
            *inner.local_id(),
            inner.into_stream(),
            sink,
        ));

        Ok(subscription)
    }

    #[instrument(level = "debug", skip(self), fields(subsys = "ChainClient"))]
    async fn transaction_by_hash(&self, hash: TxHash) -> Result<Option<Transaction>, ChainError> {
        self.provider()
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| ChainError::rpc("eth_getTransactionByHash", e))
    }

    #[instrument(level = "debug", skip(self, input), fields(subsys = "ChainClient"))]
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, ChainError> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(input));

        self.provider()
            .call(tx)
            .await
            .map_err(|e| ChainError::rpc("eth_call", e))
    }
}

// pumps one alloy subscription into our handle until either side goes away
async fn forward<T>(
    kind: &'static str,
    provider: DynProvider,
    id: B256,
    stream: impl Stream<Item = T> + Send + 'static,
    sink: SubscriptionSink<T>,
) where
    T: Send + 'static,
{
    let mut stream = Box::pin(stream);
    let mut ended_by_transport = false;

    loop {
        tokio::select! {
            biased;
            _ = sink.unsubscribed() => {
                tracing::debug!(kind, %id, "subscription released by its owner");
                break;
            }
            next = stream.next() => match next {
                Some(item) => {
                    if !sink.send(item).await {
                        break;
                    }
                }
                None => {
                    ended_by_transport = true;
                    break;
                }
            }
        }
    }

    drop(stream);

    if ended_by_transport {
        tracing::warn!(kind, %id, "subscription stream ended by the transport");
        sink.fail(ChainError::SubscriptionClosed);
    }

    if let Err(err) = provider.unsubscribe(id).await {
        tracing::debug!(kind, %id, "eth_unsubscribe failed: {err:?}");
    }
}
