use std::time::Duration;

use alloy_rpc_types_eth::Header;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::RetryPolicy;
use crate::{
    chain::{SharedChainClient, SubscriptionEvent},
    storage::{EthereumHead, SharedStorage},
};

/// Persists every new block header, resubscribing whenever the subscription breaks
pub struct HeaderIngestion {
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl HeaderIngestion {
    pub fn start(chain: SharedChainClient, storage: SharedStorage, retry: RetryPolicy) -> Self {
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run(chain, storage, retry, shutdown.clone()));

        Self { shutdown, worker }
    }

    #[instrument(skip(self), fields(subsys = "HeaderIngestion"))]
    pub async fn stop(self) {
        self.shutdown.cancel();

        if let Err(err) = self.worker.await {
            tracing::error!("header worker panicked: {err:?}");
        }
        tracing::info!("header ingestion stopped");
    }
}

#[instrument(skip_all, fields(subsys = "HeaderIngestion"))]
async fn run(
    chain: SharedChainClient,
    storage: SharedStorage,
    retry: RetryPolicy,
    shutdown: CancellationToken,
) {
    let mut backoff = retry.backoff();

    while !shutdown.is_cancelled() {
        let mut subscription = match chain.subscribe_new_heads().await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::error!("could not subscribe to new heads: {err}");
                if !pause(&shutdown, backoff.next_delay()).await {
                    break;
                }
                continue;
            }
        };
        tracing::info!("subscribed to new heads");

        loop {
            tokio::select! {
                biased;
                // dropping the subscription on return releases it
                _ = shutdown.cancelled() => return,
                event = subscription.next() => match event {
                    SubscriptionEvent::Item(header) => {
                        persist(&storage, &header).await;
                        backoff.reset();
                    }
                    SubscriptionEvent::Closed(Some(err)) => {
                        tracing::error!("new heads subscription failed: {err}");
                        break;
                    }
                    SubscriptionEvent::Closed(None) => {
                        tracing::warn!("new heads subscription closed");
                        break;
                    }
                },
            }
        }

        subscription.unsubscribe();

        if !pause(&shutdown, backoff.next_delay()).await {
            break;
        }
    }
}

async fn persist(storage: &SharedStorage, header: &Header) {
    let head = EthereumHead::from(header);
    tracing::debug!(number = %head.number, hash = %head.block_hash, "new head");

    if let Err(err) = storage.insert_head(&head).await {
        tracing::error!(number = %head.number, "could not persist head: {err}");
    }
}

async fn pause(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use alloy_primitives::{Address, B256, B64};

    use super::*;
    use crate::{
        storage::MemoryStorage,
        test_utils::{header, MockChainClient},
    };

    fn start(chain: &MockChainClient, storage: &MemoryStorage) -> HeaderIngestion {
        utils::init_tracing_tests();
        HeaderIngestion::start(
            Arc::new(chain.clone()),
            Arc::new(storage.clone()),
            RetryPolicy::default(),
        )
    }

    async fn wait_for_heads(storage: &MemoryStorage, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while storage.heads().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn header_becomes_one_row() {
        let chain = MockChainClient::new();
        let storage = MemoryStorage::new();
        let ingestion = start(&chain, &storage);

        chain.wait_for_head_subscriptions(1).await;
        assert!(chain.push_head(header(100)).await);
        wait_for_heads(&storage, 1).await;

        let heads = storage.heads();
        assert_eq!(heads.len(), 1);
        let head = &heads[0];
        assert_eq!(head.number, "100");
        assert_eq!(head.difficulty, "2");
        assert_eq!(head.block_hash, B256::repeat_byte(0x01));
        assert_eq!(head.parent_hash, B256::repeat_byte(0x02));
        assert_eq!(head.uncle_hash, B256::repeat_byte(0x03));
        assert_eq!(head.coinbase, Address::repeat_byte(0x04));
        assert_eq!(head.root, B256::repeat_byte(0x05));
        assert_eq!(head.tx_hash, B256::repeat_byte(0x06));
        assert_eq!(head.receipt_hash, B256::repeat_byte(0x07));
        assert_eq!(head.mix_digest, B256::repeat_byte(0x09));
        assert_eq!(head.nonce, B64::repeat_byte(0x0a));
        assert_eq!(head.gas_limit, 30_000_000);
        assert_eq!(head.extra.as_ref(), b"ingester");

        ingestion.stop().await;
        assert_eq!(chain.live_head_subscriptions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_after_failure() {
        let chain = MockChainClient::new();
        let storage = MemoryStorage::new();
        let ingestion = start(&chain, &storage);

        chain.wait_for_head_subscriptions(1).await;
        assert!(chain.fail_head_subscription().await);
        chain.wait_for_head_subscriptions(2).await;

        assert!(chain.push_head(header(101)).await);
        wait_for_heads(&storage, 1).await;
        assert_eq!(storage.heads()[0].number, "101");

        ingestion.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_errors_are_retried() {
        let chain = MockChainClient::new();
        chain.fail_next_subscribes(3).await;
        let storage = MemoryStorage::new();
        let ingestion = start(&chain, &storage);

        chain.wait_for_head_subscriptions(1).await;
        assert_eq!(chain.live_head_subscriptions().await, 1);

        ingestion.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn storage_errors_keep_the_subscription() {
        let chain = MockChainClient::new();
        let storage = MemoryStorage::new();
        storage.set_unavailable(true);
        let ingestion = start(&chain, &storage);

        chain.wait_for_head_subscriptions(1).await;
        assert!(chain.push_head(header(1)).await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(storage.heads().is_empty());

        storage.set_unavailable(false);
        assert!(chain.push_head(header(2)).await);
        wait_for_heads(&storage, 1).await;

        assert_eq!(storage.heads()[0].number, "2");
        assert_eq!(chain.head_subscriptions().await, 1);
        ingestion.stop().await;
    }
}
