//! Scripted stand-ins for the chain, shared by unit and integration tests

use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy_primitives::{Address, Bloom, Bytes, LogData, TxHash, B256, B64, I256, U256};
use alloy_rpc_types_eth::{Header, Log, Transaction};
use alloy_sol_types::{SolEvent, SolValue};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    aggregator::SubmissionReceived,
    chain::{ChainClient, ChainError, LogFilter, Subscription, SubscriptionSink},
};

/// A [`ChainClient`] whose subscriptions are driven by the test
///
/// Every subscribe call is recorded and hands back a real [`Subscription`],
/// the sink side stays here so tests can push items or break it.
#[derive(Clone, Default)]
pub struct MockChainClient {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    log_sinks: Vec<(LogFilter, SubscriptionSink<Log>)>,
    head_sinks: Vec<SubscriptionSink<Header>>,
    log_subscribes: HashMap<Address, usize>,
    head_subscribes: usize,
    max_live_logs: HashMap<Address, usize>,
    subscribe_failures: usize,
    call_outputs: HashMap<Address, Result<Bytes, String>>,
    call_counts: HashMap<Address, usize>,
    transactions: HashMap<TxHash, Transaction>,
}

impl MockState {
    fn live_logs(&self, address: Address) -> usize {
        self.log_sinks
            .iter()
            .filter(|(filter, sink)| filter.addresses.contains(&address) && !sink.is_unsubscribed())
            .count()
    }

    fn take_live_log_sink(&mut self, address: Address) -> Option<(LogFilter, SubscriptionSink<Log>)> {
        let index = self.log_sinks.iter().rposition(|(filter, sink)| {
            filter.addresses.contains(&address) && !sink.is_unsubscribed()
        })?;
        Some(self.log_sinks.remove(index))
    }

    fn take_live_head_sink(&mut self) -> Option<SubscriptionSink<Header>> {
        let index = self
            .head_sinks
            .iter()
            .rposition(|sink| !sink.is_unsubscribed())?;
        Some(self.head_sinks.remove(index))
    }
}

const WAIT: Duration = Duration::from_secs(5);

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_latest_round(&self, address: Address, round: u64) {
        self.set_call_output(address, Bytes::from(U256::from(round).abi_encode()))
            .await;
    }

    pub async fn set_call_output(&self, address: Address, output: Bytes) {
        self.state
            .lock()
            .await
            .call_outputs
            .insert(address, Ok(output));
    }

    /// `eth_call` against `address` reverts from now on
    pub async fn fail_calls(&self, address: Address) {
        self.state
            .lock()
            .await
            .call_outputs
            .insert(address, Err("execution reverted".to_string()));
    }

    pub async fn call_count(&self, address: Address) -> usize {
        self.state
            .lock()
            .await
            .call_counts
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    pub async fn set_transaction(&self, hash: TxHash, transaction: Transaction) {
        self.state.lock().await.transactions.insert(hash, transaction);
    }

    /// The next `count` subscribe calls (logs or heads) fail
    pub async fn fail_next_subscribes(&self, count: usize) {
        self.state.lock().await.subscribe_failures = count;
    }

    pub async fn log_filters(&self) -> Vec<LogFilter> {
        self.state
            .lock()
            .await
            .log_sinks
            .iter()
            .map(|(filter, _)| filter.clone())
            .collect()
    }

    /// How many log subscriptions were ever opened for `address`
    pub async fn log_subscriptions(&self, address: Address) -> usize {
        self.state
            .lock()
            .await
            .log_subscribes
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    pub async fn live_log_subscriptions(&self, address: Address) -> usize {
        self.state.lock().await.live_logs(address)
    }

    /// Highest number of simultaneously live log subscriptions ever seen for `address`
    pub async fn max_live_log_subscriptions(&self, address: Address) -> usize {
        self.state
            .lock()
            .await
            .max_live_logs
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    /// How many head subscriptions were ever opened
    pub async fn head_subscriptions(&self) -> usize {
        self.state.lock().await.head_subscribes
    }

    pub async fn live_head_subscriptions(&self) -> usize {
        self.state
            .lock()
            .await
            .head_sinks
            .iter()
            .filter(|sink| !sink.is_unsubscribed())
            .count()
    }

    /// Delivers a log on the newest live subscription for `address`
    pub async fn push_log(&self, address: Address, log: Log) -> bool {
        let taken = self.state.lock().await.take_live_log_sink(address);
        let Some((filter, sink)) = taken else {
            return false;
        };

        // outside the lock, send may wait on a full channel
        let sent = sink.send(log).await;
        self.state.lock().await.log_sinks.push((filter, sink));
        sent
    }

    /// Breaks the newest live subscription for `address` with a transport error
    pub async fn fail_log_subscription(&self, address: Address) -> bool {
        match self.state.lock().await.take_live_log_sink(address) {
            Some((_, sink)) => {
                sink.fail(ChainError::SubscriptionClosed);
                true
            }
            None => false,
        }
    }

    pub async fn push_head(&self, header: Header) -> bool {
        let sink = self.state.lock().await.take_live_head_sink();
        let Some(sink) = sink else {
            return false;
        };

        let sent = sink.send(header).await;
        self.state.lock().await.head_sinks.push(sink);
        sent
    }

    pub async fn fail_head_subscription(&self) -> bool {
        match self.state.lock().await.take_live_head_sink() {
            Some(sink) => {
                sink.fail(ChainError::SubscriptionClosed);
                true
            }
            None => false,
        }
    }

    /// Waits until at least `count` log subscriptions were opened for `address`
    pub async fn wait_for_log_subscriptions(&self, address: Address, count: usize) {
        let waited = tokio::time::timeout(WAIT, async {
            while self.log_subscriptions(address).await < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        if waited.is_err() {
            panic!(
                "timed out waiting for {count} log subscriptions to {address}, saw {}",
                self.log_subscriptions(address).await
            );
        }
    }

    /// Waits until the newest subscription for `address` is live and can take a log
    pub async fn wait_for_live_log_subscription(&self, address: Address) {
        let waited = tokio::time::timeout(WAIT, async {
            while self.live_log_subscriptions(address).await == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        if waited.is_err() {
            panic!("timed out waiting for a live log subscription to {address}");
        }
    }

    pub async fn wait_for_head_subscriptions(&self, count: usize) {
        let waited = tokio::time::timeout(WAIT, async {
            while self.head_subscriptions().await < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        if waited.is_err() {
            panic!("timed out waiting for {count} head subscriptions");
        }
    }

    async fn take_subscribe_failure(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn subscribe_logs(&self, filter: LogFilter) -> Result<Subscription<Log>, ChainError> {
        if self.take_subscribe_failure().await {
            return Err(ChainError::subscribe("logs", anyhow::anyhow!("connection refused")));
        }

        let (subscription, sink) = Subscription::channel(16);
        let mut state = self.state.lock().await;

        for address in &filter.addresses {
            *state.log_subscribes.entry(*address).or_default() += 1;
            let live = state.live_logs(*address) + 1;
            let max = state.max_live_logs.entry(*address).or_default();
            *max = (*max).max(live);
        }
        state.log_sinks.push((filter, sink));

        Ok(subscription)
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>, ChainError> {
        if self.take_subscribe_failure().await {
            return Err(ChainError::subscribe("newHeads", anyhow::anyhow!("connection refused")));
        }

        let (subscription, sink) = Subscription::channel(16);
        let mut state = self.state.lock().await;
        state.head_subscribes += 1;
        state.head_sinks.push(sink);

        Ok(subscription)
    }

    async fn transaction_by_hash(&self, hash: TxHash) -> Result<Option<Transaction>, ChainError> {
        Ok(self.state.lock().await.transactions.get(&hash).cloned())
    }

    async fn call(&self, to: Address, _input: Bytes) -> Result<Bytes, ChainError> {
        let mut state = self.state.lock().await;
        *state.call_counts.entry(to).or_default() += 1;

        match state.call_outputs.get(&to) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(reason)) => Err(ChainError::rpc("eth_call", anyhow::anyhow!(reason.clone()))),
            None => Err(ChainError::rpc("eth_call", anyhow::anyhow!("no contract at {to}"))),
        }
    }
}

/// A mined `SubmissionReceived` log emitted by `feed`
pub fn submission_log(feed: Address, answer: i64, round: u32, oracle: Address) -> Log {
    let answer = I256::try_from(answer).unwrap_or_default();
    let topics = vec![
        SubmissionReceived::SIGNATURE_HASH,
        B256::from(answer.into_raw().to_be_bytes::<32>()),
        B256::from(U256::from(round).to_be_bytes::<32>()),
        oracle.into_word(),
    ];

    Log {
        inner: alloy_primitives::Log {
            address: feed,
            data: LogData::new_unchecked(topics, Bytes::new()),
        },
        block_hash: Some(B256::repeat_byte(0xbb)),
        block_number: Some(u64::from(round)),
        block_timestamp: None,
        transaction_hash: Some(B256::repeat_byte(0xcc)),
        transaction_index: Some(0),
        log_index: Some(0),
        removed: false,
    }
}

/// A header at `number` where every hash and address field has its own byte pattern
pub fn header(number: u64) -> Header {
    Header {
        hash: B256::repeat_byte(0x01),
        inner: alloy_consensus::Header {
            parent_hash: B256::repeat_byte(0x02),
            ommers_hash: B256::repeat_byte(0x03),
            beneficiary: Address::repeat_byte(0x04),
            state_root: B256::repeat_byte(0x05),
            transactions_root: B256::repeat_byte(0x06),
            receipts_root: B256::repeat_byte(0x07),
            logs_bloom: Bloom::repeat_byte(0x08),
            difficulty: U256::from(2),
            number,
            gas_limit: 30_000_000,
            gas_used: 21_000,
            timestamp: 1_700_000_000,
            extra_data: Bytes::from_static(b"ingester"),
            mix_hash: B256::repeat_byte(0x09),
            nonce: B64::repeat_byte(0x0a),
            ..Default::default()
        },
        total_difficulty: None,
        size: None,
    }
}
