//! Typed handle over one on-chain price-feed contract

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use alloy_rpc_types_eth::{Log, Transaction};
use alloy_sol_types::{sol, SolCall, SolEvent};
use thiserror::Error;
use tracing::instrument;

use crate::chain::{ChainError, LogFilter, SharedChainClient, Subscription};

sol! {
    #[allow(missing_docs)]
    interface IFluxAggregator {
        event SubmissionReceived(int256 indexed answer, uint32 indexed round, address indexed oracle);

        function latestRound() external view returns (uint256);
    }
}

pub use IFluxAggregator::SubmissionReceived;

/// Name of the event tag persisted next to every submission log
pub const SUBMISSION_RECEIVED: &str = "SubmissionReceived";

#[derive(Clone)]
pub struct Aggregator {
    pub name: String,
    pub address: Address,
    pub submission_event: B256,
    chain: SharedChainClient,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish()
    }
}

/// A decoded `SubmissionReceived` log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceivedEvent {
    /// signed, decimal
    pub answer: String,
    pub round_id: U256,
    pub oracle: Address,
}

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("abi: {0}")]
    Abi(#[from] alloy_sol_types::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 3 indexed topics, found {0}")]
    TopicCount(usize),
    #[error("not a SubmissionReceived log, signature topic {0}")]
    UnexpectedEvent(B256),
    #[error("log has no topics")]
    Anonymous,
}

impl Aggregator {
    pub fn new(name: impl Into<String>, address: Address, chain: SharedChainClient) -> Self {
        Self {
            name: name.into(),
            address,
            submission_event: SubmissionReceived::SIGNATURE_HASH,
            chain,
        }
    }

    /// `latestRound()` at the latest block
    #[instrument(level = "debug", skip(self), fields(subsys = "Aggregator", address = %self.address))]
    pub async fn latest_round(&self) -> Result<U256, AggregatorError> {
        let input = IFluxAggregator::latestRoundCall {}.abi_encode();
        let output = self.chain.call(self.address, Bytes::from(input)).await?;

        Ok(IFluxAggregator::latestRoundCall::abi_decode_returns(&output)?)
    }

    /// Opens a log subscription scoped to this contract's submission event
    pub async fn subscribe_submissions(&self) -> Result<Subscription<Log>, ChainError> {
        self.chain
            .subscribe_logs(LogFilter::new(self.address, self.submission_event))
            .await
    }

    /// Looks up the transaction a submission log came from, `None` for pending logs
    pub async fn submission_transaction(
        &self,
        log: &Log,
    ) -> Result<Option<Transaction>, ChainError> {
        match log.transaction_hash {
            Some(hash) => self.chain.transaction_by_hash(hash).await,
            None => Ok(None),
        }
    }

    pub fn decode_submission(&self, log: &Log) -> Result<SubmissionReceivedEvent, DecodeError> {
        decode_log(log)
    }
}

/// Decodes a full log, signature topic first
pub fn decode_log(log: &Log) -> Result<SubmissionReceivedEvent, DecodeError> {
    let (signature, indexed) = log.topics().split_first().ok_or(DecodeError::Anonymous)?;

    if *signature != SubmissionReceived::SIGNATURE_HASH {
        return Err(DecodeError::UnexpectedEvent(*signature));
    }

    decode_topics(indexed)
}

/// Decodes the indexed topics `[answer, round, oracle]`
pub fn decode_topics(indexed: &[B256]) -> Result<SubmissionReceivedEvent, DecodeError> {
    let [answer, round, oracle] = indexed else {
        return Err(DecodeError::TopicCount(indexed.len()));
    };

    Ok(SubmissionReceivedEvent {
        answer: I256::from_raw(U256::from_be_bytes(answer.0)).to_string(),
        round_id: U256::from_be_bytes(round.0),
        oracle: Address::from_word(*oracle),
    })
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::{submission_log, MockChainClient};

    fn word(value: I256) -> B256 {
        B256::from(value.into_raw().to_be_bytes::<32>())
    }

    #[test]
    fn decode_negative_answer() {
        let oracle = Address::repeat_byte(0x42);
        let topics = [
            word(I256::try_from(-1234i64).unwrap()),
            B256::from(U256::from(7).to_be_bytes::<32>()),
            oracle.into_word(),
        ];

        let event = decode_topics(&topics).unwrap();

        assert_eq!(event.answer, "-1234");
        assert_eq!(event.round_id, U256::from(7));
        assert_eq!(event.oracle, oracle);
    }

    #[test]
    fn decode_wrong_topic_count() {
        assert_eq!(decode_topics(&[]), Err(DecodeError::TopicCount(0)));
        assert_eq!(
            decode_topics(&[B256::ZERO, B256::ZERO]),
            Err(DecodeError::TopicCount(2))
        );
        assert_eq!(
            decode_topics(&[B256::ZERO; 4]),
            Err(DecodeError::TopicCount(4))
        );
    }

    #[test]
    fn decode_full_log() {
        let feed = Address::repeat_byte(0x01);
        let oracle = Address::repeat_byte(0x02);
        let log = submission_log(feed, 250_000, 9, oracle);

        let event = decode_log(&log).unwrap();
        assert_eq!(event.answer, "250000");
        assert_eq!(event.round_id, U256::from(9));
        assert_eq!(event.oracle, oracle);

        let mut other = log.clone();
        other.inner.data = alloy_primitives::LogData::new_unchecked(
            vec![B256::repeat_byte(0xee)],
            Bytes::new(),
        );
        assert_eq!(
            decode_log(&other),
            Err(DecodeError::UnexpectedEvent(B256::repeat_byte(0xee)))
        );
    }

    #[test]
    fn signature_matches_abi() {
        assert_eq!(
            SubmissionReceived::SIGNATURE,
            "SubmissionReceived(int256,uint32,address)"
        );
    }

    #[tokio::test]
    async fn latest_round_through_chain() {
        let chain = MockChainClient::new();
        let address = Address::repeat_byte(0x10);
        chain.set_latest_round(address, 5).await;

        let aggregator = Aggregator::new("ETH / USD", address, Arc::new(chain.clone()));
        assert_eq!(aggregator.latest_round().await.unwrap(), U256::from(5));

        chain.fail_calls(address).await;
        assert!(matches!(
            aggregator.latest_round().await,
            Err(AggregatorError::Chain(ChainError::Rpc { .. }))
        ));
    }

    #[tokio::test]
    async fn latest_round_bad_return_data() {
        let chain = MockChainClient::new();
        let address = Address::repeat_byte(0x10);
        chain
            .set_call_output(address, Bytes::from_static(&[0u8; 8]))
            .await;

        let aggregator = Aggregator::new("ETH / USD", address, Arc::new(chain));
        assert!(matches!(
            aggregator.latest_round().await,
            Err(AggregatorError::Abi(_))
        ));
    }

    #[tokio::test]
    async fn subscription_is_scoped_to_the_contract() {
        let chain = MockChainClient::new();
        let address = Address::repeat_byte(0x10);
        let aggregator = Aggregator::new("ETH / USD", address, Arc::new(chain.clone()));

        let _subscription = aggregator.subscribe_submissions().await.unwrap();

        let filters = chain.log_filters().await;
        assert_eq!(filters, vec![LogFilter::new(address, SubmissionReceived::SIGNATURE_HASH)]);
    }

    #[tokio::test]
    async fn pending_log_has_no_transaction() {
        let chain = MockChainClient::new();
        let feed = Address::repeat_byte(0x10);
        let aggregator = Aggregator::new("ETH / USD", feed, Arc::new(chain));

        let mut log = submission_log(feed, 1, 1, Address::ZERO);
        log.transaction_hash = None;

        assert!(aggregator.submission_transaction(&log).await.unwrap().is_none());
    }
}
