use alloy_primitives::{Address, Bloom, Bytes, B256, B64};
use alloy_rpc_types_eth::{Header, Log};

/// Storage-ready projection of a block header, one `ethereum_head` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthereumHead {
    pub block_hash: B256,
    pub parent_hash: B256,
    pub uncle_hash: B256,
    pub coinbase: Address,
    pub root: B256,
    pub tx_hash: B256,
    pub receipt_hash: B256,
    pub bloom: Bloom,
    /// decimal
    pub difficulty: String,
    /// decimal
    pub number: String,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub time: u64,
    pub extra: Bytes,
    pub mix_digest: B256,
    pub nonce: B64,
}

impl From<&Header> for EthereumHead {
    fn from(header: &Header) -> Self {
        let inner = &header.inner;

        Self {
            block_hash: header.hash,
            parent_hash: inner.parent_hash,
            uncle_hash: inner.ommers_hash,
            coinbase: inner.beneficiary,
            root: inner.state_root,
            tx_hash: inner.transactions_root,
            receipt_hash: inner.receipts_root,
            bloom: inner.logs_bloom,
            difficulty: inner.difficulty.to_string(),
            number: inner.number.to_string(),
            gas_limit: inner.gas_limit,
            gas_used: inner.gas_used,
            time: inner.timestamp,
            extra: inner.extra_data.clone(),
            mix_digest: inner.mix_hash,
            nonce: inner.nonce,
        }
    }
}

/// Storage-ready projection of a log, one `ethereum_log` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthereumLog {
    pub address: Address,
    /// every topic's 32 bytes, concatenated
    pub topics: Vec<u8>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    pub tx_index: u64,
    pub block_hash: B256,
    pub index: u64,
    pub removed: bool,
    /// event name tag, e.g. "SubmissionReceived"
    pub kind: String,
}

impl EthereumLog {
    // pending logs carry no block context, those fields are zeroed
    pub fn new(log: &Log, kind: impl ToString) -> Self {
        Self {
            address: log.address(),
            topics: log
                .topics()
                .iter()
                .flat_map(|topic| topic.0)
                .collect(),
            data: log.data().data.clone(),
            block_number: log.block_number.unwrap_or_default(),
            tx_hash: log.transaction_hash.unwrap_or_default(),
            tx_index: log.transaction_index.unwrap_or_default(),
            block_hash: log.block_hash.unwrap_or_default(),
            index: log.log_index.unwrap_or_default(),
            removed: log.removed,
            kind: kind.to_string(),
        }
    }
}
