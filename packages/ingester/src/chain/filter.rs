use alloy_primitives::{Address, B256};
use alloy_rpc_types_eth::Filter;

/// What a log subscription should match
///
/// Converted into an alloy [`Filter`] right before subscribing. An unset
/// `from_block` means genesis, not "latest", so nothing inside the requested
/// window is silently skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub addresses: Vec<Address>,
    /// Matched against the first topic, i.e. the event signature
    pub event_signatures: Vec<B256>,
}

impl LogFilter {
    pub fn new(address: Address, event_signature: B256) -> Self {
        Self {
            addresses: vec![address],
            event_signatures: vec![event_signature],
            ..Default::default()
        }
    }

    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::new().from_block(self.from_block.unwrap_or(0));

        if let Some(to_block) = self.to_block {
            filter = filter.to_block(to_block);
        }

        if !self.addresses.is_empty() {
            filter = filter.address(self.addresses.clone());
        }

        if !self.event_signatures.is_empty() {
            filter = filter.event_signature(self.event_signatures.clone());
        }

        filter
    }
}
