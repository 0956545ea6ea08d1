//! Periodic feed discovery: registry -> filter -> probe -> announce

pub mod announcer;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

pub use announcer::Announcer;

use crate::{
    aggregator::{Aggregator, AggregatorError},
    chain::SharedChainClient,
    registry::{Feed, SharedFeedSource},
    ticker::Tick,
};

/// Only this aggregator generation emits the event we ingest
pub const SUPPORTED_CONTRACT_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("latestRound() did not answer within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Aggregator(#[from] AggregatorError),
}

/// One discovery round per tick
///
/// A feed becomes known only after its contract answered `latestRound()`;
/// known feeds are never probed or announced again. Cloning shares the
/// known set.
#[derive(Clone)]
pub struct FeedDiscovery {
    source: SharedFeedSource,
    chain: SharedChainClient,
    announcer: Announcer,
    network_id: u64,
    probe_timeout: Duration,
    known: Arc<Mutex<HashSet<Address>>>,
}

impl FeedDiscovery {
    pub fn new(
        source: SharedFeedSource,
        chain: SharedChainClient,
        announcer: Announcer,
        network_id: u64,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            source,
            chain,
            announcer,
            network_id,
            probe_timeout,
            known: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_known(&self, address: &Address) -> bool {
        self.known().contains(address)
    }

    pub fn known_count(&self) -> usize {
        self.known().len()
    }

    #[instrument(skip(self), fields(subsys = "Discovery", network_id = self.network_id))]
    pub async fn discover(&self) {
        let feeds = match self.source.feeds().await {
            Ok(feeds) => feeds,
            Err(err) => {
                tracing::error!("could not fetch feeds: {err}");
                return;
            }
        };

        for feed in feeds.iter().filter(|feed| self.wanted(feed)) {
            if self.is_known(&feed.contract_address) {
                continue;
            }

            match self.probe(feed).await {
                Ok((aggregator, round)) => {
                    self.known().insert(aggregator.address);
                    tracing::info!(
                        feed = %aggregator.address,
                        name = %aggregator.name,
                        %round,
                        "discovered feed"
                    );
                    self.announcer.announce(&aggregator);
                }
                Err(err) => {
                    tracing::warn!(
                        feed = %feed.contract_address,
                        name = %feed.name,
                        "feed failed validation, retrying next round: {err}"
                    );
                }
            }
        }
    }

    fn wanted(&self, feed: &Feed) -> bool {
        feed.network_id == self.network_id && feed.contract_version == SUPPORTED_CONTRACT_VERSION
    }

    async fn probe(&self, feed: &Feed) -> Result<(Aggregator, U256), ProbeError> {
        let aggregator = Aggregator::new(&feed.name, feed.contract_address, self.chain.clone());

        let round = tokio::time::timeout(self.probe_timeout, aggregator.latest_round())
            .await
            .map_err(|_| ProbeError::Timeout(self.probe_timeout))??;

        Ok((aggregator, round))
    }

    fn known(&self) -> std::sync::MutexGuard<'_, HashSet<Address>> {
        self.known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Tick for FeedDiscovery {
    async fn tick(&self) {
        self.discover().await
    }

    fn name(&self) -> &'static str {
        "FeedDiscovery"
    }
}
