//! Wires discovery, submission ingestion and header ingestion together

use tracing::instrument;

use crate::{
    chain::SharedChainClient,
    config::Config,
    discovery::{Announcer, FeedDiscovery},
    ingest::{HeaderIngestion, SubmissionIngestion},
    registry::SharedFeedSource,
    storage::SharedStorage,
    ticker::Ticker,
};

/// All long-running parts of the ingester
pub struct Ingester {
    discovery: FeedDiscovery,
    ticker: Ticker,
    submissions: SubmissionIngestion,
    headers: HeaderIngestion,
}

impl Ingester {
    /// Consumers are listening before discovery's first round, which runs before this returns
    #[instrument(skip_all, fields(subsys = "Ingester", network_id = config.network_id))]
    pub async fn start(
        config: &Config,
        chain: SharedChainClient,
        storage: SharedStorage,
        feeds: SharedFeedSource,
    ) -> Self {
        let announcer = Announcer::new();

        let submissions = SubmissionIngestion::new(storage.clone(), config.retry_policy());
        submissions.start(announcer.subscribe(config.announcement_buffer));

        let headers = HeaderIngestion::start(chain.clone(), storage, config.retry_policy());

        let discovery = FeedDiscovery::new(
            feeds,
            chain,
            announcer,
            config.network_id,
            config.probe_timeout(),
        );
        let ticker = Ticker::start(discovery.clone(), config.discovery_interval()).await;

        tracing::info!("ingester started");

        Self {
            discovery,
            ticker,
            submissions,
            headers,
        }
    }

    pub fn discovery(&self) -> &FeedDiscovery {
        &self.discovery
    }

    pub async fn active_subscriptions(&self) -> usize {
        self.submissions.active_subscriptions().await
    }

    /// Discovery first so nothing new gets announced while ingestion drains
    #[instrument(skip_all, fields(subsys = "Ingester"))]
    pub async fn stop(self) {
        self.ticker.stop().await;
        self.submissions.stop().await;
        self.headers.stop().await;
        tracing::info!("ingester stopped");
    }
}
