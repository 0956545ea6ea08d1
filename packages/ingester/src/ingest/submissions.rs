use std::{sync::Arc, time::Duration};

use alloy_rpc_types_eth::Log;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::instrument;

use super::{
    table::{RegisterError, SubscriptionTable},
    RetryPolicy,
};
use crate::{
    aggregator::{Aggregator, SUBMISSION_RECEIVED},
    chain::{ChainError, SubscriptionEvent},
    storage::{EthereumLog, SharedStorage},
};

/// Turns announced aggregators into persisted `SubmissionReceived` logs
///
/// Every announced aggregator gets its own supervisor task which keeps (at
/// most) one submission subscription open for it and resubscribes after
/// every event or failure.
pub struct SubmissionIngestion {
    shared: Arc<Shared>,
    tasks: TaskTracker,
}

struct Shared {
    storage: SharedStorage,
    retry: RetryPolicy,
    table: SubscriptionTable,
    shutdown: CancellationToken,
}

impl SubmissionIngestion {
    /// Must be called inside a tokio runtime, the subscription table runs as its own task
    pub fn new(storage: SharedStorage, retry: RetryPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                storage,
                retry,
                table: SubscriptionTable::spawn(),
                shutdown: CancellationToken::new(),
            }),
            tasks: TaskTracker::new(),
        }
    }

    /// Spawns the dispatcher, one supervisor per aggregator read from `announcements`
    pub fn start(&self, announcements: mpsc::Receiver<Aggregator>) {
        self.tasks.spawn(dispatch(
            self.shared.clone(),
            self.tasks.clone(),
            announcements,
        ));
    }

    /// Number of feeds with a registered, live subscription right now
    pub async fn active_subscriptions(&self) -> usize {
        self.shared.table.live().await
    }

    /// Signals shutdown, releases every registered subscription, waits for all supervisors
    #[instrument(skip(self), fields(subsys = "SubmissionIngestion"))]
    pub async fn stop(self) {
        self.shared.shutdown.cancel();
        let released = self.shared.table.unsubscribe_all().await;
        tracing::info!(released, "submission ingestion stopping");

        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("submission ingestion stopped");
    }
}

#[instrument(skip_all, fields(subsys = "SubmissionIngestion"))]
async fn dispatch(
    shared: Arc<Shared>,
    tasks: TaskTracker,
    mut announcements: mpsc::Receiver<Aggregator>,
) {
    loop {
        let aggregator = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            next = announcements.recv() => match next {
                Some(aggregator) => aggregator,
                None => {
                    tracing::info!("announcement channel closed");
                    break;
                }
            },
        };

        tracing::info!(feed = %aggregator.address, name = %aggregator.name, "supervising feed");
        tasks.spawn(supervise(shared.clone(), aggregator));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorState {
    Starting,
    Subscribed,
    Draining,
    Stopped,
}

struct Supervisor {
    state: SupervisorState,
}

impl Supervisor {
    fn enter(&mut self, next: SupervisorState) {
        tracing::debug!(from = ?self.state, to = ?next, "supervisor state");
        self.state = next;
    }
}

enum Outcome {
    Log(Log),
    Closed(Option<ChainError>),
    Shutdown,
}

#[instrument(skip_all, fields(subsys = "SubmissionIngestion", feed = %aggregator.address))]
async fn supervise(shared: Arc<Shared>, aggregator: Aggregator) {
    let mut supervisor = Supervisor {
        state: SupervisorState::Starting,
    };
    let mut backoff = shared.retry.backoff();

    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }

        let mut subscription = match aggregator.subscribe_submissions().await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::error!("could not subscribe to submissions: {err}");
                if !shared.pause(backoff.next_delay()).await {
                    break;
                }
                continue;
            }
        };

        match shared
            .table
            .register(aggregator.address, subscription.unsubscriber())
            .await
        {
            Ok(()) => {}
            Err(RegisterError::ShuttingDown) => {
                subscription.unsubscribe();
                break;
            }
            Err(err @ RegisterError::AlreadySubscribed(_)) => {
                tracing::warn!("{err}");
                subscription.unsubscribe();
                if !shared.pause(backoff.next_delay()).await {
                    break;
                }
                continue;
            }
        }
        supervisor.enter(SupervisorState::Subscribed);

        let outcome = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => Outcome::Shutdown,
            event = subscription.next() => match event {
                SubscriptionEvent::Item(log) => Outcome::Log(log),
                SubscriptionEvent::Closed(err) => Outcome::Closed(err),
            },
        };
        supervisor.enter(SupervisorState::Draining);

        let delay = match outcome {
            Outcome::Log(log) => {
                shared.persist(&aggregator, &log).await;
                backoff.reset();
                backoff.next_delay()
            }
            Outcome::Closed(Some(err)) => {
                tracing::error!("submission subscription failed: {err}");
                backoff.next_delay()
            }
            Outcome::Closed(None) => {
                tracing::warn!("submission subscription closed");
                backoff.next_delay()
            }
            Outcome::Shutdown => Duration::ZERO,
        };

        subscription.unsubscribe();
        shared.table.remove(aggregator.address);

        if !shared.pause(delay).await {
            break;
        }
        supervisor.enter(SupervisorState::Starting);
    }

    supervisor.enter(SupervisorState::Stopped);
}

impl Shared {
    async fn persist(&self, aggregator: &Aggregator, log: &Log) {
        let event = match aggregator.decode_submission(log) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!("skipping undecodable submission log: {err}");
                return;
            }
        };

        tracing::info!(
            answer = %event.answer,
            round = %event.round_id,
            oracle = %event.oracle,
            "submission received"
        );

        let record = EthereumLog::new(log, SUBMISSION_RECEIVED);
        if let Err(err) = self.storage.insert_log(&record).await {
            tracing::error!("could not persist submission log: {err}");
        }
    }

    /// `false` if shutdown interrupted the pause
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod test {
    use alloy_primitives::{Address, B256};

    use super::*;
    use crate::{
        storage::MemoryStorage,
        test_utils::{submission_log, MockChainClient},
    };

    const RETRY: RetryPolicy = RetryPolicy {
        initial: Duration::from_millis(500),
        max: Duration::from_secs(10),
    };

    struct Harness {
        chain: MockChainClient,
        storage: MemoryStorage,
        ingestion: SubmissionIngestion,
        announcements: mpsc::Sender<Aggregator>,
    }

    fn harness() -> Harness {
        harness_with(RETRY)
    }

    fn harness_with(retry: RetryPolicy) -> Harness {
        utils::init_tracing_tests();

        let chain = MockChainClient::new();
        let storage = MemoryStorage::new();
        let ingestion = SubmissionIngestion::new(Arc::new(storage.clone()), retry);
        let (announcements, receiver) = mpsc::channel(8);
        ingestion.start(receiver);

        Harness {
            chain,
            storage,
            ingestion,
            announcements,
        }
    }

    impl Harness {
        async fn announce(&self, address: Address) {
            let aggregator =
                Aggregator::new("ETH / USD", address, Arc::new(self.chain.clone()));
            self.announcements.send(aggregator).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_subscription_per_announced_feed() {
        let h = harness();
        let feed = Address::repeat_byte(1);

        h.announce(feed).await;
        h.chain.wait_for_live_log_subscription(feed).await;

        assert_eq!(h.chain.log_subscriptions(feed).await, 1);
        assert_eq!(h.ingestion.active_subscriptions().await, 1);

        h.ingestion.stop().await;
        assert_eq!(h.chain.live_log_subscriptions(feed).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn log_is_persisted_then_resubscribed() {
        let h = harness();
        let feed = Address::repeat_byte(1);
        let oracle = Address::repeat_byte(2);

        h.announce(feed).await;
        h.chain.wait_for_live_log_subscription(feed).await;
        assert!(h.chain.push_log(feed, submission_log(feed, -42, 3, oracle)).await);

        h.chain.wait_for_log_subscriptions(feed, 2).await;

        let logs = h.storage.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].address, feed);
        assert_eq!(logs[0].kind, "SubmissionReceived");
        assert_eq!(logs[0].topics.len(), 4 * 32);
        assert_eq!(h.chain.max_live_log_subscriptions(feed).await, 1);

        h.ingestion.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_resubscribes_after_delay() {
        let h = harness();
        let feed = Address::repeat_byte(1);

        h.announce(feed).await;
        h.chain.wait_for_live_log_subscription(feed).await;

        let failed_at = tokio::time::Instant::now();
        assert!(h.chain.fail_log_subscription(feed).await);

        // released while the supervisor waits out the delay
        while h.ingestion.active_subscriptions().await > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(failed_at.elapsed() < RETRY.initial);
        assert_eq!(h.chain.log_subscriptions(feed).await, 1);
        assert_eq!(h.chain.live_log_subscriptions(feed).await, 0);

        h.chain.wait_for_log_subscriptions(feed, 2).await;

        assert!(failed_at.elapsed() >= RETRY.initial);
        assert!(h.storage.logs().is_empty());
        assert_eq!(h.chain.max_live_log_subscriptions(feed).await, 1);

        h.ingestion.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_keep_at_most_one_subscription() {
        let h = harness_with(RetryPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
        ));
        let feed = Address::repeat_byte(1);

        h.announce(feed).await;
        for attempt in 1..=5 {
            h.chain.wait_for_log_subscriptions(feed, attempt).await;
            h.chain.wait_for_live_log_subscription(feed).await;
            assert!(h.chain.fail_log_subscription(feed).await);
        }
        h.chain.wait_for_log_subscriptions(feed, 6).await;

        assert_eq!(h.chain.max_live_log_subscriptions(feed).await, 1);

        h.ingestion.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_log_is_skipped() {
        let h = harness();
        let feed = Address::repeat_byte(1);

        h.announce(feed).await;
        h.chain.wait_for_live_log_subscription(feed).await;

        let mut log = submission_log(feed, 1, 1, Address::ZERO);
        log.inner.data = alloy_primitives::LogData::new_unchecked(
            vec![log.topics()[0], B256::ZERO],
            Default::default(),
        );
        assert!(h.chain.push_log(feed, log).await);
        h.chain.wait_for_log_subscriptions(feed, 2).await;

        assert!(h.storage.logs().is_empty());

        h.ingestion.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn storage_failure_does_not_stop_the_supervisor() {
        let h = harness();
        let feed = Address::repeat_byte(1);
        h.storage.set_unavailable(true);

        h.announce(feed).await;
        h.chain.wait_for_live_log_subscription(feed).await;
        assert!(h.chain.push_log(feed, submission_log(feed, 1, 1, Address::ZERO)).await);
        h.chain.wait_for_log_subscriptions(feed, 2).await;
        assert!(h.storage.logs().is_empty());

        h.storage.set_unavailable(false);
        h.chain.wait_for_live_log_subscription(feed).await;
        assert!(h.chain.push_log(feed, submission_log(feed, 2, 2, Address::ZERO)).await);
        h.chain.wait_for_log_subscriptions(feed, 3).await;
        assert_eq!(h.storage.logs().len(), 1);

        h.ingestion.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_failure_is_retried() {
        let h = harness();
        let feed = Address::repeat_byte(1);
        h.chain.fail_next_subscribes(2).await;

        h.announce(feed).await;
        h.chain.wait_for_live_log_subscription(feed).await;

        assert_eq!(h.chain.log_subscriptions(feed).await, 1);

        h.ingestion.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_every_feed() {
        let h = harness();
        let feeds: Vec<_> = (1..=4).map(Address::repeat_byte).collect();

        for feed in &feeds {
            h.announce(*feed).await;
        }
        for feed in &feeds {
            h.chain.wait_for_live_log_subscription(*feed).await;
        }
        assert_eq!(h.ingestion.active_subscriptions().await, 4);

        let chain = h.chain.clone();
        h.ingestion.stop().await;

        for feed in &feeds {
            assert_eq!(chain.live_log_subscriptions(*feed).await, 0);
        }
    }
}
