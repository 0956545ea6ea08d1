//! "Run now, then every interval, until stopped"

use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// A unit of periodic work
///
/// Failures are the task's own business, the runner keeps ticking regardless.
#[async_trait]
pub trait Tick: Send + Sync + 'static {
    async fn tick(&self);

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Shortest period a ticker runs at
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A running periodic task
///
/// Only exists in the running state: [`Ticker::start`] returns it after the
/// first tick, [`Ticker::stop`] consumes it. Dropping it without `stop` asks
/// the worker to finish after the tick in progress but does not wait.
#[derive(Debug)]
pub struct Ticker {
    name: &'static str,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Ticker {
    #[instrument(skip(task), fields(subsys = "Ticker", task = task.name()))]
    pub async fn start<T: Tick>(task: T, period: Duration) -> Self {
        let name = task.name();
        let period = period.max(MIN_PERIOD);

        tracing::debug!("tick start");
        task.tick().await;
        tracing::debug!("tick end");

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run(task, period, cancel.clone()));

        Self {
            name,
            cancel,
            worker: Some(worker),
        }
    }

    /// Returns once the worker has exited, a tick in flight is finished first
    #[instrument(skip(self), fields(subsys = "Ticker", task = self.name))]
    pub async fn stop(mut self) {
        self.cancel.cancel();

        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                tracing::error!("ticker worker panicked: {err:?}");
            }
        }

        tracing::info!("ticker stopped");
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<T: Tick>(task: T, period: Duration, cancel: CancellationToken) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        // not raced against cancellation, stop() waits for this to finish
        tracing::debug!(task = task.name(), "tick start");
        task.tick().await;
        tracing::debug!(task = task.name(), "tick end");
    }
}
