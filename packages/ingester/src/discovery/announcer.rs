use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::aggregator::Aggregator;

/// Fan-out of newly discovered aggregators to any number of listeners
///
/// Delivery is at most once and never blocks the announcer: a listener whose
/// buffer is full misses that announcement, and a listener that subscribes
/// late never sees earlier ones.
#[derive(Clone, Default)]
pub struct Announcer {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<Aggregator>>>>,
}

impl Announcer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, buffer: usize) -> mpsc::Receiver<Aggregator> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.lock().push(tx);
        rx
    }

    /// Returns how many listeners took the announcement
    pub fn announce(&self, aggregator: &Aggregator) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;

        subscribers.retain(|tx| match tx.try_send(aggregator.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    feed = %aggregator.address,
                    "announcement listener is full, dropping announcement for it"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        if delivered == 0 {
            tracing::warn!(
                feed = %aggregator.address,
                name = %aggregator.name,
                "nobody received the feed announcement, dropped"
            );
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<Aggregator>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
