use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::ChainError;

/// Ownership handle over one live chain subscription
///
/// Items arrive in order on the item channel, a transport failure is reported
/// on the error channel. The underlying transport subscription is released
/// exactly once: either by `unsubscribe()` or, if the handle is simply dropped,
/// by `Drop`.
#[derive(Debug)]
pub struct Subscription<T> {
    items: mpsc::Receiver<T>,
    errors: mpsc::Receiver<ChainError>,
    unsubscriber: Unsubscriber,
}

/// The transport side of a [`Subscription`]
///
/// Held by whatever forwards transport messages (the alloy forwarder, or a mock).
#[derive(Debug)]
pub struct SubscriptionSink<T> {
    items: mpsc::Sender<T>,
    errors: mpsc::Sender<ChainError>,
    unsubscriber: Unsubscriber,
}

/// A cloneable way to release a subscription from somewhere other than its owner
#[derive(Debug, Clone, Default)]
pub struct Unsubscriber(CancellationToken);

#[derive(Debug)]
pub enum SubscriptionEvent<T> {
    Item(T),
    /// The error channel fired. `None` means the transport closed it without an error
    Closed(Option<ChainError>),
}

impl<T> Subscription<T> {
    pub fn channel(buffer: usize) -> (Self, SubscriptionSink<T>) {
        let (items_tx, items_rx) = mpsc::channel(buffer.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let unsubscriber = Unsubscriber::default();

        (
            Self {
                items: items_rx,
                errors: errors_rx,
                unsubscriber: unsubscriber.clone(),
            },
            SubscriptionSink {
                items: items_tx,
                errors: errors_tx,
                unsubscriber,
            },
        )
    }

    /// Waits for the next item, or for the subscription to break
    ///
    /// Items already delivered are handed out before a failure is reported.
    pub async fn next(&mut self) -> SubscriptionEvent<T> {
        tokio::select! {
            biased;
            Some(item) = self.items.recv() => SubscriptionEvent::Item(item),
            error = self.errors.recv() => SubscriptionEvent::Closed(error),
        }
    }

    pub fn unsubscriber(&self) -> Unsubscriber {
        self.unsubscriber.clone()
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscriber.is_unsubscribed()
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscriber.unsubscribe();
    }
}

impl<T> SubscriptionSink<T> {
    /// Forwards one item, returns `false` once nobody is listening anymore
    pub async fn send(&self, item: T) -> bool {
        if self.unsubscriber.is_unsubscribed() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.unsubscriber.unsubscribed() => false,
            sent = self.items.send(item) => sent.is_ok(),
        }
    }

    /// Reports a transport failure. Consumes the sink, nothing can follow a failure
    pub fn fail(self, error: ChainError) {
        let _ = self.errors.try_send(error);
    }

    pub async fn unsubscribed(&self) {
        self.unsubscriber.unsubscribed().await
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscriber.is_unsubscribed()
    }
}

impl Unsubscriber {
    /// Idempotent
    pub fn unsubscribe(&self) {
        self.0.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn unsubscribed(&self) {
        self.0.cancelled().await
    }
}
