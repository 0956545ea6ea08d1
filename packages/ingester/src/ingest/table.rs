use std::collections::HashMap;

use alloy_primitives::Address;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::chain::Unsubscriber;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("shutting down")]
    ShuttingDown,
    #[error("{0} already has a live submission subscription")]
    AlreadySubscribed(Address),
}

enum Command {
    Register {
        address: Address,
        unsubscriber: Unsubscriber,
        reply: oneshot::Sender<Result<(), RegisterError>>,
    },
    Remove {
        address: Address,
    },
    Live {
        reply: oneshot::Sender<usize>,
    },
    UnsubscribeAll {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the task owning the live submission subscriptions, keyed by feed address
///
/// Commands are applied one at a time in arrival order. After
/// `unsubscribe_all` every registration is refused, so nothing can slip in
/// behind the final sweep.
#[derive(Clone)]
pub struct SubscriptionTable {
    commands: mpsc::UnboundedSender<Command>,
}

impl SubscriptionTable {
    /// Spawns the owning task, which ends once every handle is dropped
    pub fn spawn() -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(receiver));
        Self { commands }
    }

    pub async fn register(
        &self,
        address: Address,
        unsubscriber: Unsubscriber,
    ) -> Result<(), RegisterError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Register {
            address,
            unsubscriber,
            reply,
        });
        response.await.unwrap_or(Err(RegisterError::ShuttingDown))
    }

    pub fn remove(&self, address: Address) {
        self.send(Command::Remove { address });
    }

    pub async fn live(&self) -> usize {
        let (reply, response) = oneshot::channel();
        self.send(Command::Live { reply });
        response.await.unwrap_or_default()
    }

    /// Releases every entry and refuses registrations from now on
    pub async fn unsubscribe_all(&self) -> usize {
        let (reply, response) = oneshot::channel();
        self.send(Command::UnsubscribeAll { reply });
        response.await.unwrap_or_default()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("subscription table is gone");
        }
    }
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut entries: HashMap<Address, Unsubscriber> = HashMap::new();
    let mut stopped = false;

    while let Some(command) = commands.recv().await {
        match command {
            Command::Register {
                address,
                unsubscriber,
                reply,
            } => {
                let result = if stopped {
                    Err(RegisterError::ShuttingDown)
                } else if entries
                    .get(&address)
                    .is_some_and(|existing| !existing.is_unsubscribed())
                {
                    Err(RegisterError::AlreadySubscribed(address))
                } else {
                    entries.insert(address, unsubscriber);
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::Remove { address } => {
                entries.remove(&address);
            }
            Command::Live { reply } => {
                let live = entries
                    .values()
                    .filter(|unsubscriber| !unsubscriber.is_unsubscribed())
                    .count();
                let _ = reply.send(live);
            }
            Command::UnsubscribeAll { reply } => {
                stopped = true;
                let released = entries.len();
                for (_, unsubscriber) in entries.drain() {
                    unsubscriber.unsubscribe();
                }
                let _ = reply.send(released);
            }
        }
    }
}
