use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("subscribe to {kind}: {source}")]
    Subscribe {
        kind: &'static str,
        source: anyhow::Error,
    },
    #[error("subscription closed by the transport")]
    SubscriptionClosed,
    #[error("rpc {method}: {source}")]
    Rpc {
        method: &'static str,
        source: anyhow::Error,
    },
}

impl ChainError {
    pub fn subscribe(kind: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Subscribe {
            kind,
            source: source.into(),
        }
    }

    pub fn rpc(method: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Rpc {
            method,
            source: source.into(),
        }
    }
}
