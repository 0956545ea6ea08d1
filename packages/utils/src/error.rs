use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvmClientError {
    #[error("Unable to parse endpoint: {0}")]
    ParseEndpoint(String),

    #[error("Subscriptions need a websocket endpoint, got {0}")]
    SubscriptionsNeedWebSocket(String),

    #[error("Unable to create web socket provider: {0:#?}")]
    WebSocketProvider(anyhow::Error),
}
