use alloy_provider::{DynProvider, ProviderBuilder, WsConnect};
use std::str::FromStr;

use crate::error::EvmClientError;

/// A provider that can serve both requests and `eth_subscribe` streams
#[derive(Clone)]
pub struct EvmQueryClient {
    pub endpoint: EvmEndpoint,
    pub provider: DynProvider,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvmEndpoint {
    WebSocket(reqwest::Url),
    Http(reqwest::Url),
}

impl FromStr for EvmEndpoint {
    type Err = EvmClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url =
            reqwest::Url::parse(s).map_err(|e| EvmClientError::ParseEndpoint(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(EvmEndpoint::WebSocket(url)),
            "http" | "https" => Ok(EvmEndpoint::Http(url)),
            scheme => Err(EvmClientError::ParseEndpoint(format!(
                "could not determine endpoint from scheme {scheme} (full url: {s})"
            ))),
        }
    }
}

impl std::fmt::Display for EvmEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvmEndpoint::WebSocket(url) => write!(f, "{}", url),
            EvmEndpoint::Http(url) => write!(f, "{}", url),
        }
    }
}

impl EvmEndpoint {
    pub fn new_ws(url: &str) -> Result<Self, EvmClientError> {
        url.parse::<Self>().and_then(|endpoint| match endpoint {
            EvmEndpoint::WebSocket(_) => Ok(endpoint),
            EvmEndpoint::Http(_) => Err(EvmClientError::SubscriptionsNeedWebSocket(
                url.to_string(),
            )),
        })
    }

    pub async fn to_provider(&self) -> Result<DynProvider, EvmClientError> {
        match self {
            EvmEndpoint::WebSocket(url) => {
                let ws = WsConnect::new(url.clone());
                Ok(DynProvider::new(
                    ProviderBuilder::new()
                        .connect_ws(ws)
                        .await
                        .map_err(|e| EvmClientError::WebSocketProvider(e.into()))?,
                ))
            }
            // subscriptions are the whole point of this client
            EvmEndpoint::Http(url) => Err(EvmClientError::SubscriptionsNeedWebSocket(
                url.to_string(),
            )),
        }
    }
}

impl EvmQueryClient {
    pub async fn new(endpoint: EvmEndpoint) -> Result<Self, EvmClientError> {
        Ok(EvmQueryClient {
            provider: endpoint.to_provider().await?,
            endpoint,
        })
    }
}

impl std::fmt::Debug for EvmQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmQueryClient")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
