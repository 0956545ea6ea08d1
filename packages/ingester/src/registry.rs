//! Client for the published feed registry (`feeds.json` / `nodes.json`)

use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

/// One contract the registry asks us to monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub contract_address: Address,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pair: Vec<String>,
    #[serde(default)]
    pub counter: u64,
    #[serde(default)]
    pub contract_version: u32,
    #[serde(default)]
    pub network_id: u64,
    #[serde(default)]
    pub history: bool,
    #[serde(default)]
    pub bollinger: bool,
    #[serde(default)]
    pub decimal_places: u32,
    #[serde(default)]
    pub multiply: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub address: Address,
    pub name: String,
    pub network_id: u64,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request to {url}: {source}")]
    Http {
        url: String,
        source: reqwest::Error,
    },
    #[error("registry response from {url} is not valid json: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },
}

/// Where discovery gets its feed list from
#[async_trait]
pub trait FeedSource: Send + Sync + 'static {
    async fn feeds(&self) -> Result<Vec<Feed>, RegistryError>;
}

pub type SharedFeedSource = Arc<dyn FeedSource>;

#[derive(Clone, Debug)]
pub struct FeedRegistryClient {
    inner: reqwest::Client,
    base_url: String,
}

impl FeedRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::new_with_client(reqwest::Client::new(), base_url)
    }

    pub fn new_with_client(inner: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { inner, base_url }
    }

    #[instrument(skip(self), fields(subsys = "Registry"))]
    pub async fn nodes(&self) -> Result<Vec<Node>, RegistryError> {
        self.get_json("nodes.json").await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, RegistryError> {
        let url = format!("{}/{path}", self.base_url);
        let http = |source| RegistryError::Http {
            url: url.clone(),
            source,
        };

        let body = self
            .inner
            .get(&url)
            .send()
            .await
            .map_err(http)?
            .error_for_status()
            .map_err(http)?
            .bytes()
            .await
            .map_err(http)?;

        serde_json::from_slice(&body).map_err(|source| RegistryError::Decode {
            url: url.clone(),
            source,
        })
    }
}

#[async_trait]
impl FeedSource for FeedRegistryClient {
    #[instrument(skip(self), fields(subsys = "Registry"))]
    async fn feeds(&self) -> Result<Vec<Feed>, RegistryError> {
        let entries: Vec<serde_json::Value> = self.get_json("feeds.json").await?;

        // one malformed entry must not hide the rest of the list
        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<Feed>(entry) {
                Ok(feed) => Some(feed),
                Err(err) => {
                    tracing::warn!("skipping malformed registry entry: {err}");
                    None
                }
            })
            .collect())
    }
}
