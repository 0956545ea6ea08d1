pub mod aggregator;
pub mod args;
pub mod chain;
pub mod config;
pub mod discovery;
pub mod ingest;
pub mod registry;
pub mod service;
pub mod storage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod ticker;

use std::sync::Arc;

use anyhow::{Context, Result};
use chain::{EvmChainClient, SharedChainClient};
use config::Config;
use registry::FeedRegistryClient;
use service::Ingester;
use storage::{MemoryStorage, PostgresStorage, SharedStorage};
use utils::{context::AppContext, evm_client::EvmQueryClient};

/// Entry point to start up the whole ingester
/// Connects to the chain and the database, then runs until the context is killed
pub fn run_ingester(ctx: AppContext, config: Config) -> Result<()> {
    let _ = ctrlc::set_handler({
        let ctx = ctx.clone();
        move || {
            ctx.kill();
        }
    });

    ctx.rt.clone().block_on(run(ctx, config))
}

async fn run(ctx: AppContext, config: Config) -> Result<()> {
    config.validate().context("invalid configuration")?;
    let endpoint = config.rpc_endpoint()?;
    let client = EvmQueryClient::new(endpoint.clone())
        .await
        .with_context(|| format!("connecting to {endpoint}"))?;
    let chain: SharedChainClient = Arc::new(EvmChainClient::new(client, config.subscription_buffer));

    let storage: SharedStorage = if config.dry_run {
        tracing::warn!("dry run, rows are kept in memory only");
        Arc::new(MemoryStorage::new())
    } else {
        let storage =
            PostgresStorage::connect(&config.database_url, config.database_max_connections)
                .await
                .context("connecting to the database")?;
        storage.migrate().await.context("running migrations")?;
        Arc::new(storage)
    };

    let feeds = Arc::new(FeedRegistryClient::new(&config.feeds_registry_url));

    let ingester = Ingester::start(&config, chain, storage, feeds).await;

    ctx.wait_for_kill().await;
    tracing::info!("shutdown requested");

    ingester.stop().await;

    Ok(())
}
