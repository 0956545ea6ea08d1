use std::{sync::Arc, time::Duration};

use alloy_primitives::Address;
use axum::{routing::get, Json, Router};
use ingester::{
    config::Config,
    registry::{Feed, FeedRegistryClient},
    service::Ingester,
    storage::MemoryStorage,
    test_utils::{header, submission_log, MockChainClient},
};
use tokio::net::TcpListener;

fn feed(address: Address, network_id: u64, contract_version: u32) -> Feed {
    Feed {
        contract_address: address,
        name: "ETH / USD".to_string(),
        pair: vec!["ETH".to_string(), "USD".to_string()],
        counter: 0,
        contract_version,
        network_id,
        history: true,
        bollinger: false,
        decimal_places: 2,
        multiply: "100000000".to_string(),
    }
}

async fn registry(feeds: Vec<Feed>) -> FeedRegistryClient {
    let router = Router::new().route(
        "/feeds.json",
        get(move || {
            let feeds = feeds.clone();
            async move { Json(feeds) }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    FeedRegistryClient::new(format!("http://{addr}"))
}

fn config() -> Config {
    Config {
        network_id: 1,
        discovery_interval_secs: 3600,
        retry_initial_ms: 10,
        retry_max_ms: 100,
        ..Default::default()
    }
}

async fn eventually(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn discovered_feed_is_ingested() {
    utils::init_tracing_tests();

    let address = Address::repeat_byte(0xaa);
    let ignored = Address::repeat_byte(0xbb);
    let chain = MockChainClient::new();
    chain.set_latest_round(address, 5).await;
    chain.set_latest_round(ignored, 5).await;
    let storage = MemoryStorage::new();
    let feeds = registry(vec![feed(address, 1, 2), feed(ignored, 1, 1)]).await;

    let ingester = Ingester::start(
        &config(),
        Arc::new(chain.clone()),
        Arc::new(storage.clone()),
        Arc::new(feeds),
    )
    .await;

    // first discovery round ran inside start()
    assert!(ingester.discovery().is_known(&address));
    assert!(!ingester.discovery().is_known(&ignored));

    chain.wait_for_live_log_subscription(address).await;
    assert_eq!(chain.log_subscriptions(address).await, 1);
    assert_eq!(chain.log_subscriptions(ignored).await, 0);
    assert_eq!(ingester.active_subscriptions().await, 1);

    let oracle = Address::repeat_byte(0x0c);
    assert!(chain.push_log(address, submission_log(address, 123_456, 7, oracle)).await);
    eventually(|| storage.logs().len() == 1).await;

    chain.wait_for_head_subscriptions(1).await;
    assert!(chain.push_head(header(100)).await);
    eventually(|| storage.heads().len() == 1).await;
    assert_eq!(storage.heads()[0].number, "100");

    ingester.stop().await;

    assert_eq!(chain.live_log_subscriptions(address).await, 0);
    assert_eq!(chain.live_head_subscriptions().await, 0);
    assert_eq!(chain.max_live_log_subscriptions(address).await, 1);
}

#[tokio::test]
async fn unreachable_contract_is_not_ingested() {
    utils::init_tracing_tests();

    let address = Address::repeat_byte(0xaa);
    let chain = MockChainClient::new();
    chain.fail_calls(address).await;
    let feeds = registry(vec![feed(address, 1, 2)]).await;

    let ingester = Ingester::start(
        &config(),
        Arc::new(chain.clone()),
        Arc::new(MemoryStorage::new()),
        Arc::new(feeds),
    )
    .await;

    assert!(!ingester.discovery().is_known(&address));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(chain.log_subscriptions(address).await, 0);

    ingester.stop().await;
}
