// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Blue-green deployment flows with two nodes sharing one transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{InventoryClient, TestNode, eventually, test_config};
use courier_core::{InMemoryTransport, LifecycleStatus};

async fn blue_and_staged_green() -> (TestNode, TestNode) {
    let transport = Arc::new(InMemoryTransport::new());
    let blue = TestNode::build(test_config("blue"), transport.clone());
    blue.runtime.start().await.unwrap();

    let mut green_config = test_config("green");
    green_config.staged_rollout = true;
    let green = TestNode::build(green_config, transport);
    green.runtime.start().await.unwrap();
    (blue, green)
}

#[tokio::test]
async fn test_staged_node_answers_system_calls_while_paused() {
    let (blue, green) = blue_and_staged_green().await;
    assert_eq!(green.runtime.lifecycle().status(), LifecycleStatus::Paused);

    let system = blue.runtime.system_client("green-system");
    assert_eq!(system.ping().await.unwrap(), "green");

    let status = system.status().await.unwrap();
    assert_eq!(status.node_name, "green");
    assert_eq!(status.status, LifecycleStatus::Paused);
    assert!(status.healthy);
    assert!(!status.accepting_requests);
    assert!(!system.recently_processed_tagged_call().await.unwrap());

    // Application calls are only served by the running node.
    blue.client().reserve("sku-1".into(), 1).await.unwrap();
    assert_eq!(blue.warehouse.attempts("reserve"), 1);
    assert_eq!(green.warehouse.attempts("reserve"), 0);
}

#[tokio::test]
async fn test_promotion_and_retirement() {
    let (blue, green) = blue_and_staged_green().await;
    let system = blue.runtime.system_client("green-system");

    assert_eq!(system.promote().await.unwrap(), LifecycleStatus::Running);
    assert!(green.runtime.health_report().accepting_requests);

    let report = blue.runtime.shutdown().await.unwrap();
    assert!(report.all_completed());
    assert_eq!(blue.runtime.lifecycle().status(), LifecycleStatus::Terminated);
    assert!(!blue.runtime.health_report().healthy);

    green.client().reserve("sku-2".into(), 2).await.unwrap();
    assert_eq!(green.warehouse.attempts("reserve"), 1);
    assert_eq!(blue.warehouse.attempts("reserve"), 0);
}

#[tokio::test]
async fn test_second_promotion_fails_without_retry() {
    let (blue, green) = blue_and_staged_green().await;
    let system = blue.runtime.system_client("green-system");
    system.promote().await.unwrap();

    let err = system.promote().await.unwrap_err();

    let remote = err.as_remote().unwrap();
    assert_eq!(remote.error_type, "InvalidTransition");
    assert!(remote.message.contains("RUNNING"));
    let retries = green
        .transport
        .sent("green-system")
        .iter()
        .filter(|record| !record.delay.is_zero())
        .count();
    assert_eq!(retries, 0);
}

#[tokio::test]
async fn test_in_flight_call_finishes_during_shutdown() {
    let transport = Arc::new(InMemoryTransport::new());
    let blue = TestNode::build(test_config("blue"), transport.clone());
    blue.runtime.start().await.unwrap();

    let mut green_config = test_config("green");
    green_config.call_queue = "green-calls".to_string();
    let green = TestNode::build(green_config, transport.clone());
    green.runtime.start().await.unwrap();

    let client = InventoryClient::new(blue.runtime.client().targeting("green-calls"));
    let call = tokio::spawn(async move { client.slow(400).await });

    assert!(
        eventually(Duration::from_secs(2), || green.warehouse.attempts("slow") == 1).await
    );
    let report = green.runtime.shutdown().await.unwrap();

    assert!(report.all_completed(), "unfinished: {:?}", report.unfinished());
    assert_eq!(call.await.unwrap().unwrap(), "done");
    assert_eq!(green.runtime.lifecycle().status(), LifecycleStatus::Terminated);
}

#[tokio::test]
async fn test_paused_node_holds_calls_until_promoted() {
    let transport = Arc::new(InMemoryTransport::new());
    let green = TestNode::build(test_config("green"), transport.clone());
    green.runtime.start().await.unwrap();

    let mut blue_config = test_config("blue");
    blue_config.call_queue = "blue-calls".to_string();
    let blue = TestNode::build(blue_config, transport.clone());
    blue.runtime.start().await.unwrap();

    green
        .runtime
        .lifecycle()
        .return_to_paused_state()
        .await
        .unwrap();
    // Let any receive that was already waiting run out.
    tokio::time::sleep(Duration::from_millis(60)).await;

    let client = InventoryClient::new(blue.runtime.client().targeting("courier-calls"));
    let call = tokio::spawn(async move { client.reserve("sku-3".into(), 3).await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(green.warehouse.attempts("reserve"), 0);
    assert_eq!(transport.pending("courier-calls"), 1);

    green.runtime.lifecycle().enter_running_state().await.unwrap();
    assert_eq!(call.await.unwrap().unwrap(), "reserved 3 x sku-3");
    assert_eq!(green.warehouse.attempts("reserve"), 1);
}
