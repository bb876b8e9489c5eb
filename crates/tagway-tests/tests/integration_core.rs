// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Core Integration Tests
//!
//! A driver runtime serving a mock OPC address space over the message bus.
//!
//! ## Test Categories
//!
//! - `test_subscribe_*`: subscription lifecycle through the bus
//! - `test_resolution_*`: resolution cache against the matcher
//! - `test_request_*`: read, write and browse services
//! - `test_reconnect_*`: connection loss and recovery

use std::time::Duration;

use serde_json::json;

use tagway_core::matcher::matches;
use tagway_core::message::{
    BrowseReply, BrowseRequest, OkReply, OneOrMany, ReadReply, ReadRequest, SubscribeRequest,
    TopicValue, WriteReply, WriteRequest,
};
use tagway_core::{ResolutionCache, ServiceKind, SystemType};
use tagway_tests::prelude::*;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

fn address(kind: ServiceKind) -> String {
    kind.address(SystemType::Opc, "plant")
}

async fn subscribe(gateway: &TestGateway, request: &SubscribeRequest) -> OkReply {
    gateway
        .bus
        .request_json(&address(ServiceKind::Subscribe), request)
        .await
        .expect("subscribe reply")
}

async fn unsubscribe(gateway: &TestGateway, request: &SubscribeRequest) -> OkReply {
    gateway
        .bus
        .request_json(&address(ServiceKind::Unsubscribe), request)
        .await
        .expect("unsubscribe reply")
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test]
async fn test_subscribe_delivers_resolved_push() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;

    let topic = TopicFixtures::plant(PlantFixtures::SPEED);
    let mut consumer = gateway.bus.consumer(topic.topic_name());
    let reply = subscribe(&gateway, &SubscribeRequest::single("c1", topic.clone())).await;
    assert!(reply.ok);
    assert!(space.subscribed().contains(PlantFixtures::SPEED));

    assert!(space.emit(PlantFixtures::SPEED, "1500"));
    let push = tokio::time::timeout(RECV_TIMEOUT, consumer.recv())
        .await
        .expect("push in time")
        .expect("consumer open");
    let push: TopicValue = serde_json::from_slice(&push).unwrap();

    assert_eq!(push.topic.node, PlantFixtures::SPEED);
    assert_eq!(push.topic.browse_path.as_deref(), Some(PlantFixtures::SPEED));
    assert_eq!(push.value["value"], json!("1500"));
    assert_eq!(push.value["statusCode"], json!(0));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_raw_format_pushes_payload_bytes() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;

    let topic = TopicFixtures::plant_raw(PlantFixtures::LEVEL);
    let mut consumer = gateway.bus.consumer(topic.topic_name());
    assert!(subscribe(&gateway, &SubscribeRequest::single("c1", topic)).await.ok);

    space.emit(PlantFixtures::LEVEL, "73.1");
    let push = tokio::time::timeout(RECV_TIMEOUT, consumer.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(push, b"73.1".to_vec());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_wildcard_pattern_fans_out() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;

    let topic = TopicFixtures::plant("line/+/speed");
    let mut consumer = gateway.bus.consumer(topic.topic_name());
    assert!(subscribe(&gateway, &SubscribeRequest::single("c1", topic)).await.ok);

    space.emit("line/1/speed", "10");
    space.emit("line/2/speed", "20");
    space.emit("line/2/level", "99");

    let mut paths = Vec::new();
    for _ in 0..2 {
        let push = tokio::time::timeout(RECV_TIMEOUT, consumer.recv())
            .await
            .unwrap()
            .unwrap();
        let push: TopicValue = serde_json::from_slice(&push).unwrap();
        paths.push(push.topic.browse_path.unwrap());
    }
    assert_eq!(paths, vec!["line/1/speed", "line/2/speed"]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(consumer.try_recv().is_none());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_invalid_pattern_is_rejected() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;

    let request = SubscribeRequest::single("c1", TopicFixtures::plant("line/#/speed"));
    let result: Result<OkReply, _> = gateway
        .bus
        .request_json(&address(ServiceKind::Subscribe), &request)
        .await;
    assert!(result.is_err());
    assert!(space.subscribed().is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_shared_pattern_released_by_last_client() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;

    let topic = TopicFixtures::plant(PlantFixtures::SPEED);
    assert!(subscribe(&gateway, &SubscribeRequest::single("a", topic.clone())).await.ok);
    assert!(subscribe(&gateway, &SubscribeRequest::single("b", topic.clone())).await.ok);

    assert!(unsubscribe(&gateway, &SubscribeRequest::single("a", topic.clone())).await.ok);
    assert!(space.subscribed().contains(PlantFixtures::SPEED));

    assert!(unsubscribe(&gateway, &SubscribeRequest::single("b", topic.clone())).await.ok);
    assert!(space.subscribed().is_empty());

    // Unsubscribing again is still a success.
    assert!(unsubscribe(&gateway, &SubscribeRequest::single("b", topic)).await.ok);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_many_then_unsubscribe_stops_pushes() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;

    let topics = vec![
        TopicFixtures::plant(PlantFixtures::SPEED),
        TopicFixtures::plant(PlantFixtures::LEVEL),
    ];
    let mut consumer = gateway.bus.consumer(topics[1].topic_name());
    assert!(subscribe(&gateway, &SubscribeRequest::many("c1", topics.clone())).await.ok);
    assert_eq!(space.subscribed().len(), 2);

    assert!(unsubscribe(&gateway, &SubscribeRequest::many("c1", topics)).await.ok);
    space.emit(PlantFixtures::LEVEL, "1");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(consumer.try_recv().is_none());

    gateway.shutdown().await;
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn test_resolution_agrees_with_matcher() {
    let (patterns, addresses) = TopicFixtures::pattern_grid();
    let mut cache = ResolutionCache::new();
    for pattern in &patterns {
        assert!(cache.insert(TopicFixtures::plant(pattern)));
    }

    for address in &addresses {
        let expected: Vec<&str> = patterns
            .iter()
            .copied()
            .filter(|p| matches(p, address))
            .collect();
        let resolved: Vec<String> = cache.resolve(address).iter().map(|t| t.node.clone()).collect();
        assert_eq!(resolved, expected, "address {address}");
        assert!(cache
            .resolve(address)
            .iter()
            .all(|t| t.browse_path.as_deref() == Some(*address)));
    }

    let stats = cache.stats();
    assert_eq!(stats.misses, addresses.len() as u64);
    assert_eq!(stats.hits, addresses.len() as u64);
}

#[test]
fn test_resolution_removal_invalidates_cached_addresses() {
    let mut cache = ResolutionCache::new();
    let wildcard = TopicFixtures::plant("line/#");
    cache.insert(wildcard.clone());
    cache.insert(TopicFixtures::plant("hall/+"));

    assert_eq!(cache.resolve("line/1/speed").len(), 1);
    assert_eq!(cache.resolve("hall/1").len(), 1);
    assert_eq!(cache.cached_addresses(), 2);

    cache.remove(&wildcard.topic_name());
    assert_eq!(cache.cached_addresses(), 1);
    assert!(cache.resolve("line/1/speed").is_empty());
}

// =============================================================================
// Requests
// =============================================================================

#[tokio::test]
async fn test_request_batch_read_isolates_failures() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;
    space.fail_reads_of(PlantFixtures::LEVEL);

    let request = ReadRequest {
        node_id: OneOrMany::Many(vec![
            PlantFixtures::SPEED.to_string(),
            PlantFixtures::LEVEL.to_string(),
            "ns=2;s=Missing".to_string(),
        ]),
    };
    let reply: ReadReply = gateway
        .bus
        .request_json(&address(ServiceKind::Read), &request)
        .await
        .unwrap();

    let envelopes = reply.envelopes(3);
    assert_eq!(envelopes[0].as_ref().map(|e| e.value.clone()), Some(json!(1450)));
    assert!(envelopes[1].is_none());
    assert!(envelopes[2].is_none());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_request_write_reports_per_node() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;

    let request = WriteRequest {
        node_id: OneOrMany::Many(vec![PlantFixtures::SPEED.into(), PlantFixtures::LINE.into()]),
        value: OneOrMany::Many(vec!["1600".into(), "1".into()]),
    };
    let reply: WriteReply = gateway
        .bus
        .request_json(&address(ServiceKind::Write), &request)
        .await
        .unwrap();

    assert_eq!(reply.ok, OneOrMany::Many(vec![true, false]));
    assert_eq!(space.value(PlantFixtures::SPEED), Some(json!(1600)));
    assert_eq!(space.writes(), vec![(PlantFixtures::SPEED.to_string(), "1600".to_string())]);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_request_browse_lists_children() {
    let gateway = TestGateway::new();
    gateway.start_opc("plant", PlantFixtures::address_space()).await;

    let reply: BrowseReply = gateway
        .bus
        .request_json(
            &address(ServiceKind::Browse),
            &BrowseRequest {
                node_id: PlantFixtures::LINE.to_string(),
            },
        )
        .await
        .unwrap();

    let names: Vec<&str> = reply.result.iter().map(|e| e.display_name.as_str()).collect();
    assert_eq!(names, vec!["1-Motor Speed", "Pump", "Level", "Spare", "Reset"]);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_request_after_shutdown_has_no_handler() {
    let gateway = TestGateway::new();
    gateway.start_opc("plant", PlantFixtures::address_space()).await;
    assert!(gateway.registry.current(SystemType::Opc, "plant").is_some());

    gateway.shutdown().await;

    assert!(gateway.registry.current(SystemType::Opc, "plant").is_none());
    let result: Result<ReadReply, _> = gateway
        .bus
        .request_json(
            &address(ServiceKind::Read),
            &ReadRequest {
                node_id: OneOrMany::One(PlantFixtures::SPEED.to_string()),
            },
        )
        .await;
    assert!(result.is_err());
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn test_reconnect_restores_subscriptions() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;

    let topic = TopicFixtures::plant(PlantFixtures::SPEED);
    let mut consumer = gateway.bus.consumer(topic.topic_name());
    assert!(subscribe(&gateway, &SubscribeRequest::single("c1", topic)).await.ok);

    assert!(space.drop_connection("link down"));
    assert!(space.subscribed().is_empty());

    let restored = eventually(Duration::from_secs(2), || {
        std::future::ready(space.connects() >= 2 && space.subscribed().contains(PlantFixtures::SPEED))
    })
    .await;
    assert!(restored, "subscription was not restored after reconnect");

    assert!(space.emit(PlantFixtures::SPEED, "1510"));
    let push = tokio::time::timeout(RECV_TIMEOUT, consumer.recv())
        .await
        .unwrap()
        .unwrap();
    let push: TopicValue = serde_json::from_slice(&push).unwrap();
    assert_eq!(push.value["value"], json!("1510"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_retries_refused_connections() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;

    space.set_fail_connect(true);
    space.drop_connection("server restart");
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(space.connects(), 1);

    space.set_fail_connect(false);
    assert!(eventually(Duration::from_secs(2), || std::future::ready(space.connects() == 2)).await);

    gateway.shutdown().await;
}
