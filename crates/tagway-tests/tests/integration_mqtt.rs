// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # MQTT Integration Tests
//!
//! The MQTT driver on an in-memory broker, driven through the bus and the
//! bridge.

use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use tagway_bridge::Target;
use tagway_core::message::{OkReply, OneOrMany, PublishRequest, SubscribeRequest, TopicValue, WriteReply, WriteRequest};
use tagway_core::transform::TransformConfig;
use tagway_core::{Format, ServiceKind, SystemType, Topic};
use tagway_mqtt::{MemoryBroker, QoS};
use tagway_tests::prelude::*;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

fn broker_topic(node: &str) -> Topic {
    Topic::new(SystemType::Mqtt, "broker", Format::Json, node)
}

fn address(kind: ServiceKind) -> String {
    kind.address(SystemType::Mqtt, "broker")
}

#[tokio::test]
async fn test_broker_messages_reach_topic_consumers() {
    let gateway = TestGateway::new();
    let broker = MemoryBroker::new();
    gateway.start_mqtt(&ConfigFixtures::mqtt("broker"), &broker).await;

    let topic = broker_topic("plant/+/temperature");
    let mut consumer = gateway.bus.consumer(topic.topic_name());
    let reply: OkReply = gateway
        .bus
        .request_json(&address(ServiceKind::Subscribe), &SubscribeRequest::single("c1", topic))
        .await
        .unwrap();
    assert!(reply.ok);
    assert!(broker.subscriptions().contains("plant/+/temperature"));

    assert_eq!(broker.publish("plant/hall-2/temperature", "21.5"), 1);
    let push = tokio::time::timeout(RECV_TIMEOUT, consumer.recv())
        .await
        .unwrap()
        .unwrap();
    let push: TopicValue = serde_json::from_slice(&push).unwrap();
    assert_eq!(push.topic.browse_path.as_deref(), Some("plant/hall-2/temperature"));
    assert_eq!(push.value["value"], json!("21.5"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_writes_and_publishes_use_writer_transform() {
    let gateway = TestGateway::new();
    let broker = MemoryBroker::new();
    let mut config = ConfigFixtures::mqtt("broker");
    config.write_qos = 1;
    config.value.writer = TransformConfig::Template {
        template: r#"{"v": ${value_json}}"#.to_string(),
    };
    gateway.start_mqtt(&config, &broker).await;

    let reply: WriteReply = gateway
        .bus
        .request_json(
            &address(ServiceKind::Write),
            &WriteRequest {
                node_id: OneOrMany::Many(vec!["plant/setpoint".into(), "plant/#".into()]),
                value: OneOrMany::Many(vec!["42".into(), "1".into()]),
            },
        )
        .await
        .unwrap();
    assert_eq!(reply.ok, OneOrMany::Many(vec![true, false]));

    let reply: OkReply = gateway
        .bus
        .request_json(
            &address(ServiceKind::Publish),
            &PublishRequest {
                topic: broker_topic("plant/mode"),
                value: "auto".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(reply.ok);

    let published = broker.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].topic, "plant/setpoint");
    assert_eq!(published[0].payload, br#"{"v": "42"}"#.to_vec());
    assert_eq!(published[1].topic, "plant/mode");
    assert!(published.iter().all(|m| m.qos == QoS::AtLeastOnce && !m.retain));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_broker_loss_resubscribes() {
    let gateway = TestGateway::new();
    let broker = MemoryBroker::new();
    gateway.start_mqtt(&ConfigFixtures::mqtt("broker"), &broker).await;

    let topic = broker_topic("plant/level");
    let mut consumer = gateway.bus.consumer(topic.topic_name());
    let _: OkReply = gateway
        .bus
        .request_json(&address(ServiceKind::Subscribe), &SubscribeRequest::single("c1", topic))
        .await
        .unwrap();

    broker.drop_connections("broker restart");
    let restored = eventually(Duration::from_secs(2), || {
        std::future::ready(broker.session_count() == 1 && broker.subscriptions().contains("plant/level"))
    })
    .await;
    assert!(restored);

    broker.publish("plant/level", "3.5");
    let push = tokio::time::timeout(RECV_TIMEOUT, consumer.recv())
        .await
        .unwrap()
        .unwrap();
    let push: TopicValue = serde_json::from_slice(&push).unwrap();
    assert_eq!(push.value["value"], json!("3.5"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_bridge_over_broker() {
    let gateway = TestGateway::new();
    let broker = MemoryBroker::new();
    gateway.start_mqtt(&ConfigFixtures::mqtt("broker"), &broker).await;
    let bridge = gateway.bridge("plant");
    let target = Target::new(SystemType::Mqtt, "broker");

    let mut stream = bridge.subscribe_node_value(&target, "plant/+/speed").await;
    assert_eq!(stream.topics().len(), 1);

    broker.publish("plant/line-1/speed", "1450");
    let value = tokio::time::timeout(RECV_TIMEOUT, stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value.node_id, "plant/line-1/speed");
    assert_eq!(value.value.as_deref(), Some("1450"));
    assert_eq!(value.system_type, Some(SystemType::Mqtt));

    assert!(bridge.set_node_value(&target, "plant/line-1/speed/set", "1500").await);
    assert!(broker
        .published()
        .iter()
        .any(|m| m.topic == "plant/line-1/speed/set" && m.payload == b"1500".to_vec()));

    // A broker has no readable values.
    assert!(bridge.node_value(&target, "plant/line-1/speed").await.is_none());
    assert!(bridge.browse_node(&target, None, None).await.is_none());

    stream.cancel().await;
    assert!(broker.subscriptions().is_empty());

    gateway.shutdown().await;
}
