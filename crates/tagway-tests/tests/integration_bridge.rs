// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Bridge Integration Tests
//!
//! The query bridge in front of running drivers.
//!
//! ## Test Categories
//!
//! - `test_schema_*`: schema discovery and compilation
//! - `test_query_*`: reads, browsing and search
//! - `test_mutation_*`: writes
//! - `test_stream_*`: value subscriptions
//! - `test_history_*`: history queries against a logger
//! - `test_http_*`: the HTTP surface

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use tagway_bridge::{FieldType, HistoryArgs, HttpServer, NodeValue, Target};
use tagway_core::{ServiceKind, SystemType};
use tagway_tests::prelude::*;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

async fn next_value(stream: &mut tagway_bridge::NodeValueStream) -> NodeValue {
    tokio::time::timeout(RECV_TIMEOUT, stream.next())
        .await
        .expect("value in time")
        .expect("stream open")
}

// =============================================================================
// Schema
// =============================================================================

#[tokio::test]
async fn test_schema_compiles_available_systems_only() {
    let gateway = TestGateway::new();
    gateway.start_opc("plant", PlantFixtures::address_space()).await;

    let config = ConfigFixtures::bridge("plant", &["plant", "ghost"]);
    let bridge = gateway.bridge_with_schema(&config).await;
    let schema = bridge.schema();

    assert_eq!(schema.systems().len(), 1);
    assert!(schema.system("ghost").is_none());

    let plant = schema.system("plant").expect("plant compiled");
    assert_eq!(plant.root_type, "plant");

    let line = plant.type_def("plant_Line_1").expect("line type");
    let names: Vec<&str> = line.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["_1_Motor_Speed", "Pump", "Level"]);
    assert_eq!(
        line.field("Pump").map(|f| f.field_type.clone()),
        Some(FieldType::Object("plant_Line_1_Pump".to_string()))
    );

    assert!(schema.sdl().contains("Systems: Systems"));
    assert!(schema.sdl().contains("type plant_Line_1_Pump {"));
    assert!(!schema.sdl().contains("Spare"));
    assert!(!schema.sdl().contains("Reset"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_schema_binding_resolves_to_live_node() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;
    space.set_value(PlantFixtures::SPEED, json!(1460));
    let logger = MockHistoryLogger::spawn(&gateway.bus, "Log", "default", vec![(json!(1), json!(1449))]);

    let bridge = gateway
        .bridge_with_schema(&ConfigFixtures::bridge("plant", &["plant"]))
        .await;
    let binding = bridge
        .schema()
        .binding("plant_Line_1", "_1_Motor_Speed")
        .cloned()
        .expect("binding");
    assert_eq!(binding.node_id, PlantFixtures::SPEED);

    let node = bridge.resolve_binding(&binding);
    let value = bridge.value_of(&node).await.expect("value");
    assert_eq!(value.value.as_deref(), Some("1460"));

    let history = bridge
        .history_of(&node, &HistoryArgs::last_seconds(30))
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(logger.requests()[0].node_id, PlantFixtures::SPEED);

    let pump = bridge
        .schema()
        .binding("plant_Line_1", "Pump")
        .cloned()
        .expect("pump binding");
    let children = bridge
        .children_of(&bridge.resolve_binding(&pump), None)
        .await
        .expect("children");
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].node_id, PlantFixtures::PUMP_ON);

    assert!(bridge.set_value_of(&node, "1455").await);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_schema_collision_omits_system() {
    let gateway = TestGateway::new();
    gateway.start_opc("plant", PlantFixtures::address_space()).await;
    gateway.start_opc("press", PlantFixtures::colliding_space()).await;

    let bridge = gateway
        .bridge_with_schema(&ConfigFixtures::bridge("plant", &["plant", "press"]))
        .await;

    assert!(bridge.schema().system("plant").is_some());
    assert!(bridge.schema().system("press").is_none());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_schema_without_systems_is_generic() {
    let gateway = TestGateway::new();
    let bridge = gateway
        .bridge_with_schema(&ConfigFixtures::bridge("plant", &["ghost"]))
        .await;

    assert!(bridge.schema().systems().is_empty());
    assert!(bridge.schema().sdl().contains("type Query"));
    assert!(!bridge.schema().sdl().contains("Systems: Systems"));
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_query_node_values_in_request_order() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;
    space.fail_reads_of(PlantFixtures::PUMP_ON);
    let bridge = gateway.bridge("plant");

    let values = bridge
        .node_values(
            &Target::default(),
            &[
                PlantFixtures::LEVEL.to_string(),
                PlantFixtures::PUMP_ON.to_string(),
                PlantFixtures::SPEED.to_string(),
            ],
        )
        .await;

    assert_eq!(values.len(), 3);
    assert_eq!(values[0].as_ref().and_then(|v| v.value.as_deref()), Some("72.5"));
    assert!(values[1].is_none());
    assert_eq!(values[2].as_ref().map(|v| v.node_id.as_str()), Some(PlantFixtures::SPEED));
    assert_eq!(values[2].as_ref().and_then(|v| v.system.as_deref()), Some("plant"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_query_unknown_system_yields_nothing() {
    let gateway = TestGateway::new();
    gateway.start_opc("plant", PlantFixtures::address_space()).await;
    let bridge = gateway.bridge("plant");

    let other = Target::system("elsewhere");
    assert!(bridge.node_value(&other, PlantFixtures::SPEED).await.is_none());
    assert_eq!(
        bridge.node_values(&other, &["a".to_string(), "b".to_string()]).await,
        vec![None, None]
    );
    assert!(bridge.server_info(&other).await.is_none());
    assert!(bridge.server_info(&Target::default()).await.is_some());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_query_browse_node_from_objects_folder() {
    let gateway = TestGateway::new();
    gateway.start_opc("plant", PlantFixtures::address_space()).await;
    let bridge = gateway.bridge("plant");

    let roots = bridge.browse_node(&Target::default(), None, None).await.unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].node_id, PlantFixtures::LINE);
    assert_eq!(roots[0].system_type, SystemType::Opc);

    let filtered = bridge
        .browse_node(&Target::default(), Some(PlantFixtures::LINE), Some("P.*"))
        .await
        .unwrap();
    let names: Vec<&str> = filtered.iter().map(|n| n.browse_name.as_str()).collect();
    assert_eq!(names, vec!["Pump"]);

    // The filter must match the whole name.
    let partial = bridge
        .browse_node(&Target::default(), Some(PlantFixtures::LINE), Some("Pu"))
        .await
        .unwrap();
    assert!(partial.is_empty());

    assert!(bridge
        .browse_node(&Target::default(), Some(PlantFixtures::LINE), Some("(["))
        .await
        .is_none());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_query_find_nodes_in_tree_order() {
    let gateway = TestGateway::new();
    gateway.start_opc("plant", PlantFixtures::search_tree()).await;
    let bridge = gateway.bridge("plant");

    let found = bridge.find_nodes(&Target::default(), Some("A"), None).await;
    let ids: Vec<&str> = found.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(ids, vec!["B", "D", "C"]);

    let variables = bridge.find_nodes(&Target::default(), Some("A"), Some("D")).await;
    assert_eq!(variables.len(), 1);
    assert!(variables[0].is_variable());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_query_find_nodes_survives_cycles() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::search_tree()).await;
    space.link("D", "A").link("C", "B");
    let bridge = gateway.bridge("plant");

    let found = bridge.find_nodes(&Target::default(), Some("A"), None).await;
    let ids: Vec<&str> = found.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(ids, vec!["B", "D", "C"]);

    gateway.shutdown().await;
}

// =============================================================================
// Mutations
// =============================================================================

#[tokio::test]
async fn test_mutation_set_node_values_reaches_backend() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;
    let bridge = gateway.bridge("plant");

    let results = bridge
        .set_node_values(
            &Target::default(),
            &[PlantFixtures::SPEED.to_string(), PlantFixtures::PUMP.to_string()],
            &["1600".to_string(), "1".to_string()],
        )
        .await;
    assert_eq!(results, vec![true, false]);
    assert_eq!(space.value(PlantFixtures::SPEED), Some(json!(1600)));

    let mismatched = bridge
        .set_node_values(
            &Target::default(),
            &[PlantFixtures::SPEED.to_string(), PlantFixtures::LEVEL.to_string()],
            &["1".to_string()],
        )
        .await;
    assert_eq!(mismatched, vec![false, false]);
    assert_eq!(space.writes().len(), 1);

    assert!(bridge.set_node_value(&Target::default(), PlantFixtures::PUMP_ON, "false").await);
    assert_eq!(space.value(PlantFixtures::PUMP_ON), Some(json!(false)));

    gateway.shutdown().await;
}

// =============================================================================
// Streams
// =============================================================================

#[tokio::test]
async fn test_stream_delivers_backend_changes() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;
    let bridge = gateway.bridge("plant");

    let mut stream = bridge
        .subscribe_node_values(
            &Target::default(),
            &[PlantFixtures::SPEED.to_string(), PlantFixtures::LEVEL.to_string()],
        )
        .await;
    assert_eq!(stream.topics().len(), 2);
    assert!(space.subscribed().contains(PlantFixtures::LEVEL));

    space.emit(PlantFixtures::LEVEL, "74");
    let value = next_value(&mut stream).await;
    assert_eq!(value.node_id, PlantFixtures::LEVEL);
    assert_eq!(value.value.as_deref(), Some("74"));
    assert_eq!(value.system.as_deref(), Some("plant"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_stream_cancel_unsubscribes_once() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;
    let bridge = gateway.bridge("plant");

    let mut stream = bridge
        .subscribe_node_value(&Target::default(), PlantFixtures::SPEED)
        .await;
    let handle = stream.cancel_handle();
    assert!(space.subscribed().contains(PlantFixtures::SPEED));

    let (_, _) = tokio::join!(handle.cancel(), stream.cancel());
    assert!(handle.is_cancelled());
    assert!(space.subscribed().is_empty());

    space.emit(PlantFixtures::SPEED, "1");
    assert!(stream.next().await.is_none());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_stream_drop_releases_backend_subscription() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;
    let bridge = gateway.bridge("plant");

    let stream = bridge
        .subscribe_node_value(&Target::default(), PlantFixtures::LEVEL)
        .await;
    assert!(space.subscribed().contains(PlantFixtures::LEVEL));
    drop(stream);

    let released = eventually(Duration::from_secs(1), || {
        std::future::ready(space.subscribed().is_empty())
    })
    .await;
    assert!(released);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_stream_on_missing_system_ends_empty() {
    let gateway = TestGateway::new();
    let bridge = gateway.bridge("plant");

    let mut stream = bridge
        .subscribe_node_value(&Target::system("ghost"), PlantFixtures::SPEED)
        .await;
    assert!(stream.topics().is_empty());
    stream.cancel().await;
    assert!(stream.next().await.is_none());
}

// =============================================================================
// History
// =============================================================================

#[tokio::test]
async fn test_history_queries_default_logger() {
    let gateway = TestGateway::new();
    let logger = MockHistoryLogger::spawn(
        &gateway.bus,
        "Log",
        "default",
        vec![
            (json!("2024-05-01T10:00:00Z"), json!(1450)),
            (json!("2024-05-01T10:00:01Z"), json!(1452)),
        ],
    );
    let bridge = gateway.bridge("plant");

    let rows = bridge
        .history(&Target::default(), PlantFixtures::SPEED, &HistoryArgs::last_seconds(60))
        .await
        .expect("history");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value.as_deref(), Some("1450"));
    assert_eq!(rows[0].source_time.as_deref(), Some("2024-05-01T10:00:00Z"));
    assert_eq!(rows[1].system.as_deref(), Some("plant"));

    let requests = logger.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].node_id, PlantFixtures::SPEED);
    assert_eq!(requests[0].t2 - requests[0].t1, 60_000);
}

#[tokio::test]
async fn test_history_named_logger_and_missing_logger() {
    let gateway = TestGateway::new();
    let fast = MockHistoryLogger::spawn(&gateway.bus, "Log", "fast", vec![(json!(1), json!(2))]);
    let bridge = gateway.bridge("plant");

    let from = chrono::Utc::now() - chrono::Duration::hours(1);
    let to = chrono::Utc::now();
    let args = HistoryArgs::between(from, to).with_log("fast");
    let rows = bridge
        .history(&Target::default(), PlantFixtures::LEVEL, &args)
        .await
        .expect("history");
    assert_eq!(rows.len(), 1);
    assert_eq!(fast.requests()[0].t1, from.timestamp_millis());
    assert_eq!(fast.requests()[0].t2, to.timestamp_millis());

    let missing = HistoryArgs::last_seconds(10).with_log("slow");
    assert!(bridge
        .history(&Target::default(), PlantFixtures::LEVEL, &missing)
        .await
        .is_none());
}

// =============================================================================
// HTTP
// =============================================================================

async fn call(router: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_http_queries_and_mutations_against_driver() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::search_tree()).await;
    let config = ConfigFixtures::bridge("plant", &["plant"]);
    let bridge = gateway.bridge_with_schema(&config).await;
    let router = HttpServer::new(bridge, config.http.clone()).router();

    let (status, found) = call(
        router.clone(),
        post("/query/FindNodes", json!({"NodeId": "A"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = found
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["NodeId"].as_str())
        .collect();
    assert_eq!(ids, vec!["B", "D", "C"]);

    let (status, written) = call(
        router.clone(),
        post("/mutation/NodeValue", json!({"NodeId": "D", "Value": "7"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(written, json!(true));
    assert_eq!(space.value("D"), Some(json!(7)));

    let (_, value) = call(router.clone(), post("/query/NodeValue", json!({"NodeId": "D"}))).await;
    assert_eq!(value["Value"], "7");
    assert_eq!(value["Type"], "Opc");

    let response = router
        .oneshot(Request::get("/schema").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let sdl = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&sdl).contains("type plant_A {"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_http_subscription_opens_event_stream() {
    let gateway = TestGateway::new();
    let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;
    let router = HttpServer::new(gateway.bridge("plant"), ConfigFixtures::bridge("plant", &[]).http).router();

    let uri = format!(
        "/subscription/NodeValue?NodeId={}",
        PlantFixtures::LEVEL.replace(';', "%3B").replace('=', "%3D")
    );
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert!(space.subscribed().contains(PlantFixtures::LEVEL));

    space.emit(PlantFixtures::LEVEL, "75");
    let mut body = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(RECV_TIMEOUT, body.next())
        .await
        .expect("event in time")
        .expect("body open")
        .expect("chunk");
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("event: NodeValue"));
    assert!(text.contains("\"Value\":\"75\""));

    drop(body);
    assert!(
        eventually(Duration::from_secs(1), || std::future::ready(space.subscribed().is_empty())).await
    );

    gateway.shutdown().await;
}

#[test]
fn test_service_addresses_used_by_bridge() {
    assert_eq!(
        ServiceKind::Read.address(SystemType::Opc, "plant"),
        "Opc/plant/Read"
    );
}
