// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! In-memory stand-ins for the collaborators a gateway talks to.
//!
//! - [`MockAddressSpace`]: an OPC-style node tree with values, shared between
//!   the test and the driver so the test can inject values and inspect writes
//! - [`MockOpcDriver`]: a [`ProtocolDriver`] serving that address space
//! - [`MockHistoryLogger`]: a `QueryHistory` responder recording requests

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use tagway_core::message::{
    history_address, BrowseEntry, HistoryReply, HistoryRequest, HistoryRow, SchemaNode,
    SchemaReply, ServerInfo, ValueEnvelope,
};
use tagway_core::{
    DriverError, DriverEvents, DriverResult, MessageBus, MonitoredItem, ProtocolDriver, SystemType,
};

/// Node id browsed for the top-level objects.
pub const OBJECTS_FOLDER: &str = "i=85";

// =============================================================================
// Mock Address Space
// =============================================================================

/// One node of a [`MockAddressSpace`].
#[derive(Debug, Clone)]
pub struct MockNode {
    /// Browse entry returned for this node.
    pub entry: BrowseEntry,
    /// Child node ids, in insertion order.
    pub children: Vec<String>,
}

#[derive(Default)]
struct SpaceState {
    nodes: BTreeMap<String, MockNode>,
    roots: Vec<String>,
    values: BTreeMap<String, Value>,
    writes: Vec<(String, String)>,
    subscribed: BTreeSet<String>,
    events: Option<DriverEvents>,
    failing_reads: HashSet<String>,
    fail_connect: bool,
    connects: u32,
}

/// A shared in-memory address space.
///
/// Cloning shares the state, so a test keeps one clone while the driver owns
/// another.
#[derive(Clone, Default)]
pub struct MockAddressSpace {
    state: Arc<Mutex<SpaceState>>,
}

impl MockAddressSpace {
    /// Creates an empty address space.
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, parent: Option<&str>, node_id: &str, name: &str, node_class: &str) {
        let mut state = self.state.lock();
        let node = MockNode {
            entry: BrowseEntry {
                node_id: node_id.to_string(),
                browse_name: name.to_string(),
                display_name: name.to_string(),
                node_class: node_class.to_string(),
            },
            children: Vec::new(),
        };
        state.nodes.insert(node_id.to_string(), node);
        match parent.and_then(|p| state.nodes.get_mut(p)) {
            Some(parent) => parent.children.push(node_id.to_string()),
            None => state.roots.push(node_id.to_string()),
        }
    }

    /// Adds an object below `parent`, or at the top level.
    pub fn add_object(&self, parent: Option<&str>, node_id: &str, name: &str) -> &Self {
        self.add(parent, node_id, name, "Object");
        self
    }

    /// Adds a variable with an initial value.
    pub fn add_variable(&self, parent: Option<&str>, node_id: &str, name: &str, value: Value) -> &Self {
        self.add(parent, node_id, name, "Variable");
        self.state.lock().values.insert(node_id.to_string(), value);
        self
    }

    /// Adds a node of any class.
    pub fn add_node(&self, parent: Option<&str>, node_id: &str, name: &str, node_class: &str) -> &Self {
        self.add(parent, node_id, name, node_class);
        self
    }

    /// Links an existing node under another parent as well.
    pub fn link(&self, parent: &str, child: &str) -> &Self {
        if let Some(parent) = self.state.lock().nodes.get_mut(parent) {
            parent.children.push(child.to_string());
        }
        self
    }

    /// Sets the current value of a variable.
    pub fn set_value(&self, node_id: &str, value: Value) {
        self.state.lock().values.insert(node_id.to_string(), value);
    }

    /// Returns the current value of a variable.
    pub fn value(&self, node_id: &str) -> Option<Value> {
        self.state.lock().values.get(node_id).cloned()
    }

    /// Returns every accepted write as `(node_id, payload)`.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.state.lock().writes.clone()
    }

    /// Returns the patterns currently subscribed by the driver.
    pub fn subscribed(&self) -> BTreeSet<String> {
        self.state.lock().subscribed.clone()
    }

    /// Returns how many times the driver connected.
    pub fn connects(&self) -> u32 {
        self.state.lock().connects
    }

    /// Makes reads of a node answer with no value.
    pub fn fail_reads_of(&self, node_id: &str) {
        self.state.lock().failing_reads.insert(node_id.to_string());
    }

    /// Makes connection attempts fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    /// Sends a raw value for `address` to the runtime.
    ///
    /// Returns `false` if the driver is not connected.
    pub fn emit(&self, address: &str, payload: &str) -> bool {
        let state = self.state.lock();
        match &state.events {
            Some(events) => events.value(address, payload.as_bytes().to_vec()),
            None => false,
        }
    }

    /// Reports a lost connection to the runtime.
    pub fn drop_connection(&self, reason: &str) -> bool {
        let mut state = self.state.lock();
        state.subscribed.clear();
        match state.events.take() {
            Some(events) => events.connection_lost(reason),
            None => false,
        }
    }

    /// Creates a driver serving this address space.
    pub fn driver(&self, name: &str) -> MockOpcDriver {
        MockOpcDriver {
            name: format!("mock-opc:{name}"),
            space: self.clone(),
            connected: false,
            next_item: 0,
        }
    }

    fn schema_node(state: &SpaceState, node_id: &str, depth: usize) -> Option<SchemaNode> {
        let node = state.nodes.get(node_id)?;
        let nodes = if depth > 32 {
            Vec::new()
        } else {
            node.children
                .iter()
                .filter_map(|child| Self::schema_node(state, child, depth + 1))
                .collect()
        };
        Some(SchemaNode {
            node_id: node.entry.node_id.clone(),
            browse_name: node.entry.browse_name.clone(),
            display_name: node.entry.display_name.clone(),
            node_class: node.entry.node_class.clone(),
            nodes,
        })
    }
}

// =============================================================================
// Mock OPC Driver
// =============================================================================

/// An OPC-style driver backed by a [`MockAddressSpace`].
pub struct MockOpcDriver {
    name: String,
    space: MockAddressSpace,
    connected: bool,
    next_item: u64,
}

#[async_trait]
impl ProtocolDriver for MockOpcDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn system_type(&self) -> SystemType {
        SystemType::Opc
    }

    async fn connect(&mut self, events: DriverEvents) -> DriverResult<()> {
        let mut state = self.space.state.lock();
        if state.fail_connect {
            return Err(DriverError::connection_failed("mock server refused"));
        }
        state.events = Some(events);
        state.connects += 1;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        let mut state = self.space.state.lock();
        state.events = None;
        state.subscribed.clear();
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && self.space.state.lock().events.is_some()
    }

    async fn subscribe(&mut self, patterns: &[String]) -> DriverResult<Vec<MonitoredItem>> {
        let mut state = self.space.state.lock();
        let mut items = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            self.next_item += 1;
            state.subscribed.insert(pattern.clone());
            items.push(MonitoredItem::new(self.next_item, pattern.as_str()));
        }
        Ok(items)
    }

    async fn unsubscribe(&mut self, items: &[MonitoredItem]) -> DriverResult<()> {
        let mut state = self.space.state.lock();
        for item in items {
            state.subscribed.remove(&item.pattern);
        }
        Ok(())
    }

    async fn read(&mut self, node_ids: &[String]) -> DriverResult<Vec<Option<ValueEnvelope>>> {
        let state = self.space.state.lock();
        Ok(node_ids
            .iter()
            .map(|id| {
                if state.failing_reads.contains(id) {
                    return None;
                }
                state.values.get(id).cloned().map(ValueEnvelope::now)
            })
            .collect())
    }

    async fn write(&mut self, node_id: &str, payload: &[u8]) -> DriverResult<()> {
        let mut state = self.space.state.lock();
        let is_variable = state
            .nodes
            .get(node_id)
            .is_some_and(|n| n.entry.node_class == "Variable");
        if !is_variable {
            return Err(DriverError::invalid_request(format!("{node_id} is not writable")));
        }
        let text = String::from_utf8_lossy(payload).into_owned();
        let value = serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()));
        state.values.insert(node_id.to_string(), value);
        state.writes.push((node_id.to_string(), text));
        Ok(())
    }

    async fn browse(&mut self, node_id: &str) -> DriverResult<Vec<BrowseEntry>> {
        let state = self.space.state.lock();
        let children = if node_id == OBJECTS_FOLDER {
            &state.roots
        } else {
            &state
                .nodes
                .get(node_id)
                .ok_or_else(|| DriverError::protocol(format!("unknown node {node_id}")))?
                .children
        };
        Ok(children
            .iter()
            .filter_map(|id| state.nodes.get(id).map(|n| n.entry.clone()))
            .collect())
    }

    async fn schema(&mut self) -> DriverResult<SchemaReply> {
        let state = self.space.state.lock();
        Ok(SchemaReply {
            objects: state
                .roots
                .iter()
                .filter_map(|id| MockAddressSpace::schema_node(&state, id, 0))
                .collect(),
        })
    }

    async fn server_info(&mut self) -> DriverResult<ServerInfo> {
        Ok(ServerInfo {
            server: vec!["urn:tagway:mock".to_string()],
            namespace: vec!["http://opcfoundation.org/UA/".to_string()],
            build_info: "mock 1.0".to_string(),
            start_time: "2024-05-01T00:00:00Z".to_string(),
            current_time: chrono::Utc::now().to_rfc3339(),
            server_status: "Running".to_string(),
        })
    }
}

// =============================================================================
// Mock History Logger
// =============================================================================

/// Answers `QueryHistory` requests with fixed rows and records the requests.
#[derive(Clone, Default)]
pub struct MockHistoryLogger {
    requests: Arc<Mutex<Vec<HistoryRequest>>>,
}

impl MockHistoryLogger {
    /// Registers the logger `{root}/{log}/QueryHistory` on the bus.
    ///
    /// Every request is answered with `rows`, tagged with the requested
    /// system.
    pub fn spawn(bus: &MessageBus, root: &str, log: &str, rows: Vec<(Value, Value)>) -> Self {
        let logger = Self::default();
        let requests = logger.requests.clone();
        let mut handler = bus.register(history_address(root, log));

        tokio::spawn(async move {
            while let Some(request) = handler.recv().await {
                let body: HistoryRequest = match request.decode() {
                    Ok(body) => body,
                    Err(error) => {
                        request.fail_with(&error);
                        continue;
                    }
                };
                let reply = HistoryReply::from_rows(
                    rows.iter()
                        .map(|(time, value)| {
                            HistoryRow(time.clone(), value.clone(), Value::from(0), Value::from(body.system.clone()))
                        })
                        .collect(),
                );
                requests.lock().push(body);
                request.reply_json(&reply);
            }
        });
        logger
    }

    /// Returns the recorded requests.
    pub fn requests(&self) -> Vec<HistoryRequest> {
        self.requests.lock().clone()
    }
}
