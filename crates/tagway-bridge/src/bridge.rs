// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Query, mutation and subscription operations.
//!
//! Every operation becomes one or more bus requests to the driver serving
//! the target `(Type, System)`. Failures never propagate as errors: an
//! item that cannot be served is `None` or `false`, and siblings in the same
//! batch are unaffected.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, warn};

use tagway_config::BridgeConfig;
use tagway_core::message::{
    BrowseReply, BrowseRequest, OneOrMany, ReadReply, ReadRequest, ServerInfo, ServerInfoReply,
    ServiceKind, WriteReply, WriteRequest,
};
use tagway_core::topic::SystemType;
use tagway_core::{MessageBus, ServiceRegistry};

use crate::history::HistoryClient;
use crate::model::{HistoryArgs, NodeInfo, NodeValue, Target};
use crate::schema::{FieldBinding, GatewaySchema, SchemaFetcher};
use crate::stream::NodeValueStream;

/// Node browsed when a request names none (the OPC `Objects` folder).
pub const DEFAULT_BROWSE_NODE: &str = "i=85";

// =============================================================================
// Bridge
// =============================================================================

struct BridgeInner {
    bus: MessageBus,
    default_type: SystemType,
    default_system: String,
    history: HistoryClient,
    stream_buffer: usize,
    schema: GatewaySchema,
}

/// Translates client operations into bus requests.
///
/// Cheap to clone; clones share the bus and the schema.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Creates a bridge serving the generic schema.
    pub fn new(bus: MessageBus, config: &BridgeConfig) -> Self {
        Self::with_schema(bus, config, GatewaySchema::generic())
    }

    /// Creates a bridge serving a prepared schema.
    pub fn with_schema(bus: MessageBus, config: &BridgeConfig, schema: GatewaySchema) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                bus,
                default_type: config.default_type,
                default_system: config.default_system.clone(),
                history: HistoryClient {
                    history_root: config.history_root.clone(),
                    default_log: config.default_log.clone(),
                },
                stream_buffer: config.stream_buffer,
                schema,
            }),
        }
    }

    /// Fetches and compiles the configured systems, then creates the bridge.
    pub async fn build(bus: MessageBus, registry: ServiceRegistry, config: &BridgeConfig) -> Self {
        let fetcher = SchemaFetcher::new(bus.clone(), registry, config.schema_timeout());
        let schema = GatewaySchema::build(&fetcher, config).await;
        Self::with_schema(bus, config, schema)
    }

    /// Returns the schema served by this bridge.
    pub fn schema(&self) -> &GatewaySchema {
        &self.inner.schema
    }

    /// Returns the message bus.
    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    fn resolve(&self, target: &Target) -> (SystemType, String) {
        target.resolve(self.inner.default_type, &self.inner.default_system)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns the backend server information.
    pub async fn server_info(&self, target: &Target) -> Option<ServerInfo> {
        let (system_type, system) = self.resolve(target);
        let address = ServiceKind::ServerInfo.address(system_type, &system);
        match self
            .inner
            .bus
            .request_json::<_, ServerInfoReply>(&address, &serde_json::json!({}))
            .await
        {
            Ok(reply) => Some(reply.result),
            Err(e) => {
                debug!(address = %address, error = %e, "ServerInfo failed");
                None
            }
        }
    }

    /// Reads one node.
    pub async fn node_value(&self, target: &Target, node_id: &str) -> Option<NodeValue> {
        let (system_type, system) = self.resolve(target);
        let request = ReadRequest {
            node_id: OneOrMany::One(node_id.to_string()),
        };
        let reply = self.read(system_type, &system, &request).await?;
        reply
            .envelope()
            .map(|envelope| NodeValue::from_envelope(system_type, &system, node_id, &envelope))
    }

    /// Reads several nodes in one request. The output is parallel to
    /// `node_ids`.
    pub async fn node_values(&self, target: &Target, node_ids: &[String]) -> Vec<Option<NodeValue>> {
        if node_ids.is_empty() {
            return Vec::new();
        }
        let (system_type, system) = self.resolve(target);
        let request = ReadRequest {
            node_id: OneOrMany::Many(node_ids.to_vec()),
        };
        let Some(reply) = self.read(system_type, &system, &request).await else {
            return vec![None; node_ids.len()];
        };

        reply
            .envelopes(node_ids.len())
            .into_iter()
            .zip(node_ids)
            .map(|(envelope, node_id)| {
                envelope.map(|e| NodeValue::from_envelope(system_type, &system, node_id, &e))
            })
            .collect()
    }

    async fn read(&self, system_type: SystemType, system: &str, request: &ReadRequest) -> Option<ReadReply> {
        let address = ServiceKind::Read.address(system_type, system);
        match self.inner.bus.request_json(&address, request).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                debug!(address = %address, error = %e, "Read failed");
                None
            }
        }
    }

    /// Lists the children of a node, optionally filtered by a regular
    /// expression that must match the whole browse name.
    ///
    /// `None` if the browse fails or the filter is not a valid expression.
    pub async fn browse_node(
        &self,
        target: &Target,
        node_id: Option<&str>,
        filter: Option<&str>,
    ) -> Option<Vec<NodeInfo>> {
        let filter = compile_filter(filter)?;
        let (system_type, system) = self.resolve(target);
        let node_id = node_id.unwrap_or(DEFAULT_BROWSE_NODE);
        let children = self.browse(system_type, &system, node_id).await?;
        Some(
            children
                .into_iter()
                .filter(|child| accepts(filter.as_ref(), child))
                .collect(),
        )
    }

    /// Searches the tree below a node.
    ///
    /// Children of every object are browsed concurrently and each level is
    /// joined before its results are merged, so the output is in tree order.
    /// A failed browse contributes nothing. Node ids already seen are not
    /// browsed again.
    pub async fn find_nodes(&self, target: &Target, node_id: Option<&str>, filter: Option<&str>) -> Vec<NodeInfo> {
        let Some(filter) = compile_filter(filter) else {
            return Vec::new();
        };
        let (system_type, system) = self.resolve(target);
        let root = node_id.unwrap_or(DEFAULT_BROWSE_NODE).to_string();
        let visited = Mutex::new(HashSet::from([root.clone()]));

        self.find_below(system_type, &system, root, filter.as_ref(), &visited)
            .await
    }

    fn find_below<'a>(
        &'a self,
        system_type: SystemType,
        system: &'a str,
        node_id: String,
        filter: Option<&'a Regex>,
        visited: &'a Mutex<HashSet<String>>,
    ) -> BoxFuture<'a, Vec<NodeInfo>> {
        async move {
            let Some(children) = self.browse(system_type, system, &node_id).await else {
                return Vec::new();
            };

            let children: Vec<NodeInfo> = {
                let mut visited = visited.lock();
                children
                    .into_iter()
                    .filter(|child| child.is_object() || child.is_variable())
                    .filter(|child| visited.insert(child.node_id.clone()))
                    .collect()
            };

            let branches = join_all(children.iter().map(|child| async move {
                if child.is_object() {
                    self.find_below(system_type, system, child.node_id.clone(), filter, visited)
                        .await
                } else {
                    Vec::new()
                }
            }))
            .await;

            let mut found = Vec::new();
            for (child, below) in children.into_iter().zip(branches) {
                if accepts(filter, &child) {
                    found.push(child);
                }
                found.extend(below);
            }
            found
        }
        .boxed()
    }

    async fn browse(&self, system_type: SystemType, system: &str, node_id: &str) -> Option<Vec<NodeInfo>> {
        let address = ServiceKind::Browse.address(system_type, system);
        let request = BrowseRequest {
            node_id: node_id.to_string(),
        };
        match self.inner.bus.request_json::<_, BrowseReply>(&address, &request).await {
            Ok(reply) => Some(
                reply
                    .result
                    .iter()
                    .map(|entry| NodeInfo::from_entry(system_type, system, entry))
                    .collect(),
            ),
            Err(e) => {
                debug!(address = %address, node_id, error = %e, "Browse failed");
                None
            }
        }
    }

    /// Queries the history of one node.
    pub async fn history(&self, target: &Target, node_id: &str, args: &HistoryArgs) -> Option<Vec<NodeValue>> {
        let (_, system) = self.resolve(target);
        self.inner
            .history
            .query(&self.inner.bus, &system, node_id, args)
            .await
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Writes one node.
    pub async fn set_node_value(&self, target: &Target, node_id: &str, value: &str) -> bool {
        let (system_type, system) = self.resolve(target);
        let request = WriteRequest {
            node_id: OneOrMany::One(node_id.to_string()),
            value: OneOrMany::One(value.to_string()),
        };
        match self.write(system_type, &system, &request).await {
            Some(OneOrMany::One(ok)) => ok,
            Some(OneOrMany::Many(oks)) => oks.first().copied().unwrap_or(false),
            None => false,
        }
    }

    /// Writes several nodes in one request. The output is parallel to
    /// `node_ids`; every entry is `false` if the lists differ in length or
    /// the request fails.
    pub async fn set_node_values(&self, target: &Target, node_ids: &[String], values: &[String]) -> Vec<bool> {
        if node_ids.len() != values.len() {
            warn!(ids = node_ids.len(), values = values.len(), "Write lists differ in length");
            return vec![false; node_ids.len()];
        }
        if node_ids.is_empty() {
            return Vec::new();
        }

        let (system_type, system) = self.resolve(target);
        let request = WriteRequest {
            node_id: OneOrMany::Many(node_ids.to_vec()),
            value: OneOrMany::Many(values.to_vec()),
        };
        match self.write(system_type, &system, &request).await {
            Some(OneOrMany::Many(oks)) => (0..node_ids.len())
                .map(|i| oks.get(i).copied().unwrap_or(false))
                .collect(),
            Some(OneOrMany::One(ok)) => vec![ok; node_ids.len()],
            None => vec![false; node_ids.len()],
        }
    }

    async fn write(&self, system_type: SystemType, system: &str, request: &WriteRequest) -> Option<OneOrMany<bool>> {
        let address = ServiceKind::Write.address(system_type, system);
        match self.inner.bus.request_json::<_, WriteReply>(&address, request).await {
            Ok(reply) => Some(reply.ok),
            Err(e) => {
                debug!(address = %address, error = %e, "Write failed");
                None
            }
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Opens a live stream for one node.
    pub async fn subscribe_node_value(&self, target: &Target, node_id: &str) -> NodeValueStream {
        self.subscribe_node_values(target, &[node_id.to_string()]).await
    }

    /// Opens one live stream for several nodes.
    pub async fn subscribe_node_values(&self, target: &Target, node_ids: &[String]) -> NodeValueStream {
        let (system_type, system) = self.resolve(target);
        NodeValueStream::open(
            &self.inner.bus,
            system_type,
            &system,
            node_ids,
            self.inner.stream_buffer,
        )
        .await
    }

    // =========================================================================
    // Node fields
    // =========================================================================

    /// Returns the node a generated field is bound to.
    pub fn resolve_binding(&self, binding: &FieldBinding) -> NodeInfo {
        NodeInfo {
            system_type: binding.system_type,
            system: binding.system.clone(),
            node_id: binding.node_id.clone(),
            browse_name: binding.browse_name.clone(),
            display_name: binding.display_name.clone(),
            node_class: binding.node_class.clone(),
        }
    }

    /// `Node.Value`
    pub async fn value_of(&self, node: &NodeInfo) -> Option<NodeValue> {
        self.node_value(&node.target(), &node.node_id).await
    }

    /// `Node.Nodes`
    pub async fn children_of(&self, node: &NodeInfo, filter: Option<&str>) -> Option<Vec<NodeInfo>> {
        self.browse_node(&node.target(), Some(&node.node_id), filter)
            .await
    }

    /// `Node.History`
    pub async fn history_of(&self, node: &NodeInfo, args: &HistoryArgs) -> Option<Vec<NodeValue>> {
        self.history(&node.target(), &node.node_id, args).await
    }

    /// `Node.SetValue`
    pub async fn set_value_of(&self, node: &NodeInfo, value: &str) -> bool {
        self.set_node_value(&node.target(), &node.node_id, value)
            .await
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("default_type", &self.inner.default_type)
            .field("default_system", &self.inner.default_system)
            .field("systems", &self.inner.schema.systems().len())
            .finish()
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Compiles a browse-name filter anchored at both ends.
///
/// `Some(None)` means no filter; `None` means the filter is invalid.
fn compile_filter(filter: Option<&str>) -> Option<Option<Regex>> {
    let Some(filter) = filter else {
        return Some(None);
    };
    match Regex::new(&format!("^(?:{filter})$")) {
        Ok(regex) => Some(Some(regex)),
        Err(e) => {
            debug!(filter, error = %e, "Invalid browse filter");
            None
        }
    }
}

fn accepts(filter: Option<&Regex>, node: &NodeInfo) -> bool {
    filter.map_or(true, |f| f.is_match(&node.browse_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tagway_core::message::{BrowseEntry, ValueEnvelope};

    fn entry(id: &str, class: &str) -> BrowseEntry {
        BrowseEntry {
            node_id: id.to_string(),
            browse_name: id.to_string(),
            display_name: id.to_string(),
            node_class: class.to_string(),
        }
    }

    /// Serves Browse from a fixed tree and counts calls.
    fn serve_tree(bus: &MessageBus, tree: HashMap<&'static str, Vec<BrowseEntry>>) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut handler = bus.register("Opc/plant/Browse");
        tokio::spawn(async move {
            while let Some(request) = handler.recv().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let body: BrowseRequest = request.decode().unwrap();
                match tree.get(body.node_id.as_str()) {
                    Some(children) => request.reply_json(&BrowseReply {
                        result: children.clone(),
                    }),
                    None => request.fail(404, "unknown node"),
                }
            }
        });
        calls
    }

    fn bridge(bus: &MessageBus) -> Bridge {
        let config = BridgeConfig {
            default_system: "plant".into(),
            ..BridgeConfig::default()
        };
        Bridge::new(bus.clone(), &config)
    }

    #[tokio::test]
    async fn test_find_nodes_joins_all_levels() {
        let bus = MessageBus::new();
        let calls = serve_tree(
            &bus,
            HashMap::from([
                ("A", vec![entry("B", "Object"), entry("C", "Object")]),
                ("B", vec![entry("D", "Variable")]),
                ("C", vec![]),
            ]),
        );

        let found = bridge(&bus).find_nodes(&Target::default(), Some("A"), None).await;
        let ids: Vec<&str> = found.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "D", "C"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_find_nodes_survives_failed_branch_and_cycles() {
        let bus = MessageBus::new();
        serve_tree(
            &bus,
            HashMap::from([
                ("A", vec![entry("B", "Object"), entry("X", "Object"), entry("M", "Method")]),
                ("B", vec![entry("A", "Object"), entry("D", "Variable")]),
            ]),
        );

        let bridge = bridge(&bus);
        let found = bridge.find_nodes(&Target::default(), Some("A"), None).await;
        let ids: Vec<&str> = found.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "D", "X"]);

        let filtered = bridge.find_nodes(&Target::default(), Some("A"), Some("D")).await;
        assert_eq!(filtered.len(), 1);
        assert!(bridge.find_nodes(&Target::default(), Some("A"), Some("(")).await.is_empty());
    }

    #[tokio::test]
    async fn test_browse_node_filter_is_full_match() {
        let bus = MessageBus::new();
        serve_tree(
            &bus,
            HashMap::from([("i=85", vec![entry("Pump", "Object"), entry("Pump2", "Object")])]),
        );
        let bridge = bridge(&bus);

        let all = bridge.browse_node(&Target::default(), None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let pump = bridge.browse_node(&Target::default(), None, Some("Pump")).await.unwrap();
        assert_eq!(pump.len(), 1);
        assert!(bridge.browse_node(&Target::default(), None, Some("[")).await.is_none());
        assert!(bridge.browse_node(&Target::default(), Some("missing"), None).await.is_none());
    }

    #[tokio::test]
    async fn test_node_values_batch_isolation() {
        let bus = MessageBus::new();
        let mut handler = bus.register("Opc/plant/Read");
        tokio::spawn(async move {
            while let Some(request) = handler.recv().await {
                request.reply_json(&ReadReply::batch(vec![Some(ValueEnvelope::now(json!(1))), None]));
            }
        });

        let bridge = bridge(&bus);
        let values = bridge
            .node_values(&Target::default(), &["ok".into(), "bad".into(), "short".into()])
            .await;
        assert_eq!(values.len(), 3);
        assert_eq!(values[0].as_ref().unwrap().node_id, "ok");
        assert!(values[1].is_none() && values[2].is_none());

        let other = Target::system("nowhere");
        assert_eq!(bridge.node_values(&other, &["a".into(), "b".into()]).await, vec![None, None]);
        assert!(bridge.node_value(&other, "a").await.is_none());
    }

    #[tokio::test]
    async fn test_set_node_values() {
        let bus = MessageBus::new();
        let mut handler = bus.register("Opc/plant/Write");
        tokio::spawn(async move {
            while let Some(request) = handler.recv().await {
                let body: WriteRequest = request.decode().unwrap();
                let oks = body.value.into_vec().iter().map(|v| v != "bad").collect::<Vec<_>>();
                let ok = if oks.len() == 1 {
                    OneOrMany::One(oks[0])
                } else {
                    OneOrMany::Many(oks)
                };
                request.reply_json(&WriteReply { ok });
            }
        });

        let bridge = bridge(&bus);
        let target = Target::default();
        assert!(bridge.set_node_value(&target, "n1", "1").await);
        assert!(!bridge.set_node_value(&target, "n1", "bad").await);
        assert_eq!(
            bridge
                .set_node_values(&target, &["a".into(), "b".into()], &["1".into(), "bad".into()])
                .await,
            vec![true, false]
        );
        assert_eq!(
            bridge.set_node_values(&target, &["a".into(), "b".into()], &["1".into()]).await,
            vec![false, false]
        );
        assert_eq!(
            bridge
                .set_node_values(&Target::system("nowhere"), &["a".into()], &["1".into()])
                .await,
            vec![false]
        );
    }

    #[tokio::test]
    async fn test_server_info_and_binding() {
        let bus = MessageBus::new();
        let mut handler = bus.register("Opc/plant/ServerInfo");
        tokio::spawn(async move {
            while let Some(request) = handler.recv().await {
                let info = ServerInfo {
                    build_info: "1.0".into(),
                    ..ServerInfo::default()
                };
                request.reply_json(&ServerInfoReply { result: info });
            }
        });

        let bridge = bridge(&bus);
        assert_eq!(
            bridge.server_info(&Target::default()).await.map(|i| i.build_info),
            Some("1.0".to_string())
        );
        assert!(bridge.server_info(&Target::system("nowhere")).await.is_none());

        let binding = FieldBinding {
            system_type: SystemType::Plc,
            system: "press".into(),
            node_id: "DB1.X0".into(),
            node_class: "Variable".into(),
            browse_name: "X0".into(),
            display_name: "Start".into(),
        };
        let node = bridge.resolve_binding(&binding);
        assert_eq!(node.target(), Target::new(SystemType::Plc, "press"));
        assert!(node.is_variable());
    }
}
