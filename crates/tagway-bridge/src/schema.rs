// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Schema builder.
//!
//! Building the query schema is a two-phase process:
//!
//! ```text
//!  Schema request ──▶ SchemaReply ──▶ NodeArena ──compile──▶ CompiledSystem
//!   (once/system)       (tree)        (flat ids)     (pure)    types + bindings
//!                                                                   │
//!  generic SDL + Systems root + every CompiledSystem ──────▶ GatewaySchema
//! ```
//!
//! [`SchemaFetcher`] does the I/O and caches each tree for the process
//! lifetime. [`compile`] is a pure function of the arena: the same tree
//! always yields the same type and field names.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tagway_config::BridgeConfig;
use tagway_core::message::{SchemaNode, SchemaReply, ServiceKind};
use tagway_core::registry::{ServiceKey, ServiceRegistry};
use tagway_core::topic::SystemType;
use tagway_core::MessageBus;

use crate::error::{SchemaError, SchemaResult};
use crate::model::{NODE_CLASS_OBJECT, NODE_CLASS_VARIABLE};

pub use tagway_config::{FieldNameSource, SchemaSource};

/// Name of the generated root type grouping all systems.
pub const SYSTEMS_TYPE: &str = "Systems";

/// Type names owned by the generic schema.
pub const GENERIC_TYPES: [&str; 8] = [
    "Type",
    "Query",
    "Mutation",
    "Subscription",
    "Value",
    "Node",
    "ServerInfo",
    SYSTEMS_TYPE,
];

const GENERIC_OWNER: &str = "generic schema";

// =============================================================================
// NodeArena
// =============================================================================

/// Index of a node in a [`NodeArena`].
pub type NodeIndex = usize;

/// One node record of a flattened tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaNode {
    /// Backend node id.
    pub node_id: String,
    /// Browse name.
    pub browse_name: String,
    /// Display name.
    pub display_name: String,
    /// Node class.
    pub node_class: String,
    /// Parent record, `None` for top-level objects.
    pub parent: Option<NodeIndex>,
    /// Child records, in tree order.
    pub children: Vec<NodeIndex>,
}

impl ArenaNode {
    /// Returns the attribute selected by `source`, falling back to the
    /// browse name when the display name is empty.
    pub fn field_name_source(&self, source: FieldNameSource) -> &str {
        match source {
            FieldNameSource::DisplayName if !self.display_name.is_empty() => &self.display_name,
            _ => &self.browse_name,
        }
    }
}

/// A fetched tree flattened into records addressed by integer ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeArena {
    nodes: Vec<ArenaNode>,
    roots: Vec<NodeIndex>,
}

impl NodeArena {
    /// Flattens a schema reply.
    pub fn from_reply(reply: &SchemaReply) -> Self {
        let mut arena = Self::default();
        // (node, parent) pairs still to place; reversed so pops come in order
        let mut pending: Vec<(&SchemaNode, Option<NodeIndex>)> =
            reply.objects.iter().rev().map(|n| (n, None)).collect();

        while let Some((node, parent)) = pending.pop() {
            let index = arena.nodes.len();
            arena.nodes.push(ArenaNode {
                node_id: node.node_id.clone(),
                browse_name: node.browse_name.clone(),
                display_name: node.display_name.clone(),
                node_class: node.node_class.clone(),
                parent,
                children: Vec::with_capacity(node.nodes.len()),
            });
            match parent {
                Some(p) => arena.nodes[p].children.push(index),
                None => arena.roots.push(index),
            }
            pending.extend(node.nodes.iter().rev().map(|child| (child, Some(index))));
        }
        arena
    }

    /// Returns a record.
    pub fn get(&self, index: NodeIndex) -> Option<&ArenaNode> {
        self.nodes.get(index)
    }

    /// Returns the top-level records.
    pub fn roots(&self) -> &[NodeIndex] {
        &self.roots
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// =============================================================================
// Name Sanitization
// =============================================================================

/// Turns a node name into a schema identifier.
///
/// Non-alphanumeric characters become `_`, a leading digit gets a `_`
/// prefix and leading underscores collapse to one, since `__` is reserved.
///
/// ```
/// use tagway_bridge::schema::sanitize_name;
///
/// assert_eq!(sanitize_name("1-Motor Speed"), "_1_Motor_Speed");
/// assert_eq!(sanitize_name("__typename"), "_typename");
/// ```
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    let mut sanitized = match replaced.chars().next() {
        None => return "_".to_string(),
        Some(c) if c.is_ascii_digit() => format!("_{replaced}"),
        Some(_) => replaced,
    };

    while sanitized.starts_with("__") {
        sanitized.remove(0);
    }
    sanitized
}

// =============================================================================
// Compiled Types
// =============================================================================

/// Everything needed to address one node without re-walking the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldBinding {
    /// Backend family.
    #[serde(rename = "Type")]
    pub system_type: SystemType,
    /// System name.
    pub system: String,
    /// Node id.
    pub node_id: String,
    /// Node class.
    pub node_class: String,
    /// Browse name.
    pub browse_name: String,
    /// Display name.
    pub display_name: String,
}

/// Type of a generated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// A variable, typed as the generic `Node`.
    Node,
    /// A nested object, typed by its generated type.
    Object(String),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Node => f.write_str("Node"),
            FieldType::Object(name) => f.write_str(name),
        }
    }
}

/// One generated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Sanitized field name.
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
    /// The node behind the field.
    pub binding: FieldBinding,
}

/// One generated object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// Path-qualified type name.
    pub name: String,
    /// Fields, in tree order.
    pub fields: Vec<FieldDef>,
}

impl TypeDef {
    /// Returns a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Renders the type as SDL.
    pub fn to_sdl(&self) -> String {
        let mut sdl = format!("type {} {{\n", self.name);
        for field in &self.fields {
            sdl.push_str(&format!("  {}: {}\n", field.name, field.field_type));
        }
        sdl.push_str("}\n");
        sdl
    }
}

/// The compiled schema of one system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSystem {
    /// System name as configured.
    pub system: String,
    /// Backend family.
    pub system_type: SystemType,
    /// Name of the root type (the sanitized system name).
    pub root_type: String,
    /// Generated types, nested types before the types using them.
    pub types: Vec<TypeDef>,
}

impl CompiledSystem {
    /// Returns a type by name.
    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Renders every type as SDL.
    pub fn to_sdl(&self) -> String {
        self.types.iter().map(TypeDef::to_sdl).collect::<Vec<_>>().join("\n")
    }

    fn type_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.root_type.as_str()).chain(self.types.iter().map(|t| t.name.as_str()))
    }
}

// =============================================================================
// Compile
// =============================================================================

/// Compiles a flattened tree into types and bindings.
///
/// Objects without usable children are omitted. Nodes of any class other
/// than `Variable` or `Object` are skipped.
///
/// # Errors
///
/// - `SchemaError::NameCollision` if two siblings sanitize to the same name
/// - `SchemaError::InvalidTree` if nothing compiles or two paths produce the
///   same type name
pub fn compile(
    system_type: SystemType,
    system: &str,
    arena: &NodeArena,
    source: FieldNameSource,
) -> SchemaResult<CompiledSystem> {
    let root_type = sanitize_name(system);
    let mut compiler = Compiler {
        system_type,
        system,
        arena,
        source,
        types: Vec::new(),
        type_names: HashSet::new(),
    };

    if !compiler.compile_type(&root_type, arena.roots())? {
        return Err(SchemaError::invalid_tree(system, "no object with children"));
    }

    Ok(CompiledSystem {
        system: system.to_string(),
        system_type,
        root_type,
        types: compiler.types,
    })
}

struct Compiler<'a> {
    system_type: SystemType,
    system: &'a str,
    arena: &'a NodeArena,
    source: FieldNameSource,
    types: Vec<TypeDef>,
    type_names: HashSet<String>,
}

impl Compiler<'_> {
    /// Emits the type `name` for `children`. Returns `false` if no field
    /// survived, in which case nothing is emitted.
    fn compile_type(&mut self, name: &str, children: &[NodeIndex]) -> SchemaResult<bool> {
        let mut fields = Vec::with_capacity(children.len());
        let mut sources: HashMap<String, String> = HashMap::new();

        for &index in children {
            let Some(node) = self.arena.get(index) else {
                continue;
            };
            let source_name = node.field_name_source(self.source);
            let field_name = sanitize_name(source_name);

            let field_type = match node.node_class.as_str() {
                NODE_CLASS_VARIABLE => FieldType::Node,
                NODE_CLASS_OBJECT => {
                    let nested = format!("{name}_{field_name}");
                    if !self.compile_type(&nested, &node.children)? {
                        debug!(system = %self.system, type_name = %nested, "Skipping object without children");
                        continue;
                    }
                    FieldType::Object(nested)
                }
                other => {
                    debug!(system = %self.system, node_id = %node.node_id, node_class = %other, "Skipping node class");
                    continue;
                }
            };

            if let Some(first) = sources.insert(field_name.clone(), source_name.to_string()) {
                return Err(SchemaError::NameCollision {
                    type_name: name.to_string(),
                    field: field_name,
                    first,
                    second: source_name.to_string(),
                });
            }

            fields.push(FieldDef {
                name: field_name,
                field_type,
                binding: FieldBinding {
                    system_type: self.system_type,
                    system: self.system.to_string(),
                    node_id: node.node_id.clone(),
                    node_class: node.node_class.clone(),
                    browse_name: node.browse_name.clone(),
                    display_name: node.display_name.clone(),
                },
            });
        }

        if fields.is_empty() {
            return Ok(false);
        }
        if !self.type_names.insert(name.to_string()) {
            return Err(SchemaError::invalid_tree(
                self.system,
                format!("type name '{name}' is produced by two paths"),
            ));
        }
        self.types.push(TypeDef {
            name: name.to_string(),
            fields,
        });
        Ok(true)
    }
}

// =============================================================================
// SchemaFetcher
// =============================================================================

/// Fetches and caches node trees.
#[derive(Clone)]
pub struct SchemaFetcher {
    bus: MessageBus,
    registry: ServiceRegistry,
    timeout: Duration,
    cache: Arc<Mutex<HashMap<ServiceKey, Arc<NodeArena>>>>,
}

impl SchemaFetcher {
    /// Creates a fetcher; `timeout` bounds both the wait for the service and
    /// the request.
    pub fn new(bus: MessageBus, registry: ServiceRegistry, timeout: Duration) -> Self {
        Self {
            bus,
            registry,
            timeout,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the tree of a system, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Fetch` if the system does not become available
    /// or the request fails within the timeout.
    pub async fn fetch(&self, system_type: SystemType, system: &str) -> SchemaResult<Arc<NodeArena>> {
        let key = ServiceKey::new(system_type, system);
        if let Some(arena) = self.cache.lock().get(&key) {
            return Ok(arena.clone());
        }

        let instance = self
            .registry
            .wait_available(system_type, system, self.timeout)
            .await
            .ok_or_else(|| SchemaError::fetch(system, "service not available"))?;
        info!(system_type = %system_type, system, instance = %instance, "Fetching schema");

        let address = ServiceKind::Schema.address(system_type, system);
        let reply = self
            .bus
            .request_with_timeout(&address, serde_json::json!({}), self.timeout)
            .await
            .map_err(|e| SchemaError::fetch(system, e.to_string()))?;
        let reply: SchemaReply = serde_json::from_value(reply)
            .map_err(|e| SchemaError::invalid_tree(system, e.to_string()))?;

        let arena = Arc::new(NodeArena::from_reply(&reply));
        debug!(system, nodes = arena.len(), "Schema fetched");
        self.cache.lock().insert(key, arena.clone());
        Ok(arena)
    }

    /// Returns `true` if the tree is cached.
    pub fn is_cached(&self, system_type: SystemType, system: &str) -> bool {
        self.cache.lock().contains_key(&ServiceKey::new(system_type, system))
    }
}

// =============================================================================
// GatewaySchema
// =============================================================================

/// The complete query schema.
#[derive(Debug, Clone, Default)]
pub struct GatewaySchema {
    systems: Vec<CompiledSystem>,
    sdl: String,
}

impl GatewaySchema {
    /// The generic schema without a `Systems` root.
    pub fn generic() -> Self {
        Self::from_systems(Vec::new())
    }

    /// Assembles the schema from compiled systems.
    ///
    /// A system whose root or generated type name is also produced by another
    /// system, or by the generic schema, is left out and logged. Every party
    /// to a collision between systems is left out. The `Systems` root is
    /// present only if at least one system remains.
    pub fn from_systems(systems: Vec<CompiledSystem>) -> Self {
        let systems = without_collisions(systems);
        let mut sdl = generic_sdl(!systems.is_empty());
        if !systems.is_empty() {
            sdl.push_str(&format!("type {SYSTEMS_TYPE} {{\n"));
            for system in &systems {
                sdl.push_str(&format!("  {}: {}\n", system.root_type, system.root_type));
            }
            sdl.push_str("}\n");
            for system in &systems {
                sdl.push('\n');
                sdl.push_str(&system.to_sdl());
            }
        }
        Self { systems, sdl }
    }

    /// Fetches and compiles every configured system concurrently.
    ///
    /// Systems that fail to fetch or compile are left out and logged. With
    /// `write_schema_files` set, the SDL is written to `schema_dir`.
    pub async fn build(fetcher: &SchemaFetcher, config: &BridgeConfig) -> Self {
        if config.schemas.is_empty() {
            return Self::generic();
        }

        info!(systems = config.schemas.len(), "Fetching schemas");
        let compiled = join_all(config.schemas.iter().map(|source| async move {
            let arena = fetcher.fetch(source.system_type, &source.system).await?;
            compile(source.system_type, &source.system, &arena, source.field_name)
        }))
        .await;

        let mut systems = Vec::with_capacity(compiled.len());
        for (source, result) in config.schemas.iter().zip(compiled) {
            match result {
                Ok(system) => {
                    info!(system = %source.system, types = system.types.len(), "Schema compiled");
                    systems.push(system);
                }
                Err(e) => {
                    warn!(
                        system = %source.system,
                        error = %e,
                        error_type = e.error_type(),
                        "Omitting system from schema"
                    );
                }
            }
        }

        let schema = Self::from_systems(systems);
        if config.write_schema_files {
            if let Err(e) = schema.write_files(&config.schema_dir) {
                warn!(error = %e, "Failed to write schema files");
            }
        }
        schema
    }

    /// Returns the SDL text.
    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    /// Returns the compiled systems.
    pub fn systems(&self) -> &[CompiledSystem] {
        &self.systems
    }

    /// Returns a compiled system by name.
    pub fn system(&self, name: &str) -> Option<&CompiledSystem> {
        self.systems.iter().find(|s| s.system == name)
    }

    /// Looks up the binding of `type_name.field`.
    pub fn binding(&self, type_name: &str, field: &str) -> Option<&FieldBinding> {
        self.systems
            .iter()
            .find_map(|s| s.type_def(type_name))
            .and_then(|t| t.field(field))
            .map(|f| &f.binding)
    }

    /// Writes `graphql.gql` plus one `graphql-{system}.gql` per system.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Write` on the first failed write.
    pub fn write_files(&self, dir: &Path) -> SchemaResult<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.systems.len() + 1);
        for system in &self.systems {
            let path = dir.join(format!("graphql-{}.gql", system.system.to_lowercase()));
            write_file(&path, &system.to_sdl())?;
            written.push(path);
        }
        let path = dir.join("graphql.gql");
        write_file(&path, &self.sdl)?;
        written.push(path);
        Ok(written)
    }
}

fn without_collisions(systems: Vec<CompiledSystem>) -> Vec<CompiledSystem> {
    let mut owners: HashMap<&str, Vec<&str>> = GENERIC_TYPES
        .iter()
        .map(|name| (*name, vec![GENERIC_OWNER]))
        .collect();
    for system in &systems {
        for name in system.type_names() {
            let names = owners.entry(name).or_default();
            if !names.contains(&system.system.as_str()) {
                names.push(&system.system);
            }
        }
    }

    let collisions: Vec<Option<SchemaError>> = systems
        .iter()
        .map(|system| {
            system.type_names().find_map(|name| {
                let first = owners.get(name)?.iter().find(|owner| **owner != system.system)?;
                let type_name = if name == system.root_type { SYSTEMS_TYPE } else { name };
                Some(SchemaError::NameCollision {
                    type_name: type_name.to_string(),
                    field: name.to_string(),
                    first: first.to_string(),
                    second: system.system.clone(),
                })
            })
        })
        .collect();

    systems
        .into_iter()
        .zip(collisions)
        .filter_map(|(system, collision)| match collision {
            Some(e) => {
                warn!(
                    system = %system.system,
                    error = %e,
                    error_type = e.error_type(),
                    "Omitting system from schema"
                );
                None
            }
            None => Some(system),
        })
        .collect()
}

fn write_file(path: &Path, content: &str) -> SchemaResult<()> {
    std::fs::write(path, content).map_err(|e| SchemaError::Write {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn generic_sdl(with_systems: bool) -> String {
    let type_enum: Vec<&str> = SystemType::ALL.iter().map(SystemType::as_str).collect();
    let systems_field = if with_systems {
        format!("\n  {SYSTEMS_TYPE}: {SYSTEMS_TYPE}\n")
    } else {
        String::new()
    };

    format!(
        r#"enum Type {{
  {types}
}}

type Query {{
  ServerInfo(Type: Type, System: String): ServerInfo
  NodeValue(Type: Type, System: String, NodeId: ID!): Value
  NodeValues(Type: Type, System: String, NodeIds: [ID!]): [Value]
  BrowseNode(Type: Type, System: String, NodeId: ID, Filter: String): [Node]
  FindNodes(Type: Type, System: String, NodeId: ID, Filter: String): [Node]{systems_field}}}

type Mutation {{
  NodeValue(Type: Type, System: String, NodeId: ID!, Value: String!): Boolean
  NodeValues(Type: Type, System: String, NodeIds: [ID!]!, Values: [String!]!): [Boolean]
}}

type Subscription {{
  NodeValue(Type: Type, System: String, NodeId: ID!): Value
  NodeValues(Type: Type, System: String, NodeIds: [ID!]!): Value
}}

type Value {{
  Type: Type
  System: String
  NodeId: ID
  Value: String
  DataType: String
  DataTypeId: Int
  StatusCode: String
  SourceTime: String
  ServerTime: String
  History(Log: ID, From: String, To: String, LastSeconds: Int): [Value]
}}

type Node {{
  Type: Type
  System: String
  NodeId: ID
  BrowseName: String
  DisplayName: String
  NodeClass: String
  Value: Value
  Nodes(Filter: String): [Node]
  History(Log: ID, From: String, To: String, LastSeconds: Int): [Value]
  SetValue(Value: String): Boolean
}}

type ServerInfo {{
  Server: [String]
  Namespace: [String]
  BuildInfo: String
  StartTime: String
  CurrentTime: String
  ServerStatus: String
}}
"#,
        types = type_enum.join("\n  "),
    )
}

// =============================================================================
// Tests
// =============================================================================
