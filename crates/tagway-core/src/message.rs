// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Request and reply payloads exchanged over the message bus.
//!
//! Every driver exposes the same set of services, addressed as
//! `{SystemType}/{System}/{Service}`:
//!
//! | Service       | Request              | Reply              |
//! |---------------|----------------------|--------------------|
//! | `Read`        | [`ReadRequest`]      | [`ReadReply`]      |
//! | `Write`       | [`WriteRequest`]     | [`WriteReply`]     |
//! | `Browse`      | [`BrowseRequest`]    | [`BrowseReply`]    |
//! | `Schema`      | (empty)              | [`SchemaReply`]    |
//! | `ServerInfo`  | (empty)              | [`ServerInfoReply`]|
//! | `Subscribe`   | [`SubscribeRequest`] | [`OkReply`]        |
//! | `Unsubscribe` | [`SubscribeRequest`] | [`OkReply`]        |
//! | `Publish`     | [`PublishRequest`]   | [`OkReply`]        |
//!
//! History is served by loggers at `{HistoryRoot}/{Log}/QueryHistory`
//! ([`HistoryRequest`] / [`HistoryReply`]).
//!
//! Field names are PascalCase on the wire, except inside [`ValueEnvelope`]
//! which uses camelCase.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::topic::{SystemType, Topic};

// =============================================================================
// Service addresses
// =============================================================================

/// Services every driver registers on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Read current values.
    Read,
    /// Write values.
    Write,
    /// Browse children of a node.
    Browse,
    /// Fetch the full object tree.
    Schema,
    /// Fetch backend server information.
    ServerInfo,
    /// Subscribe a client to topics.
    Subscribe,
    /// Unsubscribe a client from topics.
    Unsubscribe,
    /// One-shot publish of a value to a topic.
    Publish,
}

impl ServiceKind {
    /// All services in registration order.
    pub const ALL: [ServiceKind; 8] = [
        ServiceKind::Read,
        ServiceKind::Write,
        ServiceKind::Browse,
        ServiceKind::Schema,
        ServiceKind::ServerInfo,
        ServiceKind::Subscribe,
        ServiceKind::Unsubscribe,
        ServiceKind::Publish,
    ];

    /// Returns the address suffix.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Read => "Read",
            ServiceKind::Write => "Write",
            ServiceKind::Browse => "Browse",
            ServiceKind::Schema => "Schema",
            ServiceKind::ServerInfo => "ServerInfo",
            ServiceKind::Subscribe => "Subscribe",
            ServiceKind::Unsubscribe => "Unsubscribe",
            ServiceKind::Publish => "Publish",
        }
    }

    /// Returns the bus address of this service for a system.
    pub fn address(&self, system_type: SystemType, system: &str) -> String {
        format!("{}/{}/{}", system_type, system, self.as_str())
    }

    /// Parses the service from the last segment of a bus address.
    pub fn from_address(address: &str) -> Option<Self> {
        let suffix = address.rsplit('/').next()?;
        ServiceKind::ALL.into_iter().find(|s| s.as_str() == suffix)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the address of a logger's history service.
pub fn history_address(history_root: &str, log: &str) -> String {
    format!("{history_root}/{log}/QueryHistory")
}

// =============================================================================
// OneOrMany
// =============================================================================

/// A field that carries either a single value or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A list of values.
    Many(Vec<T>),
    /// A single value.
    One(T),
}

impl<T> OneOrMany<T> {
    /// Returns `true` for the list form.
    pub fn is_many(&self) -> bool {
        matches!(self, OneOrMany::Many(_))
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        match self {
            OneOrMany::Many(v) => v.len(),
            OneOrMany::One(_) => 1,
        }
    }

    /// Returns `true` for an empty list.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens into a list.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(v) => vec![v],
        }
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(values: Vec<T>) -> Self {
        OneOrMany::Many(values)
    }
}

// =============================================================================
// ValueEnvelope
// =============================================================================

/// A value as produced by a backend, with quality and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueEnvelope {
    /// The value itself.
    #[serde(default)]
    pub value: serde_json::Value,
    /// Backend data type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type_name: Option<String>,
    /// Backend data type id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type_id: Option<i64>,
    /// Status code (0 = good).
    #[serde(default)]
    pub status_code: i64,
    /// When the backend sampled the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_time: Option<DateTime<Utc>>,
    /// When the backend server stamped the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<DateTime<Utc>>,
}

impl ValueEnvelope {
    /// Creates a good-status envelope stamped with the current time.
    pub fn now(value: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            value,
            data_type_name: None,
            data_type_id: None,
            status_code: 0,
            source_time: Some(now),
            server_time: Some(now),
        }
    }

    /// Decodes an envelope from a JSON value, `None` if malformed.
    pub fn decode(value: &serde_json::Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

// =============================================================================
// Read / Write
// =============================================================================

/// `Read` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadRequest {
    /// One node id or a list.
    pub node_id: OneOrMany<String>,
}

/// `Read` reply.
///
/// `Result` is an envelope for a single read and a list of
/// envelope-or-null for a batch. It is kept as raw JSON so each entry can be
/// decoded on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadReply {
    /// Raw result.
    #[serde(default)]
    pub result: serde_json::Value,
}

impl ReadReply {
    /// Builds a single-value reply.
    pub fn single(envelope: Option<ValueEnvelope>) -> Self {
        Self {
            result: to_json_or_null(&envelope),
        }
    }

    /// Builds a batch reply.
    pub fn batch(envelopes: Vec<Option<ValueEnvelope>>) -> Self {
        Self {
            result: to_json_or_null(&envelopes),
        }
    }

    /// Decodes a single-value result.
    pub fn envelope(&self) -> Option<ValueEnvelope> {
        ValueEnvelope::decode(&self.result)
    }

    /// Decodes a batch result for `expected` ids.
    ///
    /// Malformed entries become `None`. A missing or short list pads with
    /// `None` so the output always has `expected` entries.
    pub fn envelopes(&self, expected: usize) -> Vec<Option<ValueEnvelope>> {
        let entries = self.result.as_array().map(Vec::as_slice).unwrap_or(&[]);
        (0..expected)
            .map(|i| entries.get(i).and_then(ValueEnvelope::decode))
            .collect()
    }
}

/// `Write` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteRequest {
    /// One node id or a list.
    pub node_id: OneOrMany<String>,
    /// One value or a list, parallel to `node_id`.
    pub value: OneOrMany<String>,
}

/// `Write` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteReply {
    /// One flag or a list, parallel to the request.
    #[serde(rename = "Ok")]
    pub ok: OneOrMany<bool>,
}

// =============================================================================
// Browse / Schema / ServerInfo
// =============================================================================

/// `Browse` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrowseRequest {
    /// Node whose children are listed.
    pub node_id: String,
}

/// One child returned by `Browse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrowseEntry {
    /// Node id.
    pub node_id: String,
    /// Browse name.
    #[serde(default)]
    pub browse_name: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// Node class (`Object`, `Variable`, ...).
    #[serde(default)]
    pub node_class: String,
}

/// `Browse` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrowseReply {
    /// Children of the requested node.
    #[serde(default)]
    pub result: Vec<BrowseEntry>,
}

/// One node of a schema tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchemaNode {
    /// Node id.
    pub node_id: String,
    /// Browse name.
    #[serde(default)]
    pub browse_name: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// Node class.
    #[serde(default)]
    pub node_class: String,
    /// Children.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<SchemaNode>,
}

/// `Schema` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchemaReply {
    /// Top-level objects.
    #[serde(default)]
    pub objects: Vec<SchemaNode>,
}

/// Backend server information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
    /// Server URIs.
    #[serde(default)]
    pub server: Vec<String>,
    /// Namespace URIs.
    #[serde(default)]
    pub namespace: Vec<String>,
    /// Build information.
    #[serde(default)]
    pub build_info: String,
    /// Server start time.
    #[serde(default)]
    pub start_time: String,
    /// Server current time.
    #[serde(default)]
    pub current_time: String,
    /// Server status.
    #[serde(default)]
    pub server_status: String,
}

/// `ServerInfo` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfoReply {
    /// The information.
    pub result: ServerInfo,
}

// =============================================================================
// Subscribe / Publish
// =============================================================================

/// `Subscribe` and `Unsubscribe` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscribeRequest {
    /// Requesting client.
    pub client_id: String,
    /// A single topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Topic>,
    /// Several topics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<Topic>>,
}

impl SubscribeRequest {
    /// Creates a request for one topic.
    pub fn single(client_id: impl Into<String>, topic: Topic) -> Self {
        Self {
            client_id: client_id.into(),
            topic: Some(topic),
            topics: None,
        }
    }

    /// Creates a request for several topics.
    pub fn many(client_id: impl Into<String>, topics: Vec<Topic>) -> Self {
        Self {
            client_id: client_id.into(),
            topic: None,
            topics: Some(topics),
        }
    }

    /// Returns every topic carried by the request.
    pub fn all_topics(&self) -> Vec<Topic> {
        self.topic
            .iter()
            .cloned()
            .chain(self.topics.iter().flatten().cloned())
            .collect()
    }
}

/// One-shot publish request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublishRequest {
    /// Destination topic.
    pub topic: Topic,
    /// Payload as text.
    pub value: String,
}

/// Generic `{"Ok": bool}` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkReply {
    /// Outcome.
    #[serde(rename = "Ok")]
    pub ok: bool,
}

impl OkReply {
    /// A successful reply.
    pub const OK: OkReply = OkReply { ok: true };
    /// A failed reply.
    pub const FAILED: OkReply = OkReply { ok: false };
}

/// A value pushed to topic consumers for `Json`/`Pretty` topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicValue {
    /// The resolved topic.
    pub topic: Topic,
    /// The transformed value.
    pub value: serde_json::Value,
}

// =============================================================================
// History
// =============================================================================

/// `QueryHistory` request. Times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// System name.
    #[serde(rename = "System")]
    pub system: String,
    /// Node id.
    #[serde(rename = "NodeId")]
    pub node_id: String,
    /// Window start.
    #[serde(rename = "T1")]
    pub t1: i64,
    /// Window end.
    #[serde(rename = "T2")]
    pub t2: i64,
}

/// One history row: `(sourceTime, value, statusCode, system)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow(
    pub serde_json::Value,
    pub serde_json::Value,
    pub serde_json::Value,
    pub serde_json::Value,
);

/// `QueryHistory` reply.
///
/// Rows that are not four-element arrays are skipped on decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryReply {
    /// Raw rows.
    #[serde(default)]
    pub result: Vec<serde_json::Value>,
}

impl HistoryReply {
    /// Builds a reply from rows.
    pub fn from_rows(rows: Vec<HistoryRow>) -> Self {
        Self {
            result: rows.iter().map(to_json_or_null).collect(),
        }
    }

    /// Decodes the well-formed rows.
    pub fn rows(&self) -> Vec<HistoryRow> {
        self.result
            .iter()
            .filter_map(|row| serde_json::from_value(row.clone()).ok())
            .collect()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn to_json_or_null<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Decodes a JSON payload, mapping failures into a bus serialization error.
pub fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, crate::error::BusError> {
    serde_json::from_value(value).map_err(Into::into)
}

/// Encodes a payload as JSON.
pub fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, crate::error::BusError> {
    serde_json::to_value(value).map_err(Into::into)
}

// =============================================================================
// Tests
// =============================================================================
