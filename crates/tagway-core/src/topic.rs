// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Topic addresses.
//!
//! A topic identifies a backend system, a node (or wildcard pattern) within
//! it and the encoding format in which resolved values are pushed:
//!
//! ```text
//! {SystemType}/{SystemName}/{kind}:{format}/{node...}
//!
//! Opc/plant1/node:json/ns=2;s=Motor/Speed
//! Mqtt/broker/node:value/factory/+/temperature
//! Mqtt/broker/pretty/factory/#            (kind defaults to "node")
//! ```
//!
//! Everything after the third `/` belongs to the node, so backend node ids and
//! MQTT topic filters that contain `/` are carried verbatim.
//!
//! # Example
//!
//! ```
//! use tagway_core::topic::{Format, SystemType, Topic};
//!
//! let topic = Topic::parse("Mqtt/broker/node:json/factory/+/temp").unwrap();
//! assert_eq!(topic.system_type, SystemType::Mqtt);
//! assert_eq!(topic.format, Format::Json);
//! assert_eq!(topic.node, "factory/+/temp");
//! assert_eq!(topic.topic_name(), "Mqtt/broker/node:json/factory/+/temp");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TopicError;

// =============================================================================
// SystemType
// =============================================================================

/// Backend system families served by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemType {
    /// OPC-style address spaces.
    Opc,
    /// PLC tag systems.
    Plc,
    /// MQTT brokers.
    Mqtt,
    /// DDS domains.
    Dds,
}

impl SystemType {
    /// All system types, in declaration order.
    pub const ALL: [SystemType; 4] = [SystemType::Opc, SystemType::Plc, SystemType::Mqtt, SystemType::Dds];

    /// Returns the canonical name used in bus addresses.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SystemType::Opc => "Opc",
            SystemType::Plc => "Plc",
            SystemType::Mqtt => "Mqtt",
            SystemType::Dds => "Dds",
        }
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemType {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SystemType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TopicError::malformed(s, "unknown system type"))
    }
}

// =============================================================================
// TopicKind / Format
// =============================================================================

/// How the node part of a topic is interpreted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TopicKind {
    /// The node is a backend node id (or topic filter).
    #[default]
    Node,
    /// The node is a browse path below the root object.
    Path,
}

impl TopicKind {
    /// Returns the lowercase key used in addresses.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Node => "node",
            TopicKind::Path => "path",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "node" => Some(TopicKind::Node),
            "path" => Some(TopicKind::Path),
            _ => None,
        }
    }
}

/// Encoding of values pushed for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Format {
    /// The raw payload, untouched.
    Value,
    /// `{"Topic": .., "Value": ..}` as compact JSON.
    #[default]
    Json,
    /// Same as `Json`, pretty-printed.
    Pretty,
}

impl Format {
    /// Returns the lowercase key used in addresses.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Format::Value => "value",
            Format::Json => "json",
            Format::Pretty => "pretty",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "value" => Some(Format::Value),
            "json" => Some(Format::Json),
            "pretty" => Some(Format::Pretty),
            _ => None,
        }
    }
}

// =============================================================================
// Topic
// =============================================================================

/// A parsed topic address.
///
/// `node` is the pattern exactly as the client gave it. `browse_path` is only
/// ever set to a concrete wire address, once an incoming value has been
/// resolved against this topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "TopicRecord", try_from = "TopicRecord")]
pub struct Topic {
    /// Backend family.
    pub system_type: SystemType,
    /// Configured system name.
    pub system_name: String,
    /// Node addressing mode.
    pub kind: TopicKind,
    /// Push encoding.
    pub format: Format,
    /// Node id or wildcard pattern.
    pub node: String,
    /// Concrete address this topic was resolved against.
    pub browse_path: Option<String>,
}

impl Topic {
    /// Creates a node topic.
    pub fn new(
        system_type: SystemType,
        system_name: impl Into<String>,
        format: Format,
        node: impl Into<String>,
    ) -> Self {
        Self {
            system_type,
            system_name: system_name.into(),
            kind: TopicKind::Node,
            format,
            node: node.into(),
            browse_path: None,
        }
    }

    /// Sets the addressing mode.
    pub fn with_kind(mut self, kind: TopicKind) -> Self {
        self.kind = kind;
        self
    }

    /// Parses an address of the form `{type}/{system}/{kind}:{format}/{node}`.
    ///
    /// # Errors
    ///
    /// Returns `TopicError::MalformedAddress` when a segment is missing or
    /// empty, or when the system type, kind or format is unknown.
    pub fn parse(address: &str) -> Result<Self, TopicError> {
        let mut parts = address.splitn(4, '/');
        let (Some(system_type), Some(system_name), Some(format), Some(node)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TopicError::malformed(
                address,
                "expected {type}/{system}/{format}/{node}",
            ));
        };

        let system_type = system_type
            .parse::<SystemType>()
            .map_err(|_| TopicError::malformed(address, format!("unknown system type '{system_type}'")))?;

        if system_name.is_empty() {
            return Err(TopicError::malformed(address, "empty system name"));
        }

        let (kind, format) = match format.split_once(':') {
            Some((kind, format)) => (
                TopicKind::parse(kind)
                    .ok_or_else(|| TopicError::malformed(address, format!("unknown topic kind '{kind}'")))?,
                Format::parse(format)
                    .ok_or_else(|| TopicError::malformed(address, format!("unknown format '{format}'")))?,
            ),
            None => (
                TopicKind::Node,
                Format::parse(format)
                    .ok_or_else(|| TopicError::malformed(address, format!("unknown format '{format}'")))?,
            ),
        };

        if node.is_empty() {
            return Err(TopicError::malformed(address, "empty node"));
        }

        Ok(Self {
            system_type,
            system_name: system_name.to_string(),
            kind,
            format,
            node: node.to_string(),
            browse_path: None,
        })
    }

    /// Returns the canonical address. Resolved values for this topic are
    /// published on the bus under this name.
    pub fn topic_name(&self) -> String {
        format!(
            "{}/{}/{}:{}/{}",
            self.system_type,
            self.system_name,
            self.kind.as_str(),
            self.format.as_str(),
            self.node
        )
    }

    /// Returns `true` if the node contains wildcard segments.
    pub fn is_pattern(&self) -> bool {
        self.node.split('/').any(|s| s == "+" || s == "#")
    }

    /// Returns a copy of this topic bound to a concrete wire address.
    pub fn resolved(&self, address: impl Into<String>) -> Self {
        let mut topic = self.clone();
        topic.browse_path = Some(address.into());
        topic
    }

    /// Encodes this topic as a structured JSON record.
    pub fn encode_to_json(&self) -> serde_json::Value {
        serde_json::to_value(TopicRecord::from(self.clone())).unwrap_or(serde_json::Value::Null)
    }

    /// Decodes a topic from its structured JSON record.
    pub fn decode_from_json(value: serde_json::Value) -> Result<Self, TopicError> {
        serde_json::from_value(value).map_err(|e| TopicError::malformed("<record>", e.to_string()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic_name())
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::parse(s)
    }
}

// =============================================================================
// Transport record
// =============================================================================

/// Wire representation of a [`Topic`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TopicRecord {
    system_type: SystemType,
    system_name: String,
    #[serde(default)]
    topic_type: TopicKind,
    #[serde(default)]
    format: Format,
    node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    browse_path: Option<String>,
    #[serde(default, skip_deserializing)]
    topic_name: String,
}

impl From<Topic> for TopicRecord {
    fn from(topic: Topic) -> Self {
        let topic_name = topic.topic_name();
        Self {
            system_type: topic.system_type,
            system_name: topic.system_name,
            topic_type: topic.kind,
            format: topic.format,
            node: topic.node,
            browse_path: topic.browse_path,
            topic_name,
        }
    }
}

impl TryFrom<TopicRecord> for Topic {
    type Error = TopicError;

    fn try_from(record: TopicRecord) -> Result<Self, Self::Error> {
        if record.system_name.is_empty() || record.node.is_empty() {
            return Err(TopicError::malformed(
                format!("{}/{}", record.system_type, record.system_name),
                "empty system name or node",
            ));
        }
        Ok(Topic {
            system_type: record.system_type,
            system_name: record.system_name,
            kind: record.topic_type,
            format: record.format,
            node: record.node,
            browse_path: record.browse_path,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
