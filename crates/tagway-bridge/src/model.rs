// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client-facing result model.
//!
//! Field names are PascalCase on the wire, matching the query schema types
//! `Value`, `Node` and `ServerInfo`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use tagway_core::message::{BrowseEntry, HistoryRow, ValueEnvelope};
use tagway_core::topic::SystemType;

/// Node class of variables.
pub const NODE_CLASS_VARIABLE: &str = "Variable";

/// Node class of objects.
pub const NODE_CLASS_OBJECT: &str = "Object";

// =============================================================================
// Target
// =============================================================================

/// The `(Type, System)` pair an operation is addressed to.
///
/// Missing parts are filled from the bridge defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Backend family.
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub system_type: Option<SystemType>,
    /// System name.
    #[serde(rename = "System", default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl Target {
    /// A target naming both parts.
    pub fn new(system_type: SystemType, system: impl Into<String>) -> Self {
        Self {
            system_type: Some(system_type),
            system: Some(system.into()),
        }
    }

    /// A target naming only the system.
    pub fn system(system: impl Into<String>) -> Self {
        Self {
            system_type: None,
            system: Some(system.into()),
        }
    }

    /// Fills missing parts from the defaults.
    pub fn resolve(&self, default_type: SystemType, default_system: &str) -> (SystemType, String) {
        (
            self.system_type.unwrap_or(default_type),
            self.system
                .clone()
                .unwrap_or_else(|| default_system.to_string()),
        )
    }
}

// =============================================================================
// NodeValue
// =============================================================================

/// The `Value` result type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeValue {
    /// Backend family, absent on history rows.
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub system_type: Option<SystemType>,
    /// System name.
    pub system: Option<String>,
    /// Node id.
    pub node_id: String,
    /// Value rendered as text.
    pub value: Option<String>,
    /// Data type name.
    pub data_type: Option<String>,
    /// Data type id.
    pub data_type_id: Option<i64>,
    /// Status code rendered as text.
    pub status_code: Option<String>,
    /// Source timestamp, ISO 8601.
    pub source_time: Option<String>,
    /// Server timestamp, ISO 8601.
    pub server_time: Option<String>,
}

impl NodeValue {
    /// Reshapes a backend envelope.
    pub fn from_envelope(
        system_type: SystemType,
        system: &str,
        node_id: &str,
        envelope: &ValueEnvelope,
    ) -> Self {
        Self {
            system_type: Some(system_type),
            system: Some(system.to_string()),
            node_id: node_id.to_string(),
            value: json_text(&envelope.value),
            data_type: envelope.data_type_name.clone(),
            data_type_id: envelope.data_type_id,
            status_code: Some(envelope.status_code.to_string()),
            source_time: envelope.source_time.as_ref().map(iso),
            server_time: envelope.server_time.as_ref().map(iso),
        }
    }

    /// Reshapes a history row `(sourceTime, value, statusCode, system)`.
    pub fn from_history_row(node_id: &str, row: &HistoryRow) -> Self {
        let HistoryRow(source_time, value, status_code, system) = row;
        Self {
            system_type: None,
            system: json_text(system),
            node_id: node_id.to_string(),
            value: json_text(value),
            data_type: None,
            data_type_id: None,
            status_code: json_text(status_code),
            source_time: json_text(source_time),
            server_time: None,
        }
    }
}

// =============================================================================
// NodeInfo
// =============================================================================

/// The `Node` result type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeInfo {
    /// Backend family.
    #[serde(rename = "Type")]
    pub system_type: SystemType,
    /// System name.
    pub system: String,
    /// Node id.
    pub node_id: String,
    /// Browse name.
    pub browse_name: String,
    /// Display name.
    pub display_name: String,
    /// `Variable`, `Object`, ...
    pub node_class: String,
}

impl NodeInfo {
    /// Reshapes a browse entry.
    pub fn from_entry(system_type: SystemType, system: &str, entry: &BrowseEntry) -> Self {
        Self {
            system_type,
            system: system.to_string(),
            node_id: entry.node_id.clone(),
            browse_name: entry.browse_name.clone(),
            display_name: entry.display_name.clone(),
            node_class: entry.node_class.clone(),
        }
    }

    /// Returns the target this node lives on.
    pub fn target(&self) -> Target {
        Target::new(self.system_type, &self.system)
    }

    /// Returns `true` for object nodes.
    pub fn is_object(&self) -> bool {
        self.node_class == NODE_CLASS_OBJECT
    }

    /// Returns `true` for variable nodes.
    pub fn is_variable(&self) -> bool {
        self.node_class == NODE_CLASS_VARIABLE
    }
}

// =============================================================================
// HistoryArgs
// =============================================================================

/// Arguments of the `History` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryArgs {
    /// Logger to query.
    #[serde(default)]
    pub log: Option<String>,
    /// Window start.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Window end.
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    /// Relative window ending now.
    #[serde(default)]
    pub last_seconds: Option<u64>,
}

impl HistoryArgs {
    /// A relative window of `seconds`.
    pub fn last_seconds(seconds: u64) -> Self {
        Self {
            last_seconds: Some(seconds),
            ..Self::default()
        }
    }

    /// An explicit window.
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    /// Selects the logger.
    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn iso(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Renders a JSON value as text: strings unquoted, `null` as `None`.
pub(crate) fn json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
