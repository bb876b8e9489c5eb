// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol driver abstraction.
//!
//! A [`ProtocolDriver`] is the backend-specific half of a driver: it knows
//! how to connect, how to subscribe to node patterns and how to serve
//! read/write/browse requests. Everything else (bus handlers, topic
//! resolution, client bookkeeping, reconnection) lives in
//! [`DriverRuntime`](crate::runtime::DriverRuntime), which owns the driver
//! exclusively and calls it from a single task.
//!
//! # Lifecycle
//!
//! ```text
//!             connect(events) ok
//! Disconnected ─────────────────▶ Connected ◀──▶ Subscribing / Unsubscribing
//!      ▲   │ connect failed           │
//!      │   └──── backoff ◀────────────┘ DriverEvent::ConnectionLost
//! ```
//!
//! Raw backend values and connection loss are reported through the
//! [`DriverEvents`] sink handed to `connect`.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{DriverError, DriverResult};
use crate::message::{BrowseEntry, SchemaReply, ServerInfo, ValueEnvelope};
use crate::subscription::MonitoredItem;
use crate::topic::{SystemType, Topic};

// =============================================================================
// ProtocolDriver Trait
// =============================================================================

/// Backend capability set.
///
/// Capabilities a backend does not have keep the default implementation and
/// answer with [`DriverError::Unsupported`].
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    // =========================================================================
    // Identification
    // =========================================================================

    /// Returns the instance name, used in logs.
    fn name(&self) -> &str;

    /// Returns the backend family.
    fn system_type(&self) -> SystemType;

    // =========================================================================
    // Connection Management
    // =========================================================================

    /// Connects to the backend.
    ///
    /// The driver keeps `events` for the lifetime of the connection and
    /// reports raw values and connection loss through it.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::ConnectionFailed` if the backend is unreachable.
    async fn connect(&mut self, events: DriverEvents) -> DriverResult<()>;

    /// Closes the backend connection.
    async fn disconnect(&mut self) -> DriverResult<()>;

    /// Returns `true` while connected.
    fn is_connected(&self) -> bool;

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribes to node patterns, returning one item per pattern.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Subscription` if the backend rejects a pattern.
    async fn subscribe(&mut self, patterns: &[String]) -> DriverResult<Vec<MonitoredItem>>;

    /// Releases backend items.
    async fn unsubscribe(&mut self, items: &[MonitoredItem]) -> DriverResult<()>;

    // =========================================================================
    // Requests
    // =========================================================================

    /// Publishes a payload to the backend node named by `topic`.
    async fn publish(&mut self, _topic: &Topic, _payload: &[u8]) -> DriverResult<()> {
        Err(DriverError::unsupported("publish"))
    }

    /// Reads current values, one entry per node id.
    async fn read(&mut self, _node_ids: &[String]) -> DriverResult<Vec<Option<ValueEnvelope>>> {
        Err(DriverError::unsupported("read"))
    }

    /// Writes an already-transformed payload to one node.
    async fn write(&mut self, _node_id: &str, _payload: &[u8]) -> DriverResult<()> {
        Err(DriverError::unsupported("write"))
    }

    /// Lists the children of a node.
    async fn browse(&mut self, _node_id: &str) -> DriverResult<Vec<BrowseEntry>> {
        Err(DriverError::unsupported("browse"))
    }

    /// Returns the full object tree.
    async fn schema(&mut self) -> DriverResult<SchemaReply> {
        Err(DriverError::unsupported("schema"))
    }

    /// Returns backend server information.
    async fn server_info(&mut self) -> DriverResult<ServerInfo> {
        Err(DriverError::unsupported("server_info"))
    }
}

// =============================================================================
// Driver Events
// =============================================================================

/// Events a driver reports to its runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// A raw value arrived on a concrete wire address.
    Value {
        /// Wire address (MQTT topic, node id, ...).
        address: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
    /// The backend connection dropped.
    ConnectionLost {
        /// Why the connection dropped.
        reason: String,
    },
}

/// Event sink handed to [`ProtocolDriver::connect`].
///
/// Each connection gets its own sink. Events from a sink whose connection
/// has been replaced are ignored by the runtime.
#[derive(Debug, Clone)]
pub struct DriverEvents {
    sender: mpsc::UnboundedSender<(u64, DriverEvent)>,
    generation: u64,
}

impl DriverEvents {
    /// Creates a sink for connection `generation`.
    pub fn new(sender: mpsc::UnboundedSender<(u64, DriverEvent)>, generation: u64) -> Self {
        Self { sender, generation }
    }

    /// Creates a standalone sink and its receiver, generation 0.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(u64, DriverEvent)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender, 0), receiver)
    }

    /// Returns the connection generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports a raw value. Returns `false` if the runtime is gone.
    pub fn value(&self, address: impl Into<String>, payload: impl Into<Vec<u8>>) -> bool {
        self.send(DriverEvent::Value {
            address: address.into(),
            payload: payload.into(),
        })
    }

    /// Reports connection loss. Returns `false` if the runtime is gone.
    pub fn connection_lost(&self, reason: impl Into<String>) -> bool {
        self.send(DriverEvent::ConnectionLost {
            reason: reason.into(),
        })
    }

    /// Returns `true` if the runtime stopped listening.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn send(&self, event: DriverEvent) -> bool {
        self.sender.send((self.generation, event)).is_ok()
    }
}

// =============================================================================
// Driver State
// =============================================================================

/// Connection state published by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverState {
    /// No backend connection.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and idle.
    Connected,
    /// Connected, backend subscribe in progress.
    Subscribing,
    /// Connected, backend unsubscribe in progress.
    Unsubscribing,
}

impl DriverState {
    /// Returns `true` for the connected states.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            DriverState::Connected | DriverState::Subscribing | DriverState::Unsubscribing
        )
    }

    /// Returns the state name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DriverState::Disconnected => "disconnected",
            DriverState::Connecting => "connecting",
            DriverState::Connected => "connected",
            DriverState::Subscribing => "subscribing",
            DriverState::Unsubscribing => "unsubscribing",
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
