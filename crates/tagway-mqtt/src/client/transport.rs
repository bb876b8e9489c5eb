// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Abstract transport layer for broker sessions.
//!
//! This module defines the [`MqttTransport`] trait that hides the broker
//! client from [`MqttDriver`](crate::MqttDriver). Incoming publishes and
//! session loss are reported through the event channel handed to
//! [`MqttTransport::connect`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tagway_config::MqttSystemConfig;

use crate::error::MqttResult;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

// =============================================================================
// QoS
// =============================================================================

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    AtLeastOnce,
    /// Assured single delivery.
    ExactlyOnce,
}

impl QoS {
    /// Maps a configured level; anything above 2 is clamped to `ExactlyOnce`.
    pub fn from_u8(level: u8) -> Self {
        match level {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    /// Returns the numeric level.
    pub const fn as_u8(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qos{}", self.as_u8())
    }
}

// =============================================================================
// ConnectOptions
// =============================================================================

/// Session parameters derived from an MQTT system configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Username.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Use TLS.
    pub ssl: bool,
    /// Start with a clean session.
    pub clean_session: bool,
    /// Largest accepted message in bytes.
    pub max_message_size: usize,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Keep-alive interval.
    pub keep_alive: Duration,
}

impl ConnectOptions {
    /// Builds session options for `config`.
    pub fn from_config(config: &MqttSystemConfig, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.as_ref().map(|p| p.expose().to_string()),
            ssl: config.ssl,
            clean_session: true,
            max_message_size: config.max_message_size(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    /// Returns `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("client_id", &self.client_id)
            .field("endpoint", &self.endpoint())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ssl", &self.ssl)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

// =============================================================================
// TransportEvent
// =============================================================================

/// What a transport reports while a session is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A publish matching one of the session's filters.
    Message {
        /// Concrete topic the message was published on.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
    /// The session ended without `disconnect` being called.
    Disconnected {
        /// Why the session ended.
        reason: String,
    },
}

// =============================================================================
// MqttTransport Trait
// =============================================================================

/// Abstract broker session.
///
/// # Implementors
///
/// - [`NetworkTransport`](super::NetworkTransport): a real broker over TCP/TLS
/// - [`MemoryTransport`](super::MemoryTransport): an in-process broker
///
/// Operations take `&mut self`; the driver owns its transport exclusively.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    // =========================================================================
    // Connection Management
    // =========================================================================

    /// Opens a session and starts delivering [`TransportEvent`]s to `events`.
    ///
    /// # Errors
    ///
    /// Returns `MqttError::ConnectionRefused` or `MqttError::NotAuthorized`
    /// if the broker does not accept the session.
    async fn connect(
        &mut self,
        options: &ConnectOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> MqttResult<()>;

    /// Closes the session. No events are delivered afterwards.
    async fn disconnect(&mut self) -> MqttResult<()>;

    /// Returns `true` while a session is open.
    fn is_connected(&self) -> bool;

    // =========================================================================
    // Operations
    // =========================================================================

    /// Subscribes to a topic filter.
    async fn subscribe(&mut self, filter: &str, qos: QoS) -> MqttResult<()>;

    /// Removes a topic filter.
    async fn unsubscribe(&mut self, filter: &str) -> MqttResult<()>;

    /// Publishes a payload.
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> MqttResult<()>;

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Returns a human-readable name for logs.
    fn display_name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagway_config::SecretValue;

    #[test]
    fn test_qos_levels() {
        assert_eq!(QoS::from_u8(0), QoS::AtMostOnce);
        assert_eq!(QoS::from_u8(1), QoS::AtLeastOnce);
        assert_eq!(QoS::from_u8(7), QoS::ExactlyOnce);
        assert_eq!(QoS::AtLeastOnce.as_u8(), 1);
        assert_eq!(QoS::ExactlyOnce.to_string(), "qos2");
    }

    #[test]
    fn test_connect_options_from_config() {
        let mut config = MqttSystemConfig::new("broker");
        config.host = "plant.local".into();
        config.port = 8883;
        config.username = Some("edge".into());
        config.password = Some(SecretValue::new("hunter2"));
        config.ssl = true;

        let options = ConnectOptions::from_config(&config, "tagway-1");
        assert_eq!(options.endpoint(), "plant.local:8883");
        assert_eq!(options.password.as_deref(), Some("hunter2"));
        assert_eq!(options.max_message_size, 8 * 1024);
        assert!(options.ssl);

        let debug = format!("{options:?}");
        assert!(!debug.contains("hunter2"));
    }
}
