// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT error types.
//!
//! ```text
//! MqttError
//! ├── ConnectionRefused  - broker unreachable
//! ├── NotAuthorized      - bad username/password
//! ├── NotConnected       - operation without a session
//! ├── SubscribeRejected  - broker refused a filter
//! ├── InvalidTopic       - wildcard or empty publish topic
//! ├── PayloadTooLarge    - over max_message_size
//! └── Closed             - session ended
//! ```
//!
//! Every variant converts into [`tagway_core::DriverError`] so the runtime
//! can answer bus requests with the right failure code.

use thiserror::Error;

use tagway_core::DriverError;

/// Errors raised by the MQTT driver and its transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MqttError {
    /// The broker could not be reached.
    #[error("Connection refused by {endpoint}")]
    ConnectionRefused {
        /// `host:port` of the broker.
        endpoint: String,
    },

    /// The broker rejected the credentials.
    #[error("Not authorized on {endpoint}")]
    NotAuthorized {
        /// `host:port` of the broker.
        endpoint: String,
    },

    /// No broker session.
    #[error("Not connected to broker")]
    NotConnected,

    /// The broker rejected a subscription filter.
    #[error("Subscribe rejected for '{filter}': {reason}")]
    SubscribeRejected {
        /// Topic filter.
        filter: String,
        /// Broker reason.
        reason: String,
    },

    /// A topic that cannot be published to.
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// The topic.
        topic: String,
        /// Why it is invalid.
        reason: String,
    },

    /// Payload over the configured maximum.
    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The session was closed.
    #[error("Session closed: {reason}")]
    Closed {
        /// Why it closed.
        reason: String,
    },
}

impl MqttError {
    /// Creates a subscribe rejection.
    pub fn subscribe_rejected(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubscribeRejected {
            filter: filter.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid topic error.
    pub fn invalid_topic(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if reconnecting may help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MqttError::ConnectionRefused { .. } | MqttError::NotConnected | MqttError::Closed { .. }
        )
    }

    /// Returns the error type for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            MqttError::ConnectionRefused { .. } => "connection_refused",
            MqttError::NotAuthorized { .. } => "not_authorized",
            MqttError::NotConnected => "not_connected",
            MqttError::SubscribeRejected { .. } => "subscribe_rejected",
            MqttError::InvalidTopic { .. } => "invalid_topic",
            MqttError::PayloadTooLarge { .. } => "payload_too_large",
            MqttError::Closed { .. } => "closed",
        }
    }
}

/// A Result type with MqttError.
pub type MqttResult<T> = Result<T, MqttError>;

// =============================================================================
// Conversion to DriverError
// =============================================================================

impl From<MqttError> for DriverError {
    fn from(error: MqttError) -> Self {
        match error {
            MqttError::ConnectionRefused { .. } | MqttError::NotAuthorized { .. } => {
                DriverError::connection_failed_with(error.to_string(), error)
            }
            MqttError::NotConnected | MqttError::Closed { .. } => DriverError::NotConnected,
            MqttError::SubscribeRejected { .. } => DriverError::subscription(error.to_string()),
            MqttError::InvalidTopic { .. } | MqttError::PayloadTooLarge { .. } => {
                DriverError::invalid_request(error.to_string())
            }
        }
    }
}
