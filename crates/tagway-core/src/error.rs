// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for tagway.
//!
//! This module defines the error types shared by the routing engine, the
//! message bus and the driver runtime:
//!
//! - Clear, descriptive error messages
//! - Retryable vs. non-retryable classification
//! - Stable `error_type()` strings for structured logging
//!
//! # Error Hierarchy
//!
//! ```text
//! GatewayError (root)
//! ├── TopicError      - Address parsing and pattern validation
//! ├── DriverError     - Backend connection, subscription and request handling
//! ├── BusError        - Request/reply and publish on the internal bus
//! └── TransformError  - Read/write value transforms
//! ```
//!
//! # Examples
//!
//! ```
//! use tagway_core::error::{GatewayError, DriverError};
//! use std::time::Duration;
//!
//! let error = DriverError::timeout(Duration::from_secs(5));
//! assert!(error.is_retryable());
//!
//! let gateway_error: GatewayError = error.into();
//! assert!(gateway_error.is_retryable());
//! ```

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// GatewayError - Root Error Type
// =============================================================================

/// The root error type for tagway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Topic or pattern error.
    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    /// Protocol driver error.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Message bus error.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Value transform error.
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),
}

impl GatewayError {
    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Driver(e) => e.is_retryable(),
            GatewayError::Bus(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Topic(_) => "topic",
            GatewayError::Driver(_) => "driver",
            GatewayError::Bus(_) => "bus",
            GatewayError::Transform(_) => "transform",
        }
    }
}

// =============================================================================
// TopicError
// =============================================================================

/// Errors raised while parsing addresses or validating subscription patterns.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    /// The address does not follow `{type}/{system}/{format}/{node}`.
    #[error("Malformed address '{address}': {message}")]
    MalformedAddress {
        /// The offending address.
        address: String,
        /// What is wrong with it.
        message: String,
    },

    /// The wildcard pattern cannot match anything.
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// What is wrong with it.
        message: String,
    },
}

impl TopicError {
    /// Creates a malformed address error.
    pub fn malformed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid pattern error.
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// DriverError
// =============================================================================

/// Protocol driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The backend could not be reached.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The driver is not connected to its backend.
    #[error("Driver is not connected")]
    NotConnected,

    /// The backend rejected a subscribe or unsubscribe call.
    #[error("Subscription error: {message}")]
    Subscription {
        /// Error message.
        message: String,
    },

    /// Operation timed out.
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// The timeout duration.
        duration: Duration,
    },

    /// The backend kind does not implement this capability.
    #[error("Operation '{operation}' is not supported by this driver")]
    Unsupported {
        /// The operation name.
        operation: &'static str,
    },

    /// Protocol-specific error.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },

    /// The request payload could not be interpreted.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message.
        message: String,
    },
}

impl DriverError {
    /// Creates a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a connection failed error with a source.
    pub fn connection_failed_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a subscription error.
    pub fn subscription(message: impl Into<String>) -> Self {
        Self::Subscription {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::Timeout { .. } | DriverError::ConnectionFailed { .. } | DriverError::NotConnected
        )
    }

    /// Returns the numeric failure code used in bus failure replies.
    pub fn failure_code(&self) -> i32 {
        match self {
            DriverError::ConnectionFailed { .. } | DriverError::NotConnected => 503,
            DriverError::Timeout { .. } => 504,
            DriverError::Unsupported { .. } => 501,
            DriverError::InvalidRequest { .. } => 400,
            DriverError::Subscription { .. } | DriverError::Protocol { .. } => 500,
        }
    }

    /// Returns the error type for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            DriverError::ConnectionFailed { .. } => "connection_failed",
            DriverError::NotConnected => "not_connected",
            DriverError::Subscription { .. } => "subscription",
            DriverError::Timeout { .. } => "timeout",
            DriverError::Unsupported { .. } => "unsupported",
            DriverError::Protocol { .. } => "protocol",
            DriverError::InvalidRequest { .. } => "invalid_request",
        }
    }
}

impl Clone for DriverError {
    fn clone(&self) -> Self {
        match self {
            DriverError::ConnectionFailed { message, .. } => DriverError::ConnectionFailed {
                message: message.clone(),
                source: None,
            },
            DriverError::NotConnected => DriverError::NotConnected,
            DriverError::Subscription { message } => DriverError::Subscription {
                message: message.clone(),
            },
            DriverError::Timeout { duration } => DriverError::Timeout { duration: *duration },
            DriverError::Unsupported { operation } => DriverError::Unsupported { operation },
            DriverError::Protocol { message } => DriverError::Protocol {
                message: message.clone(),
            },
            DriverError::InvalidRequest { message } => DriverError::InvalidRequest {
                message: message.clone(),
            },
        }
    }
}

// =============================================================================
// BusError
// =============================================================================

/// Message bus errors.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Nobody handles requests on this address.
    #[error("No handler registered for '{address}'")]
    NoHandler {
        /// The request address.
        address: String,
    },

    /// No reply arrived within the request bound.
    #[error("Request to '{address}' timed out after {duration:?}")]
    Timeout {
        /// The request address.
        address: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The handler went away before replying.
    #[error("Channel is closed")]
    Closed,

    /// The handler replied with a failure.
    #[error("Request failed ({code}): {message}")]
    Failed {
        /// Failure code.
        code: i32,
        /// Failure message.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },
}

impl BusError {
    /// Creates a no-handler error.
    pub fn no_handler(address: impl Into<String>) -> Self {
        Self::NoHandler {
            address: address.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(address: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            address: address.into(),
            duration,
        }
    }

    /// Creates a failure reply error.
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self::Failed {
            code,
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Timeout { .. } | BusError::NoHandler { .. })
    }

    /// Returns the error type for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            BusError::NoHandler { .. } => "no_handler",
            BusError::Timeout { .. } => "request_timeout",
            BusError::Closed => "closed",
            BusError::Failed { .. } => "failed",
            BusError::Serialization { .. } => "serialization",
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::serialization(err.to_string())
    }
}

impl From<DriverError> for BusError {
    fn from(err: DriverError) -> Self {
        BusError::failed(err.failure_code(), err.to_string())
    }
}

// =============================================================================
// TransformError
// =============================================================================

/// Errors raised by the read/write value transforms.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    /// The template could not be compiled.
    #[error("Invalid template: {message}")]
    InvalidTemplate {
        /// Error message.
        message: String,
    },

    /// The template references a placeholder outside the whitelist.
    #[error("Unknown placeholder '{name}'")]
    UnknownPlaceholder {
        /// Placeholder name.
        name: String,
    },

    /// The payload is not valid for this transform.
    #[error("Invalid payload: {message}")]
    InvalidPayload {
        /// Error message.
        message: String,
    },
}

impl TransformError {
    /// Creates an invalid template error.
    pub fn invalid_template(message: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            message: message.into(),
        }
    }

    /// Creates an invalid payload error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }
}

/// Result alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Result alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

// =============================================================================
// Tests
// =============================================================================
