// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tagway-mqtt
//!
//! MQTT driver for the tagway industrial data gateway.
//!
//! - **Topic filters**: node patterns are passed to the broker as filters
//! - **Writes and publishes**: sent to the node topic with the configured
//!   write QoS, never retained
//! - **Size limit**: incoming messages over `max_message_size_kb` are dropped
//! - **Pluggable transport**: `rumqttc` for real brokers, an in-process
//!   broker for tests
//!
//! Connection state, reconnection and topic resolution are handled by
//! [`tagway_core::DriverRuntime`]; this crate only speaks to the broker.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tagway_config::MqttSystemConfig;
//! use tagway_core::{MessageBus, RetryConfig, ServiceRegistry};
//! use tagway_mqtt::MqttDriver;
//!
//! let bus = MessageBus::new();
//! let registry = ServiceRegistry::new();
//! let config = MqttSystemConfig::new("broker");
//!
//! let handle = MqttDriver::network(&config)
//!     .spawn(&config, bus.clone(), registry.clone(), RetryConfig::default())?;
//!
//! // Values on plant/+/temp now arrive at Mqtt/broker/json/plant/+/temp
//! // once a client subscribes to that topic.
//! handle.shutdown().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod client;
pub mod driver;
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::{
    ConnectOptions, MemoryBroker, MemoryTransport, MqttTransport, NetworkTransport, QoS,
    TransportEvent,
};
pub use driver::MqttDriver;
pub use error::{MqttError, MqttResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
