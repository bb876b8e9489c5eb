// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tagway-config
//!
//! Configuration management for the tagway industrial data gateway.
//!
//! ## Features
//!
//! - **Schema Definition**: gateway, bus, bridge and MQTT system settings
//! - **Multi-Format Support**: YAML, TOML, and JSON configuration files
//! - **Placeholders**: `${VAR}` and `${VAR:default}` in the raw text
//! - **Environment Overrides**: `TAGWAY_*` variables
//! - **Validation**: unique system names, timeouts, ports, QoS and transforms
//!
//! ## Quick Start
//!
//! ```no_run
//! use tagway_config::loader::load_config;
//!
//! let config = load_config("tagway.yaml").unwrap();
//!
//! println!("Gateway ID: {}", config.gateway.id);
//! println!("MQTT systems: {}", config.mqtt.len());
//! ```
//!
//! ## Example
//!
//! ```yaml
//! gateway:
//!   id: edge-01
//!   log_format: json
//!
//! bridge:
//!   default_system: plant
//!   schemas:
//!     - system: plant
//!       field_name: DisplayName
//!
//! mqtt:
//!   - system: broker
//!     host: "${BROKER_HOST:localhost}"
//!     value:
//!       reader: { kind: envelope }
//!       writer: { kind: identity }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod loader;
pub mod schema;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ConfigError, ConfigResult};
pub use schema::{
    BridgeConfig, BusConfig, FieldNameSource, GatewayConfig, GatewaySection, HttpConfig, LogLevel,
    MqttSystemConfig, SchemaSource, SecretValue, ValueConfig,
};

pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
