// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tagway-core
//!
//! Core routing and driver abstractions for the tagway industrial data gateway.
//!
//! This crate provides the pieces every tagway component shares:
//!
//! - **Topic**: the `{Type}/{System}/{kind}:{format}/{node}` subscription address
//! - **Matcher**: `+` / `#` wildcard matching over `/`-delimited addresses
//! - **Resolution**: per-driver cache from concrete addresses to subscribed topics
//! - **Bus**: addressed request/reply and fire-and-forget publish
//! - **Registry**: service availability for `(SystemType, System)` pairs
//! - **Driver**: backend capability trait and the single-task driver runtime
//! - **Transform**: reader/writer payload transforms
//! - **Error**: unified error hierarchy
//! - **Logging**: `tracing-subscriber` initialization
//!
//! ## Example
//!
//! ```rust,ignore
//! use tagway_core::{DriverRuntime, MessageBus, ServiceRegistry};
//!
//! let bus = MessageBus::new();
//! let registry = ServiceRegistry::new();
//! let handle = DriverRuntime::new(Box::new(driver), "plant", bus.clone(), registry.clone())
//!     .start()?;
//!
//! let reply = bus
//!     .request("Opc/plant/Read", serde_json::json!({ "NodeId": "ns=2;s=Temp" }))
//!     .await?;
//! handle.shutdown().await;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod matcher;
pub mod resolution;
pub mod topic;

// =============================================================================
// Driver Modules
// =============================================================================

pub mod driver;
pub mod retry;
pub mod runtime;
pub mod subscription;
pub mod transform;

// =============================================================================
// Message Bus Modules
// =============================================================================

pub mod bus;
pub mod message;
pub mod registry;

// =============================================================================
// Ambient
// =============================================================================

pub mod logging;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use error::*;

pub use topic::{Format, SystemType, Topic, TopicKind};

pub use resolution::{ResolutionCache, ResolutionStats};

pub use driver::{DriverEvent, DriverEvents, DriverState, ProtocolDriver};

pub use runtime::{DriverHandle, DriverRuntime};

pub use subscription::{MonitoredItem, SubscriptionRegistry};

pub use bus::{BusStats, Consumer, MessageBus, Request, RequestReceiver, DEFAULT_REQUEST_TIMEOUT};

pub use registry::{Observation, ServiceKey, ServiceRegistry};

pub use message::{ServiceKind, ValueEnvelope};

pub use retry::{ExponentialBackoff, RetryConfig, RetryDecision, RetryStrategy};

pub use logging::{init_logging, LogFormat};

pub use transform::{
    Direction, Envelope, Identity, Template, TransformConfig, TransformPipeline, ValueTransform,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
