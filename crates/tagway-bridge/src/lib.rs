// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tagway-bridge
//!
//! The client-facing side of the gateway. It compiles each backend's node
//! tree into a typed query schema and turns every query, mutation and live
//! subscription into bus requests to the drivers.
//!
//! - **Schema**: tree fetch, arena, name sanitization, deterministic compile
//! - **Bridge**: point reads and writes, browse, recursive search, history
//! - **Stream**: backpressured, cancellable live value streams
//! - **HTTP**: axum routes with Server-Sent Events for subscriptions
//!
//! ## Example
//!
//! ```rust,ignore
//! use tagway_bridge::{Bridge, HttpServer, Target};
//!
//! let bridge = Bridge::build(bus, registry, &config.bridge).await;
//! let value = bridge.node_value(&Target::default(), "ns=2;s=Temp").await;
//!
//! HttpServer::new(bridge, config.bridge.http.clone()).run().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bridge;
pub mod error;
pub mod history;
pub mod http;
pub mod model;
pub mod schema;
pub mod stream;

pub use bridge::{Bridge, DEFAULT_BROWSE_NODE};
pub use error::{ApiError, ApiResult, SchemaError, SchemaResult};
pub use history::HistoryWindow;
pub use http::HttpServer;
pub use model::{HistoryArgs, NodeInfo, NodeValue, Target};
pub use schema::{
    compile, sanitize_name, CompiledSystem, FieldBinding, FieldDef, FieldNameSource, FieldType,
    GatewaySchema, NodeArena, SchemaFetcher, SchemaSource, TypeDef,
};
pub use stream::{CancelHandle, NodeValueStream};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
