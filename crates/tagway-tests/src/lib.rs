// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tagway Integration Tests
//!
//! End-to-end tests that wire drivers, the message bus, the service
//! registry and the bridge together in one process.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `fixtures`: A small plant address space, configs and topics
//!   - `mocks`: An in-memory OPC-style driver and a history logger
//!   - `harness`: A gateway assembled from the pieces above
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p tagway-tests
//!
//! # Run specific test suite
//! cargo test -p tagway-tests --test integration_core
//! cargo test -p tagway-tests --test integration_bridge
//! cargo test -p tagway-tests --test integration_config
//! cargo test -p tagway-tests --test integration_mqtt
//! ```
//!
//! ## Test Categories
//!
//! ### Core Tests (`integration_core.rs`)
//! - Subscribe, resolve and push through a running driver
//! - Resolution cache against a from-scratch matcher scan
//! - Batch reads and writes through the runtime
//!
//! ### Bridge Tests (`integration_bridge.rs`)
//! - Schema build with an unavailable system
//! - Queries, mutations, recursive search and history
//! - Live streams and their teardown
//!
//! ### Config Tests (`integration_config.rs`)
//! - Loading files and building the gateway from them
//!
//! ### MQTT Tests (`integration_mqtt.rs`)
//! - The MQTT driver against an in-memory broker
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use tagway_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let gateway = TestGateway::new();
//!     let space = gateway.start_opc("plant", PlantFixtures::address_space()).await;
//!     let bridge = gateway.bridge("plant");
//!     // ... test logic
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{eventually, init_test_logging, temp_test_dir};
}
