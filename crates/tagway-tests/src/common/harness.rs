// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! A gateway assembled in-process: one bus, one registry, any number of
//! drivers and bridges. Drivers are shut down when the gateway is dropped.

use std::time::Duration;

use parking_lot::Mutex;

use tagway_bridge::Bridge;
use tagway_config::{BridgeConfig, MqttSystemConfig};
use tagway_core::{DriverHandle, DriverRuntime, DriverState, MessageBus, ServiceRegistry};
use tagway_mqtt::{MemoryBroker, MqttDriver};

use super::fixtures::ConfigFixtures;
use super::init_test_logging;
use super::mocks::MockAddressSpace;

/// How long a started driver may take to connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Bus request timeout used by the harness.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

// =============================================================================
// TestGateway
// =============================================================================

/// An in-process gateway.
pub struct TestGateway {
    /// The shared bus.
    pub bus: MessageBus,
    /// The shared registry.
    pub registry: ServiceRegistry,
    handles: Mutex<Vec<DriverHandle>>,
}

impl TestGateway {
    /// Creates an empty gateway.
    pub fn new() -> Self {
        init_test_logging();
        Self {
            bus: MessageBus::with_request_timeout(REQUEST_TIMEOUT),
            registry: ServiceRegistry::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Starts a mock OPC driver for `system` and waits until it is
    /// connected. Returns the address space for injection and inspection.
    pub async fn start_opc(&self, system: &str, space: MockAddressSpace) -> MockAddressSpace {
        let handle = DriverRuntime::new(
            Box::new(space.driver(system)),
            system,
            self.bus.clone(),
            self.registry.clone(),
        )
        .with_reconnect(ConfigFixtures::fast_reconnect())
        .start();

        assert!(
            handle.wait_for_state(DriverState::Connected, CONNECT_TIMEOUT).await,
            "driver for {system} did not connect"
        );
        self.handles.lock().push(handle);
        space
    }

    /// Starts an MQTT driver on an in-memory broker and waits until it is
    /// connected.
    pub async fn start_mqtt(&self, config: &MqttSystemConfig, broker: &MemoryBroker) {
        let handle = MqttDriver::new(config, Box::new(broker.transport()))
            .spawn(
                config,
                self.bus.clone(),
                self.registry.clone(),
                ConfigFixtures::fast_reconnect(),
            )
            .expect("valid transforms");

        assert!(
            handle.wait_for_state(DriverState::Connected, CONNECT_TIMEOUT).await,
            "driver for {} did not connect",
            config.system
        );
        self.handles.lock().push(handle);
    }

    /// Returns a bridge with `system` as the default.
    pub fn bridge(&self, system: &str) -> Bridge {
        Bridge::new(self.bus.clone(), &ConfigFixtures::bridge(system, &[]))
    }

    /// Returns a bridge whose schema is built from `config`.
    pub async fn bridge_with_schema(&self, config: &BridgeConfig) -> Bridge {
        Bridge::build(self.bus.clone(), self.registry.clone(), config).await
    }

    /// Shuts every driver down.
    pub async fn shutdown(&self) {
        let handles: Vec<DriverHandle> = self.handles.lock().drain(..).collect();
        tracing::debug!(drivers = handles.len(), "Shutting test gateway down");
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

impl Default for TestGateway {
    fn default() -> Self {
        Self::new()
    }
}
