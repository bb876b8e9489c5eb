// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built address spaces, configurations and topics.

use serde_json::json;

use tagway_config::{BridgeConfig, MqttSystemConfig, SchemaSource};
use tagway_core::{Format, RetryConfig, SystemType, Topic};

use super::mocks::MockAddressSpace;

// =============================================================================
// Address Space Fixtures
// =============================================================================

/// Address spaces for a small bottling plant.
pub struct PlantFixtures;

impl PlantFixtures {
    /// Node id of the line object.
    pub const LINE: &'static str = "ns=2;s=Line1";
    /// Node id of the motor speed variable.
    pub const SPEED: &'static str = "ns=2;s=Line1.Speed";
    /// Node id of the pump object.
    pub const PUMP: &'static str = "ns=2;s=Line1.Pump";
    /// Node id of the pump state variable.
    pub const PUMP_ON: &'static str = "ns=2;s=Line1.Pump.On";
    /// Node id of the fill level variable.
    pub const LEVEL: &'static str = "ns=2;s=Line1.Level";

    /// ```text
    /// Line 1 (Object)
    /// ├── 1-Motor Speed (Variable) = 1450
    /// ├── Pump (Object)
    /// │   └── On (Variable) = true
    /// ├── Level (Variable) = 72.5
    /// ├── Spare (Object, empty)
    /// └── Reset (Method)
    /// ```
    pub fn address_space() -> MockAddressSpace {
        let space = MockAddressSpace::new();
        space
            .add_object(None, Self::LINE, "Line 1")
            .add_variable(Some(Self::LINE), Self::SPEED, "1-Motor Speed", json!(1450))
            .add_object(Some(Self::LINE), Self::PUMP, "Pump")
            .add_variable(Some(Self::PUMP), Self::PUMP_ON, "On", json!(true))
            .add_variable(Some(Self::LINE), Self::LEVEL, "Level", json!(72.5))
            .add_object(Some(Self::LINE), "ns=2;s=Line1.Spare", "Spare")
            .add_node(Some(Self::LINE), "ns=2;s=Line1.Reset", "Reset", "Method");
        space
    }

    /// A space whose line has two children that sanitize to the same name.
    pub fn colliding_space() -> MockAddressSpace {
        let space = MockAddressSpace::new();
        space
            .add_object(None, "ns=3;s=Press", "Press")
            .add_variable(Some("ns=3;s=Press"), "ns=3;s=Press.A", "Ram Force", json!(1))
            .add_variable(Some("ns=3;s=Press"), "ns=3;s=Press.B", "Ram-Force", json!(2));
        space
    }

    /// `A → {B, C}`, `B → {D}`, `C → {}` with `D` a variable.
    pub fn search_tree() -> MockAddressSpace {
        let space = MockAddressSpace::new();
        space
            .add_object(None, "A", "A")
            .add_object(Some("A"), "B", "B")
            .add_object(Some("A"), "C", "C")
            .add_variable(Some("B"), "D", "D", json!(0));
        space
    }
}

// =============================================================================
// Config Fixtures
// =============================================================================

/// Configurations used across suites.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Bridge defaults pointing at `system`, compiling the listed schemas.
    pub fn bridge(system: &str, schemas: &[&str]) -> BridgeConfig {
        BridgeConfig {
            default_type: SystemType::Opc,
            default_system: system.to_string(),
            schemas: schemas.iter().map(|s| SchemaSource::new(*s)).collect(),
            schema_timeout_ms: 300,
            stream_buffer: 16,
            ..BridgeConfig::default()
        }
    }

    /// An MQTT system with defaults.
    pub fn mqtt(system: &str) -> MqttSystemConfig {
        MqttSystemConfig::new(system)
    }

    /// A reconnect policy fast enough for tests.
    pub fn fast_reconnect() -> RetryConfig {
        RetryConfig {
            max_attempts: 0,
            initial_delay: std::time::Duration::from_millis(5),
            max_delay: std::time::Duration::from_millis(20),
            ..RetryConfig::default()
        }
    }
}

// =============================================================================
// Topic Fixtures
// =============================================================================

/// Topics used across suites.
pub struct TopicFixtures;

impl TopicFixtures {
    /// A JSON topic on the plant system.
    pub fn plant(node: &str) -> Topic {
        Topic::new(SystemType::Opc, "plant", Format::Json, node)
    }

    /// A raw-value topic on the plant system.
    pub fn plant_raw(node: &str) -> Topic {
        Topic::new(SystemType::Opc, "plant", Format::Value, node)
    }

    /// Patterns paired with concrete addresses for matcher checks.
    pub fn pattern_grid() -> (Vec<&'static str>, Vec<&'static str>) {
        (
            vec!["line/+/speed", "line/#", "line/1/speed", "+/+/+", "#", "line/+"],
            vec!["line/1/speed", "line/2/speed", "line/1", "line", "hall/1/speed", "line/1/speed/max"],
        )
    }
}
