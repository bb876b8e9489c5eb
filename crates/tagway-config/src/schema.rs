// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions for tagway.
//!
//! # Schema Structure
//!
//! ```text
//! GatewayConfig
//! ├── gateway: GatewaySection
//! ├── bus: BusConfig
//! ├── bridge: BridgeConfig
//! │   ├── schemas: Vec<SchemaSource>
//! │   └── http: HttpConfig
//! ├── mqtt: Vec<MqttSystemConfig>
//! │   └── value: ValueConfig
//! └── reconnect: RetryConfig
//! ```

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tagway_core::logging::LogFormat;
use tagway_core::retry::RetryConfig;
use tagway_core::topic::SystemType;
use tagway_core::transform::TransformConfig;

// =============================================================================
// Constants
// =============================================================================

/// Default bus request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Default schema fetch timeout in milliseconds.
pub const DEFAULT_SCHEMA_TIMEOUT_MS: u64 = 10_000;

/// Default per-subscription client buffer.
pub const DEFAULT_STREAM_BUFFER: usize = 256;

/// Default HTTP port of the bridge.
pub const DEFAULT_HTTP_PORT: u16 = 4000;

/// Default MQTT broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default MQTT maximum message size in KiB.
pub const DEFAULT_MAX_MESSAGE_SIZE_KB: u32 = 8;

/// Default address root of history loggers.
pub const DEFAULT_HISTORY_ROOT: &str = "Log";

/// Default history logger name.
pub const DEFAULT_LOG: &str = "default";

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Gateway identification and logging.
    #[serde(default)]
    pub gateway: GatewaySection,

    /// Message bus settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Query bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// MQTT systems.
    #[serde(default)]
    pub mqtt: Vec<MqttSystemConfig>,

    /// Reconnect policy shared by every driver.
    #[serde(default)]
    pub reconnect: RetryConfig,
}

impl GatewayConfig {
    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.gateway.validate()?;
        self.bus.validate()?;
        self.bridge.validate()?;

        let mut systems = HashSet::new();
        for (index, mqtt) in self.mqtt.iter().enumerate() {
            mqtt.validate(index)?;
            if !systems.insert(mqtt.system.as_str()) {
                return Err(ConfigError::duplicate_system(&mqtt.system));
            }
        }

        validate_reconnect(&self.reconnect)
    }

    /// Returns the enabled MQTT systems.
    pub fn enabled_mqtt(&self) -> impl Iterator<Item = &MqttSystemConfig> {
        self.mqtt.iter().filter(|m| m.enabled)
    }

    /// Returns an MQTT system by name.
    pub fn get_mqtt(&self, system: &str) -> Option<&MqttSystemConfig> {
        self.mqtt.iter().find(|m| m.system == system)
    }
}

fn validate_reconnect(reconnect: &RetryConfig) -> ConfigResult<()> {
    if reconnect.initial_delay.is_zero() {
        return Err(ConfigError::validation("reconnect.initial_delay_ms", "cannot be zero"));
    }
    if reconnect.max_delay < reconnect.initial_delay {
        return Err(ConfigError::validation(
            "reconnect.max_delay_ms",
            "must not be smaller than initial_delay_ms",
        ));
    }
    if reconnect.multiplier < 1.0 {
        return Err(ConfigError::validation("reconnect.multiplier", "must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&reconnect.jitter) {
        return Err(ConfigError::out_of_range("reconnect.jitter", reconnect.jitter, 0.0, 1.0));
    }
    Ok(())
}

// =============================================================================
// Gateway Section
// =============================================================================

/// Gateway identification and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    /// Gateway identifier.
    #[serde(default = "default_gateway_id")]
    pub id: String,

    /// Log level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_gateway_id() -> String {
    "tagway".to_string()
}

impl GatewaySection {
    /// Validates the gateway section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::validation("gateway.id", "cannot be empty"));
        }
        Ok(())
    }

    /// Installs the global subscriber with this section's level and format.
    pub fn init_logging(&self) -> bool {
        tagway_core::logging::init_logging(self.log_level.as_str(), self.log_format)
    }
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            id: default_gateway_id(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

// =============================================================================
// Bus Configuration
// =============================================================================

/// Message bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Request/reply timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl BusConfig {
    /// Validates the bus configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::validation("bus.request_timeout_ms", "cannot be zero"));
        }
        Ok(())
    }

    /// Returns the request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

// =============================================================================
// Bridge Configuration
// =============================================================================

/// Which node attribute names generated schema fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FieldNameSource {
    /// `DisplayName` (default).
    #[default]
    DisplayName,
    /// `BrowseName`.
    BrowseName,
}

impl FieldNameSource {
    /// Returns the attribute name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FieldNameSource::DisplayName => "DisplayName",
            FieldNameSource::BrowseName => "BrowseName",
        }
    }
}

impl fmt::Display for FieldNameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A system whose object tree is compiled into the query schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaSource {
    /// System name.
    pub system: String,

    /// Backend family serving the system.
    #[serde(default = "default_system_type")]
    pub system_type: SystemType,

    /// Attribute used for field names.
    #[serde(default)]
    pub field_name: FieldNameSource,
}

impl SchemaSource {
    /// Creates a source for an OPC system with display-name fields.
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            system_type: SystemType::Opc,
            field_name: FieldNameSource::DisplayName,
        }
    }
}

fn default_system_type() -> SystemType {
    SystemType::Opc
}

/// Query bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Backend family used when a request names none.
    #[serde(default = "default_system_type")]
    pub default_type: SystemType,

    /// System used when a request names none.
    #[serde(default = "default_system")]
    pub default_system: String,

    /// Systems compiled into the query schema.
    #[serde(default)]
    pub schemas: Vec<SchemaSource>,

    /// Schema fetch timeout in milliseconds.
    #[serde(default = "default_schema_timeout_ms")]
    pub schema_timeout_ms: u64,

    /// Address root of history loggers.
    #[serde(default = "default_history_root")]
    pub history_root: String,

    /// Logger queried when a history request names none.
    #[serde(default = "default_log")]
    pub default_log: String,

    /// Per-subscription client buffer.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Write the generated schema text to files.
    #[serde(default)]
    pub write_schema_files: bool,

    /// Directory for generated schema files.
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,

    /// HTTP surface.
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_system() -> String {
    "default".to_string()
}

fn default_schema_timeout_ms() -> u64 {
    DEFAULT_SCHEMA_TIMEOUT_MS
}

fn default_history_root() -> String {
    DEFAULT_HISTORY_ROOT.to_string()
}

fn default_log() -> String {
    DEFAULT_LOG.to_string()
}

fn default_stream_buffer() -> usize {
    DEFAULT_STREAM_BUFFER
}

fn default_schema_dir() -> PathBuf {
    PathBuf::from(".")
}

impl BridgeConfig {
    /// Validates the bridge configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_system.trim().is_empty() {
            return Err(ConfigError::validation("bridge.default_system", "cannot be empty"));
        }
        if self.history_root.trim().is_empty() {
            return Err(ConfigError::validation("bridge.history_root", "cannot be empty"));
        }
        if self.default_log.trim().is_empty() {
            return Err(ConfigError::validation("bridge.default_log", "cannot be empty"));
        }
        if self.stream_buffer == 0 {
            return Err(ConfigError::validation("bridge.stream_buffer", "cannot be zero"));
        }
        if self.schema_timeout_ms == 0 {
            return Err(ConfigError::validation("bridge.schema_timeout_ms", "cannot be zero"));
        }

        let mut systems = HashSet::new();
        for (index, source) in self.schemas.iter().enumerate() {
            if source.system.trim().is_empty() {
                return Err(ConfigError::validation(
                    format!("bridge.schemas[{index}].system"),
                    "cannot be empty",
                ));
            }
            if !systems.insert(source.system.as_str()) {
                return Err(ConfigError::duplicate_system(&source.system));
            }
        }

        self.http.validate()
    }

    /// Returns the schema fetch timeout as a Duration.
    pub fn schema_timeout(&self) -> Duration {
        Duration::from_millis(self.schema_timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_type: default_system_type(),
            default_system: default_system(),
            schemas: Vec::new(),
            schema_timeout_ms: DEFAULT_SCHEMA_TIMEOUT_MS,
            history_root: default_history_root(),
            default_log: default_log(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
            write_schema_files: false,
            schema_dir: default_schema_dir(),
            http: HttpConfig::default(),
        }
    }
}

/// HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Whether the HTTP surface is served.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Listen port.
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Request timeout in seconds. Subscriptions are exempt.
    #[serde(default = "default_http_timeout")]
    pub request_timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_http_timeout() -> u64 {
    30
}

impl HttpConfig {
    /// Validates the HTTP configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::validation(
                "bridge.http.request_timeout_secs",
                "cannot be zero",
            ));
        }
        Ok(())
    }

    /// Returns the request timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: DEFAULT_HTTP_PORT,
            request_timeout_secs: default_http_timeout(),
        }
    }
}

// =============================================================================
// MQTT Configuration
// =============================================================================

/// One MQTT system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttSystemConfig {
    /// System name, the second segment of every address.
    pub system: String,

    /// Whether the driver is started.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Broker host.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Username.
    #[serde(default)]
    pub username: Option<String>,

    /// Password.
    #[serde(default)]
    pub password: Option<SecretValue>,

    /// Use TLS.
    #[serde(default)]
    pub ssl: bool,

    /// QoS of backend subscriptions.
    #[serde(default)]
    pub qos: u8,

    /// QoS of writes.
    #[serde(default = "default_write_qos")]
    pub write_qos: u8,

    /// Maximum message size in KiB.
    #[serde(default = "default_max_message_size_kb")]
    pub max_message_size_kb: u32,

    /// Value transforms.
    #[serde(default)]
    pub value: ValueConfig,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_write_qos() -> u8 {
    1
}

fn default_max_message_size_kb() -> u32 {
    DEFAULT_MAX_MESSAGE_SIZE_KB
}

impl MqttSystemConfig {
    /// Creates a configuration with defaults for `system`.
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            enabled: true,
            host: default_mqtt_host(),
            port: DEFAULT_MQTT_PORT,
            username: None,
            password: None,
            ssl: false,
            qos: 0,
            write_qos: default_write_qos(),
            max_message_size_kb: DEFAULT_MAX_MESSAGE_SIZE_KB,
            value: ValueConfig::default(),
        }
    }

    /// Validates one MQTT system.
    pub fn validate(&self, index: usize) -> ConfigResult<()> {
        let field = |name: &str| format!("mqtt[{index}].{name}");

        if self.system.trim().is_empty() {
            return Err(ConfigError::validation(field("system"), "cannot be empty"));
        }
        if self.system.contains('/') {
            return Err(ConfigError::validation(field("system"), "cannot contain '/'"));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::validation(field("host"), "cannot be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::out_of_range(field("port"), 0, 1, u16::MAX));
        }
        if self.qos > 2 {
            return Err(ConfigError::out_of_range(field("qos"), self.qos, 0, 2));
        }
        if self.write_qos > 2 {
            return Err(ConfigError::out_of_range(field("write_qos"), self.write_qos, 0, 2));
        }
        if self.max_message_size_kb == 0 {
            return Err(ConfigError::validation(field("max_message_size_kb"), "cannot be zero"));
        }
        self.value
            .reader
            .build()
            .map_err(|e| ConfigError::invalid_transform(field("value.reader"), e))?;
        self.value
            .writer
            .build()
            .map_err(|e| ConfigError::invalid_transform(field("value.writer"), e))?;
        Ok(())
    }

    /// Returns the maximum message size in bytes.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size_kb as usize * 1024
    }
}

/// Reader and writer transforms of one driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueConfig {
    /// Applied to values coming from the backend.
    #[serde(default = "TransformConfig::default_reader")]
    pub reader: TransformConfig,

    /// Applied to values written to the backend.
    #[serde(default = "TransformConfig::default_writer")]
    pub writer: TransformConfig,
}

impl Default for ValueConfig {
    fn default() -> Self {
        Self {
            reader: TransformConfig::default_reader(),
            writer: TransformConfig::default_writer(),
        }
    }
}

// =============================================================================
// Secret Value
// =============================================================================

/// A secret that never shows up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    /// Creates a new secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the plain value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}
