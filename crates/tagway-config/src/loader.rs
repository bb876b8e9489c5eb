// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading and processing for tagway.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders in the raw text
//! 3. Parse YAML (through the `config` crate), TOML or JSON
//! 4. Apply `TAGWAY_*` environment overrides
//! 5. Resolve the schema directory against the config file location
//! 6. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! TAGWAY_GATEWAY_ID=edge-01
//! TAGWAY_LOG_LEVEL=debug
//! TAGWAY_HTTP_PORT=4001
//! TAGWAY_DEFAULT_SYSTEM=plant
//! TAGWAY_MQTT_0_HOST=broker.local
//! TAGWAY_MQTT_0_PORT=8883
//! TAGWAY_MQTT_0_ENABLED=false
//! ```

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{GatewayConfig, LogLevel};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader.
///
/// ```no_run
/// use tagway_config::loader::ConfigLoader;
///
/// let config = ConfigLoader::new().load("tagway.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Base directory for resolving relative paths.
    base_path: Option<PathBuf>,

    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to resolve environment variables.
    resolve_env_vars: bool,

    /// Variables consulted before the process environment.
    overrides: HashMap<String, String>,
}

impl ConfigLoader {
    /// Creates a new configuration loader with default settings.
    pub fn new() -> Self {
        Self {
            base_path: None,
            env_prefix: "TAGWAY".to_string(),
            resolve_env_vars: true,
            overrides: HashMap::new(),
        }
    }

    /// Sets the base path for resolving relative paths.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Provides a variable that takes precedence over the process environment.
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    /// Loads configuration from a file.
    ///
    /// The format follows the extension: `.yaml`/`.yml`, `.toml` or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<GatewayConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let base_path = self.base_path.clone().unwrap_or_else(|| {
            path.parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."))
        });

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let mut config = self
            .parse(&content, format)
            .map_err(|e| match e {
                ConfigError::Serialization { message } => ConfigError::parse(path, message),
                other => other,
            })?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        if config.bridge.schema_dir.is_relative() {
            config.bridge.schema_dir = base_path.join(&config.bridge.schema_dir);
        }

        config.validate().inspect_err(|e| {
            warn!(path = %path.display(), error_type = e.error_type(), error = %e, "Configuration rejected")
        })?;

        info!(
            gateway = %config.gateway.id,
            mqtt_systems = config.mqtt.len(),
            schemas = config.bridge.schemas.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<GatewayConfig> {
        let mut config = self.parse(content, format)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    fn parse(&self, content: &str, format: ConfigFormat) -> ConfigResult<GatewayConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        match format {
            ConfigFormat::Yaml => parse_yaml(&content),
            ConfigFormat::Toml => {
                toml::from_str(&content).map_err(|e| ConfigError::serialization(e.to_string()))
            }
            ConfigFormat::Json => {
                serde_json::from_str(&content).map_err(|e| ConfigError::serialization(e.to_string()))
            }
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        self.overrides
            .get(name)
            .cloned()
            .or_else(|| env::var(name).ok())
    }

    /// Resolves `${VAR_NAME}` or `${VAR_NAME:default}` placeholders.
    ///
    /// Unknown variables without a default are kept verbatim.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find('}') else {
                result.push_str(&rest[start..]);
                return result;
            };

            let body = &after[..end];
            let (name, default) = match body.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (body, None),
            };

            match (self.var(name), default) {
                (Some(value), _) => result.push_str(&value),
                (None, Some(default)) => result.push_str(default),
                (None, None) => {
                    warn!(variable = %name, "Environment variable not found");
                    result.push_str(&rest[start..start + 2 + end + 1]);
                }
            }
            rest = &after[end + 1..];
        }

        result.push_str(rest);
        result
    }

    fn apply_env_overrides(&self, config: &mut GatewayConfig) -> ConfigResult<()> {
        let key = |suffix: &str| format!("{}_{}", self.env_prefix, suffix);

        if let Some(value) = self.var(&key("GATEWAY_ID")) {
            config.gateway.id = value;
        }
        if let Some(value) = self.var(&key("LOG_LEVEL")) {
            match LogLevel::parse(&value) {
                Some(level) => config.gateway.log_level = level,
                None => warn!(value = %value, "Ignoring unknown log level override"),
            }
        }
        if let Some(value) = self.var(&key("HTTP_PORT")) {
            config.bridge.http.port = parse_var(&key("HTTP_PORT"), &value)?;
        }
        if let Some(value) = self.var(&key("DEFAULT_SYSTEM")) {
            config.bridge.default_system = value;
        }
        if let Some(value) = self.var(&key("REQUEST_TIMEOUT_MS")) {
            config.bus.request_timeout_ms = parse_var(&key("REQUEST_TIMEOUT_MS"), &value)?;
        }

        for (i, mqtt) in config.mqtt.iter_mut().enumerate() {
            let prefix = key(&format!("MQTT_{i}"));

            if let Some(value) = self.var(&format!("{prefix}_HOST")) {
                mqtt.host = value;
            }
            if let Some(value) = self.var(&format!("{prefix}_PORT")) {
                mqtt.port = parse_var(&format!("{prefix}_PORT"), &value)?;
            }
            if let Some(value) = self.var(&format!("{prefix}_ENABLED")) {
                mqtt.enabled = parse_bool(&value);
            }
            debug!(system = %mqtt.system, index = i, "Applied environment overrides");
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid_env_var(name, format!("cannot parse '{value}'")))
}

fn parse_yaml<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<GatewayConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the specified format.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<GatewayConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tagway_core::topic::SystemType;
    use tagway_core::transform::TransformConfig;
    use tempfile::NamedTempFile;

    const YAML: &str = r#"
gateway:
  id: edge-01
  log_level: debug

bus:
  request_timeout_ms: 2500

bridge:
  default_system: plant
  schemas:
    - system: plant
      field_name: BrowseName
  stream_buffer: 64
  schema_dir: schemas

mqtt:
  - system: broker
    host: "${TAGWAY_TEST_BROKER_HOST:mqtt.local}"
    qos: 1
    value:
      reader:
        kind: template
        template: '{"value": ${value_json}}'
"#;

    fn loader() -> ConfigLoader {
        ConfigLoader::new().with_env_prefix("TAGWAY_LOADER_TEST")
    }

    #[test]
    fn test_load_yaml() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = loader().load(file.path()).unwrap();

        assert_eq!(config.gateway.id, "edge-01");
        assert_eq!(config.gateway.log_level, LogLevel::Debug);
        assert_eq!(config.bus.request_timeout_ms, 2500);
        assert_eq!(config.bridge.default_system, "plant");
        assert_eq!(config.bridge.default_type, SystemType::Opc);
        assert_eq!(config.bridge.stream_buffer, 64);
        assert_eq!(
            config.bridge.schema_dir,
            file.path().parent().unwrap().join("schemas")
        );

        let mqtt = &config.mqtt[0];
        assert_eq!(mqtt.host, "mqtt.local");
        assert_eq!(mqtt.qos, 1);
        assert_eq!(mqtt.port, 1883);
        assert!(matches!(mqtt.value.reader, TransformConfig::Template { .. }));
        assert_eq!(mqtt.value.writer, TransformConfig::Identity);
    }

    #[test]
    fn test_load_toml_and_json() {
        let toml = r#"
[gateway]
id = "toml-gw"

[[mqtt]]
system = "broker"
port = 8883
"#;
        let config = loader().load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.gateway.id, "toml-gw");
        assert_eq!(config.mqtt[0].port, 8883);

        let json = r#"{"mqtt": [{"system": "broker", "ssl": true}]}"#;
        let config = loader().load_from_str(json, ConfigFormat::Json).unwrap();
        assert!(config.mqtt[0].ssl);
        assert_eq!(config.gateway.id, "tagway");
    }

    #[test]
    fn test_placeholders() {
        let loader = loader().with_var("BROKER", "10.0.0.5");
        assert_eq!(
            loader.resolve_env_placeholders("host: ${BROKER}, port: ${TAGWAY_NOPE_PORT:1883}"),
            "host: 10.0.0.5, port: 1883"
        );
        assert_eq!(
            loader.resolve_env_placeholders("a ${TAGWAY_NOPE_MISSING} b"),
            "a ${TAGWAY_NOPE_MISSING} b"
        );
        assert_eq!(loader.resolve_env_placeholders("x ${open"), "x ${open");
    }

    #[test]
    fn test_env_overrides() {
        let config = loader()
            .with_var("TAGWAY_LOADER_TEST_HTTP_PORT", "4100")
            .with_var("TAGWAY_LOADER_TEST_MQTT_0_ENABLED", "false")
            .with_var("TAGWAY_LOADER_TEST_MQTT_0_PORT", "1884")
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap();

        assert_eq!(config.bridge.http.port, 4100);
        assert!(!config.mqtt[0].enabled);
        assert_eq!(config.mqtt[0].port, 1884);
        assert_eq!(config.enabled_mqtt().count(), 0);

        let result = loader()
            .with_var("TAGWAY_LOADER_TEST_HTTP_PORT", "not-a-port")
            .load_from_str(YAML, ConfigFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_base_path_and_disabled_env() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = loader()
            .with_base_path("/srv/tagway")
            .with_env_vars(false)
            .with_var("TAGWAY_LOADER_TEST_HTTP_PORT", "4100")
            .load(file.path())
            .unwrap();

        assert_eq!(config.bridge.schema_dir, PathBuf::from("/srv/tagway/schemas"));
        assert_eq!(config.mqtt[0].host, "${TAGWAY_TEST_BROKER_HOST:mqtt.local}");
        assert_ne!(config.bridge.http.port, 4100);
    }

    #[test]
    fn test_validation_runs() {
        let json = r#"{"mqtt": [{"system": "broker", "qos": 5}]}"#;
        let result = loader().load_from_str(json, ConfigFormat::Json);
        assert!(matches!(result, Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let json = r#"{"gateway": {"id": "x", "colour": "blue"}}"#;
        assert!(loader().load_from_str(json, ConfigFormat::Json).is_err());
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.TOML")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::Json.extension(), "json");
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("config")).is_err());
    }

    #[test]
    fn test_file_not_found() {
        let result = loader().load("/nonexistent/tagway.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("on"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("off"));
    }
}
