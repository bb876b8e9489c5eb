// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Errors raised while loading and validating a gateway file.

use std::path::PathBuf;
use thiserror::Error;

use tagway_core::error::TransformError;

/// Why a configuration was rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file content is not valid YAML, TOML or JSON for the schema.
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// Deserializer message.
        message: String,
    },

    /// A value parsed but breaks a rule.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// Dotted path of the offending field.
        field: String,
        /// The broken rule.
        message: String,
    },

    /// The file exists but could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Nothing at the given path.
    #[error("File not found: {path}")]
    FileNotFound {
        /// Requested path.
        path: PathBuf,
    },

    /// Two MQTT entries or two schema entries name the same system.
    #[error("Duplicate system name: {system}")]
    DuplicateSystem {
        /// Repeated name.
        system: String,
    },

    /// A numeric setting outside its accepted range.
    #[error("Value out of range for '{field}': {value} (expected {min}..={max})")]
    OutOfRange {
        /// Dotted path of the setting.
        field: String,
        /// Rejected value.
        value: String,
        /// Lower bound.
        min: String,
        /// Upper bound.
        max: String,
    },

    /// A reader or writer transform does not build.
    #[error("Invalid transform for '{field}': {source}")]
    InvalidTransform {
        /// `reader` or `writer` path of the entry.
        field: String,
        /// Build failure.
        #[source]
        source: TransformError,
    },

    /// An environment override could not be applied to its field.
    #[error("Invalid environment variable value for '{name}': {message}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Why the value does not fit.
        message: String,
    },

    /// The file extension is not one of yaml, yml, toml or json.
    #[error("Unsupported configuration format: {format}")]
    UnsupportedFormat {
        /// Extension as found.
        format: String,
    },

    /// Deserializer failure with no file attached yet.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Deserializer message.
        message: String,
    },
}

impl ConfigError {
    /// Parse failure in `path`.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Rule violation on `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Read failure on `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Missing file.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Repeated system name.
    pub fn duplicate_system(system: impl Into<String>) -> Self {
        Self::DuplicateSystem {
            system: system.into(),
        }
    }

    /// Renders all three bounds with `Display`.
    pub fn out_of_range<T: std::fmt::Display>(field: impl Into<String>, value: T, min: T, max: T) -> Self {
        Self::OutOfRange {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Transform build failure on `field`.
    pub fn invalid_transform(field: impl Into<String>, source: TransformError) -> Self {
        Self::InvalidTransform {
            field: field.into(),
            source,
        }
    }

    /// Unusable override in variable `name`.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Unknown file extension.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Deserializer failure before a path is known.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used as a log field.
    pub fn error_type(&self) -> &'static str {
        match self {
            ConfigError::Parse { .. } => "parse",
            ConfigError::Validation { .. } => "validation",
            ConfigError::Io { .. } => "io",
            ConfigError::FileNotFound { .. } => "file_not_found",
            ConfigError::DuplicateSystem { .. } => "duplicate_system",
            ConfigError::OutOfRange { .. } => "out_of_range",
            ConfigError::InvalidTransform { .. } => "invalid_transform",
            ConfigError::InvalidEnvVar { .. } => "invalid_env_var",
            ConfigError::UnsupportedFormat { .. } => "unsupported_format",
            ConfigError::Serialization { .. } => "serialization",
        }
    }
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
