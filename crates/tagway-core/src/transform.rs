// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Read and write value transforms.
//!
//! Drivers pass every raw backend payload through a *reader* transform
//! before republishing it, and every written value through a *writer*
//! transform before it reaches the backend.
//!
//! # Built-in Transforms
//!
//! - [`Identity`]: bytes pass through unchanged
//! - [`Envelope`]: wraps the payload text into a [`ValueEnvelope`] stamped
//!   with the current time and status 0 (default reader)
//! - [`Template`]: text template with a fixed set of placeholders:
//!   `${value}`, `${value_json}`, `${now}` and `${now_ms}`
//!
//! A transform failure never stops the pipeline: [`TransformPipeline`]
//! logs it and forwards the raw payload.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::TransformError;
use crate::message::ValueEnvelope;

// =============================================================================
// ValueTransform
// =============================================================================

/// A pure payload-to-payload transformation.
pub trait ValueTransform: Send + Sync + fmt::Debug {
    /// Returns the transform name for logging.
    fn name(&self) -> &str;

    /// Transforms a payload.
    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, TransformError>;
}

fn as_text(input: &[u8]) -> Result<&str, TransformError> {
    std::str::from_utf8(input).map_err(|e| TransformError::invalid_payload(e.to_string()))
}

// =============================================================================
// Identity
// =============================================================================

/// Passes bytes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl ValueTransform for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        Ok(input.to_vec())
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Wraps the payload text into a good-status [`ValueEnvelope`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Envelope;

impl ValueTransform for Envelope {
    fn name(&self) -> &str {
        "envelope"
    }

    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        let text = as_text(input)?;
        let envelope = ValueEnvelope::now(serde_json::Value::String(text.to_string()));
        serde_json::to_vec(&envelope).map_err(|e| TransformError::invalid_payload(e.to_string()))
    }
}

// =============================================================================
// Template
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Value,
    ValueJson,
    Now,
    NowMs,
}

impl Placeholder {
    fn parse(name: &str) -> Result<Self, TransformError> {
        match name {
            "value" => Ok(Placeholder::Value),
            "value_json" => Ok(Placeholder::ValueJson),
            "now" => Ok(Placeholder::Now),
            "now_ms" => Ok(Placeholder::NowMs),
            other => Err(TransformError::UnknownPlaceholder {
                name: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A compiled text template.
///
/// ```
/// use tagway_core::transform::{Template, ValueTransform};
///
/// let template = Template::compile(r#"{"v": ${value_json}}"#).unwrap();
/// let output = template.apply(b"21.5").unwrap();
/// assert_eq!(output, br#"{"v": "21.5"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Compiles a template.
    ///
    /// # Errors
    ///
    /// `InvalidTemplate` for an unterminated `${`, `UnknownPlaceholder` for a
    /// name outside the supported set.
    pub fn compile(source: &str) -> Result<Self, TransformError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("${") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| {
                TransformError::invalid_template(format!("unterminated placeholder at offset {}", source.len() - rest.len() + start))
            })?;
            segments.push(Segment::Placeholder(Placeholder::parse(after[..end].trim())?));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Returns the template source.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl ValueTransform for Template {
    fn name(&self) -> &str {
        "template"
    }

    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        let text = as_text(input)?;
        let now = Utc::now();
        let mut output = String::with_capacity(self.source.len() + text.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => output.push_str(literal),
                Segment::Placeholder(Placeholder::Value) => output.push_str(text),
                Segment::Placeholder(Placeholder::ValueJson) => {
                    let quoted = serde_json::to_string(text)
                        .map_err(|e| TransformError::invalid_payload(e.to_string()))?;
                    output.push_str(&quoted);
                }
                Segment::Placeholder(Placeholder::Now) => output.push_str(&now.to_rfc3339()),
                Segment::Placeholder(Placeholder::NowMs) => {
                    output.push_str(&now.timestamp_millis().to_string())
                }
            }
        }

        Ok(output.into_bytes())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Declarative transform selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformConfig {
    /// [`Identity`].
    Identity,
    /// [`Envelope`].
    Envelope,
    /// [`Template`].
    Template {
        /// Template source.
        template: String,
    },
}

impl TransformConfig {
    /// Default reader transform.
    pub fn default_reader() -> Self {
        TransformConfig::Envelope
    }

    /// Default writer transform.
    pub fn default_writer() -> Self {
        TransformConfig::Identity
    }

    /// Builds the configured transform.
    pub fn build(&self) -> Result<Arc<dyn ValueTransform>, TransformError> {
        Ok(match self {
            TransformConfig::Identity => Arc::new(Identity),
            TransformConfig::Envelope => Arc::new(Envelope),
            TransformConfig::Template { template } => Arc::new(Template::compile(template)?),
        })
    }
}

// =============================================================================
// TransformPipeline
// =============================================================================

/// Direction a payload is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Backend to clients.
    Read,
    /// Clients to backend.
    Write,
}

/// Reader and writer transforms of one driver.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    reader: Arc<dyn ValueTransform>,
    writer: Arc<dyn ValueTransform>,
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self {
            reader: Arc::new(Envelope),
            writer: Arc::new(Identity),
        }
    }
}

impl TransformPipeline {
    /// Creates a pipeline from explicit transforms.
    pub fn new(reader: Arc<dyn ValueTransform>, writer: Arc<dyn ValueTransform>) -> Self {
        Self { reader, writer }
    }

    /// Pipeline that leaves payloads untouched in both directions.
    pub fn passthrough() -> Self {
        Self::new(Arc::new(Identity), Arc::new(Identity))
    }

    /// Builds a pipeline from configuration.
    pub fn from_config(reader: &TransformConfig, writer: &TransformConfig) -> Result<Self, TransformError> {
        Ok(Self::new(reader.build()?, writer.build()?))
    }

    /// Applies the transform for `direction`, substituting the raw payload
    /// on failure.
    pub fn apply_or_raw(&self, direction: Direction, payload: &[u8]) -> Vec<u8> {
        let transform = match direction {
            Direction::Read => &self.reader,
            Direction::Write => &self.writer,
        };
        match transform.apply(payload) {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(
                    transform = %transform.name(),
                    direction = ?direction,
                    error = %error,
                    "Transform failed, forwarding raw payload"
                );
                payload.to_vec()
            }
        }
    }

    /// Applies the reader transform.
    pub fn read(&self, payload: &[u8]) -> Vec<u8> {
        self.apply_or_raw(Direction::Read, payload)
    }

    /// Applies the writer transform.
    pub fn write(&self, payload: &[u8]) -> Vec<u8> {
        self.apply_or_raw(Direction::Write, payload)
    }
}

// =============================================================================
// Tests
// =============================================================================
