// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bridge error types.
//!
//! Bridge operations themselves answer with `None`/`false` for failed items;
//! errors only surface while building the schema and at the HTTP boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

// =============================================================================
// SchemaError
// =============================================================================

/// Schema build errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A system's tree could not be fetched.
    #[error("Failed to fetch schema of '{system}': {message}")]
    Fetch {
        /// System name.
        system: String,
        /// Why the fetch failed.
        message: String,
    },

    /// Two siblings sanitize to the same field name, or two systems (or a
    /// system and the generic schema) produce the same type name.
    #[error("Name '{field}' in '{type_name}' is produced by both '{first}' and '{second}'")]
    NameCollision {
        /// The type holding both fields.
        type_name: String,
        /// The sanitized field name.
        field: String,
        /// First source name.
        first: String,
        /// Second source name.
        second: String,
    },

    /// The fetched tree cannot be compiled.
    #[error("Invalid node tree of '{system}': {message}")]
    InvalidTree {
        /// System name.
        system: String,
        /// What is wrong.
        message: String,
    },

    /// The schema text could not be written.
    #[error("Failed to write schema file '{path}': {message}")]
    Write {
        /// Target path.
        path: String,
        /// I/O error.
        message: String,
    },
}

impl SchemaError {
    /// Creates a fetch error.
    pub fn fetch(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            system: system.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid tree error.
    pub fn invalid_tree(system: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTree {
            system: system.into(),
            message: message.into(),
        }
    }

    /// Fetch failures may clear up once the driver is back.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchemaError::Fetch { .. })
    }

    /// Returns the error type for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            SchemaError::Fetch { .. } => "fetch",
            SchemaError::NameCollision { .. } => "name_collision",
            SchemaError::InvalidTree { .. } => "invalid_tree",
            SchemaError::Write { .. } => "write",
        }
    }
}

/// A Result type with SchemaError.
pub type SchemaResult<T> = Result<T, SchemaError>;

// =============================================================================
// ApiError
// =============================================================================

/// HTTP boundary errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request (400).
    #[error("Bad request: {message}")]
    BadRequest {
        /// Error message.
        message: String,
    },

    /// Unknown operation (404).
    #[error("Unknown operation: {operation}")]
    NotFound {
        /// The operation name.
        operation: String,
    },

    /// Server bind or serve failure (500).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl ApiError {
    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(operation: impl Into<String>) -> Self {
        Self::NotFound {
            operation: operation.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error type for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest { .. } => "bad_request",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Internal { .. } => "internal",
        }
    }
}

/// A Result type with ApiError.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(rename = "type")]
    error_type: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal { message } = &self {
            tracing::error!(error = %message, "Internal API error");
        }
        let body = ErrorBody {
            error: self.to_string(),
            error_type: self.error_type(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
