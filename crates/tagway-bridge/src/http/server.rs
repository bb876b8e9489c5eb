// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! HTTP server.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    http::{header, Method, StatusCode},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use tagway_config::HttpConfig;

use super::handlers;
use crate::bridge::Bridge;
use crate::error::{ApiError, ApiResult};

// =============================================================================
// HttpServer
// =============================================================================

/// Serves a [`Bridge`] over HTTP.
pub struct HttpServer {
    bridge: Bridge,
    config: HttpConfig,
}

impl HttpServer {
    /// Creates a server.
    pub fn new(bridge: Bridge, config: HttpConfig) -> Self {
        Self { bridge, config }
    }

    /// Creates the router.
    ///
    /// The request timeout applies to queries and mutations only;
    /// subscriptions stay open until the client leaves.
    pub fn router(&self) -> Router {
        let timeout = TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(self.config.request_timeout_secs),
        );

        Router::new()
            .route("/schema", get(handlers::schema))
            .route("/query/{operation}", post(handlers::query))
            .route("/mutation/{operation}", post(handlers::mutation))
            .layer(timeout)
            .route("/subscription/{operation}", get(handlers::subscription))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer()),
            )
            .with_state(self.bridge.clone())
    }

    /// Runs the server.
    pub async fn run(self) -> ApiResult<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Runs the server with graceful shutdown.
    pub async fn run_with_shutdown(
        self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> ApiResult<()> {
        let addr = self.addr();
        let router = self.router();

        info!("Starting HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ApiError::internal(format!("Server error: {}", e)))?;

        info!("HTTP server shutdown complete");
        Ok(())
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.config.socket_addr()
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

// =============================================================================
// Tests
// =============================================================================
