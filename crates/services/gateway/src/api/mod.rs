//! HTTP API for the Test-Session Gateway
//!
//! This module provides the REST API for managing test sessions:
//! - `POST /api/sessions` - Create a new session
//! - `GET /api/sessions/:id` - Get session status
//! - `POST /api/sessions/:id/advance` - Complete the current test
//! - `POST /api/sessions/:id/resume` - Resume a paused session
//! - `DELETE /api/sessions/:id` - Cancel a session
//! - `GET /api/sessions/:id/stream` - WebSocket stream (measurements in,
//!   broadcasts out)
//! - `GET /metrics` - Gateway metrics

pub mod sessions;
pub mod stream;

use axum::{
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::hub::ConnectionHub;
use crate::metrics::{global_metrics, MetricsSnapshot};
use crate::session::SessionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session manager
    pub manager: Arc<SessionManager>,
    /// Streaming connection hub
    pub hub: Arc<ConnectionHub>,
    /// Connection token authenticator
    pub authenticator: Arc<dyn Authenticator>,
    /// Service configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState.
    pub fn new(
        manager: Arc<SessionManager>,
        hub: Arc<ConnectionHub>,
        authenticator: Arc<dyn Authenticator>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            manager,
            hub,
            authenticator,
            config,
        }
    }
}

/// Build the HTTP API router.
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - dashboards connect from their own origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Session endpoints
        .route("/api/sessions", post(sessions::create_session))
        .route("/api/sessions/:id", get(sessions::get_session))
        .route("/api/sessions/:id", delete(sessions::cancel_session))
        .route("/api/sessions/:id/advance", post(sessions::advance_test))
        .route("/api/sessions/:id/resume", post(sessions::resume_session))
        // Streaming endpoint
        .route("/api/sessions/:id/stream", get(stream::stream_session))
        // Health and metrics
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

/// Metrics endpoint.
async fn metrics_handler() -> Json<MetricsSnapshot> {
    Json(global_metrics().snapshot())
}
