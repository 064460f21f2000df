//! HTTP control panel.
//!
//! A small JSON API over the [`DetectorController`] plus a single page that
//! drives it from the browser.

mod handlers;
pub mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{ServerSettings, TelegramConfig};
use crate::detector::DetectorController;

pub use types::{ApiError, ApiResponse, StartRequest};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<DetectorController>,
    pub server: Arc<ServerSettings>,
    /// Credentials from the environment, used for fields a request omits.
    pub env_config: Option<Arc<TelegramConfig>>,
}

impl AppState {
    #[must_use]
    pub fn new(
        controller: Arc<DetectorController>,
        server: ServerSettings,
        env_config: Option<TelegramConfig>,
    ) -> Self {
        Self {
            controller,
            server: Arc::new(server),
            env_config: env_config.map(Arc::new),
        }
    }
}

/// Builds the router with every control endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/health", get(handlers::health))
        .route("/info", get(handlers::info))
        .route("/status", get(handlers::status))
        .route("/api/status", get(handlers::status))
        .route("/detector/status", get(handlers::status))
        .route("/detector/start", post(handlers::start))
        .route("/detector/complete_auth", post(handlers::complete_auth))
        .route("/detector/stop", post(handlers::stop))
        .route("/detector/restart", post(handlers::restart))
        .route("/detector/history", get(handlers::history))
        .route("/detector/sessions", get(handlers::sessions))
        .route("/detector/sessions/{name}", delete(handlers::delete_session))
        .route("/detector/simulate-gift", post(handlers::simulate_gift))
        .route("/detector/catalog", get(handlers::catalog))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
