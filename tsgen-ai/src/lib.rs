//! tsgen-ai library interface
//!
//! Term sheet generation engine: schema-driven extraction from source
//! documents, binary-confidence gating, conflict surfacing and a session
//! state machine that blocks finalization until a human resolved every field.

pub mod api;
pub mod cli;
pub mod config;
pub mod conflict;
pub mod error;
pub mod extraction;
pub mod outputs;
pub mod render;
pub mod schema;
pub mod session;
pub mod sources;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tsgen_common::events::EventBus;

use crate::session::SessionManager;
use crate::sources::DirectorySourceBuilder;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    /// Event bus shared with the session manager
    pub event_bus: EventBus,
    /// Data directory listing for `/api/data-sources`
    pub sources: Arc<DirectorySourceBuilder>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background error, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>, sources: Arc<DirectorySourceBuilder>) -> Self {
        Self {
            event_bus: sessions.event_bus().clone(),
            sessions,
            sources,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::health_routes())
        .merge(api::generate_routes())
        .merge(api::review_routes())
        .merge(api::source_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
