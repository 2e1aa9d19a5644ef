//! Generation workflow API handlers
//!
//! POST /api/generate/start, POST /api/generate/run/:id,
//! GET /api/generate/status/:id

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::schema::term_sheet::TERM_SHEET_KIND;
use crate::session::{ExtractionProgress, SessionState};
use crate::AppState;

fn default_document_type() -> String {
    TERM_SHEET_KIND.to_string()
}

/// POST /api/generate/start request
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default = "default_document_type")]
    pub document_type: String,
}

/// POST /api/generate/start response
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub session_id: Uuid,
    pub document_type: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

/// POST /api/generate/run/:id response
#[derive(Debug, Serialize)]
pub struct RunAcceptedResponse {
    pub session_id: Uuid,
    pub accepted: bool,
}

/// GET /api/generate/status/:id response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session_id: Uuid,
    pub state: SessionState,
    pub progress: ExtractionProgress,
    pub model_calls: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub can_finalize: bool,
    pub elapsed_seconds: Option<i64>,
}

/// POST /api/generate/start
pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<StartResponse>> {
    let session_id = state.sessions.start(&request.document_type).await?;
    let session = state.sessions.get(session_id).await?;

    Ok(Json(StartResponse {
        session_id,
        state: session.state(),
        created_at: session.created_at,
        document_type: session.document_type,
    }))
}

/// POST /api/generate/run/:id
///
/// Moves the session INIT → EXTRACTING before responding, then extracts in
/// a background task. A second request for the same session gets 409.
/// Poll `/api/generate/status/:id` for progress.
pub async fn run_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<RunAcceptedResponse>)> {
    let run = state.sessions.begin_run(session_id).await?;

    let sessions = state.sessions.clone();
    let last_error = state.last_error.clone();
    tokio::spawn(async move {
        tracing::info!(session_id = %session_id, "Background extraction task started");
        match sessions.complete_run(run).await {
            Ok(summary) => tracing::info!(
                session_id = %session_id,
                resolved = summary.resolved,
                unresolved = summary.unresolved,
                "Background extraction task completed"
            ),
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Background extraction task failed");
                *last_error.write().await = Some(e.to_string());
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAcceptedResponse {
            session_id,
            accepted: true,
        }),
    ))
}

/// GET /api/generate/status/:id
pub async fn get_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<StatusResponse>> {
    let session = state.sessions.get(session_id).await?;
    tracing::debug!(session_id = %session_id, state = %session.state(), "Status query");

    let resolved = session.fields().resolved_count();
    let elapsed_seconds = session.extraction_started_at.map(|started| {
        session
            .extraction_completed_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(started)
            .num_seconds()
    });

    Ok(Json(StatusResponse {
        session_id,
        state: session.state(),
        model_calls: session.model_calls.len(),
        resolved,
        unresolved: session.fields().len() - resolved,
        can_finalize: session.can_finalize(),
        elapsed_seconds,
        progress: session.progress,
    }))
}

pub fn generate_routes() -> Router<AppState> {
    Router::new()
        .route("/api/generate/start", post(start_session))
        .route("/api/generate/run/:id", post(run_session))
        .route("/api/generate/status/:id", get(get_status))
}
