//! Review API handlers
//!
//! Every mutation returns the updated field together with a fresh preview.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::session::manager::{ConflictReportEntry, ExecutionLog, FieldConflict};
use crate::session::{DocumentSession, SessionState};
use crate::types::{ExtractedField, ReviewPriority};
use crate::AppState;

/// POST /api/update-field request
#[derive(Debug, Deserialize)]
pub struct UpdateFieldRequest {
    pub session_id: Uuid,
    pub section: String,
    pub field: String,
    /// `null` clears an optional field
    pub value: Value,
    pub reason: Option<String>,
}

/// POST /api/confirm-field request
#[derive(Debug, Deserialize)]
pub struct ConfirmFieldRequest {
    pub session_id: Uuid,
    pub section: String,
    pub field: String,
    pub reason: Option<String>,
}

/// POST /api/resolve-conflict request
#[derive(Debug, Deserialize)]
pub struct ResolveConflictRequest {
    pub session_id: Uuid,
    pub section: String,
    pub field: String,
    /// Index into the field's `conflicts`
    pub conflict_index: usize,
    pub reason: Option<String>,
}

/// POST /api/finalize request
#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub session_id: Uuid,
}

/// Response to every field mutation
#[derive(Debug, Serialize)]
pub struct FieldMutationResponse {
    pub session_id: Uuid,
    pub section: String,
    pub field: String,
    pub updated: ExtractedField,
    pub can_finalize: bool,
    pub unresolved_fields: Vec<String>,
    pub preview: String,
}

/// GET /api/preview/:id response
#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub session_id: Uuid,
    pub state: SessionState,
    pub document: String,
    pub can_finalize: bool,
    pub unresolved_fields: Vec<String>,
}

/// POST /api/finalize response
#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub session_id: Uuid,
    pub state: SessionState,
    pub document: String,
    pub conflicts: Vec<ConflictReportEntry>,
    pub execution: ExecutionLog,
}

/// One entry of the review queue
#[derive(Debug, Serialize)]
pub struct ReviewItem {
    pub section: String,
    pub field: String,
    pub priority: ReviewPriority,
}

/// GET /api/session/:id response
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: DocumentSession,
    /// Fields still needing a decision, `missing` before `decide`
    pub review_queue: Vec<ReviewItem>,
    pub conflicts: Vec<FieldConflict>,
    pub missing_required: Vec<String>,
    pub can_finalize: bool,
}

/// DELETE /api/session/:id response
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub session_id: Uuid,
    pub deleted: bool,
}

async fn mutation_response(
    state: &AppState,
    session_id: Uuid,
    section: String,
    field: String,
    updated: ExtractedField,
) -> ApiResult<Json<FieldMutationResponse>> {
    let unresolved_fields = state.sessions.unresolved_fields(session_id).await?;
    let preview = state.sessions.preview(session_id).await?;
    Ok(Json(FieldMutationResponse {
        session_id,
        section,
        field,
        updated,
        can_finalize: unresolved_fields.is_empty(),
        unresolved_fields,
        preview,
    }))
}

/// POST /api/update-field
pub async fn update_field(
    State(state): State<AppState>,
    Json(request): Json<UpdateFieldRequest>,
) -> ApiResult<Json<FieldMutationResponse>> {
    let updated = state
        .sessions
        .update_field(
            request.session_id,
            &request.section,
            &request.field,
            request.value,
            request.reason,
        )
        .await?;
    mutation_response(&state, request.session_id, request.section, request.field, updated).await
}

/// POST /api/confirm-field
pub async fn confirm_field(
    State(state): State<AppState>,
    Json(request): Json<ConfirmFieldRequest>,
) -> ApiResult<Json<FieldMutationResponse>> {
    let updated = state
        .sessions
        .confirm_field(request.session_id, &request.section, &request.field, request.reason)
        .await?;
    mutation_response(&state, request.session_id, request.section, request.field, updated).await
}

/// POST /api/resolve-conflict
pub async fn resolve_conflict(
    State(state): State<AppState>,
    Json(request): Json<ResolveConflictRequest>,
) -> ApiResult<Json<FieldMutationResponse>> {
    let updated = state
        .sessions
        .resolve_conflict(
            request.session_id,
            &request.section,
            &request.field,
            request.conflict_index,
            request.reason,
        )
        .await?;
    mutation_response(&state, request.session_id, request.section, request.field, updated).await
}

/// GET /api/preview/:id
pub async fn preview(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<PreviewResponse>> {
    let document = state.sessions.preview(session_id).await?;
    let session = state.sessions.get(session_id).await?;
    let unresolved_fields = session.fields().unresolved();
    Ok(Json(PreviewResponse {
        session_id,
        state: session.state(),
        document,
        can_finalize: unresolved_fields.is_empty(),
        unresolved_fields,
    }))
}

/// POST /api/finalize
pub async fn finalize(
    State(state): State<AppState>,
    Json(request): Json<FinalizeRequest>,
) -> ApiResult<Json<FinalizeResponse>> {
    let artifacts = state.sessions.finalize(request.session_id).await?;
    Ok(Json(FinalizeResponse {
        session_id: artifacts.session_id,
        state: SessionState::Complete,
        document: artifacts.document,
        conflicts: artifacts.conflicts,
        execution: artifacts.execution,
    }))
}

/// GET /api/session/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.sessions.get(session_id).await?;
    let conflicts = state.sessions.conflicts(session_id).await?;
    let missing_required = state.sessions.missing_required_fields(session_id).await?;

    let mut review_queue: Vec<ReviewItem> = session
        .fields()
        .iter()
        .filter_map(|(section, field, f)| match f.review_priority() {
            ReviewPriority::Auto => None,
            priority => Some(ReviewItem {
                section: section.to_string(),
                field: field.to_string(),
                priority,
            }),
        })
        .collect();
    review_queue.sort_by_key(|item| item.priority != ReviewPriority::Missing);

    Ok(Json(SessionResponse {
        can_finalize: session.can_finalize(),
        session,
        review_queue,
        conflicts,
        missing_required,
    }))
}

/// DELETE /api/session/:id
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<DeleteResponse>> {
    state.sessions.delete(session_id).await?;
    Ok(Json(DeleteResponse {
        session_id,
        deleted: true,
    }))
}

pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/api/update-field", post(update_field))
        .route("/api/confirm-field", post(confirm_field))
        .route("/api/resolve-conflict", post(resolve_conflict))
        .route("/api/preview/:id", get(preview))
        .route("/api/finalize", post(finalize))
        .route("/api/session/:id", get(get_session).delete(delete_session))
}
