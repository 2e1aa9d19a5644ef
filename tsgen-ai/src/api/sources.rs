//! Data source listing

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::error::ApiResult;
use crate::sources::DataSourceInfo;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DataSourcesResponse {
    pub directory: String,
    pub files: Vec<DataSourceInfo>,
}

/// GET /api/data-sources
pub async fn list_data_sources(State(state): State<AppState>) -> ApiResult<Json<DataSourcesResponse>> {
    let builder = state.sources.clone();
    let files = tokio::task::spawn_blocking(move || builder.list())
        .await
        .map_err(|e| crate::ApiError::Internal(e.to_string()))??;

    Ok(Json(DataSourcesResponse {
        directory: state.sources.dir().display().to_string(),
        files,
    }))
}

pub fn source_routes() -> Router<AppState> {
    Router::new().route("/api/data-sources", get(list_data_sources))
}
