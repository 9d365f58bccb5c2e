use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::info;

use crate::{
    error::{AppError, AppResult},
    models::{ApiMessage, BatchRequest},
    state::AppState,
};

pub async fn healthcheck(State(state): State<AppState>) -> AppResult<Json<ApiMessage>> {
    state.repo.ping().await?;

    Ok(Json(ApiMessage {
        message: "ok".to_string(),
    }))
}

/// Resolves a batch and answers with the identifiers confirmed online. The
/// answer is sent when the batch finishes or the deadline fires, whichever
/// comes first.
pub async fn resolve_online_users(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> AppResult<Json<Vec<i64>>> {
    let Json(batch) = payload.map_err(|rejection| AppError::validation(rejection.body_text()))?;
    let requested = batch.object_ids.len();

    let report = state.aggregator.resolve(batch.object_ids).await;

    info!(
        requested,
        online = report.online.len(),
        completed = report.completed,
        "batch resolved"
    );
    Ok(Json(report.online))
}
