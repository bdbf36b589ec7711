use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::api::rest::error::{ApiError, ApiResult};
use crate::api::rest::AppState;
use crate::runner::TaskOutcome;

#[derive(Debug, Deserialize)]
pub struct RunParams {
    pub task: Option<String>,
}

pub async fn run_task(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RunParams>,
) -> ApiResult<Json<TaskOutcome>> {
    let task = params
        .task
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'task' is required".to_string()))?;

    info!(task = %task, "received task");
    let outcome = state.runner.run(&task).await?;
    Ok(Json(outcome))
}
