use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::rest::error::{ApiError, ApiResult};
use crate::api::rest::AppState;

#[derive(Debug, Deserialize)]
pub struct ReadParams {
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileContent {
    pub content: String,
}

/// Returns a file from the working directory. Only paths under the public
/// prefix are served.
pub async fn read_file(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReadParams>,
) -> ApiResult<Json<FileContent>> {
    let path = params
        .path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'path' is required".to_string()))?;

    let Some(full) = state
        .runner
        .workspace()
        .resolve_public(path.trim(), &state.public_prefix)
    else {
        warn!(%path, "read outside the public prefix refused");
        return Err(ApiError::Forbidden(format!(
            "Access is limited to paths under {}",
            state.public_prefix
        )));
    };

    let full = match state.runner.workspace().confine(&full).await {
        Ok(Some(real)) => real,
        Ok(None) => {
            warn!(%path, "read through a link leaving the working directory refused");
            return Err(ApiError::Forbidden(format!(
                "Access is limited to paths under {}",
                state.public_prefix
            )));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("File not found: {path}")));
        }
        Err(e) => return Err(ApiError::Internal(e.into())),
    };

    match tokio::fs::metadata(&full).await {
        Ok(meta) if meta.is_dir() => {
            return Err(ApiError::BadRequest(format!("{path} is a directory")));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("File not found: {path}")));
        }
        Err(e) => return Err(ApiError::Internal(e.into())),
    }
    let bytes = tokio::fs::read(&full)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(Json(FileContent {
        content: String::from_utf8_lossy(&bytes).into_owned(),
    }))
}
