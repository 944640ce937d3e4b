//! Need management endpoints

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tutti_common::db::{Need, Request};
use tutti_common::time;
use uuid::Uuid;

use crate::error::{ApiResult, EngineError};
use crate::planning::{self, NeedRequest};
use crate::roster;
use crate::AppState;

/// A need with its request history
#[derive(Debug, Serialize)]
pub struct NeedDetail {
    #[serde(flatten)]
    pub need: Need,
    pub accepted: i64,
    pub pending: i64,
    pub requests: Vec<Request>,
}

/// POST /api/projects/:project_id/needs
pub async fn create_need(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<NeedRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Need>)> {
    let Path(project_id) = path?;
    let Json(body) = payload?;
    let need = planning::create_need(&state.db, project_id, &body, time::now()).await?;
    Ok((StatusCode::CREATED, Json(need)))
}

/// GET /api/needs/:need_id
pub async fn get_need(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<NeedDetail>> {
    let Path(need_id) = path?;
    let mut conn = state.db.acquire().await.map_err(EngineError::from)?;

    let need = roster::load_need(&mut conn, need_id)
        .await?
        .ok_or(EngineError::NeedNotFound(need_id))?;
    let counts = roster::need_counts(&mut conn, need_id).await?;
    let requests = roster::requests_for_need(&mut conn, need_id).await?;

    Ok(Json(NeedDetail {
        need,
        accepted: counts.accepted,
        pending: counts.pending,
        requests,
    }))
}

/// POST /api/needs/:need_id/pause
pub async fn pause_need(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Need>> {
    let Path(need_id) = path?;
    Ok(Json(planning::pause_need(&state.db, need_id, time::now()).await?))
}

/// POST /api/needs/:need_id/resume
pub async fn resume_need(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Need>> {
    let Path(need_id) = path?;
    Ok(Json(planning::resume_need(&state.db, need_id, time::now()).await?))
}
