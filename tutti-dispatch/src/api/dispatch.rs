//! Dispatch triggers

use axum::{
    extract::{rejection::PathRejection, Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::orchestrator::{DispatchReport, NeedDispatch};
use crate::AppState;

/// POST /api/projects/:project_id/dispatch
pub async fn dispatch_project(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<DispatchReport>> {
    let Path(project_id) = path?;
    let report = state.orchestrator.dispatch_project(project_id).await?;
    Ok(Json(report))
}

/// POST /api/needs/:need_id/dispatch
pub async fn dispatch_need(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<NeedDispatch>> {
    let Path(need_id) = path?;
    let outcome = state.orchestrator.dispatch_need(need_id).await?;
    Ok(Json(outcome))
}
