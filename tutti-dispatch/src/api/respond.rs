//! Response link endpoints
//!
//! The link in a musician's message points at `GET /respond?token=...`; the
//! answer comes back as `POST /respond`.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use tutti_common::db::ResponseKind;
use tutti_common::time;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::response::ResponsePreview;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

/// GET /respond?token=T
///
/// Read-only; the token stays usable.
pub async fn show_response(
    State(state): State<AppState>,
    query: Result<Query<TokenQuery>, QueryRejection>,
) -> ApiResult<Json<ResponsePreview>> {
    let Query(query) = query?;
    let preview = state.responses.preview(&query.token, time::now()).await?;
    Ok(Json(preview))
}

#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub token: String,
    pub response: ResponseKind,
}

#[derive(Debug, Serialize)]
pub struct SubmitAck {
    pub status: &'static str,
    pub request_id: Uuid,
    pub response: ResponseKind,
}

/// POST /respond
pub async fn submit_response(
    State(state): State<AppState>,
    payload: Result<Json<SubmitResponse>, JsonRejection>,
) -> ApiResult<Json<SubmitAck>> {
    let Json(body) = payload?;
    let receipt = state
        .responses
        .submit(&body.token, body.response, time::now())
        .await?;

    Ok(Json(SubmitAck {
        status: "ok",
        request_id: receipt.request_id,
        response: receipt.response,
    }))
}
