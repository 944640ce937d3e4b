//! Sweep triggers for an external scheduler

use axum::{extract::State, Json};
use tutti_common::time;

use crate::error::ApiResult;
use crate::sweep::{ReminderSweepReport, TimeoutSweepReport};
use crate::AppState;

/// POST /api/sweeps/timeouts
pub async fn run_timeout_sweep(
    State(state): State<AppState>,
) -> ApiResult<Json<TimeoutSweepReport>> {
    Ok(Json(state.sweeper.run_timeouts(time::now()).await?))
}

/// POST /api/sweeps/reminders
pub async fn run_reminder_sweep(
    State(state): State<AppState>,
) -> ApiResult<Json<ReminderSweepReport>> {
    Ok(Json(state.sweeper.run_reminders(time::now()).await?))
}
