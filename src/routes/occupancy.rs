// src/routes/occupancy.rs

use axum::{extract::State, Json};
use chrono::Utc;

use super::{engine_error, ApiError};
use crate::engine::occupancy::ReconcileSummary;
use crate::engine::OCCUPANCY_JOB;
use crate::AppState;

/// Runs one reconciliation cycle now, queued behind a timer-fired cycle if one is running.
pub async fn reconcile(State(state): State<AppState>) -> Result<Json<ReconcileSummary>, ApiError> {
    let summary = state
        .scheduler
        .run_exclusive(OCCUPANCY_JOB, state.reconciler.run_cycle(Utc::now()))
        .await
        .map_err(engine_error)?;
    Ok(Json(summary))
}
