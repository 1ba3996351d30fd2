// src/routes/cleaning_records.rs

use axum::{extract::State, http::StatusCode, Json};

use super::{engine_error, ApiError};
use crate::models::{CleaningRecord, NewCleaningRecord};
use crate::AppState;

pub async fn create_cleaning_record(
    State(state): State<AppState>,
    Json(body): Json<NewCleaningRecord>,
) -> Result<(StatusCode, Json<CleaningRecord>), ApiError> {
    let record = state.cleaning.create(&body).await.map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(record)))
}
