use axum::http::StatusCode;

use crate::error::EngineError;

pub mod cleaning_records;
pub mod health;
pub mod housekeeping;
pub mod occupancy;

pub type ApiError = (StatusCode, String);

// Common error mapper
pub fn engine_error(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Downstream(_) => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string())
}
