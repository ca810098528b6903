//! HTTP-facing error type for lending-service.

use crate::engine::LendingError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::{AppError, ErrorResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Lending(#[from] LendingError),

    #[error(transparent)]
    App(#[from] AppError),
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::App(AppError::ValidationError(err))
    }
}

/// HTTP status for an engine error.
pub fn lending_status(err: &LendingError) -> StatusCode {
    match err {
        LendingError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        LendingError::WouldOrphanModule { .. }
        | LendingError::InvalidState { .. }
        | LendingError::FundExists(_) => StatusCode::CONFLICT,
        LendingError::UnknownBucket(_)
        | LendingError::UnknownLoan(_)
        | LendingError::UnknownFund(_) => StatusCode::NOT_FOUND,
        LendingError::InsufficientLiquidity { .. }
        | LendingError::InsufficientShares { .. }
        | LendingError::Insolvent(_)
        | LendingError::TransferFailed { .. }
        | LendingError::ReservedAccount(_)
        | LendingError::PolicyDeclined { .. }
        | LendingError::ArithmeticOverflow(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LendingError::InvalidRate(_)
        | LendingError::OutOfBounds { .. }
        | LendingError::InsufficientRepayment { .. }
        | LendingError::Overpayment { .. }
        | LendingError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Lending(err) => {
                let status = lending_status(&err);
                if status == StatusCode::FORBIDDEN {
                    tracing::warn!(code = err.code(), error = %err, "Privileged call rejected");
                }
                let body = ErrorResponse {
                    error: err.code().to_string(),
                    details: Some(err.to_string()),
                };
                (status, Json(body)).into_response()
            }
            ApiError::App(err) => err.into_response(),
        }
    }
}
