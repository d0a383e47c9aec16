use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::LedgerError;
use crate::services::lifecycle::LifecycleError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Lifecycle(e) => match e {
                LifecycleError::InvalidCode(_) | LifecycleError::InvalidReason => {
                    StatusCode::BAD_REQUEST
                }
                LifecycleError::Ledger(LedgerError::NotFound(_)) => StatusCode::NOT_FOUND,
                LifecycleError::Ledger(LedgerError::AlreadyDeactivated(_)) => StatusCode::CONFLICT,
                LifecycleError::MintExhausted(_)
                | LifecycleError::Mint(_)
                | LifecycleError::Ledger(_)
                | LifecycleError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Lifecycle(e) => e.kind(),
            AppError::Validation(_) => "validation",
            AppError::Unauthorized => "unauthorized",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Storage details stay in the logs, not the response body
        let message = if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({
            "error": self.kind(),
            "message": message,
        });

        // A 409 tells the cashier who already retired the code and when
        if let AppError::Lifecycle(e) = &self {
            if let Some(prior) = e.prior_stamp() {
                body["deactivatedAt"] = json!(prior.deactivated_at);
                body["deactivatedBy"] = json!(prior.deactivated_by);
                body["deactivationReason"] = json!(prior.deactivation_reason);
            }
        }

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
