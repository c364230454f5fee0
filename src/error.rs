use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::response::{ApiResponse, ErrorData, Meta};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("insufficient stock for product {name}: requested {requested}, available {available}")]
    InsufficientStock {
        name: String,
        requested: i32,
        available: i32,
    },

    #[error("invalid order status transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("{0}")]
    GatewayFailure(String),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for the external interface.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            AppError::GatewayFailure(_) => "GATEWAY_FAILURE",
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
            AppError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            AppError::GatewayFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details stay in the logs; clients only see the stable
        // message from Display.
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "request failed");
        }

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                error: self.to_string(),
                code: self.code(),
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(AppError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(
            AppError::InsufficientStock {
                name: "Widget".into(),
                requested: 5,
                available: 2,
            }
            .code(),
            "INSUFFICIENT_STOCK"
        );
        assert_eq!(
            AppError::InvalidStateTransition {
                from: "completed".into(),
                to: "pending".into(),
            }
            .code(),
            "INVALID_STATE_TRANSITION"
        );
        assert_eq!(AppError::GatewayFailure("x".into()).code(), "GATEWAY_FAILURE");
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn insufficient_stock_message_names_product_and_quantities() {
        let err = AppError::InsufficientStock {
            name: "Widget".into(),
            requested: 6,
            available: 4,
        };
        assert_eq!(
            err.to_string(),
            "insufficient stock for product Widget: requested 6, available 4"
        );
    }
}
