//! Error handling for the inventory ledger
//!
//! Every core operation returns [`AppResult`]. An error aborts the enclosing
//! unit of work; nothing is retried here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ledger_shared::TransitionError;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Ledger error types
#[derive(Error, Debug)]
pub enum LedgerError {
    // Caller input errors
    #[error("{entity} not found: {id}")]
    InvalidReference { entity: &'static str, id: Uuid },

    #[error("Invalid quantity for {field}: {message}")]
    InvalidQuantity { field: String, message: String },

    // Ledger invariant errors
    #[error("Negative balance: {0}")]
    NegativeBalance(String),

    #[error(
        "Insufficient stock of ingredient {ingredient_id} ({unit}): requested {requested}, short by {shortfall}"
    )]
    InsufficientStock {
        ingredient_id: Uuid,
        unit: String,
        requested: Decimal,
        shortfall: Decimal,
    },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    // Infrastructure errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error")]
    InternalError(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn invalid_quantity(field: &str, message: impl Into<String>) -> Self {
        LedgerError::InvalidQuantity {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        LedgerError::InvalidReference { entity, id }
    }

    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidReference { .. } => "INVALID_REFERENCE",
            LedgerError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            LedgerError::NegativeBalance(_) => "NEGATIVE_BALANCE",
            LedgerError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            LedgerError::InvalidTransition(_) => "INVALID_TRANSITION",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::Configuration(_) => "CONFIGURATION_ERROR",
            LedgerError::DatabaseError(_) => "DATABASE_ERROR",
            LedgerError::Internal(_) | LedgerError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            LedgerError::InvalidReference { .. } => StatusCode::NOT_FOUND,
            LedgerError::InvalidQuantity { .. } => StatusCode::BAD_REQUEST,
            LedgerError::NegativeBalance(_)
            | LedgerError::InsufficientStock { .. }
            | LedgerError::InvalidTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::Configuration(_)
            | LedgerError::DatabaseError(_)
            | LedgerError::Internal(_)
            | LedgerError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn is_internal(&self) -> bool {
        self.status().is_server_error()
    }
}

/// Postgres codes for a cancelled statement and a lock wait that gave up
const TIMEOUT_SQLSTATES: [&str; 2] = ["57014", "55P03"];

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => {
                LedgerError::Timeout("no database connection available".to_string())
            }
            sqlx::Error::Database(db)
                if db
                    .code()
                    .is_some_and(|code| TIMEOUT_SQLSTATES.iter().any(|timeout| *timeout == code)) =>
            {
                LedgerError::Timeout(db.message().to_string())
            }
            _ => LedgerError::DatabaseError(err),
        }
    }
}

impl From<TransitionError> for LedgerError {
    fn from(err: TransitionError) -> Self {
        LedgerError::InvalidTransition(err.to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details stay in the log
        let message = if self.is_internal() {
            tracing::error!("Error: {:?}", self);
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let field = match &self {
            LedgerError::InvalidQuantity { field, .. } => Some(field.clone()),
            _ => None,
        };

        let detail = ErrorDetail {
            code: self.code().to_string(),
            message,
            field,
        };

        (status, Json(ErrorResponse { error: detail })).into_response()
    }
}

/// Result type alias for ledger operations
pub type AppResult<T> = Result<T, LedgerError>;
