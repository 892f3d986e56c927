// HTTP boundary error type: every failure in the request pipeline converges
// here and is rendered as the `{ "error", "code" }` envelope.
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::database::manager::DatabaseError;
use crate::database::store::StoreError;
use crate::executor::ExecuteError;
use crate::validator::ValidateError;

#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    Parse(String),
    RowLimitExceeded { max_rows: i32 },

    // 401 Unauthorized
    Unauthorized(String),

    // 404 Not Found
    DatabaseNotFound,

    // 503 Service Unavailable / 504 Gateway Timeout
    Unavailable,
    Timeout,

    // 500 Internal Server Error
    Database(String),
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Parse(_) => StatusCode::BAD_REQUEST,
            ApiError::RowLimitExceeded { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::DatabaseNotFound => StatusCode::NOT_FOUND,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Parse(_) => "PARSE_ERROR",
            ApiError::RowLimitExceeded { .. } => "ROW_LIMIT_EXCEEDED",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::DatabaseNotFound => "DATABASE_NOT_FOUND",
            ApiError::Unavailable => "UNAVAILABLE",
            ApiError::Timeout => "TIMEOUT",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-safe message. Anything sensitive stays in the log.
    pub fn message(&self) -> String {
        match self {
            ApiError::Parse(msg) => msg.clone(),
            ApiError::RowLimitExceeded { max_rows } => {
                format!("query exceeded the row limit of {max_rows}")
            }
            ApiError::Unauthorized(msg) => msg.clone(),
            ApiError::DatabaseNotFound => "database not found".to_string(),
            ApiError::Unavailable => "no database session available, try again later".to_string(),
            ApiError::Timeout => "statement timed out".to_string(),
            ApiError::Database(msg) => msg.clone(),
            ApiError::Internal(_) => "an internal error occurred".to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "error": self.message(),
            "code": self.error_code(),
        })
    }

    pub fn parse(message: impl Into<String>) -> Self {
        ApiError::Parse(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }
}

impl From<ValidateError> for ApiError {
    fn from(err: ValidateError) -> Self {
        // The whole validation taxonomy is a 400 PARSE_ERROR; the message
        // carries the specific reason (operation names are safe to echo,
        // schema names never appear in these messages).
        ApiError::parse(err.to_string())
    }
}

impl From<ExecuteError> for ApiError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::RowLimitExceeded { max_rows } => ApiError::RowLimitExceeded { max_rows },
            ExecuteError::Timeout => ApiError::Timeout,
            ExecuteError::Unavailable => ApiError::Unavailable,
            ExecuteError::TenantGone => ApiError::DatabaseNotFound,
            ExecuteError::Database(msg) => ApiError::Database(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TenantNotFound => ApiError::DatabaseNotFound,
            StoreError::Sqlx(sqlx::Error::PoolTimedOut) => ApiError::Unavailable,
            other => {
                tracing::error!(error = %other, "metadata store failure");
                ApiError::internal(other.to_string())
            }
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut) => ApiError::Unavailable,
            other => {
                tracing::error!(error = %other, "connection provider failure");
                ApiError::internal(other.to_string())
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}
