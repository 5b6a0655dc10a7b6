use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CreditEngineError>;

#[derive(Error, Debug)]
pub enum CreditEngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Credit lot not found: {0}")]
    CreditNotFound(uuid::Uuid),

    #[error("Listing not found: {0}")]
    ListingNotFound(uuid::Uuid),

    #[error("Project not found: {0}")]
    ProjectNotFound(uuid::Uuid),

    #[error("Listing is no longer active: {0}")]
    ListingClosed(uuid::Uuid),

    #[error("Insufficient credits: requested {requested}, available {available}")]
    InsufficientBalance { requested: String, available: String },

    #[error("Cannot purchase credits from your own listing")]
    SelfTradeForbidden,

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Conservation invariant violated on credit lot {credit_id}: {detail}")]
    ConservationViolation {
        credit_id: uuid::Uuid,
        detail: String,
    },

    #[error("Internal server error: {0}")]
    Internal(String),
}

// Implement From for async_nats errors
impl<T> From<async_nats::error::Error<T>> for CreditEngineError
where
    T: std::fmt::Debug + std::fmt::Display + Clone + PartialEq,
{
    fn from(err: async_nats::error::Error<T>) -> Self {
        CreditEngineError::Nats(format!("NATS error: {:?}", err))
    }
}

impl From<async_nats::PublishError> for CreditEngineError {
    fn from(err: async_nats::PublishError) -> Self {
        CreditEngineError::Nats(format!("NATS publish error: {}", err))
    }
}

impl From<serde_json::Error> for CreditEngineError {
    fn from(err: serde_json::Error) -> Self {
        CreditEngineError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl ResponseError for CreditEngineError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = match self {
            // Never leak raw storage errors to callers
            CreditEngineError::Database(_)
            | CreditEngineError::Redis(_)
            | CreditEngineError::Nats(_)
            | CreditEngineError::ConservationViolation { .. }
            | CreditEngineError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CreditEngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CreditEngineError::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CreditEngineError::Nats(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CreditEngineError::DecimalParse(_) => StatusCode::BAD_REQUEST,
            CreditEngineError::Validation(_) => StatusCode::BAD_REQUEST,
            CreditEngineError::CreditNotFound(_) => StatusCode::NOT_FOUND,
            CreditEngineError::ListingNotFound(_) => StatusCode::NOT_FOUND,
            CreditEngineError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
            CreditEngineError::ListingClosed(_) => StatusCode::CONFLICT,
            CreditEngineError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
            CreditEngineError::SelfTradeForbidden => StatusCode::BAD_REQUEST,
            CreditEngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            CreditEngineError::ConservationViolation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CreditEngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl CreditEngineError {
    pub fn error_type(&self) -> &str {
        match self {
            CreditEngineError::Database(_) => "database_error",
            CreditEngineError::Redis(_) => "cache_error",
            CreditEngineError::Nats(_) => "messaging_error",
            CreditEngineError::DecimalParse(_) => "decimal_parse_error",
            CreditEngineError::Validation(_) => "invalid_input",
            CreditEngineError::CreditNotFound(_) => "not_found",
            CreditEngineError::ListingNotFound(_) => "not_found",
            CreditEngineError::ProjectNotFound(_) => "not_found",
            CreditEngineError::ListingClosed(_) => "listing_closed",
            CreditEngineError::InsufficientBalance { .. } => "insufficient_balance",
            CreditEngineError::SelfTradeForbidden => "self_trade_forbidden",
            CreditEngineError::Unauthorized => "unauthorized",
            CreditEngineError::ConservationViolation { .. } => "conservation_violation",
            CreditEngineError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_are_not_leaked() {
        let err = CreditEngineError::Internal("pool exhausted on pg-primary".to_string());
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_type_is_stable_for_ledger_failures() {
        let err = CreditEngineError::InsufficientBalance {
            requested: "60".to_string(),
            available: "40".to_string(),
        };
        assert_eq!(err.error_type(), "insufficient_balance");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = CreditEngineError::SelfTradeForbidden;
        assert_eq!(err.error_type(), "self_trade_forbidden");

        let err = CreditEngineError::ListingClosed(uuid::Uuid::new_v4());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
