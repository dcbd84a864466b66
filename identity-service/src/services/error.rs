use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Data access denied: {0}")]
    DataAccessDenied(String),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Coarse classification used for logging and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    RateLimit,
    NotFound,
    Conflict,
    Internal,
    Unavailable,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::Authentication(_)
            | ServiceError::InvalidToken(_)
            | ServiceError::TokenExpired => ErrorKind::Authentication,
            ServiceError::Authorization(_) | ServiceError::DataAccessDenied(_) => {
                ErrorKind::Authorization
            }
            ServiceError::RateLimited { .. } => ErrorKind::RateLimit,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::ServiceUnavailable(_) => ErrorKind::Unavailable,
            ServiceError::Database(_)
            | ServiceError::Redis(_)
            | ServiceError::Internal(_)
            | ServiceError::Configuration(_) => ErrorKind::Internal,
        }
    }

    /// Store or infrastructure failure rather than a caller problem.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self.kind(), ErrorKind::Internal | ErrorKind::Unavailable)
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Redis(e) => AppError::RedisError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::ServiceUnavailable(e) => AppError::ServiceUnavailable(e),
            ServiceError::Configuration(e) => AppError::ConfigError(anyhow::anyhow!(e)),
            ServiceError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::Authentication(e) | ServiceError::InvalidToken(e) => {
                AppError::Unauthorized(anyhow::anyhow!(e))
            }
            ServiceError::TokenExpired => AppError::Unauthorized(anyhow::anyhow!("Token expired")),
            ServiceError::Authorization(e) | ServiceError::DataAccessDenied(e) => {
                AppError::Forbidden(anyhow::anyhow!(e))
            }
            ServiceError::RateLimited { retry_after_secs } => AppError::TooManyRequests(
                "Too many requests. Please try again later.".to_string(),
                Some(retry_after_secs),
            ),
            ServiceError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            ServiceError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn token_failures_map_to_unauthorized() {
        for err in [
            ServiceError::TokenExpired,
            ServiceError::InvalidToken("kind mismatch".into()),
            ServiceError::Authentication("bad".into()),
        ] {
            assert_eq!(err.kind(), ErrorKind::Authentication);
            assert_eq!(AppError::from(err).status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn conflict_and_forbidden_statuses() {
        assert_eq!(
            AppError::from(ServiceError::Conflict("2fa".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(ServiceError::DataAccessDenied("blocked".into())).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn store_failures_are_infrastructure() {
        assert!(ServiceError::Internal(anyhow::anyhow!("boom")).is_infrastructure());
        assert!(!ServiceError::Validation("x".into()).is_infrastructure());
    }
}
