//! Error types for mailcade

use thiserror::Error;

/// Main error type for mailcade
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for mailcade
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a storage-layer failure
    pub fn store(err: impl std::fmt::Display) -> Self {
        Error::StoreUnavailable(err.to_string())
    }

    /// Wrap a queue-layer failure
    pub fn queue(err: impl std::fmt::Display) -> Self {
        Error::QueueUnavailable(err.to_string())
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Validation(_) => 400,
            Error::Unauthenticated(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::QueueUnavailable(_) => 503,
            Error::StoreUnavailable(_) => 503,
            Error::TransportFailure(_) => 503,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the stable error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "INTERNAL",
            Error::Validation(_) => "VALIDATION",
            Error::Unauthenticated(_) => "UNAUTHENTICATED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::QueueUnavailable(_) => "QUEUE_UNAVAILABLE",
            Error::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Error::TransportFailure(_) => "TRANSPORT_FAILURE",
            Error::Internal(_) => "INTERNAL",
            Error::Other(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::Unauthenticated("x".into()).status_code(), 401);
        assert_eq!(Error::Forbidden("x".into()).status_code(), 403);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::Conflict("x".into()).status_code(), 409);
        assert_eq!(Error::QueueUnavailable("x".into()).status_code(), 503);
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Validation("x".into()).code(), "VALIDATION");
        assert_eq!(Error::Conflict("x".into()).code(), "CONFLICT");
        assert_eq!(
            Error::TransportFailure("x".into()).code(),
            "TRANSPORT_FAILURE"
        );
    }
}
