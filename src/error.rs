//! Domain errors raised by the marketplace repositories

use thiserror::Error;

/// Errors with a meaning callers act on. Repositories return them wrapped in
/// `anyhow::Error`; the API layer downcasts to pick a status code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl MarketError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        MarketError::NotFound { entity, id }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        MarketError::Invalid(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        MarketError::Conflict(message.into())
    }
}
