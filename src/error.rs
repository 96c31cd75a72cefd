//! Crate-wide error taxonomy: the first four variants are caller-visible,
//! the last four are operator-visible.

use thiserror::Error;

/// Errors produced anywhere in the matching core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-supplied data failed validation (Intake step 1).
    #[error("validation error: {0}")]
    Validation(String),

    /// The idempotency key was already claimed within its TTL.
    #[error("duplicate submission")]
    Duplicate,

    /// The referenced order does not exist in the ledger.
    #[error("order not found: {0}")]
    NotFound(uuid::Uuid),

    /// A cancel was attempted against an order already in a terminal state.
    #[error("order {0} is in a terminal state and cannot be cancelled")]
    Conflict(uuid::Uuid),

    /// The ledger (durable store) faulted.
    #[error("storage error: {0}")]
    Storage(String),

    /// The job transport (durable queue) faulted.
    #[error("queue error: {0}")]
    Queue(String),

    /// The idempotency gate or book's backing store faulted.
    #[error("cache error: {0}")]
    Cache(String),

    /// An internal consistency invariant was violated. Never clamp on this;
    /// abort the step and surface it for out-of-band investigation.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl CoreError {
    /// True for the four taxonomy entries a caller is meant to see and act on.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::Duplicate
                | CoreError::NotFound(_)
                | CoreError::Conflict(_)
        )
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("storage error: {}", e);
        CoreError::Storage(e.to_string())
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        tracing::error!("cache error: {}", e);
        CoreError::Cache(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
