//! Error types for query-limiter

use crate::limiter::QueryLimitExceeded;
use thiserror::Error;

/// Result type alias for query-limiter operations
pub type LimitResult<T> = Result<T, LimitError>;

/// Boxed error raised by a database backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for limited query execution
#[derive(Debug, Error)]
pub enum LimitError {
    /// A limiter was requested without any limit configured
    #[error("At least one of amount, individual_max_time, or total_max_time must be set")]
    NoLimitConfigured,

    /// A named connection is not registered
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// A configured query limit was breached
    #[error(transparent)]
    Exceeded(#[from] QueryLimitExceeded),

    /// The underlying database execution failed
    #[error("Database error: {0}")]
    Database(#[source] BoxError),
}

impl LimitError {
    /// Wrap a backend error
    pub fn database(err: impl Into<BoxError>) -> Self {
        Self::Database(err.into())
    }

    /// Check if this is a limit breach
    pub fn is_exceeded(&self) -> bool {
        matches!(self, Self::Exceeded(_))
    }

    /// Get the breach details, if this is a limit breach
    pub fn as_exceeded(&self) -> Option<&QueryLimitExceeded> {
        match self {
            Self::Exceeded(exceeded) => Some(exceeded),
            _ => None,
        }
    }

    /// Consume the error, returning the breach details if this is a limit breach
    pub fn into_exceeded(self) -> Option<QueryLimitExceeded> {
        match self {
            Self::Exceeded(exceeded) => Some(exceeded),
            _ => None,
        }
    }

    /// Downcast a backend error to its concrete type
    pub fn downcast_database_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Database(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for LimitError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Database(Box::new(err))
    }
}
