//! Query limits for a scope.
//!
//! This module provides:
//! - [`Limits`]: the count and time budgets to enforce
//! - [`QueryLimiter`]: the interceptor that counts, times and checks queries
//! - [`limit_queries`]: installs one limiter on a set of connections until the
//!   returned [`LimitGuard`] is dropped
//! - [`QueryLimitExceeded`]: the breach report
//!
//! # Example
//!
//! ```rust,ignore
//! use query_limiter::{limit_queries, Limits, Params};
//! use std::time::Duration;
//!
//! let guard = limit_queries(
//!     &connections,
//!     Limits::new()
//!         .with_amount(2)
//!         .with_individual_max_time(Duration::from_millis(50)),
//! )?;
//!
//! let db = connections.get("default")?;
//! db.execute("SELECT 1", Params::None).await?;
//! db.execute("SELECT 2", Params::None).await?;
//! // Refused before it reaches the database:
//! let err = db.execute("SELECT 3", Params::None).await.unwrap_err();
//! assert!(err.is_exceeded());
//!
//! drop(guard);
//! ```

mod config;
mod interceptor;
mod scope;
mod types;

#[cfg(test)]
mod tests;

pub use config::Limits;
pub use interceptor::QueryLimiter;
pub use scope::{LimitGuard, limit_queries, limit_queries_in, limit_queries_with};
pub use types::{LimitKind, QueryLimitExceeded};
