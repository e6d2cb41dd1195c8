//! # query-limiter
//!
//! Bound the SQL a block of code may run, to catch N+1 and slow-query
//! regressions in tests.
//!
//! ## Features
//!
//! - **Count limit**: fail as soon as more than `amount` queries are attempted;
//!   the extra query never reaches the database
//! - **Time limits**: fail on any query slower than `individual_max_time`, or
//!   once all queries together exceed `total_max_time`
//! - **Scoped**: limits live exactly as long as a [`LimitGuard`], and are removed
//!   from every watched connection on drop, including on error or panic
//! - **Readable reports**: breaches list every query with bind values
//!   interpolated and its execution time
//! - **Backend agnostic**: any [`Executor`] can sit behind a [`Connection`];
//!   a `tokio_postgres` executor ships behind the `postgres` feature
//!
//! ## Example
//!
//! ```ignore
//! use query_limiter::{Connections, Limits, Params, limit_queries};
//!
//! let connections = Connections::new().with("default", PgExecutor::connect(&url).await?);
//! let db = connections.get("default")?;
//!
//! let _guard = limit_queries(&connections, Limits::new().with_amount(1))?;
//! db.execute("SELECT * FROM users", Params::None).await?;
//! // Loading each user's posts one by one would fail here:
//! let err = db.execute("SELECT * FROM posts WHERE user_id = $1", vec![1.into()]).await;
//! assert!(err.unwrap_err().is_exceeded());
//! ```

pub mod connection;
pub mod error;
pub mod format;
pub mod limiter;
pub mod query;
pub mod settings;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use connection::{
    Connection, Connections, ExecContext, ExecuteCall, ExecuteWrapper, Executor, Next, WrapperId,
};
pub use error::{BoxError, LimitError, LimitResult};
pub use format::{format_sql, humanize};
pub use limiter::{
    LimitGuard, LimitKind, Limits, QueryLimitExceeded, QueryLimiter, limit_queries,
    limit_queries_in, limit_queries_with,
};
pub use query::{Params, Query, SqlValue};
pub use settings::{
    LimiterSettings, disable_query_limiter, init_from_env, set_default_db_connections, settings,
};

#[cfg(feature = "postgres")]
pub use postgres::{PgExecutor, PgOutput};

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
