//! Database connections with an interceptable execution path.
//!
//! A [`Connection`] pairs a named [`Executor`] (the real database driver) with
//! an ordered chain of [`ExecuteWrapper`]s. Every statement issued through the
//! connection runs through the chain before it reaches the executor; any
//! wrapper may time, record, or abort it.
//!
//! ```rust,ignore
//! use query_limiter::{Connection, Connections, Params};
//!
//! let connections = Connections::new()
//!     .with("default", PgExecutor::connect(&database_url).await?)
//!     .with("replica", PgExecutor::connect(&replica_url).await?);
//!
//! let default = connections.get("default")?;
//! default.execute("SELECT 1", Params::None).await?;
//! ```

use crate::error::{LimitError, LimitResult};
use crate::query::{Params, SqlValue};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Context handed to wrappers and executors alongside each statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecContext {
    /// Alias of the connection the statement was issued on.
    pub connection: String,
    /// Optional query name/tag for identification.
    pub tag: Option<String>,
}

/// A single statement execution as seen by the wrapper chain.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteCall<'a> {
    /// Statement text.
    pub sql: &'a str,
    /// Bind parameters.
    pub params: &'a Params,
    /// Connection context.
    pub context: &'a ExecContext,
}

impl ExecuteCall<'_> {
    /// Whether this is a batch (multi-row) execution.
    pub fn many(&self) -> bool {
        self.params.is_many()
    }
}

/// The real execution step behind a connection.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Value produced by a successful execution.
    type Output: Send + 'static;

    /// Execute a statement against the database.
    ///
    /// Failures must be reported as [`LimitError::Database`].
    async fn execute(&self, call: ExecuteCall<'_>) -> LimitResult<Self::Output>;
}

/// An interceptor installed on a connection.
///
/// Implementations either return the result of `next.run(call)` or an error.
/// Errors returned by `next` must be propagated as-is.
#[async_trait]
pub trait ExecuteWrapper<T>: Send + Sync {
    /// Handle one statement execution.
    async fn call(&self, next: Next<'_, T>, call: ExecuteCall<'_>) -> LimitResult<T>;
}

/// The remainder of a wrapper chain, ending in the executor.
pub struct Next<'a, T> {
    wrappers: &'a [Arc<dyn ExecuteWrapper<T>>],
    executor: &'a dyn Executor<Output = T>,
}

impl<T: Send + 'static> Next<'_, T> {
    /// Run the next wrapper, or the executor once the chain is exhausted.
    pub async fn run(self, call: ExecuteCall<'_>) -> LimitResult<T> {
        match self.wrappers.split_first() {
            Some((wrapper, rest)) => {
                let next = Next {
                    wrappers: rest,
                    executor: self.executor,
                };
                wrapper.call(next, call).await
            }
            None => self.executor.execute(call).await,
        }
    }
}

/// Handle for removing an installed wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrapperId(u64);

type WrapperChain<T> = Vec<(WrapperId, Arc<dyn ExecuteWrapper<T>>)>;

/// A named database connection.
pub struct Connection<T> {
    alias: String,
    executor: Arc<dyn Executor<Output = T>>,
    wrappers: Mutex<WrapperChain<T>>,
    next_id: AtomicU64,
}

impl<T: Send + 'static> Connection<T> {
    /// Create a connection with no wrappers installed.
    pub fn new<E>(alias: impl Into<String>, executor: E) -> Self
    where
        E: Executor<Output = T> + 'static,
    {
        Self::from_arc(alias, Arc::new(executor))
    }

    /// Create a connection from a shared executor.
    pub fn from_arc(alias: impl Into<String>, executor: Arc<dyn Executor<Output = T>>) -> Self {
        Self {
            alias: alias.into(),
            executor,
            wrappers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// The connection alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Install a wrapper at the inner end of the chain.
    ///
    /// Wrappers installed earlier run first (outermost).
    pub fn install_wrapper(&self, wrapper: Arc<dyn ExecuteWrapper<T>>) -> WrapperId {
        let id = WrapperId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_wrappers().push((id, wrapper));
        id
    }

    /// Remove a previously installed wrapper.
    ///
    /// Returns `false` if the wrapper was already removed.
    pub fn remove_wrapper(&self, id: WrapperId) -> bool {
        let mut wrappers = self.lock_wrappers();
        match wrappers.iter().position(|(installed, _)| *installed == id) {
            Some(index) => {
                wrappers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of wrappers currently installed.
    pub fn wrapper_count(&self) -> usize {
        self.lock_wrappers().len()
    }

    /// Execute a statement through the wrapper chain.
    pub async fn execute(&self, sql: &str, params: impl Into<Params>) -> LimitResult<T> {
        self.dispatch(sql, params.into(), None).await
    }

    /// Execute a statement once per parameter set.
    pub async fn execute_many(&self, sql: &str, rows: Vec<Vec<SqlValue>>) -> LimitResult<T> {
        self.dispatch(sql, Params::Many(rows), None).await
    }

    /// Execute a statement, associating a tag for identification.
    pub async fn execute_tagged(
        &self,
        tag: &str,
        sql: &str,
        params: impl Into<Params>,
    ) -> LimitResult<T> {
        self.dispatch(sql, params.into(), Some(tag)).await
    }

    async fn dispatch(&self, sql: &str, params: Params, tag: Option<&str>) -> LimitResult<T> {
        let context = ExecContext {
            connection: self.alias.clone(),
            tag: tag.map(str::to_string),
        };
        // Snapshot the chain so wrappers can be installed or removed while
        // this statement is in flight.
        let wrappers: Vec<Arc<dyn ExecuteWrapper<T>>> = self
            .lock_wrappers()
            .iter()
            .map(|(_, wrapper)| Arc::clone(wrapper))
            .collect();

        let call = ExecuteCall {
            sql,
            params: &params,
            context: &context,
        };
        let next = Next {
            wrappers: &wrappers,
            executor: self.executor.as_ref(),
        };
        next.run(call).await
    }

    fn lock_wrappers(&self) -> MutexGuard<'_, WrapperChain<T>> {
        self.wrappers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + 'static> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("alias", &self.alias)
            .field("wrappers", &self.wrapper_count())
            .finish()
    }
}

/// Registry of known connections, in registration order.
pub struct Connections<T> {
    connections: Vec<Arc<Connection<T>>>,
}

impl<T: Send + 'static> Connections<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
        }
    }

    /// Register a connection, replacing any connection with the same alias.
    pub fn add(&mut self, connection: Connection<T>) -> Arc<Connection<T>> {
        let connection = Arc::new(connection);
        match self
            .connections
            .iter_mut()
            .find(|existing| existing.alias() == connection.alias())
        {
            Some(existing) => *existing = Arc::clone(&connection),
            None => self.connections.push(Arc::clone(&connection)),
        }
        connection
    }

    /// Register an executor under `alias`.
    pub fn with<E>(mut self, alias: impl Into<String>, executor: E) -> Self
    where
        E: Executor<Output = T> + 'static,
    {
        self.add(Connection::new(alias, executor));
        self
    }

    /// Look up a connection by alias.
    pub fn get(&self, alias: &str) -> LimitResult<Arc<Connection<T>>> {
        self.connections
            .iter()
            .find(|connection| connection.alias() == alias)
            .cloned()
            .ok_or_else(|| LimitError::ConnectionNotFound(alias.to_string()))
    }

    /// Aliases of all registered connections.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.connections.iter().map(|connection| connection.alias())
    }

    /// Iterate over all registered connections.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Connection<T>>> {
        self.connections.iter()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<T: Send + 'static> Default for Connections<T> {
    fn default() -> Self {
        Self::new()
    }
}
