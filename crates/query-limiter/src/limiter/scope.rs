use super::config::Limits;
use super::interceptor::QueryLimiter;
use crate::connection::{Connection, Connections, ExecuteWrapper, WrapperId};
use crate::error::LimitResult;
use crate::query::Query;
use crate::settings::{self, LimiterSettings};
use std::future::Future;
use std::sync::Arc;

/// Active query limits on a set of connections.
///
/// The limiter is removed from every watched connection when the guard is
/// dropped, whether the scope ends normally, returns early with an error, or
/// unwinds from a panic.
#[must_use = "limits are removed as soon as the guard is dropped"]
pub struct LimitGuard<T: Send + 'static> {
    limiter: Option<Arc<QueryLimiter>>,
    registrations: Vec<(Arc<Connection<T>>, WrapperId)>,
}

impl<T: Send + 'static> LimitGuard<T> {
    fn inactive() -> Self {
        Self {
            limiter: None,
            registrations: Vec::new(),
        }
    }

    /// Whether limits are being enforced (`false` when the limiter is disabled).
    pub fn is_active(&self) -> bool {
        self.limiter.is_some()
    }

    /// The limiter shared by all watched connections.
    pub fn limiter(&self) -> Option<&QueryLimiter> {
        self.limiter.as_deref()
    }

    /// Queries executed so far in this scope.
    pub fn queries(&self) -> Vec<Query> {
        self.limiter().map(QueryLimiter::queries).unwrap_or_default()
    }

    /// Aliases of the watched connections.
    pub fn connections(&self) -> impl Iterator<Item = &str> {
        self.registrations
            .iter()
            .map(|(connection, _)| connection.alias())
    }
}

impl<T: Send + 'static> Drop for LimitGuard<T> {
    fn drop(&mut self) {
        for (connection, id) in self.registrations.drain(..).rev() {
            if !connection.remove_wrapper(id) {
                continue;
            }
            tracing::debug!(
                target: "query_limiter",
                connection = connection.alias(),
                "removed query limiter"
            );
        }
    }
}

/// Enforce `limits` until the returned guard is dropped.
///
/// Uses the process-wide [`settings`](crate::settings::settings): when the
/// limiter is disabled this returns an inactive guard and installs nothing.
///
/// # Errors
///
/// [`LimitError::ConnectionNotFound`](crate::LimitError::ConnectionNotFound)
/// if a watched alias is not registered, and
/// [`LimitError::NoLimitConfigured`](crate::LimitError::NoLimitConfigured) if
/// `limits` sets no limit.
pub fn limit_queries<T: Send + 'static>(
    connections: &Connections<T>,
    limits: Limits,
) -> LimitResult<LimitGuard<T>> {
    limit_queries_with(connections, limits, &settings::settings())
}

/// Like [`limit_queries`], with explicit settings instead of the process-wide ones.
pub fn limit_queries_with<T: Send + 'static>(
    connections: &Connections<T>,
    limits: Limits,
    settings: &LimiterSettings,
) -> LimitResult<LimitGuard<T>> {
    if settings.disabled {
        tracing::trace!(target: "query_limiter", "query limiter disabled; not installing");
        return Ok(LimitGuard::inactive());
    }

    let targets = resolve_connections(
        connections,
        limits.db_connections.as_deref(),
        settings.default_db_connections.as_deref(),
    )?;
    let limiter = Arc::new(QueryLimiter::new(&limits)?);

    let mut guard = LimitGuard {
        limiter: Some(Arc::clone(&limiter)),
        registrations: Vec::with_capacity(targets.len()),
    };
    for connection in targets {
        let wrapper: Arc<dyn ExecuteWrapper<T>> = limiter.clone();
        let id = connection.install_wrapper(wrapper);
        guard.registrations.push((connection, id));
    }

    let watched: Vec<&str> = guard.connections().collect();
    tracing::debug!(
        target: "query_limiter",
        connections = ?watched,
        amount = ?limits.amount,
        individual_max_time = ?limits.individual_max_time,
        total_max_time = ?limits.total_max_time,
        "installed query limiter"
    );
    Ok(guard)
}

/// Run `future` with `limits` enforced, removing them when it completes.
pub async fn limit_queries_in<T, F, R>(
    connections: &Connections<T>,
    limits: Limits,
    future: F,
) -> LimitResult<R>
where
    T: Send + 'static,
    F: Future<Output = LimitResult<R>>,
{
    let _guard = limit_queries(connections, limits)?;
    future.await
}

/// Resolve watched connections: explicit aliases, else the defaults, else all.
///
/// All lookups happen before anything is installed, so an unknown alias
/// leaves every connection untouched. Repeated aliases are watched once.
fn resolve_connections<T: Send + 'static>(
    connections: &Connections<T>,
    explicit: Option<&[String]>,
    defaults: Option<&[String]>,
) -> LimitResult<Vec<Arc<Connection<T>>>> {
    let aliases = explicit
        .filter(|aliases| !aliases.is_empty())
        .or(defaults.filter(|aliases| !aliases.is_empty()));

    let Some(aliases) = aliases else {
        return Ok(connections.iter().cloned().collect());
    };

    let mut resolved: Vec<Arc<Connection<T>>> = Vec::with_capacity(aliases.len());
    for alias in aliases {
        let connection = connections.get(alias)?;
        if !resolved.iter().any(|seen| Arc::ptr_eq(seen, &connection)) {
            resolved.push(connection);
        }
    }
    Ok(resolved)
}
