use crate::error::{LimitError, LimitResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits enforced inside one scope.
///
/// At least one of `amount`, `individual_max_time`, or `total_max_time` must be
/// set. Zero is a valid limit (`amount = 0` blocks every query).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of queries allowed to execute.
    pub amount: Option<usize>,
    /// Maximum duration of any single query.
    pub individual_max_time: Option<Duration>,
    /// Maximum cumulative duration of all queries.
    pub total_max_time: Option<Duration>,
    /// Connections to watch. `None` falls back to the configured defaults,
    /// then to every registered connection.
    pub db_connections: Option<Vec<String>>,
}

impl Limits {
    /// Create an empty configuration (no limit set yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow at most `amount` queries to execute.
    pub fn with_amount(mut self, amount: usize) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Fail on any single query slower than `max`.
    pub fn with_individual_max_time(mut self, max: Duration) -> Self {
        self.individual_max_time = Some(max);
        self
    }

    /// Fail once all queries together took longer than `max`.
    pub fn with_total_max_time(mut self, max: Duration) -> Self {
        self.total_max_time = Some(max);
        self
    }

    /// Watch only the named connections.
    pub fn on_connections<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.db_connections = Some(aliases.into_iter().map(Into::into).collect());
        self
    }

    /// Whether any limit is configured.
    pub fn has_limit(&self) -> bool {
        self.amount.is_some() || self.individual_max_time.is_some() || self.total_max_time.is_some()
    }

    /// Fail with [`LimitError::NoLimitConfigured`] when no limit is set.
    pub fn validate(&self) -> LimitResult<()> {
        if self.has_limit() {
            Ok(())
        } else {
            Err(LimitError::NoLimitConfigured)
        }
    }
}
