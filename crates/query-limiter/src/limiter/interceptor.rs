use super::config::Limits;
use super::types::QueryLimitExceeded;
use crate::connection::{ExecuteCall, ExecuteWrapper, Next};
use crate::error::{LimitError, LimitResult};
use crate::query::Query;
use crate::truncate_sql_bytes;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Maximum SQL length included in breach log events.
const MAX_LOGGED_SQL_BYTES: usize = 200;

#[derive(Debug, Default)]
struct LimiterState {
    queries: Vec<Query>,
    elapsed_time_in_queries: Duration,
    /// Statements that passed the amount check and have not finished yet.
    in_flight: usize,
}

/// A slot taken by a statement between the amount check and its outcome.
///
/// Dropping the slot without [`QueryLimiter::record`] (the statement failed or
/// was cancelled) gives it back without recording anything.
pub(crate) struct Slot<'a> {
    limiter: &'a QueryLimiter,
    held: bool,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.limiter.lock_state().in_flight -= 1;
        }
    }
}

/// Counts and times every query passing through it, failing on the first
/// breached limit.
///
/// Per statement, in order:
/// 1. the amount limit is checked before execution, counting statements
///    still in flight; a breach means the statement never reaches the
///    database,
/// 2. the statement runs and is timed; failures propagate untouched and are
///    not recorded,
/// 3. the individual time limit is checked, then the total time limit.
///
/// One limiter may be installed on several connections; counts and times are
/// shared between them.
#[derive(Debug)]
pub struct QueryLimiter {
    amount: Option<usize>,
    individual_max_time: Option<Duration>,
    total_max_time: Option<Duration>,
    state: Mutex<LimiterState>,
}

impl QueryLimiter {
    /// Create a limiter, failing if `limits` sets no limit.
    pub fn new(limits: &Limits) -> LimitResult<Self> {
        limits.validate()?;
        Ok(Self {
            amount: limits.amount,
            individual_max_time: limits.individual_max_time,
            total_max_time: limits.total_max_time,
            state: Mutex::new(LimiterState::default()),
        })
    }

    /// Maximum number of queries, if limited.
    pub fn amount(&self) -> Option<usize> {
        self.amount
    }

    /// Maximum duration of a single query, if limited.
    pub fn individual_max_time(&self) -> Option<Duration> {
        self.individual_max_time
    }

    /// Maximum cumulative duration of all queries, if limited.
    pub fn total_max_time(&self) -> Option<Duration> {
        self.total_max_time
    }

    /// Snapshot of the queries executed so far, in execution order.
    pub fn queries(&self) -> Vec<Query> {
        self.lock_state().queries.clone()
    }

    /// Number of queries executed so far.
    pub fn query_count(&self) -> usize {
        self.lock_state().queries.len()
    }

    /// Sum of the execution time of all recorded queries.
    pub fn elapsed_time_in_queries(&self) -> Duration {
        self.lock_state().elapsed_time_in_queries
    }

    /// Take a slot for `call`, or refuse it if the amount limit is reached
    /// by executed and in-flight statements together.
    pub(crate) fn check_amount(
        &self,
        call: &ExecuteCall<'_>,
    ) -> Result<Slot<'_>, QueryLimitExceeded> {
        let mut state = self.lock_state();
        if let Some(limit) = self.amount {
            if state.queries.len() + state.in_flight >= limit {
                return Err(QueryLimitExceeded::Amount {
                    limit,
                    queries: state.queries.clone(),
                    blocked: Query::new(call.sql, call.params),
                });
            }
        }
        state.in_flight += 1;
        Ok(Slot {
            limiter: self,
            held: true,
        })
    }

    /// Record an executed statement, releasing its slot, and check the time
    /// limits.
    pub(crate) fn record(&self, mut slot: Slot<'_>, query: Query) -> Result<(), QueryLimitExceeded> {
        let time_taken = query.time_taken().unwrap_or_default();

        let mut state = self.lock_state();
        if slot.held {
            state.in_flight -= 1;
            slot.held = false;
        }
        state.elapsed_time_in_queries = state.elapsed_time_in_queries.saturating_add(time_taken);
        state.queries.push(query);

        if let Some(limit) = self.individual_max_time {
            if time_taken > limit {
                return Err(QueryLimitExceeded::IndividualTime {
                    limit,
                    time_taken,
                    queries: state.queries.clone(),
                });
            }
        }

        if let Some(limit) = self.total_max_time {
            if state.elapsed_time_in_queries > limit {
                return Err(QueryLimitExceeded::TotalTime {
                    limit,
                    elapsed: state.elapsed_time_in_queries,
                    queries: state.queries.clone(),
                });
            }
        }

        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn breach(exceeded: QueryLimitExceeded) -> LimitError {
    let sql = exceeded
        .offending_query()
        .map(|query| truncate_sql_bytes(query.sql(), MAX_LOGGED_SQL_BYTES))
        .unwrap_or_default();
    tracing::warn!(
        target: "query_limiter",
        kind = %exceeded.kind(),
        queries = exceeded.queries().len(),
        sql = %sql,
        "query limit exceeded"
    );
    LimitError::Exceeded(exceeded)
}

#[async_trait]
impl<T: Send + 'static> ExecuteWrapper<T> for QueryLimiter {
    async fn call(&self, next: Next<'_, T>, call: ExecuteCall<'_>) -> LimitResult<T> {
        let slot = self.check_amount(&call).map_err(breach)?;

        let start = Instant::now();
        let output = next.run(call).await?;
        let time_taken = start.elapsed();

        let query = Query::new(call.sql, call.params).executed_in(time_taken);
        self.record(slot, query).map_err(breach)?;
        Ok(output)
    }
}
