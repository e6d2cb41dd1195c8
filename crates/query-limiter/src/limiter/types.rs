use crate::query::Query;
use std::fmt;
use std::time::Duration;

/// Which limit was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// Too many queries.
    Amount,
    /// One query was too slow.
    IndividualTime,
    /// All queries together were too slow.
    TotalTime,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LimitKind::Amount => "amount",
            LimitKind::IndividualTime => "individual time",
            LimitKind::TotalTime => "total time",
        })
    }
}

/// A breached query limit.
///
/// Carries the queries tracked up to the breach, the configured limit and the
/// measured value that exceeded it.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryLimitExceeded {
    /// More queries were attempted than allowed.
    ///
    /// Raised before `blocked` reaches the database. `queries` holds the
    /// executed queries; statements still running when the breach was raised
    /// count against the limit but are not listed.
    Amount {
        /// Configured maximum number of queries.
        limit: usize,
        /// Queries executed before the breach.
        queries: Vec<Query>,
        /// The query that was refused.
        blocked: Query,
    },
    /// A single query took longer than allowed.
    ///
    /// Raised after the query executed; its result is discarded.
    IndividualTime {
        /// Configured maximum duration of one query.
        limit: Duration,
        /// Measured duration of the offending (last) query.
        time_taken: Duration,
        /// Queries executed so far, offending query last.
        queries: Vec<Query>,
    },
    /// All queries together took longer than allowed.
    TotalTime {
        /// Configured maximum cumulative duration.
        limit: Duration,
        /// Measured cumulative duration.
        elapsed: Duration,
        /// Queries executed so far, offending query last.
        queries: Vec<Query>,
    },
}

impl QueryLimitExceeded {
    /// Which limit was breached.
    pub fn kind(&self) -> LimitKind {
        match self {
            Self::Amount { .. } => LimitKind::Amount,
            Self::IndividualTime { .. } => LimitKind::IndividualTime,
            Self::TotalTime { .. } => LimitKind::TotalTime,
        }
    }

    /// Queries that executed before the breach was raised.
    pub fn queries(&self) -> &[Query] {
        match self {
            Self::Amount { queries, .. }
            | Self::IndividualTime { queries, .. }
            | Self::TotalTime { queries, .. } => queries,
        }
    }

    /// The query refused by an amount breach.
    pub fn blocked(&self) -> Option<&Query> {
        match self {
            Self::Amount { blocked, .. } => Some(blocked),
            _ => None,
        }
    }

    /// The query that triggered the breach.
    pub fn offending_query(&self) -> Option<&Query> {
        self.blocked().or_else(|| self.queries().last())
    }

    /// Every tracked query in order, including a refused one.
    pub fn reported_queries(&self) -> impl Iterator<Item = &Query> {
        self.queries().iter().chain(self.blocked())
    }
}

impl fmt::Display for QueryLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amount { limit, .. } => write!(
                f,
                "Query amount limit of {limit} exceeded ({} queries attempted).",
                limit + 1
            )?,
            Self::IndividualTime {
                limit, time_taken, ..
            } => write!(
                f,
                "Individual query time limit of {limit:?} exceeded (query took {time_taken:?})."
            )?,
            Self::TotalTime { limit, elapsed, .. } => write!(
                f,
                "Total query time limit of {limit:?} exceeded (queries took {elapsed:?})."
            )?,
        }

        f.write_str("\nQueries:")?;
        for (index, query) in self.reported_queries().enumerate() {
            write!(f, "\n{index}: {query}")?;
            if !query.is_executed() {
                f.write_str("\n(not executed)")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for QueryLimitExceeded {}
