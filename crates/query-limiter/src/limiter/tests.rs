use super::*;
use crate::connection::{ExecuteCall, Executor};
use crate::error::{LimitError, LimitResult};
use crate::query::{Params, Query, SqlValue};
use crate::settings::LimiterSettings;
use crate::Connections;
use async_trait::async_trait;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fake database shared by every connection in a test ──

const SLOW_QUERY: Duration = Duration::from_millis(40);

#[derive(Default)]
struct FakeDb {
    executed: Mutex<Vec<String>>,
}

impl FakeDb {
    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

/// Statements starting with `SLOW` take [`SLOW_QUERY`]; statements starting
/// with `BROKEN` fail.
struct FakeExecutor(Arc<FakeDb>);

#[async_trait]
impl Executor for FakeExecutor {
    type Output = usize;

    async fn execute(&self, call: ExecuteCall<'_>) -> LimitResult<usize> {
        if call.sql.starts_with("BROKEN") {
            return Err(LimitError::database("syntax error at or near \"BROKEN\""));
        }
        if call.sql.starts_with("SLOW") {
            tokio::time::sleep(SLOW_QUERY).await;
        }
        let mut executed = self.0.executed.lock().unwrap();
        executed.push(format!("{}@{}", call.sql, call.context.connection));
        Ok(executed.len())
    }
}

fn fake_connections(aliases: &[&str]) -> (Connections<usize>, Arc<FakeDb>) {
    let db = Arc::new(FakeDb::default());
    let connections = aliases
        .iter()
        .fold(Connections::new(), |connections, alias| {
            connections.with(*alias, FakeExecutor(db.clone()))
        });
    (connections, db)
}

fn enabled() -> LimiterSettings {
    LimiterSettings::default()
}

fn exceeded(err: LimitError) -> QueryLimitExceeded {
    match err {
        LimitError::Exceeded(exceeded) => exceeded,
        other => panic!("expected a limit breach, got {other:?}"),
    }
}

// ── Amount ──

#[tokio::test]
async fn amount_allows_exactly_n_queries_then_blocks_before_execution() {
    let (connections, db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let _guard = limit_queries_with(&connections, Limits::new().with_amount(2), &enabled()).unwrap();

    conn.execute("SELECT 1", Params::None).await.unwrap();
    conn.execute("SELECT 1", Params::None).await.unwrap();
    let err = exceeded(conn.execute("SELECT 1", Params::None).await.unwrap_err());

    match &err {
        QueryLimitExceeded::Amount {
            limit,
            queries,
            blocked,
        } => {
            assert_eq!(*limit, 2);
            assert_eq!(queries.len(), 2);
            assert!(queries.iter().all(Query::is_executed));
            assert_eq!(blocked.sql(), "SELECT 1");
            assert!(!blocked.is_executed());
        }
        other => panic!("expected Amount, got {other:?}"),
    }
    assert_eq!(err.kind(), LimitKind::Amount);
    assert_eq!(err.reported_queries().count(), 3);
    assert_eq!(db.executed().len(), 2);
}

#[tokio::test]
async fn amount_zero_blocks_the_first_query() {
    let (connections, db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let _guard = limit_queries_with(&connections, Limits::new().with_amount(0), &enabled()).unwrap();

    let err = exceeded(conn.execute("SELECT 1", Params::None).await.unwrap_err());

    assert!(err.queries().is_empty());
    assert_eq!(err.offending_query().map(Query::sql), Some("SELECT 1"));
    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn amount_counts_statements_still_in_flight() {
    let (connections, db) = fake_connections(&["default", "replica"]);
    let default = connections.get("default").unwrap();
    let replica = connections.get("replica").unwrap();
    let guard = limit_queries_with(&connections, Limits::new().with_amount(1), &enabled()).unwrap();

    let (a, b, c) = tokio::join!(
        default.execute("SLOW 1", Params::None),
        default.execute("SLOW 2", Params::None),
        replica.execute("SLOW 3", Params::None),
    );

    let results = [a, b, c];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.into_iter().filter_map(Result::err) {
        let err = exceeded(err);
        assert_eq!(err.kind(), LimitKind::Amount);
        assert!(err.queries().is_empty());
        assert!(err.to_string().starts_with("Query amount limit of 1 exceeded (2 queries attempted)."));
    }
    assert_eq!(db.executed().len(), 1);
    assert_eq!(guard.limiter().unwrap().query_count(), 1);
}

#[tokio::test]
async fn cancelled_statement_gives_its_slot_back() {
    let (connections, db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let guard = limit_queries_with(&connections, Limits::new().with_amount(1), &enabled()).unwrap();

    let cancelled =
        tokio::time::timeout(Duration::from_millis(5), conn.execute("SLOW", Params::None)).await;
    assert!(cancelled.is_err());

    conn.execute("SELECT 1", Params::None).await.unwrap();
    assert_eq!(guard.limiter().unwrap().query_count(), 1);
    assert_eq!(db.executed(), vec!["SELECT 1@default".to_string()]);
    assert!(conn.execute("SELECT 2", Params::None).await.is_err());
}

// ── Time ──

#[tokio::test]
async fn individual_time_breach_is_raised_after_the_query_ran() {
    let (connections, db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let limit = Duration::from_millis(1);
    let _guard = limit_queries_with(
        &connections,
        Limits::new().with_individual_max_time(limit),
        &enabled(),
    )
    .unwrap();

    conn.execute("SELECT 1", Params::None).await.unwrap();
    let err = exceeded(conn.execute("SLOW SELECT", Params::None).await.unwrap_err());

    match &err {
        QueryLimitExceeded::IndividualTime {
            limit: configured,
            time_taken,
            queries,
        } => {
            assert_eq!(*configured, limit);
            assert!(*time_taken > limit);
            assert!(*time_taken >= SLOW_QUERY);
            assert_eq!(queries.len(), 2);
            assert_eq!(queries[1].time_taken(), Some(*time_taken));
        }
        other => panic!("expected IndividualTime, got {other:?}"),
    }
    assert_eq!(db.executed().len(), 2);
}

#[tokio::test]
async fn total_time_breach_once_running_sum_exceeds_limit() {
    let (connections, _db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let limit = SLOW_QUERY + SLOW_QUERY / 2;
    let guard = limit_queries_with(
        &connections,
        Limits::new().with_total_max_time(limit),
        &enabled(),
    )
    .unwrap();

    conn.execute("SLOW 1", Params::None).await.unwrap();
    let err = exceeded(conn.execute("SLOW 2", Params::None).await.unwrap_err());

    match &err {
        QueryLimitExceeded::TotalTime {
            limit: configured,
            elapsed,
            queries,
        } => {
            assert_eq!(*configured, limit);
            assert!(*elapsed > limit);
            assert_eq!(queries.len(), 2);
        }
        other => panic!("expected TotalTime, got {other:?}"),
    }
    let limiter = guard.limiter().unwrap();
    assert!(limiter.elapsed_time_in_queries() >= SLOW_QUERY * 2);
}

#[tokio::test]
async fn total_time_keeps_failing_fast_queries_once_exceeded() {
    let (connections, db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let _guard = limit_queries_with(
        &connections,
        Limits::new().with_total_max_time(Duration::from_millis(5)),
        &enabled(),
    )
    .unwrap();

    let first = exceeded(conn.execute("SLOW", Params::None).await.unwrap_err());
    assert_eq!(first.kind(), LimitKind::TotalTime);

    let second = exceeded(conn.execute("SELECT 1", Params::None).await.unwrap_err());
    assert_eq!(second.kind(), LimitKind::TotalTime);
    assert_eq!(second.queries().len(), 2);
    assert_eq!(db.executed().len(), 2);
}

#[tokio::test]
async fn individual_time_is_checked_before_total_time() {
    let (connections, _db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let _guard = limit_queries_with(
        &connections,
        Limits::new()
            .with_individual_max_time(Duration::from_millis(1))
            .with_total_max_time(Duration::from_millis(1)),
        &enabled(),
    )
    .unwrap();

    let err = exceeded(conn.execute("SLOW", Params::None).await.unwrap_err());
    assert_eq!(err.kind(), LimitKind::IndividualTime);
}

// ── Failures and nesting ──

#[tokio::test]
async fn backend_failures_propagate_without_being_counted() {
    let (connections, db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let guard = limit_queries_with(&connections, Limits::new().with_amount(1), &enabled()).unwrap();

    let err = conn.execute("BROKEN SQL", Params::None).await.unwrap_err();
    assert!(matches!(err, LimitError::Database(_)));
    assert!(err.to_string().contains("syntax error"));
    assert_eq!(guard.limiter().unwrap().query_count(), 0);

    conn.execute("SELECT 1", Params::None).await.unwrap();
    let err = exceeded(conn.execute("SELECT 2", Params::None).await.unwrap_err());
    assert_eq!(err.queries().len(), 1);
    assert_eq!(db.executed(), vec!["SELECT 1@default".to_string()]);
}

#[tokio::test]
async fn nested_scopes_each_enforce_their_own_limit() {
    let (connections, _db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let outer = limit_queries_with(&connections, Limits::new().with_amount(5), &enabled()).unwrap();

    {
        let inner =
            limit_queries_with(&connections, Limits::new().with_amount(1), &enabled()).unwrap();
        assert_eq!(conn.wrapper_count(), 2);

        conn.execute("SELECT 1", Params::None).await.unwrap();
        let err = exceeded(conn.execute("SELECT 2", Params::None).await.unwrap_err());
        assert_eq!(err.kind(), LimitKind::Amount);
        assert!(matches!(err, QueryLimitExceeded::Amount { limit: 1, .. }));
        assert_eq!(inner.limiter().unwrap().query_count(), 1);
    }

    // The inner breach never reached the database, so the outer scope did not count it.
    assert_eq!(conn.wrapper_count(), 1);
    assert_eq!(outer.limiter().unwrap().query_count(), 1);

    conn.execute("SELECT 3", Params::None).await.unwrap();
    assert_eq!(outer.queries().len(), 2);
}

// ── Scope cleanup ──

#[tokio::test]
async fn scope_cleanup_after_breach() {
    let (connections, db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();

    let run = async {
        let _guard = limit_queries_with(&connections, Limits::new().with_amount(0), &enabled())?;
        conn.execute("SELECT 1", Params::None).await?;
        Ok::<_, LimitError>(())
    };
    assert!(run.await.unwrap_err().is_exceeded());

    assert_eq!(conn.wrapper_count(), 0);
    for _ in 0..3 {
        conn.execute("SELECT 1", Params::None).await.unwrap();
    }
    assert_eq!(db.executed().len(), 3);
}

#[test]
fn scope_cleanup_when_unwinding() {
    let (connections, _db) = fake_connections(&["default", "replica"]);

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let _guard =
            limit_queries_with(&connections, Limits::new().with_amount(1), &enabled()).unwrap();
        assert!(connections.iter().all(|c| c.wrapper_count() == 1));
        panic!("test body failed");
    }));

    assert!(result.is_err());
    assert!(connections.iter().all(|c| c.wrapper_count() == 0));
}

#[tokio::test]
async fn scope_cleanup_when_future_is_cancelled() {
    let (connections, _db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();

    let limited = limit_queries_in(&connections, Limits::new().with_amount(1), async {
        std::future::pending::<()>().await;
        Ok(())
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(10), limited).await;

    assert!(timed_out.is_err());
    assert_eq!(conn.wrapper_count(), 0);
}

#[tokio::test]
async fn limit_queries_in_enforces_limits_for_the_future() {
    let (connections, _db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();

    let err = limit_queries_in(&connections, Limits::new().with_amount(1), async {
        conn.execute("SELECT 1", Params::None).await?;
        conn.execute("SELECT 2", Params::None).await?;
        Ok(())
    })
    .await
    .unwrap_err();

    assert!(err.is_exceeded());
    assert_eq!(conn.wrapper_count(), 0);
}

// ── Connection resolution ──

#[tokio::test]
async fn one_limiter_is_shared_across_all_connections() {
    let (connections, db) = fake_connections(&["default", "replica"]);
    let default = connections.get("default").unwrap();
    let replica = connections.get("replica").unwrap();
    let guard = limit_queries_with(&connections, Limits::new().with_amount(2), &enabled()).unwrap();
    assert_eq!(guard.connections().collect::<Vec<_>>(), ["default", "replica"]);

    default.execute("SELECT 1", Params::None).await.unwrap();
    replica.execute("SELECT 1", Params::None).await.unwrap();
    let err = exceeded(default.execute("SELECT 1", Params::None).await.unwrap_err());

    assert_eq!(err.queries().len(), 2);
    assert_eq!(
        db.executed(),
        vec!["SELECT 1@default".to_string(), "SELECT 1@replica".to_string()]
    );
}

#[tokio::test]
async fn default_connections_apply_when_none_are_named() {
    let (connections, _db) = fake_connections(&["default", "replica"]);
    let default = connections.get("default").unwrap();
    let replica = connections.get("replica").unwrap();
    let settings = LimiterSettings::new().with_default_db_connections(["replica"]);

    let guard = limit_queries_with(&connections, Limits::new().with_amount(0), &settings).unwrap();
    assert_eq!(guard.connections().collect::<Vec<_>>(), ["replica"]);

    default.execute("SELECT 1", Params::None).await.unwrap();
    assert!(replica.execute("SELECT 1", Params::None).await.is_err());
}

#[test]
fn explicit_connections_override_defaults() {
    let (connections, _db) = fake_connections(&["default", "replica"]);
    let settings = LimiterSettings::new().with_default_db_connections(["replica"]);

    let guard = limit_queries_with(
        &connections,
        Limits::new().with_amount(1).on_connections(["default", "default"]),
        &settings,
    )
    .unwrap();

    assert_eq!(guard.connections().collect::<Vec<_>>(), ["default"]);
    assert_eq!(connections.get("default").unwrap().wrapper_count(), 1);
    assert_eq!(connections.get("replica").unwrap().wrapper_count(), 0);
}

#[test]
fn empty_connection_list_falls_back_to_all() {
    let (connections, _db) = fake_connections(&["default", "replica"]);
    let guard = limit_queries_with(
        &connections,
        Limits::new()
            .with_amount(1)
            .on_connections(Vec::<String>::new()),
        &enabled(),
    )
    .unwrap();
    assert_eq!(guard.connections().count(), 2);
}

#[test]
fn unknown_connection_fails_before_installing_anything() {
    let (connections, _db) = fake_connections(&["default"]);

    let err = limit_queries_with(
        &connections,
        Limits::new()
            .with_amount(1)
            .on_connections(["default", "missing"]),
        &enabled(),
    )
    .err()
    .unwrap();

    assert!(matches!(err, LimitError::ConnectionNotFound(ref alias) if alias == "missing"));
    assert_eq!(connections.get("default").unwrap().wrapper_count(), 0);
}

// ── Configuration ──

#[test]
fn missing_limits_is_a_construction_error() {
    let (connections, _db) = fake_connections(&["default"]);

    let err = limit_queries_with(&connections, Limits::new(), &enabled())
        .err()
        .unwrap();
    assert!(matches!(err, LimitError::NoLimitConfigured));
    assert!(matches!(
        QueryLimiter::new(&Limits::new().on_connections(["default"])),
        Err(LimitError::NoLimitConfigured)
    ));
    assert_eq!(connections.get("default").unwrap().wrapper_count(), 0);
}

#[tokio::test]
async fn disabled_settings_make_the_scope_inert() {
    let (connections, db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let settings = LimiterSettings::new().with_disabled(true);

    let guard = limit_queries_with(&connections, Limits::new().with_amount(0), &settings).unwrap();
    assert!(!guard.is_active());
    assert!(guard.limiter().is_none());
    assert_eq!(conn.wrapper_count(), 0);

    conn.execute("SELECT 1", Params::None).await.unwrap();
    conn.execute("SELECT 2", Params::None).await.unwrap();
    assert_eq!(db.executed().len(), 2);
    assert!(guard.queries().is_empty());
}

#[test]
fn limits_builder_and_config_file() {
    let limits = Limits::new()
        .with_amount(3)
        .with_total_max_time(Duration::from_millis(5))
        .on_connections(["default"]);
    assert!(limits.has_limit());
    assert!(limits.validate().is_ok());
    assert!(!Limits::new().has_limit());

    let parsed: Limits = serde_json::from_str(
        r#"{"amount": 3, "total_max_time": {"secs": 0, "nanos": 5000000}, "db_connections": ["default"]}"#,
    )
    .unwrap();
    assert_eq!(parsed, limits);
}

// ── Reports ──

#[cfg(not(feature = "pretty"))]
#[tokio::test]
async fn breach_message_lists_every_query() {
    let (connections, _db) = fake_connections(&["default"]);
    let conn = connections.get("default").unwrap();
    let _guard = limit_queries_with(&connections, Limits::new().with_amount(1), &enabled()).unwrap();

    conn.execute(
        "SELECT * FROM users WHERE id = $1",
        vec![SqlValue::Int(1)],
    )
    .await
    .unwrap();
    let err = conn
        .execute(
            "SELECT * FROM posts WHERE author = $1",
            vec![SqlValue::from("ann")],
        )
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.starts_with("Query amount limit of 1 exceeded (2 queries attempted).\nQueries:\n"));
    assert!(message.contains("0: SELECT * FROM users WHERE id = 1\n(executed in "));
    assert!(message.ends_with("1: SELECT * FROM posts WHERE author = 'ann'\n(not executed)"));
}

#[cfg(not(feature = "pretty"))]
#[test]
fn time_breach_message_names_limit_and_measurement() {
    let err = QueryLimitExceeded::TotalTime {
        limit: Duration::from_millis(5),
        elapsed: Duration::from_millis(7),
        queries: vec![Query::new("SELECT 1", &Params::None).executed_in(Duration::from_millis(7))],
    };
    let message = err.to_string();
    assert!(message.starts_with("Total query time limit of 5ms exceeded (queries took 7ms)."));
    assert!(message.contains("0: SELECT 1\n(executed in 7 milliseconds)"));

    let err = QueryLimitExceeded::IndividualTime {
        limit: Duration::from_micros(1_500),
        time_taken: Duration::from_millis(2),
        queries: Vec::new(),
    };
    assert_eq!(
        err.to_string(),
        "Individual query time limit of 1.5ms exceeded (query took 2ms).\nQueries:"
    );
}
