//! `tokio_postgres` backend.
//!
//! ```rust,ignore
//! use query_limiter::{Connections, PgExecutor};
//!
//! let connections = Connections::new()
//!     .with("default", PgExecutor::connect(&database_url).await?);
//! ```

use crate::connection::{ExecuteCall, Executor};
use crate::error::LimitResult;
use crate::query::{Params, SqlValue};
use async_trait::async_trait;
use bytes::BytesMut;
use std::error::Error;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, NoTls, Row};

/// Result of a statement executed through [`PgExecutor`].
#[derive(Debug)]
pub enum PgOutput {
    /// Rows returned by a single execution.
    Rows(Vec<Row>),
    /// Total rows affected by a batch execution.
    Affected(u64),
}

impl PgOutput {
    /// Returned rows (empty for batch executions).
    pub fn rows(&self) -> &[Row] {
        match self {
            PgOutput::Rows(rows) => rows,
            PgOutput::Affected(_) => &[],
        }
    }

    /// Consume the output, returning the rows.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            PgOutput::Rows(rows) => rows,
            PgOutput::Affected(_) => Vec::new(),
        }
    }
}

/// Executes statements on a `tokio_postgres` client.
pub struct PgExecutor {
    client: Client,
}

impl PgExecutor {
    /// Wrap an already connected client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect without TLS, driving the connection on a background task.
    pub async fn connect(database_url: &str) -> LimitResult<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(target: "query_limiter", error = %err, "postgres connection error");
            }
        });
        Ok(Self::new(client))
    }

    /// Get a reference to the inner client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn as_sql_params(values: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    values
        .iter()
        .map(|value| value as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl Executor for PgExecutor {
    type Output = PgOutput;

    async fn execute(&self, call: ExecuteCall<'_>) -> LimitResult<PgOutput> {
        match call.params {
            Params::None => Ok(PgOutput::Rows(self.client.query(call.sql, &[]).await?)),
            Params::Single(values) => {
                let params = as_sql_params(values);
                Ok(PgOutput::Rows(self.client.query(call.sql, &params).await?))
            }
            Params::Many(rows) => {
                let statement = self.client.prepare(call.sql).await?;
                let mut affected = 0u64;
                for values in rows {
                    let params = as_sql_params(values);
                    affected += self.client.execute(&statement, &params).await?;
                }
                Ok(PgOutput::Affected(affected))
            }
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql_checked(ty, out),
            SqlValue::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql_checked(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            SqlValue::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            SqlValue::Text(v) => v.to_sql_checked(ty, out),
            SqlValue::Bytes(v) => v.to_sql_checked(ty, out),
            SqlValue::Timestamp(v) => v.to_sql_checked(ty, out),
        }
    }

    // Each variant checks the target type itself when encoding.
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
