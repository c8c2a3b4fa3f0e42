//! PostgreSQL / PostGIS storage backend using sqlx.
//!
//! Provides `PostgresRowStore` and `PostgresSendLog`, backed by a
//! `sqlx::PgPool`. Queries come from [`SqlCompiler`]; rows travel as JSON
//! objects built by `json_build_object`, geometries as GeoJSON.
//!
//! # Feature flag
//!
//! This module is gated behind the `postgres` feature flag:
//! ```toml
//! [dependencies]
//! stormwatch = { version = "0.1", features = ["postgres"] }
//! ```

use crate::core::field::FieldValue;
use crate::core::query_tool::{AggregateQuery, ListQuery};
use crate::core::sql::{CompiledQuery, SqlCompiler, SqlParam};
use crate::core::store::{BackendUnavailable, Row, RowStore};
use crate::core::whitelist::TableSchema;
use crate::warning::model::{NotificationKey, NotificationRecord};
use crate::warning::notifier::SendLog;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;

// ---------------------------------------------------------------------------
// Schema management
// ---------------------------------------------------------------------------

/// Create the notification send log table (idempotent).
///
/// Domain tables (warnings, assets, holders) are owned by the import
/// tooling; only the send log belongs to this service.
pub async fn ensure_send_log_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS notification_log (
            warning_id BIGINT NOT NULL,
            asset_id BIGINT NOT NULL,
            channel TEXT NOT NULL,
            record JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (warning_id, asset_id, channel)
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| db_error("Failed to create notification_log table", e))?;
    Ok(())
}

/// Connection-level failures become [`BackendUnavailable`]; everything
/// else keeps its message under `context`
fn db_error(context: &str, err: sqlx::Error) -> anyhow::Error {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            BackendUnavailable {
                backend: "postgres".to_string(),
                message: format!("{}: {}", context, err),
            }
            .into()
        }
        other => anyhow!("{}: {}", context, other),
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Text(s) | SqlParam::GeoJson(s) => query.bind(s.as_str()),
            SqlParam::Integer(i) => query.bind(*i),
            SqlParam::Float(f) => query.bind(*f),
            SqlParam::Boolean(b) => query.bind(*b),
            SqlParam::Date(d) => query.bind(*d),
            SqlParam::Timestamp(t) => query.bind(*t),
        };
    }
    query
}

// ---------------------------------------------------------------------------
// PostgresRowStore
// ---------------------------------------------------------------------------

/// Row store backed by PostgreSQL with PostGIS.
#[derive(Clone, Debug)]
pub struct PostgresRowStore {
    pool: PgPool,
}

impl PostgresRowStore {
    /// Create a new `PostgresRowStore` with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_rows(&self, compiled: &CompiledQuery) -> Result<Vec<Row>> {
        tracing::debug!(sql = %compiled.sql, params = compiled.params.len(), "select");
        let values: Vec<Value> = bind_all(sqlx::query(&compiled.sql), &compiled.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to select rows", e))?
            .into_iter()
            .map(|row| sqlx::Row::try_get::<Value, _>(&row, "row"))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| anyhow!("Failed to decode row: {}", e))?;

        values
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => Ok(map),
                other => Err(anyhow!("Expected a JSON object row, got {}", other)),
            })
            .collect()
    }
}

#[async_trait]
impl RowStore for PostgresRowStore {
    async fn select(&self, query: &ListQuery) -> Result<Vec<Row>> {
        self.fetch_rows(&SqlCompiler::select(query)).await
    }

    async fn find_by_column(
        &self,
        table: &TableSchema,
        column: &str,
        value: &FieldValue,
    ) -> Result<Vec<Row>> {
        self.fetch_rows(&SqlCompiler::find_by_column(table, column, value))
            .await
    }

    async fn upsert(&self, table: &TableSchema, row: Row) -> Result<()> {
        let compiled = SqlCompiler::upsert(table, &row);
        bind_all(sqlx::query(&compiled.sql), &compiled.params)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(&format!("Failed to upsert into '{}'", table.table), e))?;
        Ok(())
    }

    async fn aggregate(&self, query: &AggregateQuery) -> Result<Value> {
        let compiled = SqlCompiler::aggregate(query);
        let row = bind_all(sqlx::query(&compiled.sql), &compiled.params)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to aggregate", e))?;
        let value: Option<Value> = sqlx::Row::try_get(&row, "value")
            .map_err(|e| anyhow!("Failed to decode aggregate: {}", e))?;
        Ok(value.unwrap_or(Value::Null))
    }
}

// ---------------------------------------------------------------------------
// PostgresSendLog
// ---------------------------------------------------------------------------

/// Notification send log backed by PostgreSQL.
///
/// The primary key on `(warning_id, asset_id, channel)` makes `claim`
/// insert-once across concurrent writers.
#[derive(Clone, Debug)]
pub struct PostgresSendLog {
    pool: PgPool,
}

impl PostgresSendLog {
    /// Create a new `PostgresSendLog` with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SendLog for PostgresSendLog {
    async fn contains(&self, key: &NotificationKey) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as(
            "SELECT warning_id FROM notification_log \
             WHERE warning_id = $1 AND asset_id = $2 AND channel = $3",
        )
        .bind(key.warning_id)
        .bind(key.asset_id)
        .bind(key.channel.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to read send log", e))?;
        Ok(found.is_some())
    }

    async fn claim(&self, record: &NotificationRecord) -> Result<bool> {
        let body = serde_json::to_value(record)?;
        let result = sqlx::query(
            "INSERT INTO notification_log (warning_id, asset_id, channel, record, created_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
        )
        .bind(record.warning_id)
        .bind(record.asset_id)
        .bind(record.channel.as_str())
        .bind(&body)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to write send log", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, record: &NotificationRecord) -> Result<()> {
        let body = serde_json::to_value(record)?;
        let result = sqlx::query(
            "UPDATE notification_log SET record = $4 \
             WHERE warning_id = $1 AND asset_id = $2 AND channel = $3",
        )
        .bind(record.warning_id)
        .bind(record.asset_id)
        .bind(record.channel.as_str())
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to complete send log entry", e))?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("No claimed notification for {:?}", record.key()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<NotificationRecord>> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            "SELECT record FROM notification_log \
             ORDER BY created_at, warning_id, asset_id, channel",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list send log", e))?;
        rows.into_iter()
            .map(|(record,)| {
                serde_json::from_value(record).map_err(|e| anyhow!("Corrupt send log entry: {}", e))
            })
            .collect()
    }
}
