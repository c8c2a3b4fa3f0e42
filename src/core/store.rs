//! Storage collaborator traits

use crate::core::field::FieldValue;
use crate::core::query_tool::{AggregateQuery, ListQuery};
use crate::core::whitelist::TableSchema;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A stored row as a JSON object keyed by column name
///
/// Geometry columns hold GeoJSON objects, date and timestamp columns hold
/// ISO 8601 strings.
pub type Row = serde_json::Map<String, Value>;

/// Marker error for a backend that cannot be reached at all
///
/// Backends wrap connection-level failures in it; callers report them as
/// [`StorageError::Unavailable`](crate::core::error::StorageError::Unavailable)
/// instead of a failed read or write.
#[derive(Debug, thiserror::Error)]
#[error("{backend} unavailable: {message}")]
pub struct BackendUnavailable {
    pub backend: String,
    pub message: String,
}

/// Row storage backing the query engine
///
/// Implementations receive fully validated queries; they never see raw
/// request input. Failures are reported as plain `anyhow` errors and
/// classified by the caller's operation kind.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Rows matching every condition, ordered, then limited and offset
    async fn select(&self, query: &ListQuery) -> Result<Vec<Row>>;

    /// All rows whose `column` equals `value`
    ///
    /// Used for single-row lookups; the caller decides what 0 or several
    /// matches mean.
    async fn find_by_column(
        &self,
        table: &TableSchema,
        column: &str,
        value: &FieldValue,
    ) -> Result<Vec<Row>>;

    /// Insert a row, or replace the row with the same row id
    async fn upsert(&self, table: &TableSchema, row: Row) -> Result<()>;

    /// Single aggregate value over the matching rows; null on no rows
    async fn aggregate(&self, query: &AggregateQuery) -> Result<Value>;
}
