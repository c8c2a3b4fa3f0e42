//! In-memory row store and send log for testing and development

use crate::core::field::FieldValue;
use crate::core::order::Direction;
use crate::core::query_tool::{AggregateFunction, AggregateQuery, ListQuery};
use crate::core::store::{Row, RowStore};
use crate::core::whitelist::TableSchema;
use crate::warning::model::{NotificationKey, NotificationRecord};
use crate::warning::notifier::SendLog;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use indexmap::IndexMap;
use indexmap::map::Entry;
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory row store
///
/// Tables are keyed by physical table name. Conditions are evaluated row by
/// row and ordering follows PostgreSQL: nulls sort last ascending and first
/// descending.
#[derive(Clone, Default)]
pub struct InMemoryRowStore {
    tables: Arc<RwLock<HashMap<String, Vec<Row>>>>,
}

impl InMemoryRowStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored for `table`
    pub fn len(&self, table: &TableSchema) -> Result<usize> {
        let tables = self
            .tables
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        Ok(tables.get(&table.table).map_or(0, Vec::len))
    }

    /// Append a row without the row id check; lets tests plant duplicates
    pub fn insert_raw(&self, table: &TableSchema, row: Row) -> Result<()> {
        let mut tables = self
            .tables
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        tables.entry(table.table.clone()).or_default().push(row);
        Ok(())
    }

    fn matching(&self, table: &TableSchema, keep: impl Fn(&Row) -> bool) -> Result<Vec<Row>> {
        let tables = self
            .tables
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        Ok(tables
            .get(&table.table)
            .map(|rows| rows.iter().filter(|r| keep(r)).cloned().collect())
            .unwrap_or_default())
    }
}

fn compare_rows(query: &ListQuery, a: &Row, b: &Row) -> Ordering {
    for item in query.order.items() {
        let left = query.table.value_of(a, &item.column).unwrap_or(FieldValue::Null);
        let right = query.table.value_of(b, &item.column).unwrap_or(FieldValue::Null);
        let ord = left.cmp_nulls_last(&right);
        let ord = match item.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn aggregate(query: &AggregateQuery, rows: &[Row]) -> Value {
    let values: Vec<FieldValue> = match &query.column {
        None => return json!(rows.len()),
        Some(column) => rows
            .iter()
            .filter_map(|row| query.table.value_of(row, column))
            .filter(|v| !v.is_null())
            .collect(),
    };

    match query.function {
        AggregateFunction::Count => json!(values.len()),
        AggregateFunction::Sum | AggregateFunction::Avg if values.is_empty() => Value::Null,
        AggregateFunction::Sum => {
            let ints: Option<Vec<i64>> = values.iter().map(FieldValue::as_integer).collect();
            match ints {
                Some(ints) => json!(ints.iter().sum::<i64>()),
                None => json!(values.iter().filter_map(as_f64).sum::<f64>()),
            }
        }
        AggregateFunction::Avg => {
            let total: f64 = values.iter().filter_map(as_f64).sum();
            json!(total / values.len() as f64)
        }
        AggregateFunction::Min => extreme(values, Ordering::Less),
        AggregateFunction::Max => extreme(values, Ordering::Greater),
    }
}

fn as_f64(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Integer(i) => Some(*i as f64),
        FieldValue::Float(f) => Some(*f),
        _ => None,
    }
}

fn extreme(values: Vec<FieldValue>, wanted: Ordering) -> Value {
    values
        .into_iter()
        .reduce(|best, v| if v.compare(&best) == Some(wanted) { v } else { best })
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(Value::Null)
}

#[async_trait]
impl RowStore for InMemoryRowStore {
    async fn select(&self, query: &ListQuery) -> Result<Vec<Row>> {
        let mut rows = self.matching(&query.table, |row| query.matches(row))?;
        rows.sort_by(|a, b| compare_rows(query, a, b));

        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_by_column(
        &self,
        table: &TableSchema,
        column: &str,
        value: &FieldValue,
    ) -> Result<Vec<Row>> {
        self.matching(table, |row| {
            table
                .value_of(row, column)
                .is_some_and(|stored| stored.sql_eq(value))
        })
    }

    async fn upsert(&self, table: &TableSchema, row: Row) -> Result<()> {
        let id = table
            .row_id_of(&row)
            .ok_or_else(|| anyhow!("Row for '{}' has no '{}'", table.table, table.row_id))?;

        let mut tables = self
            .tables
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        let rows = tables.entry(table.table.clone()).or_default();
        match rows.iter_mut().find(|r| table.row_id_of(r) == Some(id)) {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
        Ok(())
    }

    async fn aggregate(&self, query: &AggregateQuery) -> Result<Value> {
        let rows = self.matching(&query.table, |row| {
            query.conditions.iter().all(|c| c.matches(&query.table, row))
        })?;
        Ok(aggregate(query, &rows))
    }
}

/// In-memory send log, in insertion order
#[derive(Clone, Default)]
pub struct InMemorySendLog {
    records: Arc<RwLock<IndexMap<NotificationKey, NotificationRecord>>>,
}

impl InMemorySendLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SendLog for InMemorySendLog {
    async fn contains(&self, key: &NotificationKey) -> Result<bool> {
        let records = self
            .records
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        Ok(records.contains_key(key))
    }

    async fn claim(&self, record: &NotificationRecord) -> Result<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        match records.entry(record.key()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn complete(&self, record: &NotificationRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        let stored = records
            .get_mut(&record.key())
            .ok_or_else(|| anyhow!("No claimed notification for {:?}", record.key()))?;
        *stored = record.clone();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<NotificationRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        Ok(records.values().cloned().collect())
    }
}
