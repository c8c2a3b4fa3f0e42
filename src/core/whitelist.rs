//! Column whitelist
//!
//! The set of tables and columns a request may filter and sort on. Built
//! once from configuration, then shared read-only (`Arc<Whitelist>`) with
//! every [`QueryTool`](crate::core::query_tool::QueryTool).

use crate::core::error::{ConfigError, QueryError};
use crate::core::field::{FieldValue, ValueFamily, parse_date, parse_timestamp};
use crate::core::filter::DataType;
use crate::core::geometry::Geometry;
use crate::core::store::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
    Geometry,
}

impl ColumnKind {
    /// Coercion applied to string operands for this column
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            ColumnKind::Date => Some(DataType::Date),
            ColumnKind::Timestamp => Some(DataType::Timestamp),
            _ => None,
        }
    }

    /// Family of scalar operands this column can be compared with
    pub fn family(&self) -> Option<ValueFamily> {
        match self {
            ColumnKind::Text => Some(ValueFamily::Text),
            ColumnKind::Integer | ColumnKind::Float => Some(ValueFamily::Number),
            ColumnKind::Boolean => Some(ValueFamily::Boolean),
            ColumnKind::Date => Some(ValueFamily::Date),
            ColumnKind::Timestamp => Some(ValueFamily::Timestamp),
            ColumnKind::Geometry => None,
        }
    }

    /// Decode a stored JSON value; `None` when it does not fit the kind
    pub fn decode(&self, value: Option<&Value>) -> Option<FieldValue> {
        let value = match value {
            None | Some(Value::Null) => return Some(FieldValue::Null),
            Some(v) => v,
        };
        match self {
            ColumnKind::Text => value.as_str().map(FieldValue::from),
            ColumnKind::Integer => value.as_i64().map(FieldValue::Integer),
            ColumnKind::Float => value.as_f64().map(FieldValue::Float),
            ColumnKind::Boolean => value.as_bool().map(FieldValue::Boolean),
            ColumnKind::Date => value.as_str().and_then(parse_date).map(FieldValue::Date),
            ColumnKind::Timestamp => value
                .as_str()
                .and_then(parse_timestamp)
                .map(FieldValue::Timestamp),
            ColumnKind::Geometry => None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One whitelisted column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub kind: ColumnKind,

    /// Values are unique per row; usable as a keyset tie-break
    #[serde(default)]
    pub unique: bool,

    #[serde(default = "default_true")]
    pub filterable: bool,

    #[serde(default = "default_true")]
    pub sortable: bool,
}

impl ColumnDef {
    pub fn new(kind: ColumnKind) -> Self {
        Self {
            kind,
            unique: false,
            filterable: true,
            sortable: kind != ColumnKind::Geometry,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_sortable(mut self) -> Self {
        self.sortable = false;
        self
    }
}

/// Whitelist entry for one table alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Alias used by requests; filled from the config map key
    #[serde(skip)]
    pub alias: String,

    /// Physical table name
    pub table: String,

    /// Unique integer column addressed by `last_row_id`
    #[serde(default = "default_row_id")]
    pub row_id: String,

    /// Tie-break column appended to order lists
    #[serde(default = "default_row_id")]
    pub default_order: String,

    pub columns: BTreeMap<String, ColumnDef>,
}

fn default_row_id() -> String {
    "id".to_string()
}

impl TableSchema {
    pub fn new(alias: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            table: table.into(),
            row_id: default_row_id(),
            default_order: default_row_id(),
            columns: BTreeMap::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, def: ColumnDef) -> Self {
        self.columns.insert(name.into(), def);
        self
    }

    /// Look up a column usable in filters
    pub fn filterable(&self, column: &str) -> Result<&ColumnDef, QueryError> {
        self.columns
            .get(column)
            .filter(|def| def.filterable)
            .ok_or_else(|| self.unknown(column))
    }

    /// Look up a column usable in order lists
    pub fn sortable(&self, column: &str) -> Result<&ColumnDef, QueryError> {
        self.columns
            .get(column)
            .filter(|def| def.sortable)
            .ok_or_else(|| self.unknown(column))
    }

    pub fn is_unique(&self, column: &str) -> bool {
        self.columns.get(column).is_some_and(|def| def.unique)
    }

    pub fn kind_of(&self, column: &str) -> Option<ColumnKind> {
        self.columns.get(column).map(|def| def.kind)
    }

    /// Scalar value of `column` in `row`, decoded by the column's kind
    pub fn value_of(&self, row: &Row, column: &str) -> Option<FieldValue> {
        self.kind_of(column)?.decode(row.get(column))
    }

    /// Geometry value of `column` in `row`
    pub fn geometry_of(&self, row: &Row, column: &str) -> Option<Geometry> {
        if self.kind_of(column)? != ColumnKind::Geometry {
            return None;
        }
        row.get(column)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Row id of a stored row
    pub fn row_id_of(&self, row: &Row) -> Option<i64> {
        row.get(&self.row_id).and_then(Value::as_i64)
    }

    fn unknown(&self, column: &str) -> QueryError {
        QueryError::UnknownColumn {
            table: self.alias.clone(),
            column: column.to_string(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, value: &str, message: &str| ConfigError::InvalidValue {
            field: format!("query.tables.{}.{}", self.alias, field),
            value: value.to_string(),
            message: message.to_string(),
        };

        if self.table.is_empty() {
            return Err(invalid("table", "", "table name is required"));
        }
        match self.columns.get(&self.row_id) {
            Some(def) if def.kind == ColumnKind::Integer && def.unique => {}
            _ => {
                return Err(invalid(
                    "row_id",
                    &self.row_id,
                    "must be a unique integer column",
                ));
            }
        }
        match self.columns.get(&self.default_order) {
            Some(def) if def.unique && def.sortable => {}
            _ => {
                return Err(invalid(
                    "default_order",
                    &self.default_order,
                    "must be a unique sortable column",
                ));
            }
        }
        for (name, def) in &self.columns {
            if !is_identifier(name) {
                return Err(invalid("columns", name, "not a plain identifier"));
            }
            if def.kind == ColumnKind::Geometry && def.sortable {
                return Err(invalid("columns", name, "geometry columns cannot be sorted"));
            }
        }
        if !is_identifier(&self.table) {
            return Err(invalid("table", &self.table, "not a plain identifier"));
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, safe to quote into SQL
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// All whitelisted tables
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    tables: HashMap<String, Arc<TableSchema>>,
}

impl Whitelist {
    /// Build and validate from alias → schema entries
    pub fn new(
        tables: impl IntoIterator<Item = (String, TableSchema)>,
    ) -> Result<Self, ConfigError> {
        let mut map = HashMap::new();
        for (alias, mut schema) in tables {
            schema.alias = alias.clone();
            schema.validate()?;
            map.insert(alias, Arc::new(schema));
        }
        Ok(Self { tables: map })
    }

    pub fn table(&self, alias: &str) -> Result<Arc<TableSchema>, QueryError> {
        self.tables
            .get(alias)
            .cloned()
            .ok_or_else(|| QueryError::UnknownTable {
                table: alias.to_string(),
            })
    }

    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        aliases.sort_unstable();
        aliases
    }
}
