//! PostgreSQL compilation of validated queries
//!
//! Every identifier comes from the whitelist and is double-quoted; every
//! value travels as a `$n` parameter. The compiler is deterministic: the
//! same query always yields the same text and parameter list.

use crate::core::field::FieldValue;
use crate::core::filter::{FilterItem, Predicate};
use crate::core::order::Direction;
use crate::core::query_tool::{AggregateQuery, Condition, KeysetCondition, ListQuery};
use crate::core::store::Row;
use crate::core::whitelist::{ColumnKind, TableSchema};
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt::Write;

/// Alias of the queried table in generated SQL
const ALIAS: &str = "t";

/// A bound parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    /// GeoJSON text, wrapped in `ST_GeomFromGeoJSON` at the use site
    GeoJson(String),
}

impl SqlParam {
    fn from_value(value: &FieldValue) -> Option<Self> {
        Some(match value {
            FieldValue::String(s) => SqlParam::Text(s.clone()),
            FieldValue::Integer(i) => SqlParam::Integer(*i),
            FieldValue::Float(f) => SqlParam::Float(*f),
            FieldValue::Boolean(b) => SqlParam::Boolean(*b),
            FieldValue::Date(d) => SqlParam::Date(*d),
            FieldValue::Timestamp(t) => SqlParam::Timestamp(*t),
            FieldValue::Null => return None,
        })
    }
}

/// SQL text with its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[derive(Default)]
struct Builder {
    sql: String,
    params: Vec<SqlParam>,
}

impl Builder {
    /// Push a parameter, returning its placeholder
    fn param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    fn value(&mut self, value: &FieldValue) -> String {
        match SqlParam::from_value(value) {
            Some(p) => self.param(p),
            None => "NULL".to_string(),
        }
    }

    fn finish(self) -> CompiledQuery {
        CompiledQuery {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Double-quoted identifier; whitelisted names never contain quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_ref(column: &str) -> String {
    format!("{}.{}", ALIAS, quote_ident(column))
}

/// `%needle%` with LIKE metacharacters escaped
pub fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Compiles validated queries to PostgreSQL
pub struct SqlCompiler;

impl SqlCompiler {
    /// Ordered, paged select returning one JSON object per row
    pub fn select(query: &ListQuery) -> CompiledQuery {
        let mut b = Builder::default();
        b.sql.push_str("SELECT ");
        b.sql.push_str(&projection(&query.table));
        let _ = write!(
            b.sql,
            " AS row FROM {} AS {}",
            quote_ident(&query.table.table),
            ALIAS
        );
        where_clause(&mut b, &query.conditions);

        let order: Vec<String> = query
            .order
            .items()
            .iter()
            .map(|item| format!("{} {}", column_ref(&item.column), item.direction.as_sql()))
            .collect();
        let _ = write!(b.sql, " ORDER BY {}", order.join(", "));

        if query.limit != u64::MAX {
            let limit = b.param(SqlParam::Integer(query.limit.min(i64::MAX as u64) as i64));
            let _ = write!(b.sql, " LIMIT {}", limit);
        }
        if query.offset > 0 {
            let offset = b.param(SqlParam::Integer(query.offset.min(i64::MAX as u64) as i64));
            let _ = write!(b.sql, " OFFSET {}", offset);
        }
        b.finish()
    }

    /// Single-value aggregate as JSON
    pub fn aggregate(query: &AggregateQuery) -> CompiledQuery {
        let mut b = Builder::default();
        let target = match (&query.column, query.function) {
            (None, _) => "*".to_string(),
            (Some(column), _) => column_ref(column),
        };
        let _ = write!(
            b.sql,
            "SELECT to_jsonb({}({})) AS value FROM {} AS {}",
            query.function.as_sql(),
            target,
            quote_ident(&query.table.table),
            ALIAS
        );
        where_clause(&mut b, &query.conditions);
        b.finish()
    }

    /// Every row whose `column` equals `value`
    pub fn find_by_column(table: &TableSchema, column: &str, value: &FieldValue) -> CompiledQuery {
        let mut b = Builder::default();
        let _ = write!(
            b.sql,
            "SELECT {} AS row FROM {} AS {} WHERE ",
            projection(table),
            quote_ident(&table.table),
            ALIAS
        );
        let placeholder = b.value(value);
        let _ = write!(b.sql, "{} = {}", column_ref(column), placeholder);
        b.finish()
    }

    /// Insert or replace by row id; only whitelisted columns are written
    pub fn upsert(table: &TableSchema, row: &Row) -> CompiledQuery {
        let mut b = Builder::default();
        let mut columns = Vec::new();
        let mut values = Vec::new();

        for (name, def) in &table.columns {
            let Some(raw) = row.get(name) else { continue };
            columns.push(quote_ident(name));
            let placeholder = if def.kind == ColumnKind::Geometry {
                if raw.is_null() {
                    "NULL".to_string()
                } else {
                    let p = b.param(SqlParam::GeoJson(raw.to_string()));
                    format!("ST_GeomFromGeoJSON({})", p)
                }
            } else {
                match def.kind.decode(Some(raw)) {
                    Some(value) => b.value(&value),
                    None => "NULL".to_string(),
                }
            };
            values.push(placeholder);
        }

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| **c != quote_ident(&table.row_id))
            .map(|c| format!("{} = EXCLUDED.{}", c, c))
            .collect();

        let _ = write!(
            b.sql,
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) ",
            quote_ident(&table.table),
            columns.join(", "),
            values.join(", "),
            quote_ident(&table.row_id)
        );
        if updates.is_empty() {
            b.sql.push_str("DO NOTHING");
        } else {
            let _ = write!(b.sql, "DO UPDATE SET {}", updates.join(", "));
        }
        b.finish()
    }
}

/// `json_build_object(...)` over every whitelisted column
fn projection(table: &TableSchema) -> String {
    let fields: Vec<String> = table
        .columns
        .iter()
        .map(|(name, def)| {
            let expr = if def.kind == ColumnKind::Geometry {
                format!("ST_AsGeoJSON({})::json", column_ref(name))
            } else {
                column_ref(name)
            };
            format!("'{}', {}", name, expr)
        })
        .collect();
    format!("json_build_object({})", fields.join(", "))
}

fn where_clause(b: &mut Builder, conditions: &[Condition]) {
    if conditions.is_empty() {
        return;
    }
    let mut parts = Vec::with_capacity(conditions.len());
    for condition in conditions {
        let part = match condition {
            Condition::Item(item) => compile_item(b, item),
            Condition::Keyset(keyset) => compile_keyset(b, keyset),
        };
        parts.push(part);
    }
    let _ = write!(b.sql, " WHERE {}", parts.join(" AND "));
}

fn compile_item(b: &mut Builder, item: &FilterItem) -> String {
    let col = column_ref(item.column());
    match item.predicate() {
        Predicate::Eq { value } => format!("{} = {}", col, b.value(value)),
        Predicate::Like { pattern } => {
            let p = b.param(SqlParam::Text(like_pattern(pattern)));
            format!("{} LIKE {} ESCAPE '\\'", col, p)
        }
        Predicate::Range { min, max } => {
            let mut bounds = Vec::with_capacity(2);
            if let Some(min) = min {
                bounds.push(format!("{} >= {}", col, b.value(min)));
            }
            if let Some(max) = max {
                bounds.push(format!("{} <= {}", col, b.value(max)));
            }
            format!("({})", bounds.join(" AND "))
        }
        Predicate::In { values } => {
            let placeholders: Vec<String> = values.iter().map(|v| b.value(v)).collect();
            format!("{} IN ({})", col, placeholders.join(", "))
        }
        Predicate::IsNull => format!("{} IS NULL", col),
        Predicate::NotNull => format!("{} IS NOT NULL", col),
        Predicate::Intersects { geometry } => {
            let p = b.param(SqlParam::GeoJson(geometry.to_geojson()));
            format!("ST_Intersects({}, ST_GeomFromGeoJSON({}))", col, p)
        }
    }
}

/// `((c1 > $1 OR c1 IS NULL) OR (c1 = $1 AND c2 < $2) ...)`
///
/// Each non-null anchor value is bound once. Null anchor values compare
/// with `IS NULL`; terms nothing can sort after are left out.
fn compile_keyset(b: &mut Builder, keyset: &KeysetCondition) -> String {
    let placeholders: Vec<Option<String>> = keyset
        .terms()
        .iter()
        .map(|t| (!t.value.is_null()).then(|| b.value(&t.value)))
        .collect();
    let disjuncts: Vec<String> = keyset
        .terms()
        .iter()
        .enumerate()
        .filter(|(_, term)| !term.is_exhausted())
        .map(|(i, term)| {
            let mut conjuncts: Vec<String> = keyset.terms()[..i]
                .iter()
                .zip(&placeholders)
                .map(|(t, p)| match p {
                    Some(p) => format!("{} = {}", column_ref(&t.column), p),
                    None => format!("{} IS NULL", column_ref(&t.column)),
                })
                .collect();
            let col = column_ref(&term.column);
            let op = term.direction.after_operator();
            conjuncts.push(match (&placeholders[i], term.direction) {
                (Some(p), Direction::Asc) => format!("({col} {op} {p} OR {col} IS NULL)"),
                (Some(p), Direction::Desc) => format!("{col} {op} {p}"),
                (None, _) => format!("{col} IS NOT NULL"),
            });
            if conjuncts.len() == 1 {
                conjuncts.remove(0)
            } else {
                format!("({})", conjuncts.join(" AND "))
            }
        })
        .collect();
    if disjuncts.is_empty() {
        return "FALSE".to_string();
    }
    format!("({})", disjuncts.join(" OR "))
}
