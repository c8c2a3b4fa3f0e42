//! Query tool: request normalization and keyset pagination
//!
//! Turns a [`ListRequest`] into a [`ListQuery`] a [`RowStore`] can run:
//!
//! 1. the request is validated before anything touches storage
//!    ([`QueryTool::validate_request`]);
//! 2. the filter map becomes typed [`FilterItem`]s
//!    ([`QueryTool::format_filters`]);
//! 3. the order list becomes an [`OrderSpec`] ending in a unique column
//!    ([`QueryTool::format_order_list`]);
//! 4. with a cursor, the anchor row is looked up and a
//!    [`KeysetCondition`] selecting the rows strictly after it is added.
//!
//! Steps 1 to 3 are synchronous; only the anchor lookup and the final
//! select go to storage.

use crate::core::context::RequestContext;
use crate::core::error::{IntegrityError, QueryError, StormResult};
use crate::core::field::FieldValue;
use crate::core::filter::FilterItem;
use crate::core::geometry::Geometry;
use crate::core::order::{Direction, OrderSpec};
use crate::core::query::{ListRequest, PageMeta, PaginatedResponse};
use crate::core::store::{Row, RowStore};
use crate::core::whitelist::{ColumnKind, TableSchema, Whitelist};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use validator::Validate;

/// Default maximum offset depth
pub const DEFAULT_MAX_PAGE: u64 = 1000;

/// Page size limits applied to every list request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    /// Deepest row an offset request may reach; deeper needs a cursor
    pub max_page: u64,
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            max_page: DEFAULT_MAX_PAGE,
            default_limit: 20,
            max_limit: 500,
        }
    }
}

/// Reject offset pagination that reaches past `max_page` rows
///
/// The page index `offset / limit + 1` never exceeds `offset + limit`, so
/// every request whose page index is past `max_page` is rejected too. A
/// zero limit is rejected outright.
pub fn check_page_depth(offset: u64, limit: u64, max_page: u64) -> Result<(), QueryError> {
    if limit == 0 {
        return Err(QueryError::InvalidLimit { limit });
    }
    if offset.saturating_add(limit) > max_page {
        return Err(QueryError::DeepPageWithoutCursor {
            offset,
            limit,
            max_page,
        });
    }
    Ok(())
}

/// Sort-column values of the last row of the previous page
#[derive(Debug, Clone, PartialEq)]
pub struct CursorAnchor {
    pub row_id: i64,
    pub values: IndexMap<String, FieldValue>,
}

impl CursorAnchor {
    /// Pick the ordered columns out of the anchor row
    pub fn from_row(
        schema: &TableSchema,
        order: &OrderSpec,
        row_id: i64,
        row: &Row,
    ) -> Result<Self, IntegrityError> {
        let mut values = IndexMap::new();
        for column in order.columns() {
            let value = schema
                .value_of(row, column)
                .ok_or_else(|| IntegrityError::CorruptRow {
                    table: schema.alias.clone(),
                    message: format!("column '{}' of row {} cannot be decoded", column, row_id),
                })?;
            values.insert(column.to_string(), value);
        }
        Ok(Self { row_id, values })
    }
}

/// One term of a keyset disjunction: equal on every earlier column,
/// strictly after the anchor on `column`
///
/// `value` is [`FieldValue::Null`] when the anchor row has no value there.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetTerm {
    pub column: String,
    pub direction: Direction,
    pub value: FieldValue,
}

impl KeysetTerm {
    /// Whether `value` sorts at the same position as the anchor
    pub fn level_with(&self, value: &FieldValue) -> bool {
        if self.value.is_null() {
            value.is_null()
        } else {
            value.sql_eq(&self.value)
        }
    }

    /// Whether `value` sorts strictly after the anchor in this direction
    pub fn past(&self, value: &FieldValue) -> bool {
        let ord = value.cmp_nulls_last(&self.value);
        let ord = match self.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        ord == Ordering::Greater
    }

    /// Nothing sorts after a null anchor on an ascending column
    pub fn is_exhausted(&self) -> bool {
        self.value.is_null() && self.direction == Direction::Asc
    }
}

/// Rows strictly after an anchor in a given order
///
/// For order `[(c1, d1), ..., (cn, dn)]` and anchor values `v1..vn`:
///
/// ```text
/// (c1 op1 v1) OR (c1 = v1 AND c2 op2 v2) OR ... OR (c1 = v1 AND ... AND cn opn vn)
/// ```
///
/// with `op = >` for ascending and `<` for descending columns. Nulls sort
/// last ascending and first descending, so a null anchor value compares
/// with `IS NULL`, an ascending term also admits nulls after a value, and a
/// descending term after a null anchor is `IS NOT NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetCondition {
    terms: Vec<KeysetTerm>,
}

impl KeysetCondition {
    pub fn after(order: &OrderSpec, anchor: &CursorAnchor) -> Self {
        let terms = order
            .items()
            .iter()
            .map(|item| KeysetTerm {
                column: item.column.clone(),
                direction: item.direction,
                value: anchor
                    .values
                    .get(&item.column)
                    .cloned()
                    .unwrap_or(FieldValue::Null),
            })
            .collect();
        Self { terms }
    }

    pub fn terms(&self) -> &[KeysetTerm] {
        &self.terms
    }

    pub fn matches(&self, schema: &TableSchema, row: &Row) -> bool {
        let values: Vec<FieldValue> = self
            .terms
            .iter()
            .map(|t| schema.value_of(row, &t.column).unwrap_or(FieldValue::Null))
            .collect();

        (0..self.terms.len()).any(|i| {
            let prefix_level = self.terms[..i]
                .iter()
                .zip(&values)
                .all(|(t, v)| t.level_with(v));
            prefix_level && self.terms[i].past(&values[i])
        })
    }
}

/// A conjunct of a [`ListQuery`]
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Item(FilterItem),
    Keyset(KeysetCondition),
}

impl Condition {
    /// Evaluate against a stored row
    pub fn matches(&self, schema: &TableSchema, row: &Row) -> bool {
        match self {
            Condition::Item(item) => match schema.kind_of(item.column()) {
                Some(ColumnKind::Geometry) => {
                    item.matches_geometry(schema.geometry_of(row, item.column()).as_ref())
                }
                Some(_) => schema
                    .value_of(row, item.column())
                    .is_some_and(|v| item.matches(&v)),
                None => false,
            },
            Condition::Keyset(keyset) => keyset.matches(schema, row),
        }
    }
}

impl From<FilterItem> for Condition {
    fn from(item: FilterItem) -> Self {
        Condition::Item(item)
    }
}

/// A validated select
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub table: Arc<TableSchema>,
    pub conditions: Vec<Condition>,
    pub order: OrderSpec,
    pub limit: u64,
    pub offset: u64,
}

impl ListQuery {
    /// Every row matching `conditions`, in tie-break order, no paging
    pub fn unpaged(
        table: Arc<TableSchema>,
        conditions: Vec<Condition>,
    ) -> Result<Self, QueryError> {
        let order = OrderSpec::tie_break_only(&table)?;
        Ok(Self {
            table,
            conditions,
            order,
            limit: u64::MAX,
            offset: 0,
        })
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(&self.table, row))
    }
}

/// Supported aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn parse(name: &str) -> Result<Self, QueryError> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            _ => Err(QueryError::UnsupportedAggregate {
                function: name.to_string(),
            }),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// Body of an aggregate request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AggregateRequest {
    pub function: String,
    /// Required for every function but `count`
    pub column: Option<String>,
    pub filters: Option<IndexMap<String, Value>>,
    pub search: Option<IndexMap<String, String>>,
    pub null_checks: Option<IndexMap<String, bool>>,
}

/// A validated aggregate
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    pub table: Arc<TableSchema>,
    pub function: AggregateFunction,
    pub column: Option<String>,
    pub conditions: Vec<Condition>,
}

/// Builds validated queries against an injected whitelist
#[derive(Debug, Clone)]
pub struct QueryTool {
    whitelist: Arc<Whitelist>,
    limits: PageLimits,
}

impl QueryTool {
    pub fn new(whitelist: Arc<Whitelist>, limits: PageLimits) -> Self {
        Self { whitelist, limits }
    }

    pub fn whitelist(&self) -> &Arc<Whitelist> {
        &self.whitelist
    }

    pub fn limits(&self) -> PageLimits {
        self.limits
    }

    pub fn table(&self, alias: &str) -> Result<Arc<TableSchema>, QueryError> {
        self.whitelist.table(alias)
    }

    /// Request checks that run before any storage call
    pub fn validate_request(&self, request: &ListRequest) -> StormResult<()> {
        request.validate()?;

        if request.paginates() && request.order_list.is_empty() {
            return Err(QueryError::PaginationWithoutOrder.into());
        }
        let limit = self.effective_limit(request)?;
        if request.last_row_id.is_none() {
            check_page_depth(request.offset.unwrap_or(0), limit, self.limits.max_page)?;
        }
        Ok(())
    }

    fn effective_limit(&self, request: &ListRequest) -> Result<u64, QueryError> {
        let limit = request.limit.unwrap_or(self.limits.default_limit);
        if limit == 0 || limit > self.limits.max_limit {
            return Err(QueryError::InvalidLimit { limit });
        }
        Ok(limit)
    }

    /// Filter map → typed predicates
    ///
    /// A scalar is an `eq`, a list of scalars an `in`, and an object with
    /// only `min` and/or `max` a `range`. On a geometry column the operand
    /// must be a GeoJSON geometry and becomes an `intersects`.
    pub fn format_filters(
        &self,
        table: &TableSchema,
        raw: &IndexMap<String, Value>,
    ) -> Result<Vec<FilterItem>, QueryError> {
        raw.iter()
            .map(|(column, value)| format_filter(table, column, value))
            .collect()
    }

    /// `search` map → `like` predicates on text columns
    pub fn format_search(
        &self,
        table: &TableSchema,
        raw: &IndexMap<String, String>,
    ) -> Result<Vec<FilterItem>, QueryError> {
        raw.iter()
            .map(|(column, needle)| {
                let def = table.filterable(column)?;
                if def.kind != ColumnKind::Text {
                    return Err(QueryError::InvalidOperand {
                        column: column.clone(),
                        message: "search only applies to text columns".to_string(),
                    });
                }
                FilterItem::like(column.as_str(), FieldValue::from(needle.as_str()))
            })
            .collect()
    }

    /// `null_checks` map → `isNull` / `notNull` predicates
    pub fn format_null_checks(
        &self,
        table: &TableSchema,
        raw: &IndexMap<String, bool>,
    ) -> Result<Vec<FilterItem>, QueryError> {
        raw.iter()
            .map(|(column, is_null)| {
                table.filterable(column)?;
                if *is_null {
                    FilterItem::is_null(column.as_str())
                } else {
                    FilterItem::not_null(column.as_str())
                }
            })
            .collect()
    }

    /// Flattened order list → [`OrderSpec`] for `table_alias`
    pub fn format_order_list(
        &self,
        default_tie_break: &str,
        raw_order_list: &[String],
        table_alias: &str,
    ) -> Result<OrderSpec, QueryError> {
        let table = self.whitelist.table(table_alias)?;
        OrderSpec::from_flat(&table, default_tie_break, raw_order_list)
    }

    fn conditions(
        &self,
        table: &TableSchema,
        filters: Option<&IndexMap<String, Value>>,
        search: Option<&IndexMap<String, String>>,
        null_checks: Option<&IndexMap<String, bool>>,
    ) -> Result<Vec<Condition>, QueryError> {
        let mut conditions = Vec::new();
        if let Some(filters) = filters {
            let items = self.format_filters(table, filters)?;
            conditions.extend(items.into_iter().map(Condition::from));
        }
        if let Some(search) = search {
            conditions.extend(self.format_search(table, search)?.into_iter().map(Condition::from));
        }
        if let Some(null_checks) = null_checks {
            conditions.extend(
                self.format_null_checks(table, null_checks)?
                    .into_iter()
                    .map(Condition::from),
            );
        }
        Ok(conditions)
    }

    /// Validate and normalize everything that needs no storage access
    ///
    /// The returned query has no keyset condition yet; see
    /// [`Self::build_list_query`].
    pub fn plan(&self, alias: &str, request: &ListRequest) -> StormResult<ListQuery> {
        self.validate_request(request)?;
        let table = self.whitelist.table(alias)?;
        let conditions = self.conditions(
            &table,
            request.filters.as_ref(),
            request.search.as_ref(),
            request.null_checks.as_ref(),
        )?;
        let order = self.format_order_list(&table.default_order, &request.order_list, alias)?;
        let limit = self.effective_limit(request)?;
        let offset = match request.last_row_id {
            Some(_) => 0,
            None => request.offset.unwrap_or(0),
        };

        Ok(ListQuery {
            table,
            conditions,
            order,
            limit,
            offset,
        })
    }

    /// Look up the anchor row for a cursor
    ///
    /// No row is a stale cursor (client error); more than one row means the
    /// row id column is not unique in storage (integrity error).
    pub async fn fetch_anchor(
        &self,
        ctx: &RequestContext,
        store: &dyn RowStore,
        table: &TableSchema,
        order: &OrderSpec,
        row_id: i64,
    ) -> StormResult<CursorAnchor> {
        let rows = ctx
            .storage(store.find_by_column(table, &table.row_id, &FieldValue::Integer(row_id)))
            .await?;
        match rows.as_slice() {
            [] => Err(QueryError::CursorNotFound {
                table: table.alias.clone(),
                row_id,
            }
            .into()),
            [row] => Ok(CursorAnchor::from_row(table, order, row_id, row)?),
            _ => Err(IntegrityError::AmbiguousAnchor {
                table: table.alias.clone(),
                row_id,
                count: rows.len(),
            }
            .into()),
        }
    }

    /// Full query for a request, including the keyset condition
    pub async fn build_list_query(
        &self,
        ctx: &RequestContext,
        store: &dyn RowStore,
        alias: &str,
        request: &ListRequest,
    ) -> StormResult<ListQuery> {
        let mut query = self.plan(alias, request)?;
        if let Some(row_id) = request.last_row_id {
            let anchor = self
                .fetch_anchor(ctx, store, &query.table, &query.order, row_id)
                .await?;
            let keyset = KeysetCondition::after(&query.order, &anchor);
            query.conditions.push(Condition::Keyset(keyset));
        }
        tracing::debug!(
            trace_id = %ctx.trace_id(),
            table = %alias,
            conditions = query.conditions.len(),
            limit = query.limit,
            offset = query.offset,
            "list query built"
        );
        Ok(query)
    }

    /// Run a list request end to end
    pub async fn list(
        &self,
        ctx: &RequestContext,
        store: &dyn RowStore,
        alias: &str,
        request: &ListRequest,
    ) -> StormResult<PaginatedResponse<Row>> {
        let query = self.build_list_query(ctx, store, alias, request).await?;
        let rows = ctx.storage(store.select(&query)).await?;
        let last_id = rows.last().and_then(|row| query.table.row_id_of(row));
        let page = PageMeta::new(query.limit, query.offset, rows.len(), last_id);
        Ok(PaginatedResponse { data: rows, page })
    }

    /// Validate an aggregate request
    pub fn plan_aggregate(
        &self,
        alias: &str,
        request: &AggregateRequest,
    ) -> StormResult<AggregateQuery> {
        let table = self.whitelist.table(alias)?;
        let function = AggregateFunction::parse(&request.function)?;

        match (&request.column, function) {
            (None, AggregateFunction::Count) => {}
            (None, _) => {
                return Err(QueryError::InvalidOperand {
                    column: String::new(),
                    message: format!("{} needs a column", function.as_sql()),
                }
                .into());
            }
            (Some(column), _) => {
                let def = table.filterable(column)?;
                let fits = match function {
                    AggregateFunction::Count => true,
                    AggregateFunction::Sum | AggregateFunction::Avg => {
                        matches!(def.kind, ColumnKind::Integer | ColumnKind::Float)
                    }
                    AggregateFunction::Min | AggregateFunction::Max => {
                        def.kind != ColumnKind::Geometry
                    }
                };
                if !fits {
                    return Err(QueryError::InvalidOperand {
                        column: column.clone(),
                        message: format!(
                            "{} does not apply to {:?} columns",
                            function.as_sql(),
                            def.kind
                        ),
                    }
                    .into());
                }
            }
        }

        let conditions = self.conditions(
            &table,
            request.filters.as_ref(),
            request.search.as_ref(),
            request.null_checks.as_ref(),
        )?;
        Ok(AggregateQuery {
            table,
            function,
            column: request.column.clone(),
            conditions,
        })
    }

    pub async fn aggregate(
        &self,
        ctx: &RequestContext,
        store: &dyn RowStore,
        alias: &str,
        request: &AggregateRequest,
    ) -> StormResult<Value> {
        let query = self.plan_aggregate(alias, request)?;
        ctx.storage(store.aggregate(&query)).await
    }
}

fn format_filter(
    table: &TableSchema,
    column: &str,
    value: &Value,
) -> Result<FilterItem, QueryError> {
    let def = table.filterable(column)?;
    let data_type = def.kind.data_type();

    if def.kind == ColumnKind::Geometry {
        let geometry: Geometry = serde_json::from_value(value.clone()).map_err(|_| {
            shape(column, "geometry columns take a GeoJSON Point, Polygon or MultiPolygon")
        })?;
        return FilterItem::intersects(column, geometry);
    }

    let item = match value {
        Value::Array(values) => {
            let values = values
                .iter()
                .map(|v| {
                    FieldValue::from_json(v)
                        .ok_or_else(|| shape(column, "list filters take scalar values only"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            FilterItem::in_list(column, values, data_type)?
        }
        Value::Object(map) => {
            if map.is_empty() || map.keys().any(|k| k != "min" && k != "max") {
                return Err(shape(column, "object filters take only 'min' and 'max'"));
            }
            let bound = |key: &str| match map.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(v) => FieldValue::from_json(v)
                    .map(Some)
                    .ok_or_else(|| shape(column, "range bounds must be scalars")),
            };
            FilterItem::range(column, bound("min")?, bound("max")?, data_type)?
        }
        Value::Null => {
            return Err(shape(column, "null is not a filter; use null_checks"));
        }
        scalar => {
            let value = FieldValue::from_json(scalar)
                .ok_or_else(|| shape(column, "unsupported filter value"))?;
            FilterItem::eq(column, value, data_type)?
        }
    };

    check_family(column, def.kind, &item)?;
    Ok(item)
}

fn check_family(column: &str, kind: ColumnKind, item: &FilterItem) -> Result<(), QueryError> {
    use crate::core::filter::Predicate;

    let operands: Vec<&FieldValue> = match item.predicate() {
        Predicate::Eq { value } => vec![value],
        Predicate::Range { min, max } => min.iter().chain(max.iter()).collect(),
        Predicate::In { values } => values.iter().collect(),
        _ => Vec::new(),
    };
    let expected = kind.family();
    for operand in operands {
        if operand.family() != expected {
            return Err(QueryError::InvalidOperand {
                column: column.to_string(),
                message: format!(
                    "expected a {} value, got {}",
                    expected.map(|f| f.as_str()).unwrap_or("geometry"),
                    operand.family().map(|f| f.as_str()).unwrap_or("null")
                ),
            });
        }
    }
    Ok(())
}

fn shape(column: &str, message: &str) -> QueryError {
    QueryError::InvalidFilterShape {
        column: column.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::{DataType, Predicate};
    use crate::core::whitelist::ColumnDef;
    use serde_json::json;

    fn tool() -> QueryTool {
        let assets = TableSchema::new("assets", "assets")
            .column("id", ColumnDef::new(ColumnKind::Integer).unique())
            .column("name", ColumnDef::new(ColumnKind::Text))
            .column("holder_id", ColumnDef::new(ColumnKind::Integer))
            .column("installed_on", ColumnDef::new(ColumnKind::Date))
            .column("value", ColumnDef::new(ColumnKind::Float))
            .column("location", ColumnDef::new(ColumnKind::Geometry));
        let wl = Whitelist::new([("assets".to_string(), assets)]).unwrap();
        QueryTool::new(Arc::new(wl), PageLimits::default())
    }

    fn filters(value: Value) -> IndexMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_format_filters_shapes() {
        let tool = tool();
        let table = tool.table("assets").unwrap();
        let items = tool
            .format_filters(
                &table,
                &filters(json!({
                    "name": "Pump",
                    "holder_id": [1, 2],
                    "installed_on": {"min": "2020-01-01", "max": "2020-12-31"}
                })),
            )
            .unwrap();
        assert!(matches!(items[0].predicate(), Predicate::Eq { .. }));
        assert!(matches!(items[1].predicate(), Predicate::In { .. }));
        assert!(matches!(items[2].predicate(), Predicate::Range { .. }));
        assert_eq!(items[2].data_type(), Some(DataType::Date));
    }

    #[test]
    fn test_format_filters_rejects_bad_shapes() {
        let tool = tool();
        let table = tool.table("assets").unwrap();
        for bad in [
            json!({"name": null}),
            json!({"name": {"like": "x"}}),
            json!({"installed_on": {}}),
            json!({"installed_on": {"min": "2020-01-01", "other": 1}}),
            json!({"holder_id": [[1]]}),
        ] {
            let err = tool.format_filters(&table, &filters(bad.clone())).unwrap_err();
            assert!(matches!(err, QueryError::InvalidFilterShape { .. }), "{}", bad);
        }
    }

    #[test]
    fn test_format_filters_checks_column_family() {
        let tool = tool();
        let table = tool.table("assets").unwrap();
        assert!(tool.format_filters(&table, &filters(json!({"name": 3}))).is_err());
        assert!(tool.format_filters(&table, &filters(json!({"holder_id": "3"}))).is_err());
        assert!(tool.format_filters(&table, &filters(json!({"value": 3}))).is_ok());
        assert!(matches!(
            tool.format_filters(&table, &filters(json!({"secret": 1}))),
            Err(QueryError::UnknownColumn { .. })
        ));
        assert!(matches!(
            tool.format_filters(&table, &filters(json!({"installed_on": "2020-02-30"}))),
            Err(QueryError::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_geometry_filter_becomes_intersects() {
        let tool = tool();
        let table = tool.table("assets").unwrap();
        let items = tool
            .format_filters(
                &table,
                &filters(json!({"location": {"type": "Point", "coordinates": [1.0, 2.0]}})),
            )
            .unwrap();
        assert!(matches!(items[0].predicate(), Predicate::Intersects { .. }));
        assert!(tool.format_filters(&table, &filters(json!({"location": 5}))).is_err());
    }

    #[test]
    fn test_search_only_on_text() {
        let tool = tool();
        let table = tool.table("assets").unwrap();
        let ok: IndexMap<String, String> = [("name".to_string(), "pu".to_string())].into();
        assert!(tool.format_search(&table, &ok).is_ok());
        let bad: IndexMap<String, String> = [("holder_id".to_string(), "1".to_string())].into();
        assert!(tool.format_search(&table, &bad).is_err());
    }

    #[test]
    fn test_page_depth_guard() {
        assert!(check_page_depth(0, 10, 1000).is_ok());
        assert!(check_page_depth(990, 10, 1000).is_ok());
        assert!(matches!(
            check_page_depth(5000, 10, 1000),
            Err(QueryError::DeepPageWithoutCursor { .. })
        ));
        assert!(check_page_depth(1_000_000, 1, 1000).is_err());
        assert_eq!(
            check_page_depth(0, 0, 1000),
            Err(QueryError::InvalidLimit { limit: 0 })
        );
    }

    #[test]
    fn test_pagination_without_order_is_rejected() {
        let tool = tool();
        let req = ListRequest {
            limit: Some(10),
            ..Default::default()
        };
        assert!(matches!(
            tool.plan("assets", &req),
            Err(crate::core::error::StormError::Query(
                QueryError::PaginationWithoutOrder
            ))
        ));

        let unpaged = ListRequest::default();
        let query = tool.plan("assets", &unpaged).unwrap();
        assert_eq!(query.order.columns().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn test_deep_offset_allowed_with_cursor() {
        let tool = tool();
        let mut req = ListRequest {
            order_list: vec!["name".into(), "asc".into()],
            limit: Some(10),
            offset: Some(5000),
            ..Default::default()
        };
        assert!(tool.plan("assets", &req).is_err());
        req.last_row_id = Some(7);
        let query = tool.plan("assets", &req).unwrap();
        assert_eq!(query.offset, 0);
    }

    #[test]
    fn test_keyset_selects_rows_after_anchor() {
        let tool = tool();
        let table = tool.table("assets").unwrap();
        let raw: Vec<String> = ["holder_id", "asc", "value", "desc"].map(String::from).to_vec();
        let order = tool.format_order_list("id", &raw, "assets").unwrap();
        let anchor = CursorAnchor::from_row(
            &table,
            &order,
            9,
            &row(json!({"id": 9, "holder_id": 3, "value": 100.0})),
        )
        .unwrap();
        let keyset = KeysetCondition::after(&order, &anchor);

        let after = |r: Value| keyset.matches(&table, &row(r));
        assert!(after(json!({"id": 1, "holder_id": 4, "value": 500.0})));
        assert!(after(json!({"id": 1, "holder_id": 3, "value": 99.0})));
        assert!(after(json!({"id": 10, "holder_id": 3, "value": 100.0})));
        assert!(!after(json!({"id": 8, "holder_id": 3, "value": 100.0})));
        assert!(!after(json!({"id": 1, "holder_id": 3, "value": 101.0})));
        assert!(!after(json!({"id": 1, "holder_id": 2, "value": 1.0})));
    }

    #[test]
    fn test_keyset_ascending_walks_into_nulls() {
        let tool = tool();
        let table = tool.table("assets").unwrap();
        let order = tool
            .format_order_list("id", &["installed_on".into(), "asc".into()], "assets")
            .unwrap();
        let keyset_after = |anchor: Value| {
            let anchor = row(anchor);
            let row_id = table.row_id_of(&anchor).unwrap();
            let anchor = CursorAnchor::from_row(&table, &order, row_id, &anchor).unwrap();
            KeysetCondition::after(&order, &anchor)
        };

        let keyset = keyset_after(json!({"id": 3, "installed_on": "2021-05-01"}));
        let after = |r: Value| keyset.matches(&table, &row(r));
        assert!(after(json!({"id": 1, "installed_on": "2022-01-01"})));
        assert!(after(json!({"id": 1, "installed_on": null})));
        assert!(after(json!({"id": 4, "installed_on": "2021-05-01"})));
        assert!(!after(json!({"id": 2, "installed_on": "2021-05-01"})));

        let keyset = keyset_after(json!({"id": 3, "installed_on": null}));
        assert!(keyset.terms()[0].is_exhausted());
        assert!(keyset.matches(&table, &row(json!({"id": 4}))));
        assert!(!keyset.matches(&table, &row(json!({"id": 2}))));
        assert!(!keyset.matches(&table, &row(json!({"id": 9, "installed_on": "2030-01-01"}))));
    }

    #[test]
    fn test_keyset_descending_leaves_nulls_first() {
        let tool = tool();
        let table = tool.table("assets").unwrap();
        let order = tool
            .format_order_list("id", &["installed_on".into(), "desc".into()], "assets")
            .unwrap();
        let keyset_after = |anchor: Value| {
            let anchor = row(anchor);
            let row_id = table.row_id_of(&anchor).unwrap();
            let anchor = CursorAnchor::from_row(&table, &order, row_id, &anchor).unwrap();
            KeysetCondition::after(&order, &anchor)
        };

        let keyset = keyset_after(json!({"id": 2}));
        let after = |r: Value| keyset.matches(&table, &row(r));
        assert!(after(json!({"id": 1, "installed_on": "2020-01-01"})));
        assert!(after(json!({"id": 4})));
        assert!(!after(json!({"id": 1})));

        let keyset = keyset_after(json!({"id": 5, "installed_on": "2021-05-01"}));
        let after = |r: Value| keyset.matches(&table, &row(r));
        assert!(after(json!({"id": 1, "installed_on": "2020-01-01"})));
        assert!(!after(json!({"id": 9})));
        assert!(!after(json!({"id": 9, "installed_on": "2022-01-01"})));
    }

    #[test]
    fn test_aggregate_planning() {
        let tool = tool();
        let req = |function: &str, column: Option<&str>| AggregateRequest {
            function: function.into(),
            column: column.map(String::from),
            ..Default::default()
        };
        assert!(tool.plan_aggregate("assets", &req("count", None)).is_ok());
        assert!(tool.plan_aggregate("assets", &req("SUM", Some("value"))).is_ok());
        assert!(tool.plan_aggregate("assets", &req("sum", Some("name"))).is_err());
        assert!(tool.plan_aggregate("assets", &req("max", None)).is_err());
        assert!(matches!(
            tool.plan_aggregate("assets", &req("median", Some("value"))),
            Err(crate::core::error::StormError::Query(
                QueryError::UnsupportedAggregate { .. }
            ))
        ));
    }
}
