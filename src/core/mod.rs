//! Core query engine: predicates, ordering, keyset pagination and geometry

pub mod context;
pub mod error;
pub mod field;
pub mod filter;
pub mod geometry;
pub mod order;
pub mod query;
pub mod query_tool;
pub mod sql;
pub mod store;
pub mod whitelist;

pub use context::{OperationKind, RequestContext};
pub use error::{StormError, StormResult};
pub use field::FieldValue;
pub use filter::{DataType, FilterItem, Predicate};
pub use geometry::Geometry;
pub use order::{Direction, OrderItem, OrderSpec};
pub use query::{ListRequest, PageMeta, PaginatedResponse};
pub use query_tool::{
    AggregateFunction, AggregateQuery, AggregateRequest, Condition, CursorAnchor,
    KeysetCondition, ListQuery, PageLimits, QueryTool,
};
pub use store::{Row, RowStore};
pub use whitelist::{ColumnDef, ColumnKind, TableSchema, Whitelist};
