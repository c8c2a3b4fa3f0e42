//! # Stormwatch
//!
//! Weather warning matching and notification service with a whitelisted,
//! keyset-paginated query engine over PostgreSQL/PostGIS tables.
//!
//! ## Features
//!
//! - **Dynamic Filters**: equality, substring, range, membership, null checks
//!   and geometry intersection, typed per whitelisted column
//! - **Stable Ordering**: every order list ends on a unique tie-break column
//! - **Keyset Pagination**: `last_row_id` cursors built from the anchor row,
//!   with offset pagination capped at a configurable depth
//! - **Warning Ingestion**: changed warnings are stored, matched against asset
//!   locations and turned into e-mail and SMS notifications, at most once per
//!   warning, asset and channel
//! - **Configuration-Based**: whitelist, limits and templates from YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stormwatch::prelude::*;
//!
//! let config = AppConfig::default_config();
//! let tool = QueryTool::new(Arc::new(config.whitelist()?), config.page_limits());
//!
//! let request: ListRequest = serde_json::from_value(json!({
//!     "filters": { "asset_type_id": [1, 2] },
//!     "order_list": ["name", "asc"],
//!     "limit": 50
//! }))?;
//! let page = tool.list(&ctx, &store, "assets", &request).await?;
//! ```

pub mod config;
pub mod core;
pub mod server;
pub mod storage;
pub mod warning;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        context::{OperationKind, RequestContext},
        error::{StormError, StormResult},
        field::FieldValue,
        filter::{DataType, FilterItem, Predicate},
        geometry::Geometry,
        order::{Direction, OrderSpec},
        query::{ListRequest, PageMeta, PaginatedResponse},
        query_tool::{AggregateRequest, PageLimits, QueryTool},
        store::{Row, RowStore},
        whitelist::{ColumnDef, ColumnKind, TableSchema, Whitelist},
    };

    // === Warnings ===
    pub use crate::warning::{
        Asset, AssetHolder, Channel, Dispatcher, IngestReport, LogDispatcher, Notifier,
        SendLog, TemplateRegistry, Warning, WarningIngestor,
    };

    // === Storage ===
    pub use crate::storage::{InMemoryRowStore, InMemorySendLog};
    #[cfg(feature = "postgres")]
    pub use crate::storage::{PostgresRowStore, PostgresSendLog};

    // === Config ===
    pub use crate::config::AppConfig;

    // === Server ===
    pub use crate::server::{ServerBuilder, ServerHost};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
}
