//! Shared fixtures for integration tests
//!
//! Builds the default whitelist over in-memory storage and offers builders
//! for warnings, assets and holders.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod harness;
//! use harness::*;
//! ```

#![allow(dead_code)]

use chrono::{Duration, Utc};
use serde_json::{Value, json};
use std::sync::Arc;

use stormwatch::config::AppConfig;
use stormwatch::core::context::{OperationKind, RequestContext};
use stormwatch::core::geometry::Geometry;
use stormwatch::core::query_tool::QueryTool;
use stormwatch::core::store::{Row, RowStore};
use stormwatch::storage::{InMemoryRowStore, InMemorySendLog};
use stormwatch::warning::model::{ASSET_HOLDERS, ASSETS, Warning};
use stormwatch::warning::notifier::{MemoryDispatcher, Notifier};
use stormwatch::warning::WarningIngestor;

// ---------------------------------------------------------------------------
// Geometry and row builders
// ---------------------------------------------------------------------------

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

pub fn point(lon: f64, lat: f64) -> Geometry {
    Geometry::Point([lon, lat])
}

/// Axis-aligned square polygon, closed ring
pub fn square(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Geometry {
    Geometry::Polygon(vec![vec![
        [min_lon, min_lat],
        [max_lon, min_lat],
        [max_lon, max_lat],
        [min_lon, max_lat],
        [min_lon, min_lat],
    ]])
}

pub fn read_ctx() -> RequestContext {
    RequestContext::new(OperationKind::Read)
}

pub fn ingest_ctx() -> RequestContext {
    RequestContext::new(OperationKind::Ingest)
}

/// Warning valid from an hour ago for the next six hours
pub fn warning(id: i64, area: Geometry) -> Warning {
    let now = Utc::now();
    Warning {
        id,
        warning_type: "wind".to_string(),
        severity: "moderate".to_string(),
        headline: "Strong wind gusts".to_string(),
        description: Some("Gusts up to 25 m/s".to_string()),
        valid_from: now - Duration::hours(1),
        valid_to: Some(now + Duration::hours(6)),
        area,
    }
}

pub fn holder_row(id: i64, email: Option<&str>, phone: Option<&str>) -> Row {
    row(json!({
        "id": id,
        "name": format!("Holder {}", id),
        "email": email,
        "phone": phone,
        "notify_email": true,
        "notify_sms": true
    }))
}

pub fn asset_row(id: i64, holder_id: i64, name: &str, location: &Geometry) -> Row {
    row(json!({
        "id": id,
        "holder_id": holder_id,
        "asset_type_id": 1,
        "name": name,
        "installed_on": "2020-03-15",
        "location": location
    }))
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Default configuration wired to in-memory collaborators
pub struct Harness {
    pub config: AppConfig,
    pub tool: Arc<QueryTool>,
    pub store: Arc<InMemoryRowStore>,
    pub send_log: Arc<InMemorySendLog>,
    pub dispatcher: Arc<MemoryDispatcher>,
    pub ingestor: WarningIngestor,
}

impl Harness {
    pub fn new() -> Self {
        let config = AppConfig::default_config();
        let tool = Arc::new(QueryTool::new(
            Arc::new(config.whitelist().unwrap()),
            config.page_limits(),
        ));
        let store = Arc::new(InMemoryRowStore::new());
        let send_log = Arc::new(InMemorySendLog::new());
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let notifier = Notifier::new(
            Arc::new(config.template_registry().unwrap()),
            dispatcher.clone(),
            send_log.clone(),
        );
        let ingestor = WarningIngestor::new(tool.clone(), store.clone(), notifier);
        Self {
            config,
            tool,
            store,
            send_log,
            dispatcher,
            ingestor,
        }
    }

    pub async fn put(&self, alias: &str, row: Row) {
        let table = self.tool.table(alias).unwrap();
        self.store.upsert(&table, row).await.unwrap();
    }

    pub async fn add_holder(&self, id: i64, email: Option<&str>, phone: Option<&str>) {
        self.put(ASSET_HOLDERS, holder_row(id, email, phone)).await;
    }

    pub async fn add_asset(&self, id: i64, holder_id: i64, name: &str, location: &Geometry) {
        self.put(ASSETS, asset_row(id, holder_id, name, location)).await;
    }

    /// `count` assets of holder 1 named in repeating groups of three
    ///
    /// Names repeat so that ordering by name alone is not total.
    pub async fn seed_assets(&self, count: i64) {
        self.add_holder(1, Some("ops@example.com"), Some("+4712345678"))
            .await;
        for id in 1..=count {
            let name = format!("asset-{:02}", (id - 1) / 3);
            self.add_asset(id, 1, &name, &point(10.0 + id as f64 * 0.01, 60.0))
                .await;
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().filter_map(|r| r["id"].as_i64()).collect()
}
