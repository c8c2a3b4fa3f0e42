//! REST API exposure
//!
//! Consumes a `ServerHost` and produces an Axum `Router`. Every whitelisted
//! table gets `/{alias}/query` and `/{alias}/aggregate`, with underscores in
//! the alias written as dashes (`asset_holders` -> `/asset-holders/query`).

pub mod extract;

use super::super::host::ServerHost;
use crate::core::context::{OperationKind, RequestContext};
use crate::core::error::StormResult;
use crate::core::geometry::Geometry;
use crate::core::query::{ListRequest, PaginatedResponse};
use crate::core::query_tool::AggregateRequest;
use crate::core::store::Row;
use crate::warning::model::{IngestReport, Warning};
use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// REST API exposure implementation
pub struct RestExposure;

type HostState = State<Arc<ServerHost>>;

/// JSON body whose rejection is answered with the error envelope
type JsonBody<T> = Result<Json<T>, JsonRejection>;

impl RestExposure {
    /// Build the REST router from a host
    ///
    /// Custom routes are merged before the tracing layer is applied, so
    /// they are traced too.
    pub fn build_router(host: Arc<ServerHost>, custom_routes: Vec<Router>) -> Result<Router> {
        let mut api = Router::new();
        for alias in host.table_aliases() {
            api = api
                .route(&format!("/{}/query", segment(alias)), post(Self::query_route(alias)))
                .route(
                    &format!("/{}/aggregate", segment(alias)),
                    post(Self::aggregate_route(alias)),
                );
        }
        let api = api
            .route("/warnings/ingest", post(Self::ingest))
            .route("/warnings/{id}/assets", get(Self::assets_in_warning))
            .route("/assets/{id}/location", put(Self::update_location))
            .with_state(host);

        let mut app = Self::health_routes().merge(api);
        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }

        Ok(app.layer(TraceLayer::new_for_http()))
    }

    fn health_routes() -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
    }

    async fn health_check() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "service": "stormwatch"
        }))
    }

    fn query_route(
        alias: &str,
    ) -> impl Fn(HostState, RequestContext, JsonBody<ListRequest>) -> QueryFuture
    + Clone
    + Send
    + Sync
    + 'static {
        let alias = alias.to_string();
        move |state: HostState,
              ctx: RequestContext,
              request: JsonBody<ListRequest>|
              -> QueryFuture { Box::pin(Self::query(state, ctx, alias.clone(), request)) }
    }

    fn aggregate_route(
        alias: &str,
    ) -> impl Fn(HostState, RequestContext, JsonBody<AggregateRequest>) -> AggregateFuture
    + Clone
    + Send
    + Sync
    + 'static {
        let alias = alias.to_string();
        move |state: HostState,
              ctx: RequestContext,
              request: JsonBody<AggregateRequest>|
              -> AggregateFuture { Box::pin(Self::aggregate(state, ctx, alias.clone(), request)) }
    }

    async fn query(
        State(host): HostState,
        ctx: RequestContext,
        alias: String,
        body: JsonBody<ListRequest>,
    ) -> StormResult<Json<PaginatedResponse<Row>>> {
        let Json(request) = body?;
        let ctx = ctx.for_operation(OperationKind::Read);
        let page = host
            .tool
            .list(&ctx, host.store.as_ref(), &alias, &request)
            .await?;
        Ok(Json(page))
    }

    async fn aggregate(
        State(host): HostState,
        ctx: RequestContext,
        alias: String,
        body: JsonBody<AggregateRequest>,
    ) -> StormResult<Json<Value>> {
        let Json(request) = body?;
        let ctx = ctx.for_operation(OperationKind::Read);
        let value = host
            .tool
            .aggregate(&ctx, host.store.as_ref(), &alias, &request)
            .await?;
        Ok(Json(json!({
            "function": request.function,
            "column": request.column,
            "value": value
        })))
    }

    async fn ingest(
        State(host): HostState,
        ctx: RequestContext,
        body: JsonBody<Vec<Warning>>,
    ) -> StormResult<Json<IngestReport>> {
        let Json(warnings) = body?;
        let ctx = ctx.for_operation(OperationKind::Ingest);
        Ok(Json(host.ingestor.ingest(&ctx, warnings).await?))
    }

    async fn assets_in_warning(
        State(host): HostState,
        ctx: RequestContext,
        Path(id): Path<i64>,
        Query(params): Query<PageParams>,
    ) -> StormResult<Json<PaginatedResponse<Row>>> {
        let request = params.into_request();
        let page = host.ingestor.assets_in_warning(&ctx, id, &request).await?;
        Ok(Json(page))
    }

    async fn update_location(
        State(host): HostState,
        ctx: RequestContext,
        Path(id): Path<i64>,
        body: JsonBody<Geometry>,
    ) -> StormResult<Json<IngestReport>> {
        let Json(location) = body?;
        Ok(Json(
            host.ingestor.update_asset_location(&ctx, id, location).await?,
        ))
    }
}

type QueryFuture = Pin<Box<dyn Future<Output = StormResult<Json<PaginatedResponse<Row>>>> + Send>>;
type AggregateFuture = Pin<Box<dyn Future<Output = StormResult<Json<Value>>> + Send>>;

fn segment(alias: &str) -> String {
    alias.replace('_', "-")
}

/// Query string of paged GET endpoints
///
/// `order` is the flat list joined with commas: `name,asc,id,desc`.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub order: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub last_row_id: Option<i64>,
}

impl PageParams {
    pub fn into_request(self) -> ListRequest {
        let order_list = self
            .order
            .map(|o| {
                o.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        ListRequest {
            order_list,
            limit: self.limit,
            offset: self.offset,
            last_row_id: self.last_row_id,
            ..ListRequest::default()
        }
    }
}
