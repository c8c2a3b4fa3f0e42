//! Warning ingestion and asset re-evaluation
//!
//! Ingestion: every incoming warning is checked first; then each one is
//! compared with its stored version, stored when new or changed, matched
//! against asset locations and handed to the [`Notifier`] for every
//! affected asset. Re-ingesting an unchanged warning does nothing. A
//! changed geometry only notifies assets it newly covers, since the send
//! log already holds records for the others.

use crate::core::context::RequestContext;
use crate::core::error::{IntegrityError, QueryError, StormResult, ValidationError};
use crate::core::field::FieldValue;
use crate::core::filter::FilterItem;
use crate::core::geometry::{self, Geometry};
use crate::core::query::{ListRequest, PageMeta, PaginatedResponse};
use crate::core::query_tool::{Condition, ListQuery, QueryTool};
use crate::core::store::{Row, RowStore};
use crate::core::whitelist::TableSchema;
use crate::warning::model::{
    ASSET_HOLDERS, ASSETS, Asset, AssetHolder, IngestReport, RecipientFailure, WARNINGS, Warning,
    from_row, to_row,
};
use crate::warning::notifier::Notifier;
use chrono::Utc;
use std::sync::Arc;

/// Entry point for the warning crawler and asset updates
#[derive(Clone)]
pub struct WarningIngestor {
    tool: Arc<QueryTool>,
    store: Arc<dyn RowStore>,
    notifier: Notifier,
}

impl WarningIngestor {
    pub fn new(tool: Arc<QueryTool>, store: Arc<dyn RowStore>, notifier: Notifier) -> Self {
        Self {
            tool,
            store,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Store `warnings` and notify affected holders
    ///
    /// Returns whether anything was persisted.
    pub async fn store_warnings_and_send_notifications(
        &self,
        ctx: &RequestContext,
        warnings: Vec<Warning>,
    ) -> StormResult<bool> {
        Ok(self.ingest(ctx, warnings).await?.changed)
    }

    /// Like [`Self::store_warnings_and_send_notifications`], with the full report
    pub async fn ingest(
        &self,
        ctx: &RequestContext,
        warnings: Vec<Warning>,
    ) -> StormResult<IngestReport> {
        ctx.instrument("ingest_warnings", self.run_ingest(ctx, &warnings))
            .await
    }

    async fn run_ingest(
        &self,
        ctx: &RequestContext,
        warnings: &[Warning],
    ) -> StormResult<IngestReport> {
        for warning in warnings {
            warning.check()?;
        }

        let mut report = IngestReport::default();
        for warning in warnings {
            self.ingest_one(ctx, warning, &mut report).await?;
        }

        tracing::info!(
            trace_id = %ctx.trace_id(),
            received = warnings.len(),
            stored = report.stored,
            unchanged = report.unchanged,
            notified = report.records.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "warning ingestion finished"
        );
        Ok(report)
    }

    async fn ingest_one(
        &self,
        ctx: &RequestContext,
        warning: &Warning,
        report: &mut IngestReport,
    ) -> StormResult<()> {
        let table = self.tool.table(WARNINGS)?;
        let stored = self
            .find_one(ctx, &table, &table.row_id, &FieldValue::Integer(warning.id))
            .await?;
        if let Some(row) = stored {
            let stored: Warning = from_row(WARNINGS, &row)?;
            if warning.is_unchanged_from(&stored) {
                tracing::debug!(trace_id = %ctx.trace_id(), warning_id = warning.id, "unchanged");
                report.unchanged += 1;
                return Ok(());
            }
        }

        ctx.storage(self.store.upsert(&table, to_row(warning)?)).await?;
        report.stored += 1;
        report.changed = true;
        tracing::info!(
            trace_id = %ctx.trace_id(),
            warning_id = warning.id,
            warning_type = %warning.warning_type,
            severity = %warning.severity,
            "warning stored"
        );

        if warning.is_expired_at(Utc::now()) {
            return Ok(());
        }
        for row in self.intersecting(ctx, ASSETS, "location", &warning.area).await? {
            let asset: Asset = match from_row(ASSETS, &row) {
                Ok(asset) => asset,
                Err(e) => {
                    let asset_id = self.tool.table(ASSETS)?.row_id_of(&row).unwrap_or_default();
                    report
                        .failures
                        .push(RecipientFailure::new(warning.id, asset_id, &e.into()));
                    continue;
                }
            };
            self.notify_holder(ctx, warning, &asset, report).await?;
        }
        Ok(())
    }

    /// Re-match an asset whose location may have changed
    ///
    /// Nothing happens when `previous_location` is the same shape as the
    /// asset's location. Otherwise the asset is stored and every unexpired
    /// warning covering the new location is notified; assets already
    /// notified for a warning are not notified again.
    pub async fn reevaluate_asset(
        &self,
        ctx: &RequestContext,
        asset: &Asset,
        previous_location: Option<&Geometry>,
    ) -> StormResult<IngestReport> {
        ctx.instrument("reevaluate_asset", self.run_reevaluate(ctx, asset, previous_location))
            .await
    }

    async fn run_reevaluate(
        &self,
        ctx: &RequestContext,
        asset: &Asset,
        previous_location: Option<&Geometry>,
    ) -> StormResult<IngestReport> {
        let mut report = IngestReport::default();
        if previous_location.is_some_and(|prev| geometry::equals(prev, &asset.location)) {
            report.unchanged += 1;
            return Ok(report);
        }

        let table = self.tool.table(ASSETS)?;
        ctx.storage(self.store.upsert(&table, to_row(asset)?)).await?;
        report.stored += 1;
        report.changed = true;

        let now = Utc::now();
        for row in self.intersecting(ctx, WARNINGS, "area", &asset.location).await? {
            let warning: Warning = from_row(WARNINGS, &row)?;
            if warning.is_expired_at(now) {
                continue;
            }
            self.notify_holder(ctx, &warning, asset, &mut report).await?;
        }
        tracing::info!(
            trace_id = %ctx.trace_id(),
            asset_id = asset.id,
            notified = report.records.len(),
            "asset re-evaluated"
        );
        Ok(report)
    }

    /// Move an asset and re-evaluate it
    pub async fn update_asset_location(
        &self,
        ctx: &RequestContext,
        asset_id: i64,
        location: Geometry,
    ) -> StormResult<IngestReport> {
        location.validate().map_err(|e| ValidationError::FieldError {
            field: "location".to_string(),
            message: e.to_string(),
        })?;
        let table = self.tool.table(ASSETS)?;
        let row = self
            .find_one(ctx, &table, &table.row_id, &FieldValue::Integer(asset_id))
            .await?
            .ok_or_else(|| QueryError::RowNotFound {
                table: ASSETS.to_string(),
                row_id: asset_id,
            })?;
        let mut asset: Asset = from_row(ASSETS, &row)?;
        let previous = std::mem::replace(&mut asset.location, location);
        self.reevaluate_asset(ctx, &asset, Some(&previous)).await
    }

    /// Page of assets inside a stored warning's area
    pub async fn assets_in_warning(
        &self,
        ctx: &RequestContext,
        warning_id: i64,
        request: &ListRequest,
    ) -> StormResult<PaginatedResponse<Row>> {
        // request checks run before the warning lookup
        self.tool.plan(ASSETS, request)?;

        let warnings = self.tool.table(WARNINGS)?;
        let row = self
            .find_one(ctx, &warnings, &warnings.row_id, &FieldValue::Integer(warning_id))
            .await?
            .ok_or_else(|| QueryError::RowNotFound {
                table: WARNINGS.to_string(),
                row_id: warning_id,
            })?;
        let warning: Warning = from_row(WARNINGS, &row)?;

        let mut query = self
            .tool
            .build_list_query(ctx, self.store.as_ref(), ASSETS, request)
            .await?;
        query
            .conditions
            .push(FilterItem::intersects("location", warning.area)?.into());
        let rows = ctx.storage(self.store.select(&query)).await?;
        let last_id = rows.last().and_then(|r| query.table.row_id_of(r));
        let page = PageMeta::new(query.limit, query.offset, rows.len(), last_id);
        Ok(PaginatedResponse { data: rows, page })
    }

    /// Look up the holder and notify on every channel
    ///
    /// A missing or duplicated holder is recorded as a failure for this
    /// recipient; the batch continues.
    async fn notify_holder(
        &self,
        ctx: &RequestContext,
        warning: &Warning,
        asset: &Asset,
        report: &mut IngestReport,
    ) -> StormResult<()> {
        let holder = match self.holder(ctx, asset.holder_id).await {
            Ok(holder) => holder,
            Err(e) if e.is_storage() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    trace_id = %ctx.trace_id(),
                    warning_id = warning.id,
                    asset_id = asset.id,
                    error = %e,
                    "holder lookup failed, skipping recipient"
                );
                report
                    .failures
                    .push(RecipientFailure::new(warning.id, asset.id, &e));
                return Ok(());
            }
        };
        self.notifier
            .notify(ctx, warning, asset, &holder, report)
            .await
    }

    async fn holder(&self, ctx: &RequestContext, holder_id: i64) -> StormResult<AssetHolder> {
        let table = self.tool.table(ASSET_HOLDERS)?;
        let row = self
            .find_one(ctx, &table, &table.row_id, &FieldValue::Integer(holder_id))
            .await?
            .ok_or_else(|| IntegrityError::MissingReference {
                table: ASSET_HOLDERS.to_string(),
                column: table.row_id.clone(),
                value: holder_id.to_string(),
            })?;
        Ok(from_row(ASSET_HOLDERS, &row)?)
    }

    /// Zero or one row; more than one is an integrity error
    async fn find_one(
        &self,
        ctx: &RequestContext,
        table: &TableSchema,
        column: &str,
        value: &FieldValue,
    ) -> StormResult<Option<Row>> {
        let mut rows = ctx
            .storage(self.store.find_by_column(table, column, value))
            .await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            count => Err(IntegrityError::AmbiguousReference {
                table: table.alias.clone(),
                column: column.to_string(),
                value: value.to_display(),
                count,
            }
            .into()),
        }
    }

    async fn intersecting(
        &self,
        ctx: &RequestContext,
        alias: &str,
        column: &str,
        area: &Geometry,
    ) -> StormResult<Vec<Row>> {
        let table = self.tool.table(alias)?;
        let condition = Condition::from(FilterItem::intersects(column, area.clone())?);
        let query = ListQuery::unpaged(table, vec![condition])?;
        ctx.storage(self.store.select(&query)).await
    }
}
