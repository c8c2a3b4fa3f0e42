//! Notification formatting and dispatch
//!
//! For one (warning, asset, holder) triple, [`Notifier::notify`] walks every
//! channel through: opt-out check → contact check → send-log lookup →
//! template selection → render → send-log claim → dispatch → send-log
//! completion. Only the caller whose claim inserts the key dispatches, so
//! overlapping runs never send the same notification twice. Everything
//! short of a failed lookup or claim ends in the [`IngestReport`], never in
//! an error.

use crate::core::context::RequestContext;
use crate::core::error::{StormError, StormResult};
use crate::warning::model::{
    Asset, AssetHolder, Channel, DeliveryStatus, IngestReport, NotificationKey,
    NotificationRecord, RecipientFailure, SkipReason, SkippedNotification, Warning,
};
use crate::warning::templates::TemplateRegistry;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, RwLock};

/// A message ready for a delivery channel
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub address: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Mail / SMS delivery
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}

/// Persistent outbox of every notification ever built
#[async_trait]
pub trait SendLog: Send + Sync {
    async fn contains(&self, key: &NotificationKey) -> Result<bool>;

    /// Atomically insert a record unless its key is present
    ///
    /// Returns `false` when another caller already holds the key.
    async fn claim(&self, record: &NotificationRecord) -> Result<bool>;

    /// Replace a claimed record, carrying its delivery outcome
    async fn complete(&self, record: &NotificationRecord) -> Result<()>;

    async fn list(&self) -> Result<Vec<NotificationRecord>>;
}

/// Dispatcher that only writes a log line
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        tracing::info!(
            channel = %message.channel,
            address = %message.address,
            subject = message.subject.as_deref().unwrap_or(""),
            "notification dispatched"
        );
        Ok(())
    }
}

/// Dispatcher keeping every message in memory, optionally refusing some
/// addresses
#[derive(Debug, Clone, Default)]
pub struct MemoryDispatcher {
    sent: Arc<RwLock<Vec<OutboundMessage>>>,
    refused: Arc<RwLock<Vec<String>>>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `address` fail
    pub fn refuse(&self, address: impl Into<String>) -> Result<()> {
        self.refused
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?
            .push(address.into());
        Ok(())
    }

    pub fn sent(&self) -> Result<Vec<OutboundMessage>> {
        Ok(self
            .sent
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?
            .clone())
    }
}

#[async_trait]
impl Dispatcher for MemoryDispatcher {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let refused = self
            .refused
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?
            .contains(&message.address);
        if refused {
            return Err(anyhow!("{} rejected by gateway", message.address));
        }
        self.sent
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?
            .push(message.clone());
        Ok(())
    }
}

/// Builds and dispatches notifications
#[derive(Clone)]
pub struct Notifier {
    templates: Arc<TemplateRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    send_log: Arc<dyn SendLog>,
}

impl Notifier {
    pub fn new(
        templates: Arc<TemplateRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
        send_log: Arc<dyn SendLog>,
    ) -> Self {
        Self {
            templates,
            dispatcher,
            send_log,
        }
    }

    pub fn send_log(&self) -> &Arc<dyn SendLog> {
        &self.send_log
    }

    /// Notify `holder` about `warning` affecting `asset` on every channel
    ///
    /// Only send-log storage failures are returned as errors.
    pub async fn notify(
        &self,
        ctx: &RequestContext,
        warning: &Warning,
        asset: &Asset,
        holder: &AssetHolder,
        report: &mut IngestReport,
    ) -> StormResult<()> {
        for channel in Channel::ALL {
            let key = NotificationKey {
                warning_id: warning.id,
                asset_id: asset.id,
                channel,
            };
            let skip = |reason: SkipReason| SkippedNotification {
                key,
                recipient_id: holder.id,
                reason,
            };

            if !holder.wants(channel) {
                report.skipped.push(skip(SkipReason::OptedOut));
                continue;
            }
            let Some(address) = holder.address(channel) else {
                tracing::warn!(
                    trace_id = %ctx.trace_id(),
                    holder_id = holder.id,
                    channel = %channel,
                    "no contact address, skipping"
                );
                report.skipped.push(skip(SkipReason::MissingContact));
                continue;
            };
            if !channel.contact_format().is_valid(address) {
                tracing::warn!(
                    trace_id = %ctx.trace_id(),
                    holder_id = holder.id,
                    channel = %channel,
                    "invalid contact address, skipping"
                );
                report.skipped.push(skip(SkipReason::InvalidContact));
                continue;
            }
            if ctx.storage(self.send_log.contains(&key)).await? {
                report.skipped.push(skip(SkipReason::AlreadyNotified));
                continue;
            }
            let Some(template) = self.templates.select(
                asset.asset_type_id,
                &warning.warning_type,
                &warning.severity,
                channel,
            ) else {
                tracing::warn!(
                    trace_id = %ctx.trace_id(),
                    asset_type_id = asset.asset_type_id,
                    warning_type = %warning.warning_type,
                    severity = %warning.severity,
                    channel = %channel,
                    "no template, skipping"
                );
                report.skipped.push(skip(SkipReason::NoTemplate));
                continue;
            };

            let rendered = match self.templates.render(template, warning, asset, holder) {
                Ok(rendered) => rendered,
                Err(e) => {
                    let err = StormError::Internal(format!(
                        "template '{}' failed to render: {}",
                        template.id, e
                    ));
                    tracing::warn!(trace_id = %ctx.trace_id(), error = %err, "render failed");
                    report
                        .failures
                        .push(RecipientFailure::new(warning.id, asset.id, &err));
                    continue;
                }
            };

            let mut record = NotificationRecord {
                recipient_id: holder.id,
                channel,
                template_id: rendered.template_id,
                subject: rendered.subject,
                rendered_message: rendered.body,
                warning_id: warning.id,
                asset_id: asset.id,
                status: DeliveryStatus::Pending,
                created_at: Utc::now(),
            };
            if !ctx.storage(self.send_log.claim(&record)).await? {
                report.skipped.push(skip(SkipReason::AlreadyNotified));
                continue;
            }

            let message = OutboundMessage {
                channel,
                address: address.to_string(),
                subject: record.subject.clone(),
                body: record.rendered_message.clone(),
            };
            record.status = match self.dispatcher.send(&message).await {
                Ok(()) => DeliveryStatus::Sent,
                Err(e) => {
                    tracing::warn!(
                        trace_id = %ctx.trace_id(),
                        holder_id = holder.id,
                        channel = %channel,
                        error = %e,
                        "dispatch failed, not retrying"
                    );
                    DeliveryStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            // the key stays claimed even when the outcome cannot be stored
            if let Err(e) = self.send_log.complete(&record).await {
                let err = ctx.storage_error(e);
                report
                    .failures
                    .push(RecipientFailure::new(warning.id, asset.id, &err));
            }
            report.records.push(record);
        }
        Ok(())
    }
}
