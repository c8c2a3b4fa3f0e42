//! Warnings, assets, holders and notification records

use crate::core::error::{IntegrityError, StormError, StormResult, ValidationError};
use crate::core::field::ContactFormat;
use crate::core::geometry::{self, Geometry};
use crate::core::store::Row;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Whitelist alias of the warnings table
pub const WARNINGS: &str = "warnings";
/// Whitelist alias of the assets table
pub const ASSETS: &str = "assets";
/// Whitelist alias of the asset holders table
pub const ASSET_HOLDERS: &str = "asset_holders";

/// A weather warning as delivered by the crawler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Warning {
    /// Issuer's warning id; stable across re-issues
    pub id: i64,

    #[validate(length(min = 1))]
    pub warning_type: String,

    #[validate(length(min = 1))]
    pub severity: String,

    pub headline: String,

    #[serde(default)]
    pub description: Option<String>,

    pub valid_from: DateTime<Utc>,

    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,

    pub area: Geometry,
}

impl Warning {
    /// Field and geometry checks run before anything is stored
    pub fn check(&self) -> StormResult<()> {
        self.validate()?;
        if let Some(valid_to) = self.valid_to
            && valid_to < self.valid_from
        {
            return Err(ValidationError::FieldError {
                field: "valid_to".to_string(),
                message: "must not be before valid_from".to_string(),
            }
            .into());
        }
        self.area.validate().map_err(|e| ValidationError::FieldError {
            field: "area".to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Same content; geometries compared as shapes, not as coordinate lists
    pub fn is_unchanged_from(&self, stored: &Warning) -> bool {
        self.id == stored.id
            && self.warning_type == stored.warning_type
            && self.severity == stored.severity
            && self.headline == stored.headline
            && self.description == stored.description
            && self.valid_from == stored.valid_from
            && self.valid_to == stored.valid_to
            && geometry::equals(&self.area, &stored.area)
    }

    /// Validity ended before `now`; upcoming warnings are not expired
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_to.is_some_and(|to| to < now)
    }
}

/// Something a holder owns at a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub holder_id: i64,
    pub asset_type_id: i64,
    pub name: String,
    #[serde(default)]
    pub installed_on: Option<NaiveDate>,
    pub location: Geometry,
}

/// Owner of assets and recipient of notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetHolder {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default)]
    pub notify_sms: bool,
}

impl AssetHolder {
    pub fn wants(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.notify_email,
            Channel::Sms => self.notify_sms,
        }
    }

    pub fn address(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Sms => self.phone.as_deref(),
        }
        .map(str::trim)
        .filter(|s| !s.is_empty())
    }
}

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Email, Channel::Sms];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }

    pub fn contact_format(&self) -> ContactFormat {
        match self {
            Channel::Email => ContactFormat::Email,
            Channel::Sms => ContactFormat::Phone,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency key of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationKey {
    pub warning_id: i64,
    pub asset_id: i64,
    pub channel: Channel,
}

/// Outcome of the single delivery attempt
///
/// A record is claimed as `Pending` before dispatch. One left pending
/// belongs to a run that stopped mid-send and is not sent again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed { reason: String },
}

/// A built notification; claimed once per key, then completed with the
/// delivery outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub recipient_id: i64,
    pub channel: Channel,
    pub template_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub rendered_message: String,
    pub warning_id: i64,
    pub asset_id: i64,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn key(&self) -> NotificationKey {
        NotificationKey {
            warning_id: self.warning_id,
            asset_id: self.asset_id,
            channel: self.channel,
        }
    }
}

/// Why a notification was not built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    OptedOut,
    MissingContact,
    InvalidContact,
    AlreadyNotified,
    NoTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedNotification {
    pub key: NotificationKey,
    pub recipient_id: i64,
    pub reason: SkipReason,
}

/// A recipient that could not be processed; the rest of the batch went on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientFailure {
    pub warning_id: i64,
    pub asset_id: i64,
    pub code: &'static str,
    pub message: String,
}

impl RecipientFailure {
    pub fn new(warning_id: i64, asset_id: i64, err: &StormError) -> Self {
        Self {
            warning_id,
            asset_id,
            code: err.error_code(),
            message: err.to_string(),
        }
    }
}

/// Summary of one ingestion or re-evaluation run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// At least one row was written
    pub changed: bool,
    pub stored: usize,
    pub unchanged: usize,
    pub records: Vec<NotificationRecord>,
    pub skipped: Vec<SkippedNotification>,
    pub failures: Vec<RecipientFailure>,
}

/// Row → model
pub fn from_row<T: DeserializeOwned>(table: &str, row: &Row) -> Result<T, IntegrityError> {
    serde_json::from_value(serde_json::Value::Object(row.clone())).map_err(|e| {
        IntegrityError::CorruptRow {
            table: table.to_string(),
            message: e.to_string(),
        }
    })
}

/// Model → row
pub fn to_row<T: Serialize>(model: &T) -> StormResult<Row> {
    match serde_json::to_value(model)? {
        serde_json::Value::Object(row) => Ok(row),
        other => Err(StormError::Internal(format!(
            "model serialized to {} instead of an object",
            other
        ))),
    }
}
