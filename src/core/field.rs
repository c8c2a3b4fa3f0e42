//! Scalar field values and their comparison families

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// A scalar value as it appears in a predicate operand or a row column
///
/// Serialization is untagged so values go back out on the wire as plain JSON
/// scalars. There is no `Deserialize`: incoming JSON is converted with
/// [`FieldValue::from_json`] so that a date-looking string is only ever
/// turned into a date when the column says so.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Null,
}

/// Values within one family can be compared with each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueFamily {
    Text,
    Number,
    Boolean,
    Date,
    Timestamp,
}

impl ValueFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueFamily::Text => "text",
            ValueFamily::Number => "number",
            ValueFamily::Boolean => "boolean",
            ValueFamily::Date => "date",
            ValueFamily::Timestamp => "timestamp",
        }
    }
}

impl FieldValue {
    /// Convert a JSON scalar; arrays, objects and null yield `None`
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(FieldValue::String(s.clone())),
            Value::Bool(b) => Some(FieldValue::Boolean(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FieldValue::Integer(i)),
                None => n.as_f64().map(FieldValue::Float),
            },
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Get the value as a string if possible
    pub fn as_string(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer if possible
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Comparison family, `None` for null
    pub fn family(&self) -> Option<ValueFamily> {
        match self {
            FieldValue::String(_) => Some(ValueFamily::Text),
            FieldValue::Integer(_) | FieldValue::Float(_) => Some(ValueFamily::Number),
            FieldValue::Boolean(_) => Some(ValueFamily::Boolean),
            FieldValue::Date(_) => Some(ValueFamily::Date),
            FieldValue::Timestamp(_) => Some(ValueFamily::Timestamp),
            FieldValue::Null => None,
        }
    }

    /// Compare two values of the same family
    ///
    /// Returns `None` across families, when either side is null, or for NaN.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::String(a), FieldValue::String(b)) => Some(a.cmp(b)),
            (FieldValue::Integer(a), FieldValue::Integer(b)) => Some(a.cmp(b)),
            (FieldValue::Integer(a), FieldValue::Float(b)) => (*a as f64).partial_cmp(b),
            (FieldValue::Float(a), FieldValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.partial_cmp(b),
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => Some(a.cmp(b)),
            (FieldValue::Date(a), FieldValue::Date(b)) => Some(a.cmp(b)),
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// SQL-style equality: null never equals anything
    pub fn sql_eq(&self, other: &FieldValue) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Ascending sort position with nulls last, as PostgreSQL orders them
    ///
    /// Values of different families compare equal.
    pub fn cmp_nulls_last(&self, other: &FieldValue) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Render for log lines and error messages
    pub fn to_display(&self) -> String {
        match self {
            FieldValue::String(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Timestamp(t) => t.to_rfc3339(),
            FieldValue::Null => "null".to_string(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

/// Parse a calendar date literal (`YYYY-MM-DD`)
pub fn parse_date(literal: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(literal, "%Y-%m-%d").ok()
}

/// Parse an RFC 3339 timestamp, or a bare date taken as midnight UTC
pub fn parse_timestamp(literal: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(literal) {
        return Some(ts.with_timezone(&Utc));
    }
    parse_date(literal)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Contact address formats checked before a notification is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactFormat {
    Email,
    Phone,
}

impl ContactFormat {
    pub fn is_valid(&self, value: &str) -> bool {
        match self {
            ContactFormat::Email => Self::email_regex().is_match(value),
            ContactFormat::Phone => Self::phone_regex().is_match(value),
        }
    }

    fn email_regex() -> &'static Regex {
        static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
        EMAIL_REGEX.get_or_init(|| {
            Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
                .expect("email regex is valid")
        })
    }

    fn phone_regex() -> &'static Regex {
        static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
        // E.164: 8 to 15 digits
        PHONE_REGEX
            .get_or_init(|| Regex::new(r"^\+?[1-9]\d{7,14}$").expect("phone regex is valid"))
    }
}
