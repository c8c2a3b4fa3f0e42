//! Typed error handling for stormwatch
//!
//! Every failure a caller can observe is one of the categories below, so
//! HTTP handlers and the ingestion job can react to the category instead of
//! parsing messages.
//!
//! # Error Categories
//!
//! - [`QueryError`]: client errors in filters, ordering and pagination (400)
//! - [`IntegrityError`]: the store returned something that should be impossible
//! - [`ValidationError`]: malformed request bodies and payload fields
//! - [`ConfigError`]: configuration parsing and validation
//! - [`StorageError`]: failures of the storage collaborator, classified by
//!   the [`OperationKind`](crate::core::context::OperationKind) of the call
//!
//! # Example
//!
//! ```rust,ignore
//! match tool.format_order_list("id", &raw, "assets") {
//!     Ok(spec) => run(spec),
//!     Err(StormError::Query(QueryError::UnknownColumn { column, .. })) => {
//!         println!("cannot sort by {}", column);
//!     }
//!     Err(e) => eprintln!("other error: {}", e),
//! }
//! ```

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// The main error type for stormwatch
#[derive(Debug)]
pub enum StormError {
    /// Filter, order and pagination errors caused by the request
    Query(QueryError),

    /// Inconsistent data detected in the store
    Integrity(IntegrityError),

    /// Request body validation errors
    Validation(ValidationError),

    /// Configuration errors
    Config(ConfigError),

    /// Storage collaborator errors
    Storage(StorageError),

    /// Internal errors (should not happen in normal operation)
    Internal(String),
}

impl fmt::Display for StormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StormError::Query(e) => write!(f, "{}", e),
            StormError::Integrity(e) => write!(f, "{}", e),
            StormError::Validation(e) => write!(f, "{}", e),
            StormError::Config(e) => write!(f, "{}", e),
            StormError::Storage(e) => write!(f, "{}", e),
            StormError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for StormError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StormError::Query(e) => Some(e),
            StormError::Integrity(e) => Some(e),
            StormError::Validation(e) => Some(e),
            StormError::Config(e) => Some(e),
            StormError::Storage(e) => Some(e),
            StormError::Internal(_) => None,
        }
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StormError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            StormError::Query(e) => e.status_code(),
            StormError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StormError::Validation(_) => StatusCode::BAD_REQUEST,
            StormError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StormError::Storage(e) => e.status_code(),
            StormError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            StormError::Query(e) => e.error_code(),
            StormError::Integrity(e) => e.error_code(),
            StormError::Validation(_) => "VALIDATION_ERROR",
            StormError::Config(_) => "CONFIG_ERROR",
            StormError::Storage(e) => e.error_code(),
            StormError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for errors the caller can fix by changing the request
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// True for failures of a storage collaborator
    pub fn is_storage(&self) -> bool {
        matches!(self, StormError::Storage(_))
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            StormError::Query(QueryError::InvalidDate { column, value }) => {
                Some(serde_json::json!({ "column": column, "value": value }))
            }
            StormError::Query(QueryError::DeepPageWithoutCursor {
                offset,
                limit,
                max_page,
            }) => Some(serde_json::json!({
                "offset": offset,
                "limit": limit,
                "max_page": max_page
            })),
            StormError::Query(QueryError::CursorNotFound { row_id, .. }) => {
                Some(serde_json::json!({ "last_row_id": row_id }))
            }
            StormError::Validation(ValidationError::FieldErrors(errors)) => {
                Some(serde_json::json!({ "fields": errors }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for StormError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

// =============================================================================
// Query Errors
// =============================================================================

/// Client errors raised while building filters, orders and pages
///
/// All of these are raised before any storage call is made.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Table alias has no whitelist entry
    UnknownTable { table: String },

    /// Column is not whitelisted for the table (or not usable for this purpose)
    UnknownColumn { table: String, column: String },

    /// Filter value has a shape that maps to no operator
    InvalidFilterShape { column: String, message: String },

    /// Operand count or type does not fit the operator or column
    InvalidOperand { column: String, message: String },

    /// Literal could not be parsed as a date/timestamp for a date-typed column
    InvalidDate { column: String, value: String },

    /// Raw order list is malformed
    InvalidOrder { message: String },

    /// Same column listed twice in one order list
    DuplicateOrderColumn { column: String },

    /// limit/offset/cursor supplied without an order list
    PaginationWithoutOrder,

    /// offset/limit would go past the maximum page and no cursor was given
    DeepPageWithoutCursor {
        offset: u64,
        limit: u64,
        max_page: u64,
    },

    /// limit of zero rows
    InvalidLimit { limit: u64 },

    /// The cursor row id does not exist (stale cursor)
    CursorNotFound { table: String, row_id: i64 },

    /// Aggregation function is not one of the supported ones
    UnsupportedAggregate { function: String },

    /// Addressed row does not exist
    RowNotFound { table: String, row_id: i64 },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::UnknownTable { table } => write!(f, "Unknown table '{}'", table),
            QueryError::UnknownColumn { table, column } => {
                write!(f, "Column '{}' is not available on '{}'", column, table)
            }
            QueryError::InvalidFilterShape { column, message } => {
                write!(f, "Invalid filter for '{}': {}", column, message)
            }
            QueryError::InvalidOperand { column, message } => {
                write!(f, "Invalid operand for '{}': {}", column, message)
            }
            QueryError::InvalidDate { column, value } => {
                write!(f, "Invalid date '{}' for column '{}'", value, column)
            }
            QueryError::InvalidOrder { message } => write!(f, "Invalid order list: {}", message),
            QueryError::DuplicateOrderColumn { column } => {
                write!(f, "Column '{}' appears more than once in the order list", column)
            }
            QueryError::PaginationWithoutOrder => {
                write!(f, "Pagination requires an explicit order list")
            }
            QueryError::DeepPageWithoutCursor {
                offset,
                limit,
                max_page,
            } => write!(
                f,
                "offset {} with limit {} reaches past row {}; use last_row_id instead",
                offset, limit, max_page
            ),
            QueryError::InvalidLimit { limit } => write!(f, "Invalid limit: {}", limit),
            QueryError::CursorNotFound { table, row_id } => {
                write!(f, "Last row id {} does not exist in '{}'", row_id, table)
            }
            QueryError::UnsupportedAggregate { function } => {
                write!(f, "Unsupported aggregation function '{}'", function)
            }
            QueryError::RowNotFound { table, row_id } => {
                write!(f, "Row {} not found in '{}'", row_id, table)
            }
        }
    }
}

impl std::error::Error for QueryError {}

impl QueryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            QueryError::CursorNotFound { .. } | QueryError::RowNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            QueryError::UnknownTable { .. } => "UNKNOWN_TABLE",
            QueryError::UnknownColumn { .. } => "UNKNOWN_COLUMN",
            QueryError::InvalidFilterShape { .. } => "INVALID_FILTER_SHAPE",
            QueryError::InvalidOperand { .. } => "INVALID_OPERAND",
            QueryError::InvalidDate { .. } => "INVALID_DATE",
            QueryError::InvalidOrder { .. } => "INVALID_ORDER",
            QueryError::DuplicateOrderColumn { .. } => "DUPLICATE_ORDER_COLUMN",
            QueryError::PaginationWithoutOrder => "PAGINATION_WITHOUT_ORDER",
            QueryError::DeepPageWithoutCursor { .. } => "DEEP_PAGE_WITHOUT_CURSOR",
            QueryError::InvalidLimit { .. } => "INVALID_LIMIT",
            QueryError::CursorNotFound { .. } => "CURSOR_NOT_FOUND",
            QueryError::UnsupportedAggregate { .. } => "UNSUPPORTED_AGGREGATE",
            QueryError::RowNotFound { .. } => "ROW_NOT_FOUND",
        }
    }
}

impl From<QueryError> for StormError {
    fn from(err: QueryError) -> Self {
        StormError::Query(err)
    }
}

// =============================================================================
// Integrity Errors
// =============================================================================

/// Data-integrity violations; retrying will not help
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityError {
    /// Cursor anchor lookup matched more than one row
    AmbiguousAnchor {
        table: String,
        row_id: i64,
        count: usize,
    },

    /// A referenced row (e.g. an asset's holder) is missing
    MissingReference {
        table: String,
        column: String,
        value: String,
    },

    /// A referenced row matched more than once
    AmbiguousReference {
        table: String,
        column: String,
        value: String,
        count: usize,
    },

    /// A stored row could not be decoded into its model
    CorruptRow { table: String, message: String },
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityError::AmbiguousAnchor {
                table,
                row_id,
                count,
            } => write!(
                f,
                "Row id {} matches {} rows in '{}'",
                row_id, count, table
            ),
            IntegrityError::MissingReference {
                table,
                column,
                value,
            } => write!(f, "No row in '{}' with {} = {}", table, column, value),
            IntegrityError::AmbiguousReference {
                table,
                column,
                value,
                count,
            } => write!(
                f,
                "{} rows in '{}' with {} = {}",
                count, table, column, value
            ),
            IntegrityError::CorruptRow { table, message } => {
                write!(f, "Corrupt row in '{}': {}", table, message)
            }
        }
    }
}

impl std::error::Error for IntegrityError {}

impl IntegrityError {
    pub fn error_code(&self) -> &'static str {
        match self {
            IntegrityError::AmbiguousAnchor { .. } => "AMBIGUOUS_ANCHOR",
            IntegrityError::MissingReference { .. } => "MISSING_REFERENCE",
            IntegrityError::AmbiguousReference { .. } => "AMBIGUOUS_REFERENCE",
            IntegrityError::CorruptRow { .. } => "CORRUPT_ROW",
        }
    }
}

impl From<IntegrityError> for StormError {
    fn from(err: IntegrityError) -> Self {
        StormError::Integrity(err)
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Errors related to request body validation
#[derive(Debug)]
pub enum ValidationError {
    /// Single field validation error
    FieldError { field: String, message: String },

    /// Multiple field validation errors
    FieldErrors(Vec<FieldValidationError>),

    /// Invalid JSON format
    InvalidJson { message: String },
}

/// A single field validation error
#[derive(Debug, Clone, Serialize)]
pub struct FieldValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::FieldError { field, message } => {
                write!(f, "Validation error for field '{}': {}", field, message)
            }
            ValidationError::FieldErrors(errors) => {
                let msgs: Vec<String> = errors
                    .iter()
                    .map(|e| format!("{}: {}", e.field, e.message))
                    .collect();
                write!(f, "Validation errors: {}", msgs.join(", "))
            }
            ValidationError::InvalidJson { message } => write!(f, "Invalid JSON: {}", message),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for StormError {
    fn from(err: ValidationError) -> Self {
        StormError::Validation(err)
    }
}

impl From<validator::ValidationErrors> for StormError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldValidationError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| FieldValidationError {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        StormError::Validation(ValidationError::FieldErrors(fields))
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file
    ParseError {
        file: Option<String>,
        message: String,
    },

    /// Invalid value in configuration
    InvalidValue {
        field: String,
        value: String,
        message: String,
    },

    /// IO error while reading configuration
    IoError { message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError { file, message } => {
                if let Some(file) = file {
                    write!(f, "Failed to parse config file '{}': {}", file, message)
                } else {
                    write!(f, "Failed to parse config: {}", message)
                }
            }
            ConfigError::InvalidValue {
                field,
                value,
                message,
            } => write!(
                f,
                "Invalid value '{}' for field '{}': {}",
                value, field, message
            ),
            ConfigError::IoError { message } => write!(f, "IO error: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for StormError {
    fn from(err: ConfigError) -> Self {
        StormError::Config(err)
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Failures of the storage collaborator
///
/// The variant is picked from the operation kind carried by the request
/// context, not from the name of the failing method.
#[derive(Debug)]
pub enum StorageError {
    /// A read (select, lookup, aggregate) failed
    ReadFailed { message: String },

    /// An insert/update/upsert failed
    WriteFailed { message: String },

    /// Backend not reachable
    Unavailable { backend: String },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed { message } => write!(f, "Read failed: {}", message),
            StorageError::WriteFailed { message } => write!(f, "Write failed: {}", message),
            StorageError::Unavailable { backend } => {
                write!(f, "Storage backend '{}' is unavailable", backend)
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl StorageError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StorageError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::ReadFailed { .. } => "STORAGE_READ_FAILED",
            StorageError::WriteFailed { .. } => "STORAGE_WRITE_FAILED",
            StorageError::Unavailable { .. } => "STORAGE_UNAVAILABLE",
        }
    }
}

impl From<StorageError> for StormError {
    fn from(err: StorageError) -> Self {
        StormError::Storage(err)
    }
}

// =============================================================================
// Conversions from external errors
// =============================================================================

impl From<serde_json::Error> for StormError {
    fn from(err: serde_json::Error) -> Self {
        StormError::Validation(ValidationError::InvalidJson {
            message: err.to_string(),
        })
    }
}

/// Bodies the `Json` extractor refused: bad syntax, wrong shape or content type
impl From<JsonRejection> for StormError {
    fn from(rejection: JsonRejection) -> Self {
        StormError::Validation(ValidationError::InvalidJson {
            message: rejection.body_text(),
        })
    }
}

impl From<std::io::Error> for StormError {
    fn from(err: std::io::Error) -> Self {
        StormError::Config(ConfigError::IoError {
            message: err.to_string(),
        })
    }
}

impl From<serde_yaml::Error> for StormError {
    fn from(err: serde_yaml::Error) -> Self {
        StormError::Config(ConfigError::ParseError {
            file: None,
            message: err.to_string(),
        })
    }
}

// =============================================================================
// Result type alias
// =============================================================================

/// A specialized Result type for stormwatch operations
pub type StormResult<T> = Result<T, StormError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_is_client_error() {
        let err: StormError = QueryError::PaginationWithoutOrder.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.is_client_error());
        assert_eq!(err.error_code(), "PAGINATION_WITHOUT_ORDER");
    }

    #[test]
    fn test_stale_cursor_and_ambiguous_anchor_are_distinguishable() {
        let stale: StormError = QueryError::CursorNotFound {
            table: "assets".to_string(),
            row_id: 7,
        }
        .into();
        let ambiguous: StormError = IntegrityError::AmbiguousAnchor {
            table: "assets".to_string(),
            row_id: 7,
            count: 2,
        }
        .into();

        assert!(stale.is_client_error());
        assert!(!ambiguous.is_client_error());
        assert_ne!(stale.error_code(), ambiguous.error_code());
    }

    #[test]
    fn test_deep_page_response_details() {
        let err = StormError::Query(QueryError::DeepPageWithoutCursor {
            offset: 5000,
            limit: 10,
            max_page: 100,
        });
        let response = err.to_response();
        assert_eq!(response.code, "DEEP_PAGE_WITHOUT_CURSOR");
        let details = response.details.unwrap();
        assert_eq!(details["offset"], 5000);
        assert!(response.message.contains("last_row_id"));
    }

    #[test]
    fn test_invalid_date_message_names_column() {
        let err = QueryError::InvalidDate {
            column: "valid_from".to_string(),
            value: "2024-13-40".to_string(),
        };
        assert!(err.to_string().contains("valid_from"));
        assert!(err.to_string().contains("2024-13-40"));
    }

    #[test]
    fn test_storage_unavailable_is_503() {
        let err: StormError = StorageError::Unavailable {
            backend: "postgres".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: StormError = json_err.into();
        assert!(matches!(
            err,
            StormError::Validation(ValidationError::InvalidJson { .. })
        ));
    }
}
