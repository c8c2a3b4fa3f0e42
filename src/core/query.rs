//! List request and paginated response types

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// Body of a list request
///
/// # Example
/// ```json
/// {
///   "filters": {"asset_type_id": [1, 2], "installed_on": {"min": "2020-01-01"}},
///   "search": {"name": "pump"},
///   "null_checks": {"decommissioned_on": true},
///   "order_list": ["name", "asc"],
///   "limit": 50,
///   "last_row_id": 1042
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct ListRequest {
    /// Column → operand. A scalar is an equality, a list is a membership
    /// test and `{"min": .., "max": ..}` is an inclusive range.
    pub filters: Option<IndexMap<String, Value>>,

    /// Column → substring to look for
    pub search: Option<IndexMap<String, String>>,

    /// Column → `true` for "is null", `false` for "is not null"
    pub null_checks: Option<IndexMap<String, bool>>,

    /// Flattened `[column, direction, column, direction, ...]`
    pub order_list: Vec<String>,

    #[validate(range(min = 1))]
    pub limit: Option<u64>,

    pub offset: Option<u64>,

    /// Row id of the last row of the previous page
    pub last_row_id: Option<i64>,
}

impl ListRequest {
    /// Whether the request asks for a specific page
    pub fn paginates(&self) -> bool {
        self.limit.is_some() || self.offset.is_some() || self.last_row_id.is_some()
    }
}

/// Paginated response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    /// The rows of this page
    pub data: Vec<T>,

    /// Pagination metadata
    pub page: PageMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    pub limit: u64,

    /// Offset applied; always 0 when a cursor was used
    pub offset: u64,

    /// `last_row_id` to send for the next page
    pub next_cursor: Option<i64>,

    /// A full page came back, so there may be more
    pub has_more: bool,
}

impl PageMeta {
    /// Metadata for a page of `returned` rows whose last row id is `last_id`
    pub fn new(limit: u64, offset: u64, returned: usize, last_id: Option<i64>) -> Self {
        let has_more = returned as u64 == limit && returned > 0;
        Self {
            limit,
            offset,
            next_cursor: if has_more { last_id } else { None },
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_request_defaults() {
        let req: ListRequest = serde_json::from_value(json!({})).unwrap();
        assert!(req.filters.is_none());
        assert!(req.order_list.is_empty());
        assert!(!req.paginates());
    }

    #[test]
    fn test_filters_keep_request_order() {
        let req: ListRequest =
            serde_json::from_value(json!({"filters": {"b": 1, "a": 2, "c": 3}})).unwrap();
        let keys: Vec<_> = req.filters.unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_zero_limit_fails_validation() {
        let req = ListRequest {
            limit: Some(0),
            ..Default::default()
        };
        assert!(req.validate().is_err());
        let ok = ListRequest {
            limit: Some(10),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_page_meta() {
        let full = PageMeta::new(10, 0, 10, Some(42));
        assert!(full.has_more);
        assert_eq!(full.next_cursor, Some(42));

        let short = PageMeta::new(10, 0, 3, Some(42));
        assert!(!short.has_more);
        assert_eq!(short.next_cursor, None);
    }
}
