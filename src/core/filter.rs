//! Typed filter predicates
//!
//! A [`FilterItem`] is one predicate on one column. The named constructors
//! are the only way to build one: they check operand arity and family and
//! coerce date literals, so an item that exists is always well-formed.

use crate::core::error::QueryError;
use crate::core::field::{FieldValue, parse_date, parse_timestamp};
use crate::core::geometry::{self, Geometry};

/// Coercion applied to string operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Calendar date, `YYYY-MM-DD`
    Date,
    /// Instant, RFC 3339 or a bare date at midnight UTC
    Timestamp,
}

impl DataType {
    fn coerce(&self, column: &str, value: FieldValue) -> Result<FieldValue, QueryError> {
        let FieldValue::String(literal) = value else {
            return Ok(value);
        };
        let parsed = match self {
            DataType::Date => parse_date(&literal).map(FieldValue::Date),
            DataType::Timestamp => parse_timestamp(&literal).map(FieldValue::Timestamp),
        };
        parsed.ok_or_else(|| QueryError::InvalidDate {
            column: column.to_string(),
            value: literal,
        })
    }
}

/// Operator and operand of a [`FilterItem`]
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq { value: FieldValue },
    /// Substring match
    Like { pattern: String },
    /// Inclusive bounds, at least one present
    Range {
        min: Option<FieldValue>,
        max: Option<FieldValue>,
    },
    In { values: Vec<FieldValue> },
    IsNull,
    NotNull,
    Intersects { geometry: Geometry },
}

impl Predicate {
    pub fn operator(&self) -> &'static str {
        match self {
            Predicate::Eq { .. } => "eq",
            Predicate::Like { .. } => "like",
            Predicate::Range { .. } => "range",
            Predicate::In { .. } => "in",
            Predicate::IsNull => "isNull",
            Predicate::NotNull => "notNull",
            Predicate::Intersects { .. } => "intersects",
        }
    }
}

/// One predicate on one column
#[derive(Debug, Clone, PartialEq)]
pub struct FilterItem {
    column: String,
    data_type: Option<DataType>,
    predicate: Predicate,
}

impl FilterItem {
    /// Equality with one scalar
    pub fn eq(
        column: impl Into<String>,
        value: FieldValue,
        data_type: Option<DataType>,
    ) -> Result<Self, QueryError> {
        let column = column.into();
        let value = scalar(&column, value, data_type)?;
        Ok(Self::build(column, data_type, Predicate::Eq { value }))
    }

    /// Substring match; the pattern is taken literally
    pub fn like(column: impl Into<String>, pattern: FieldValue) -> Result<Self, QueryError> {
        let column = column.into();
        let FieldValue::String(pattern) = pattern else {
            return Err(operand(&column, "like expects a single string"));
        };
        Ok(Self::build(column, None, Predicate::Like { pattern }))
    }

    /// Inclusive range; both bounds absent is rejected
    pub fn range(
        column: impl Into<String>,
        min: Option<FieldValue>,
        max: Option<FieldValue>,
        data_type: Option<DataType>,
    ) -> Result<Self, QueryError> {
        let column = column.into();
        let min = min
            .map(|v| scalar(&column, v, data_type))
            .transpose()?;
        let max = max
            .map(|v| scalar(&column, v, data_type))
            .transpose()?;

        match (&min, &max) {
            (None, None) => return Err(operand(&column, "range needs min, max or both")),
            (Some(lo), Some(hi)) if lo.family() != hi.family() => {
                return Err(operand(&column, "range bounds must be of the same type"));
            }
            (Some(FieldValue::Boolean(_)), _) | (_, Some(FieldValue::Boolean(_))) => {
                return Err(operand(&column, "range bounds cannot be booleans"));
            }
            _ => {}
        }
        Ok(Self::build(column, data_type, Predicate::Range { min, max }))
    }

    /// Membership in a non-empty list of one family
    pub fn in_list(
        column: impl Into<String>,
        values: Vec<FieldValue>,
        data_type: Option<DataType>,
    ) -> Result<Self, QueryError> {
        let column = column.into();
        if values.is_empty() {
            return Err(operand(&column, "in expects a non-empty list"));
        }
        let values = values
            .into_iter()
            .map(|v| scalar(&column, v, data_type))
            .collect::<Result<Vec<_>, _>>()?;

        let family = values[0].family();
        if values.iter().any(|v| v.family() != family) {
            return Err(operand(&column, "in list values must all be of the same type"));
        }
        Ok(Self::build(column, data_type, Predicate::In { values }))
    }

    pub fn is_null(column: impl Into<String>) -> Result<Self, QueryError> {
        Ok(Self::build(column.into(), None, Predicate::IsNull))
    }

    pub fn not_null(column: impl Into<String>) -> Result<Self, QueryError> {
        Ok(Self::build(column.into(), None, Predicate::NotNull))
    }

    /// Spatial intersection with a valid geometry
    pub fn intersects(column: impl Into<String>, geometry: Geometry) -> Result<Self, QueryError> {
        let column = column.into();
        geometry
            .validate()
            .map_err(|e| operand(&column, &e.to_string()))?;
        Ok(Self::build(column, None, Predicate::Intersects { geometry }))
    }

    fn build(column: String, data_type: Option<DataType>, predicate: Predicate) -> Self {
        Self {
            column,
            data_type,
            predicate,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Evaluate a scalar predicate against a column value
    ///
    /// Comparisons follow SQL: anything against null is false, and values of
    /// different families never match.
    pub fn matches(&self, value: &FieldValue) -> bool {
        use std::cmp::Ordering;

        match &self.predicate {
            Predicate::Eq { value: expected } => value.sql_eq(expected),
            Predicate::Like { pattern } => value
                .as_string()
                .is_some_and(|s| s.contains(pattern.as_str())),
            Predicate::Range { min, max } => {
                let above = min.as_ref().is_none_or(|lo| {
                    matches!(value.compare(lo), Some(Ordering::Greater | Ordering::Equal))
                });
                let below = max.as_ref().is_none_or(|hi| {
                    matches!(value.compare(hi), Some(Ordering::Less | Ordering::Equal))
                });
                above && below
            }
            Predicate::In { values } => values.iter().any(|v| value.sql_eq(v)),
            Predicate::IsNull => value.is_null(),
            Predicate::NotNull => !value.is_null(),
            Predicate::Intersects { .. } => false,
        }
    }

    /// Evaluate against a geometry column value
    pub fn matches_geometry(&self, value: Option<&Geometry>) -> bool {
        match (&self.predicate, value) {
            (Predicate::Intersects { geometry }, Some(g)) => geometry::intersects(geometry, g),
            (Predicate::IsNull, v) => v.is_none(),
            (Predicate::NotNull, v) => v.is_some(),
            _ => false,
        }
    }
}

fn scalar(
    column: &str,
    value: FieldValue,
    data_type: Option<DataType>,
) -> Result<FieldValue, QueryError> {
    if value.is_null() {
        return Err(operand(column, "expected a value, got null"));
    }
    match data_type {
        Some(dt) => dt.coerce(column, value),
        None => Ok(value),
    }
}

fn operand(column: &str, message: &str) -> QueryError {
    QueryError::InvalidOperand {
        column: column.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_eq_rejects_null() {
        let err = FilterItem::eq("name", FieldValue::Null, None).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperand { .. }));
    }

    #[test]
    fn test_like_requires_string() {
        assert!(FilterItem::like("name", FieldValue::Integer(3)).is_err());
        let item = FilterItem::like("name", "ump".into()).unwrap();
        assert!(item.matches(&"Pump".into()));
        assert!(!item.matches(&"Valve".into()));
        assert!(!item.matches(&FieldValue::Null));
    }

    #[test]
    fn test_range_on_date_parses_both_bounds() {
        let item = FilterItem::range(
            "valid_from",
            Some("2024-01-01".into()),
            Some("2024-12-31".into()),
            Some(DataType::Date),
        )
        .unwrap();
        let Predicate::Range { min, max } = item.predicate() else {
            panic!("expected range");
        };
        assert_eq!(
            min,
            &Some(FieldValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
        );
        assert_eq!(
            max,
            &Some(FieldValue::Date(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()))
        );
    }

    #[test]
    fn test_range_rejects_malformed_date_at_construction() {
        let err = FilterItem::range(
            "valid_from",
            Some("2024-13-40".into()),
            None,
            Some(DataType::Date),
        )
        .unwrap_err();
        assert_eq!(
            err,
            QueryError::InvalidDate {
                column: "valid_from".into(),
                value: "2024-13-40".into()
            }
        );
    }

    #[test]
    fn test_range_needs_a_bound() {
        assert!(FilterItem::range("n", None, None, None).is_err());
    }

    #[test]
    fn test_range_bounds_same_family() {
        let err = FilterItem::range("n", Some(1i64.into()), Some("z".into()), None);
        assert!(err.is_err());
        assert!(FilterItem::range("n", Some(1i64.into()), Some(2.5.into()), None).is_ok());
    }

    #[test]
    fn test_range_is_inclusive() {
        let item = FilterItem::range("n", Some(1i64.into()), Some(3i64.into()), None).unwrap();
        assert!(item.matches(&1i64.into()));
        assert!(item.matches(&3i64.into()));
        assert!(!item.matches(&4i64.into()));
        assert!(!item.matches(&FieldValue::Null));
    }

    #[test]
    fn test_in_list_rules() {
        assert!(FilterItem::in_list("n", vec![], None).is_err());
        assert!(FilterItem::in_list("n", vec![1i64.into(), "a".into()], None).is_err());
        let item = FilterItem::in_list("n", vec![1i64.into(), 2i64.into()], None).unwrap();
        assert!(item.matches(&2i64.into()));
        assert!(!item.matches(&5i64.into()));
    }

    #[test]
    fn test_null_checks() {
        let is_null = FilterItem::is_null("email").unwrap();
        let not_null = FilterItem::not_null("email").unwrap();
        assert!(is_null.matches(&FieldValue::Null));
        assert!(!not_null.matches(&FieldValue::Null));
        assert!(not_null.matches(&"a@b.co".into()));
    }

    #[test]
    fn test_intersects_rejects_invalid_geometry() {
        let open = Geometry::Polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]]);
        assert!(FilterItem::intersects("area", open).is_err());

        let item = FilterItem::intersects("area", Geometry::Point([0.5, 0.5])).unwrap();
        let square = Geometry::Polygon(vec![vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [0.0, 1.0],
            [0.0, 0.0],
        ]]);
        assert!(item.matches_geometry(Some(&square)));
        assert!(!item.matches_geometry(None));
    }
}
