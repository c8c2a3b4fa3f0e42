//! Order specifications
//!
//! An [`OrderSpec`] is a validated, whitelisted list of `(column, direction)`
//! pairs whose last column is unique, so every row has a total position and
//! a keyset cursor can resume after any of them.

use crate::core::error::QueryError;
use crate::core::whitelist::TableSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Case-insensitive `asc` / `desc`
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw.to_ascii_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            other => Err(QueryError::InvalidOrder {
                message: format!("unknown direction '{}'", other),
            }),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    /// Strict comparison operator for rows after the anchor
    pub fn after_operator(&self) -> &'static str {
        match self {
            Direction::Asc => ">",
            Direction::Desc => "<",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One ordered column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub column: String,
    pub direction: Direction,
}

/// Validated order for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSpec {
    items: Vec<OrderItem>,
}

impl OrderSpec {
    /// Build from a flattened `[col, dir, col, dir, ...]` list
    ///
    /// Every column must be sortable in `schema`. A repeated column is
    /// rejected, as is a unique column anywhere but last (nothing after it
    /// could ever break a tie). When the list does not end in a unique
    /// column, `tie_break ASC` is appended; `tie_break` must itself be unique.
    pub fn from_flat(
        schema: &TableSchema,
        tie_break: &str,
        raw: &[String],
    ) -> Result<Self, QueryError> {
        if raw.len() % 2 != 0 {
            return Err(QueryError::InvalidOrder {
                message: "order list must alternate column and direction".to_string(),
            });
        }

        schema.sortable(tie_break)?;
        if !schema.is_unique(tie_break) {
            return Err(QueryError::InvalidOrder {
                message: format!("tie-break column '{}' is not unique", tie_break),
            });
        }

        let mut items = Vec::with_capacity(raw.len() / 2 + 1);
        let mut seen = HashSet::new();
        for pair in raw.chunks_exact(2) {
            let column = pair[0].as_str();
            schema.sortable(column)?;
            if !seen.insert(column) {
                return Err(QueryError::DuplicateOrderColumn {
                    column: column.to_string(),
                });
            }
            items.push(OrderItem {
                column: column.to_string(),
                direction: Direction::parse(&pair[1])?,
            });
        }

        let last_unique = items.iter().position(|item| schema.is_unique(&item.column));
        match last_unique {
            Some(idx) if idx + 1 < items.len() => {
                return Err(QueryError::InvalidOrder {
                    message: format!(
                        "unique column '{}' must be the last order column",
                        items[idx].column
                    ),
                });
            }
            Some(_) => {}
            // tie_break is unique, so it cannot already be in the list here
            None => items.push(OrderItem {
                column: tie_break.to_string(),
                direction: Direction::Asc,
            }),
        }

        Ok(Self { items })
    }

    /// Order by the tie-break column alone
    pub fn tie_break_only(schema: &TableSchema) -> Result<Self, QueryError> {
        Self::from_flat(schema, &schema.default_order, &[])
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.column.as_str())
    }

    pub fn last(&self) -> &OrderItem {
        // from_flat always leaves at least the tie-break
        &self.items[self.items.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::whitelist::{ColumnDef, ColumnKind};

    fn schema() -> TableSchema {
        TableSchema::new("assets", "assets")
            .column("id", ColumnDef::new(ColumnKind::Integer).unique())
            .column("code", ColumnDef::new(ColumnKind::Text).unique())
            .column("name", ColumnDef::new(ColumnKind::Text))
            .column("holder_id", ColumnDef::new(ColumnKind::Integer))
            .column("location", ColumnDef::new(ColumnKind::Geometry))
    }

    fn flat(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_appends_tie_break_when_last_not_unique() {
        let spec = OrderSpec::from_flat(&schema(), "id", &flat(&["name", "DESC"])).unwrap();
        assert_eq!(
            spec.items(),
            &[
                OrderItem {
                    column: "name".into(),
                    direction: Direction::Desc
                },
                OrderItem {
                    column: "id".into(),
                    direction: Direction::Asc
                },
            ]
        );
    }

    #[test]
    fn test_keeps_list_ending_in_unique_column() {
        let spec =
            OrderSpec::from_flat(&schema(), "id", &flat(&["name", "asc", "code", "desc"])).unwrap();
        assert_eq!(spec.items().len(), 2);
        assert_eq!(spec.last().column, "code");
        assert_eq!(spec.last().direction, Direction::Desc);
    }

    #[test]
    fn test_empty_list_is_tie_break_only() {
        let spec = OrderSpec::tie_break_only(&schema()).unwrap();
        assert_eq!(spec.columns().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn test_every_accepted_spec_ends_unique() {
        let s = schema();
        let lists = [
            flat(&[]),
            flat(&["name", "asc"]),
            flat(&["holder_id", "desc", "name", "asc"]),
            flat(&["holder_id", "asc", "id", "desc"]),
            flat(&["code", "asc"]),
        ];
        for raw in &lists {
            let spec = OrderSpec::from_flat(&s, "id", raw).unwrap();
            assert!(s.is_unique(&spec.last().column), "{:?}", raw);
        }
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = OrderSpec::from_flat(&schema(), "id", &flat(&["name", "asc", "name", "desc"]))
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::DuplicateOrderColumn {
                column: "name".into()
            }
        );
    }

    #[test]
    fn test_rejects_unique_column_before_end() {
        let err = OrderSpec::from_flat(&schema(), "id", &flat(&["id", "asc", "name", "asc"]))
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidOrder { .. }));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let s = schema();
        assert!(OrderSpec::from_flat(&s, "id", &flat(&["name"])).is_err());
        assert!(OrderSpec::from_flat(&s, "id", &flat(&["name", "up"])).is_err());
        assert!(matches!(
            OrderSpec::from_flat(&s, "id", &flat(&["nope", "asc"])),
            Err(QueryError::UnknownColumn { .. })
        ));
        assert!(OrderSpec::from_flat(&s, "id", &flat(&["location", "asc"])).is_err());
        assert!(OrderSpec::from_flat(&s, "name", &flat(&[])).is_err());
    }
}
