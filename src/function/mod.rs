//! Table functions: row sources that live outside table storage.
//!
//! Connectors and importers plug in through [`TableFunction`]. A function
//! may receive a pushed-down `ORDER BY` clause and must then produce its rows
//! in that order.

use std::cmp::Ordering;
use std::fmt;

use crate::types::{LogicalType, PenumbraError, Result, Value};

/// Row source called by the `TableFunctionCall` operator.
pub trait TableFunction: Send + Sync {
    /// Function name used in plans.
    fn name(&self) -> &str;

    /// Output columns in row order.
    fn columns(&self) -> Vec<(String, LogicalType)>;

    /// Produces every row, ordered by `order_by` when one is given.
    ///
    /// The clause has the form `" ORDER BY <column> {ASC|DESC}[, ...]"`.
    fn scan(&self, order_by: Option<&str>) -> Result<Vec<Vec<Value>>>;
}

impl fmt::Debug for dyn TableFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableFunction")
            .field("name", &self.name())
            .finish()
    }
}

/// One key of a parsed order-by clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    /// Column position.
    pub column: usize,
    /// Ascending when `true`.
    pub ascending: bool,
}

/// Parses a pushed-down order-by clause against `columns`.
pub fn parse_order_by(clause: &str, columns: &[(String, LogicalType)]) -> Result<Vec<OrderKey>> {
    let body = clause
        .trim()
        .strip_prefix("ORDER BY")
        .ok_or_else(|| PenumbraError::Query(format!("malformed order clause '{clause}'")))?;
    body.split(',')
        .map(|key| {
            let key = key.trim();
            let (name, direction) = key
                .rsplit_once(' ')
                .ok_or_else(|| PenumbraError::Query(format!("order key '{key}' has no direction")))?;
            let ascending = match direction {
                "ASC" => true,
                "DESC" => false,
                other => {
                    return Err(PenumbraError::Query(format!(
                        "unknown sort direction '{other}'"
                    )))
                }
            };
            let column = columns
                .iter()
                .position(|(column, _)| column == name.trim())
                .ok_or_else(|| {
                    PenumbraError::Query(format!("order key {name} is not a column"))
                })?;
            Ok(OrderKey { column, ascending })
        })
        .collect()
}

/// Stable sort of `rows` by `keys`.
pub fn sort_rows(rows: &mut [Vec<Value>], keys: &[OrderKey]) {
    rows.sort_by(|a, b| {
        for key in keys {
            let ordering = a[key.column].total_cmp(&b[key.column]);
            let ordering = if key.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Table function over rows held in memory.
#[derive(Clone, Debug)]
pub struct InMemoryTableFunction {
    name: String,
    columns: Vec<(String, LogicalType)>,
    rows: Vec<Vec<Value>>,
}

impl InMemoryTableFunction {
    /// Creates a function returning `rows`.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<(String, LogicalType)>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }
}

impl TableFunction for InMemoryTableFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> Vec<(String, LogicalType)> {
        self.columns.clone()
    }

    fn scan(&self, order_by: Option<&str>) -> Result<Vec<Vec<Value>>> {
        let mut rows = self.rows.clone();
        if let Some(clause) = order_by {
            let keys = parse_order_by(clause, &self.columns)?;
            sort_rows(&mut rows, &keys);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> InMemoryTableFunction {
        InMemoryTableFunction::new(
            "people",
            vec![
                ("name".into(), LogicalType::String),
                ("age".into(), LogicalType::Int64),
            ],
            vec![
                vec![Value::String("a".into()), Value::Int64(30)],
                vec![Value::String("b".into()), Value::Int64(20)],
                vec![Value::String("c".into()), Value::Int64(40)],
            ],
        )
    }

    #[test]
    fn pushed_clause_orders_rows() {
        let rows = people().scan(Some(" ORDER BY age DESC")).unwrap();
        let ages: Vec<_> = rows.iter().map(|row| row[1].clone()).collect();
        assert_eq!(ages, vec![Value::Int64(40), Value::Int64(30), Value::Int64(20)]);
    }

    #[test]
    fn clause_with_several_keys() {
        let keys = parse_order_by(" ORDER BY age ASC, name DESC", &people().columns()).unwrap();
        assert_eq!(
            keys,
            vec![
                OrderKey { column: 1, ascending: true },
                OrderKey { column: 0, ascending: false },
            ]
        );
        assert!(parse_order_by(" ORDER BY height ASC", &people().columns()).is_err());
        assert!(parse_order_by(" ORDER BY age", &people().columns()).is_err());
    }
}
