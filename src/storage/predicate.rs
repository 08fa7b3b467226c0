use std::cmp::Ordering;
use std::fmt;

use crate::types::{ColumnId, Value};

/// Comparison operator of a pushed-down column predicate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Evaluates the operator on an ordering; incomparable values never match.
    pub fn matches(self, ordering: Option<Ordering>) -> bool {
        let Some(ordering) = ordering else {
            return false;
        };
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    /// Function name used by bound comparison expressions.
    pub fn function_name(self) -> &'static str {
        match self {
            CompareOp::Eq => "EQUALS",
            CompareOp::Ne => "NOT_EQUALS",
            CompareOp::Lt => "LESS_THAN",
            CompareOp::Le => "LESS_THAN_EQUALS",
            CompareOp::Gt => "GREATER_THAN",
            CompareOp::Ge => "GREATER_THAN_EQUALS",
        }
    }

    /// Resolves a comparison function name.
    pub fn from_function_name(name: &str) -> Option<Self> {
        match name {
            "EQUALS" => Some(CompareOp::Eq),
            "NOT_EQUALS" => Some(CompareOp::Ne),
            "LESS_THAN" => Some(CompareOp::Lt),
            "LESS_THAN_EQUALS" => Some(CompareOp::Le),
            "GREATER_THAN" => Some(CompareOp::Gt),
            "GREATER_THAN_EQUALS" => Some(CompareOp::Ge),
            _ => None,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

/// Single comparison against a constant.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnPredicate {
    /// Comparison operator.
    pub op: CompareOp,
    /// Constant right-hand side.
    pub value: Value,
}

impl ColumnPredicate {
    /// Creates a new predicate.
    pub fn new(op: CompareOp, value: Value) -> Self {
        Self { op, value }
    }

    /// Evaluates the predicate; nulls never match.
    pub fn evaluate(&self, value: &Value) -> bool {
        if value.is_null() || self.value.is_null() {
            return false;
        }
        self.op.matches(value.partial_cmp_value(&self.value))
    }
}

/// Conjunction of predicates over one column of a table.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnPredicateSet {
    /// Column the predicates read.
    pub column_id: ColumnId,
    /// Predicates that must all hold.
    pub predicates: Vec<ColumnPredicate>,
}

impl ColumnPredicateSet {
    /// Creates a predicate set for a column.
    pub fn new(column_id: ColumnId, predicates: Vec<ColumnPredicate>) -> Self {
        Self {
            column_id,
            predicates,
        }
    }

    /// Returns `true` when every predicate accepts `value`.
    pub fn evaluate(&self, value: &Value) -> bool {
        self.predicates.iter().all(|pred| pred.evaluate(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_reject_nulls_and_mismatched_types() {
        let pred = ColumnPredicate::new(CompareOp::Ge, Value::Int64(18));
        assert!(pred.evaluate(&Value::Int64(18)));
        assert!(!pred.evaluate(&Value::Int64(17)));
        assert!(!pred.evaluate(&Value::Null));
        assert!(!pred.evaluate(&Value::String("18".into())));
    }

    #[test]
    fn predicate_set_is_a_conjunction() {
        let set = ColumnPredicateSet::new(
            0,
            vec![
                ColumnPredicate::new(CompareOp::Gt, Value::Int64(1)),
                ColumnPredicate::new(CompareOp::Lt, Value::Int64(5)),
            ],
        );
        assert!(set.evaluate(&Value::Int64(3)));
        assert!(!set.evaluate(&Value::Int64(5)));
    }
}
