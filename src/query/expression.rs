//! Bound expressions produced by the binder and consumed by plans.
//!
//! Every expression has a unique name that schemas use as lookup key, so
//! two structurally equal expressions address the same output vector.

use std::fmt;
use std::sync::Arc;

use crate::catalog::{NodeTableEntry, PathSemantic, RelGroupEntry};
use crate::types::{LogicalType, PenumbraError, TableId, Value};

/// Shared handle to a bound expression.
pub type ExpressionRef = Arc<Expression>;

/// Name of the count-all-rows aggregate.
pub const COUNT_STAR: &str = "COUNT_STAR";
/// Name of the non-null count aggregate.
pub const COUNT: &str = "COUNT";
/// Name of the sum aggregate.
pub const SUM: &str = "SUM";
/// Name of the cast scalar function.
pub const CAST: &str = "CAST";

/// Expression variants.
#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionKind {
    /// Constant.
    Literal(Value),
    /// Query parameter with its bound value.
    Parameter {
        /// Parameter name without the `$` sigil.
        name: String,
        /// Value supplied by the issuer.
        value: Value,
    },
    /// Named column produced by an operator (e.g. a table function output).
    Variable {
        /// Variable name.
        name: String,
    },
    /// Property of a node or relationship variable.
    Property {
        /// Owning variable.
        variable: String,
        /// Property name.
        property: String,
    },
    /// Aggregate function call.
    AggregateFunction {
        /// Upper-case function name.
        name: String,
        /// Whether duplicates are removed before aggregation.
        distinct: bool,
    },
    /// Scalar function call.
    ScalarFunction {
        /// Upper-case function name.
        name: String,
    },
    /// Node pattern variable bound to one or more node tables.
    Node {
        /// Variable name.
        variable: String,
        /// Candidate node tables.
        entries: Vec<Arc<NodeTableEntry>>,
    },
    /// Relationship pattern variable bound to one or more rel groups.
    Rel {
        /// Variable name.
        variable: String,
        /// Candidate rel groups; more than one means multi-labeled.
        entries: Vec<Arc<RelGroupEntry>>,
        /// Path semantic of the pattern.
        semantic: PathSemantic,
    },
}

/// Bound expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    /// Variant payload.
    pub kind: ExpressionKind,
    /// Argument expressions.
    pub children: Vec<ExpressionRef>,
    /// Result type.
    pub data_type: LogicalType,
    unique_name: String,
}

impl Expression {
    fn build(kind: ExpressionKind, children: Vec<ExpressionRef>, data_type: LogicalType) -> ExpressionRef {
        let unique_name = unique_name(&kind, &children, data_type);
        Arc::new(Self {
            kind,
            children,
            data_type,
            unique_name,
        })
    }

    /// Constant expression.
    pub fn literal(value: Value) -> ExpressionRef {
        let data_type = value.logical_type();
        Self::build(ExpressionKind::Literal(value), Vec::new(), data_type)
    }

    /// Parameter expression bound to `value`.
    pub fn parameter(name: impl Into<String>, value: Value) -> ExpressionRef {
        let data_type = value.logical_type();
        Self::build(
            ExpressionKind::Parameter {
                name: name.into(),
                value,
            },
            Vec::new(),
            data_type,
        )
    }

    /// Plain variable reference.
    pub fn variable(name: impl Into<String>, data_type: LogicalType) -> ExpressionRef {
        Self::build(ExpressionKind::Variable { name: name.into() }, Vec::new(), data_type)
    }

    /// Property `variable.property`.
    pub fn property(
        variable: impl Into<String>,
        property: impl Into<String>,
        data_type: LogicalType,
    ) -> ExpressionRef {
        Self::build(
            ExpressionKind::Property {
                variable: variable.into(),
                property: property.into(),
            },
            Vec::new(),
            data_type,
        )
    }

    /// `COUNT_STAR()`.
    pub fn count_star() -> ExpressionRef {
        Self::aggregate(COUNT_STAR, Vec::new(), false)
    }

    /// Aggregate call; the result type follows the function.
    pub fn aggregate(name: &str, children: Vec<ExpressionRef>, distinct: bool) -> ExpressionRef {
        let name = name.to_ascii_uppercase();
        let data_type = match name.as_str() {
            SUM => children
                .first()
                .map_or(LogicalType::Int64, |child| child.data_type),
            _ => LogicalType::Int64,
        };
        Self::build(
            ExpressionKind::AggregateFunction { name, distinct },
            children,
            data_type,
        )
    }

    /// Scalar function call with an explicit result type.
    pub fn scalar(name: &str, children: Vec<ExpressionRef>, data_type: LogicalType) -> ExpressionRef {
        Self::build(
            ExpressionKind::ScalarFunction {
                name: name.to_ascii_uppercase(),
            },
            children,
            data_type,
        )
    }

    /// `CAST(child, data_type)`.
    pub fn cast(child: ExpressionRef, data_type: LogicalType) -> ExpressionRef {
        Self::scalar(CAST, vec![child], data_type)
    }

    /// Node pattern variable.
    pub fn node(variable: impl Into<String>, entries: Vec<Arc<NodeTableEntry>>) -> ExpressionRef {
        Self::build(
            ExpressionKind::Node {
                variable: variable.into(),
                entries,
            },
            Vec::new(),
            LogicalType::InternalId,
        )
    }

    /// Relationship pattern variable.
    pub fn rel(variable: impl Into<String>, entries: Vec<Arc<RelGroupEntry>>) -> ExpressionRef {
        Self::build(
            ExpressionKind::Rel {
                variable: variable.into(),
                entries,
                semantic: PathSemantic::Walk,
            },
            Vec::new(),
            LogicalType::InternalId,
        )
    }

    /// Lookup key within schemas.
    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    /// Returns `true` for aggregate function calls.
    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, ExpressionKind::AggregateFunction { .. })
    }

    /// Function name of aggregate or scalar calls.
    pub fn function_name(&self) -> Option<&str> {
        match &self.kind {
            ExpressionKind::AggregateFunction { name, .. } | ExpressionKind::ScalarFunction { name } => {
                Some(name)
            }
            _ => None,
        }
    }

    /// Returns `true` for a non-distinct `COUNT_STAR()`.
    pub fn is_count_star(&self) -> bool {
        matches!(&self.kind, ExpressionKind::AggregateFunction { name, distinct: false } if name == COUNT_STAR)
    }

    /// Node table ids of a node pattern variable.
    pub fn node_table_ids(&self) -> Vec<TableId> {
        match &self.kind {
            ExpressionKind::Node { entries, .. } => entries.iter().map(|entry| entry.id).collect(),
            _ => Vec::new(),
        }
    }

    /// Rel group entries of a relationship pattern variable.
    pub fn rel_entries(&self) -> &[Arc<RelGroupEntry>] {
        match &self.kind {
            ExpressionKind::Rel { entries, .. } => entries,
            _ => &[],
        }
    }

    /// Walks the expression tree in pre-order.
    pub fn visit<'a>(self: &'a ExpressionRef, f: &mut impl FnMut(&'a ExpressionRef)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

fn join_unique(children: &[ExpressionRef]) -> String {
    children
        .iter()
        .map(|child| child.unique_name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn unique_name(kind: &ExpressionKind, children: &[ExpressionRef], data_type: LogicalType) -> String {
    match kind {
        ExpressionKind::Literal(value) => literal_text(value),
        ExpressionKind::Parameter { name, .. } => format!("${name}"),
        ExpressionKind::Variable { name } => name.clone(),
        ExpressionKind::Property { variable, property } => format!("{variable}.{property}"),
        ExpressionKind::AggregateFunction { name, distinct } => format!(
            "{name}({}{})",
            if *distinct { "DISTINCT " } else { "" },
            join_unique(children)
        ),
        ExpressionKind::ScalarFunction { name } if name == CAST => {
            format!("{name}({},{data_type})", join_unique(children))
        }
        ExpressionKind::ScalarFunction { name } => format!("{name}({})", join_unique(children)),
        ExpressionKind::Node { variable, .. } | ExpressionKind::Rel { variable, .. } => variable.clone(),
    }
}

fn literal_text(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        other => other.to_string(),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self
            .children
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        match &self.kind {
            ExpressionKind::AggregateFunction { name, distinct } => {
                write!(f, "{name}({}{args})", if *distinct { "DISTINCT " } else { "" })
            }
            ExpressionKind::ScalarFunction { name } if name == CAST => {
                write!(f, "CAST({args}, {})", self.data_type)
            }
            ExpressionKind::ScalarFunction { name } => write!(f, "{name}({args})"),
            _ => f.write_str(&self.unique_name),
        }
    }
}

/// Error for an expression that no input schema provides.
pub fn variable_not_in_scope(name: &str) -> PenumbraError {
    PenumbraError::Query(format!("Variable {name} is not in scope."))
}

/// Error for a SKIP/LIMIT expression that is not a non-negative integer.
pub fn invalid_skip_limit(expr: &str, skip_or_limit: &str) -> PenumbraError {
    PenumbraError::Query(format!(
        "Cannot evaluate {expr} as a valid {skip_or_limit} number."
    ))
}
