//! Pushes an `ORDER BY` down to the table function that produces the rows.

use tracing::debug;

use crate::query::expression::{ExpressionKind, ExpressionRef};
use crate::query::logical::{LogicalOperator, LogicalOperatorType, LogicalPlan};
use crate::types::{PenumbraError, Result};

use super::OptimizerPass;

/// State threaded through one descent.
#[derive(Debug, Default)]
struct OrderByContext {
    clause: Option<String>,
}

/// Order-by pushdown pass.
#[derive(Debug, Default)]
pub struct OrderByPushDownOptimizer;

impl OrderByPushDownOptimizer {
    /// Creates the pass.
    pub fn new() -> Self {
        Self
    }
}

impl OptimizerPass for OrderByPushDownOptimizer {
    fn name(&self) -> &'static str {
        "order_by_push_down"
    }

    fn rewrite(&mut self, plan: &mut LogicalPlan) -> Result<()> {
        let mut context = OrderByContext::default();
        visit(&mut plan.root, &mut context)
    }
}

fn visit(op: &mut LogicalOperator, context: &mut OrderByContext) -> Result<()> {
    match op.operator_type() {
        LogicalOperatorType::OrderBy => {
            if let Some(order_by) = op.as_order_by() {
                context.clause =
                    build_order_by_clause(&order_by.expressions, &order_by.is_asc_orders)?;
            }
            visit(only_child(op)?, context)
        }
        LogicalOperatorType::MultiplicityReducer
        | LogicalOperatorType::Explain
        | LogicalOperatorType::Accumulate
        | LogicalOperatorType::Filter
        | LogicalOperatorType::Projection => visit(only_child(op)?, context),
        LogicalOperatorType::TableFunctionCall => {
            if let (Some(clause), Some(call)) = (&context.clause, op.as_table_function_call_mut()) {
                debug!(
                    function = call.function.name(),
                    clause = clause.as_str(),
                    "query.optimizer.order_by_push_down.pushed"
                );
                call.set_order_by(clause.clone());
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn only_child(op: &mut LogicalOperator) -> Result<&mut LogicalOperator> {
    op.children_mut().first_mut().ok_or(PenumbraError::Invalid(
        "ORDER BY push down reached an operator without a child",
    ))
}

fn key_name(expr: &ExpressionRef) -> Result<&str> {
    match &expr.kind {
        ExpressionKind::Variable { name } => Ok(name),
        ExpressionKind::Property { property, .. } => Ok(property),
        _ => Err(PenumbraError::Query(format!(
            "ORDER BY push down only supports variable expressions, got {expr}."
        ))),
    }
}

/// Renders `" ORDER BY <name> {ASC|DESC}[, ...]"`.
///
/// Returns `None` without keys, or when two different keys render to the
/// same column name (`n.age` and `m.age`). The sort above the call still
/// orders those rows.
pub fn build_order_by_clause(
    expressions: &[ExpressionRef],
    is_asc_orders: &[bool],
) -> Result<Option<String>> {
    check_sort_directions(expressions, is_asc_orders)?;
    if expressions.is_empty() {
        return Ok(None);
    }
    let mut names: Vec<(&str, &str)> = Vec::with_capacity(expressions.len());
    let mut keys = Vec::with_capacity(expressions.len());
    for (expr, asc) in expressions.iter().zip(is_asc_orders) {
        let name = key_name(expr)?;
        let ambiguous = names
            .iter()
            .any(|(seen, unique)| *seen == name && *unique != expr.unique_name());
        if ambiguous {
            debug!(key = name, "query.optimizer.order_by_push_down.ambiguous_key");
            return Ok(None);
        }
        names.push((name, expr.unique_name()));
        keys.push(format!("{name} {}", if *asc { "ASC" } else { "DESC" }));
    }
    Ok(Some(format!(" ORDER BY {}", keys.join(", "))))
}

/// Fails unless every sort key has exactly one direction.
pub fn check_sort_directions(
    expressions: &[ExpressionRef],
    is_asc_orders: &[bool],
) -> Result<()> {
    if expressions.len() == is_asc_orders.len() {
        return Ok(());
    }
    Err(PenumbraError::Query(format!(
        "ORDER BY has {} keys but {} sort directions.",
        expressions.len(),
        is_asc_orders.len()
    )))
}
