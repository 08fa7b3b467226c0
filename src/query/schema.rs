//! Output schemas of logical operators.
//!
//! A schema is an ordered list of factorization groups. Expressions of one
//! group share a row batch (one data chunk at execution time); the tuples an
//! operator exposes are the cross product of its groups.

use rustc_hash::FxHashMap;

use crate::primitives::vector::DataPos;
use crate::types::{LogicalType, Result};

use super::expression::{variable_not_in_scope, ExpressionRef};

/// Expressions evaluated over the same row batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FactorizationGroup {
    expressions: Vec<ExpressionRef>,
    flat: bool,
    single_state: bool,
}

impl FactorizationGroup {
    /// Expressions of the group in vector order.
    pub fn expressions(&self) -> &[ExpressionRef] {
        &self.expressions
    }

    /// Whether the group exposes one row at a time.
    pub fn is_flat(&self) -> bool {
        self.flat
    }

    /// Whether the group always holds exactly one row.
    pub fn is_single_state(&self) -> bool {
        self.single_state
    }

    /// Logical types of the group's vectors.
    pub fn types(&self) -> Vec<LogicalType> {
        self.expressions.iter().map(|expr| expr.data_type).collect()
    }
}

/// Factorized output schema of a logical operator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    groups: Vec<FactorizationGroup>,
    expr_to_group: FxHashMap<String, usize>,
    scope: Vec<ExpressionRef>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an empty group and returns its position.
    pub fn create_group(&mut self) -> usize {
        self.groups.push(FactorizationGroup::default());
        self.groups.len() - 1
    }

    /// Number of groups.
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Group at `pos`.
    pub fn group(&self, pos: usize) -> &FactorizationGroup {
        &self.groups[pos]
    }

    /// All groups in order.
    pub fn groups(&self) -> &[FactorizationGroup] {
        &self.groups
    }

    /// Adds `expr` to group `pos` without bringing it into scope.
    ///
    /// Panics when the expression already lives in another group.
    pub fn insert_to_group(&mut self, expr: &ExpressionRef, pos: usize) {
        match self.expr_to_group.get(expr.unique_name()) {
            Some(existing) => assert_eq!(
                *existing,
                pos,
                "expression {} already placed in group {existing}",
                expr.unique_name()
            ),
            None => {
                self.expr_to_group.insert(expr.unique_name().to_owned(), pos);
                self.groups[pos].expressions.push(expr.clone());
            }
        }
    }

    /// Adds `expr` to group `pos` and to the scope.
    pub fn insert_to_group_and_scope(&mut self, expr: &ExpressionRef, pos: usize) {
        self.insert_to_group(expr, pos);
        self.insert_to_scope(expr);
    }

    /// Brings an already placed expression into scope.
    pub fn insert_to_scope(&mut self, expr: &ExpressionRef) {
        if !self.is_in_scope(expr.unique_name()) {
            self.scope.push(expr.clone());
        }
    }

    /// Replaces the scope with `exprs`.
    pub fn set_scope(&mut self, exprs: &[ExpressionRef]) {
        self.scope.clear();
        for expr in exprs {
            self.insert_to_scope(expr);
        }
    }

    /// Expressions visible to the parent, in output order.
    pub fn expressions_in_scope(&self) -> &[ExpressionRef] {
        &self.scope
    }

    /// Returns `true` when `name` is in scope.
    pub fn is_in_scope(&self, name: &str) -> bool {
        self.scope.iter().any(|expr| expr.unique_name() == name)
    }

    /// Group holding `expr`, if any.
    pub fn group_pos(&self, expr: &ExpressionRef) -> Option<usize> {
        self.expr_to_group.get(expr.unique_name()).copied()
    }

    /// Returns `true` when `expr` is placed in some group.
    pub fn contains(&self, expr: &ExpressionRef) -> bool {
        self.group_pos(expr).is_some()
    }

    /// Result-set position of `expr`.
    pub fn data_pos(&self, expr: &ExpressionRef) -> Result<DataPos> {
        let group = self
            .group_pos(expr)
            .ok_or_else(|| variable_not_in_scope(expr.unique_name()))?;
        let vector = self.groups[group]
            .expressions
            .iter()
            .position(|candidate| candidate.unique_name() == expr.unique_name())
            .ok_or_else(|| variable_not_in_scope(expr.unique_name()))?;
        Ok(DataPos::new(group, vector))
    }

    /// Marks group `pos` flat.
    pub fn flatten_group(&mut self, pos: usize) {
        self.groups[pos].flat = true;
    }

    /// Marks group `pos` as holding exactly one row.
    pub fn set_group_as_single_state(&mut self, pos: usize) {
        let group = &mut self.groups[pos];
        group.single_state = true;
        group.flat = true;
    }

    /// Marks every group flat.
    pub fn flatten_all(&mut self) {
        for group in &mut self.groups {
            group.flat = true;
        }
    }

    /// Highest group holding `expr` or one of its sub-expressions.
    pub fn dependent_group(&self, expr: &ExpressionRef) -> Option<usize> {
        let mut max = None;
        expr.visit(&mut |node| {
            if let Some(pos) = self.group_pos(node) {
                max = Some(max.map_or(pos, |current: usize| current.max(pos)));
            }
        });
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expression::Expression;
    use crate::types::Value;

    #[test]
    fn data_pos_follows_placement_order() {
        let mut schema = Schema::new();
        let a = Expression::variable("a", LogicalType::Int64);
        let b = Expression::variable("b", LogicalType::Int64);
        let c = Expression::variable("c", LogicalType::String);
        let g0 = schema.create_group();
        schema.insert_to_group_and_scope(&a, g0);
        schema.insert_to_group_and_scope(&b, g0);
        let g1 = schema.create_group();
        schema.insert_to_group_and_scope(&c, g1);
        assert_eq!(schema.data_pos(&b).unwrap(), DataPos::new(0, 1));
        assert_eq!(schema.data_pos(&c).unwrap(), DataPos::new(1, 0));
        let missing = Expression::variable("m", LogicalType::Int64);
        assert!(schema.data_pos(&missing).is_err());
    }

    #[test]
    fn dependent_group_is_deepest_input() {
        let mut schema = Schema::new();
        let a = Expression::variable("a", LogicalType::Int64);
        let b = Expression::variable("b", LogicalType::Int64);
        schema.create_group();
        schema.create_group();
        schema.insert_to_group(&a, 0);
        schema.insert_to_group(&b, 1);
        let sum = Expression::scalar(
            "ADD",
            vec![a, b, Expression::literal(Value::Int64(1))],
            LogicalType::Int64,
        );
        assert_eq!(schema.dependent_group(&sum), Some(1));
        assert_eq!(
            schema.dependent_group(&Expression::literal(Value::Int64(1))),
            None
        );
    }

    #[test]
    #[should_panic(expected = "already placed")]
    fn expression_lives_in_one_group() {
        let mut schema = Schema::new();
        let a = Expression::variable("a", LogicalType::Int64);
        schema.create_group();
        schema.create_group();
        schema.insert_to_group(&a, 0);
        schema.insert_to_group(&a, 1);
    }
}
