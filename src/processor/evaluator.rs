//! Row-wise evaluation of bound expressions against a [`ResultSet`].
//!
//! Expressions already materialized in the input schema are read from their
//! vector; everything else is computed from its children. Evaluation runs
//! over the selected rows of one driving chunk. Every other referenced chunk
//! must expose exactly one row (it was flattened upstream).

use smallvec::SmallVec;

use crate::primitives::vector::{DataPos, ResultSet};
use crate::query::expression::{variable_not_in_scope, ExpressionKind, ExpressionRef, CAST};
use crate::query::schema::Schema;
use crate::storage::CompareOp;
use crate::types::{LogicalType, PenumbraError, Result, Value};

/// Scalar functions the evaluator implements.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScalarFunction {
    /// Binary comparison.
    Compare(CompareOp),
    /// Three-valued conjunction.
    And,
    /// Three-valued disjunction.
    Or,
    /// Negation.
    Not,
    /// `a + b`.
    Add,
    /// `a - b`.
    Subtract,
    /// `a * b`.
    Multiply,
    /// `a / b`.
    Divide,
    /// `a % b`.
    Modulo,
    /// `-a`.
    Negate,
    /// Conversion to the expression's type.
    Cast(LogicalType),
    /// `a IS NULL`.
    IsNull,
    /// `a IS NOT NULL`.
    IsNotNull,
}

impl ScalarFunction {
    /// Resolves a function by name; `target` is the result type for casts.
    pub fn resolve(name: &str, target: LogicalType) -> Result<Self> {
        if let Some(op) = CompareOp::from_function_name(name) {
            return Ok(ScalarFunction::Compare(op));
        }
        let function = match name {
            "AND" => ScalarFunction::And,
            "OR" => ScalarFunction::Or,
            "NOT" => ScalarFunction::Not,
            "ADD" => ScalarFunction::Add,
            "SUBTRACT" => ScalarFunction::Subtract,
            "MULTIPLY" => ScalarFunction::Multiply,
            "DIVIDE" => ScalarFunction::Divide,
            "MODULO" => ScalarFunction::Modulo,
            "NEGATE" => ScalarFunction::Negate,
            "IS_NULL" => ScalarFunction::IsNull,
            "IS_NOT_NULL" => ScalarFunction::IsNotNull,
            CAST => ScalarFunction::Cast(target),
            other => {
                return Err(PenumbraError::Query(format!(
                    "function {other} is not supported"
                )))
            }
        };
        Ok(function)
    }

    fn arity(self) -> usize {
        match self {
            ScalarFunction::Not
            | ScalarFunction::Negate
            | ScalarFunction::Cast(_)
            | ScalarFunction::IsNull
            | ScalarFunction::IsNotNull => 1,
            _ => 2,
        }
    }

    fn apply(self, args: &[Value]) -> Result<Value> {
        match self {
            ScalarFunction::Compare(op) => {
                if args[0].is_null() || args[1].is_null() {
                    return Ok(Value::Null);
                }
                let ordering = args[0].partial_cmp_value(&args[1]);
                Ok(ordering.map_or(Value::Null, |_| Value::Bool(op.matches(ordering))))
            }
            ScalarFunction::And => Ok(match (truth(&args[0])?, truth(&args[1])?) {
                (Some(false), _) | (_, Some(false)) => Value::Bool(false),
                (Some(true), Some(true)) => Value::Bool(true),
                _ => Value::Null,
            }),
            ScalarFunction::Or => Ok(match (truth(&args[0])?, truth(&args[1])?) {
                (Some(true), _) | (_, Some(true)) => Value::Bool(true),
                (Some(false), Some(false)) => Value::Bool(false),
                _ => Value::Null,
            }),
            ScalarFunction::Not => Ok(truth(&args[0])?.map_or(Value::Null, |b| Value::Bool(!b))),
            ScalarFunction::Add
            | ScalarFunction::Subtract
            | ScalarFunction::Multiply
            | ScalarFunction::Divide
            | ScalarFunction::Modulo => arithmetic(self, &args[0], &args[1]),
            ScalarFunction::Negate => match &args[0] {
                Value::Null => Ok(Value::Null),
                Value::Int64(v) => v
                    .checked_neg()
                    .map(Value::Int64)
                    .ok_or_else(|| PenumbraError::Query("integer overflow in NEGATE".into())),
                Value::Double(v) => Ok(Value::Double(-v)),
                other => Err(type_mismatch("NEGATE", other)),
            },
            ScalarFunction::Cast(target) => cast(&args[0], target),
            ScalarFunction::IsNull => Ok(Value::Bool(args[0].is_null())),
            ScalarFunction::IsNotNull => Ok(Value::Bool(!args[0].is_null())),
        }
    }
}

fn type_mismatch(function: &str, value: &Value) -> PenumbraError {
    PenumbraError::Query(format!(
        "{function} cannot take an argument of type {}",
        value.logical_type()
    ))
}

fn truth(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(type_mismatch("boolean operator", other)),
    }
}

fn arithmetic(function: ScalarFunction, lhs: &Value, rhs: &Value) -> Result<Value> {
    let name = match function {
        ScalarFunction::Add => "ADD",
        ScalarFunction::Subtract => "SUBTRACT",
        ScalarFunction::Multiply => "MULTIPLY",
        ScalarFunction::Divide => "DIVIDE",
        _ => "MODULO",
    };
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int64(a), Value::Int64(b)) => {
            let (a, b) = (*a, *b);
            let result = match function {
                ScalarFunction::Add => a.checked_add(b),
                ScalarFunction::Subtract => a.checked_sub(b),
                ScalarFunction::Multiply => a.checked_mul(b),
                ScalarFunction::Divide if b == 0 => return Ok(Value::Null),
                ScalarFunction::Divide => a.checked_div(b),
                _ if b == 0 => return Ok(Value::Null),
                _ => a.checked_rem(b),
            };
            result
                .map(Value::Int64)
                .ok_or_else(|| PenumbraError::Query(format!("integer overflow in {name}")))
        }
        (Value::Int64(_) | Value::Double(_), Value::Int64(_) | Value::Double(_)) => {
            let a = as_f64(lhs);
            let b = as_f64(rhs);
            Ok(Value::Double(match function {
                ScalarFunction::Add => a + b,
                ScalarFunction::Subtract => a - b,
                ScalarFunction::Multiply => a * b,
                ScalarFunction::Divide => a / b,
                _ => a % b,
            }))
        }
        (Value::String(a), Value::String(b)) if function == ScalarFunction::Add => {
            Ok(Value::String(format!("{a}{b}")))
        }
        (other, Value::Int64(_) | Value::Double(_)) => Err(type_mismatch(name, other)),
        (_, other) => Err(type_mismatch(name, other)),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int64(v) => *v as f64,
        Value::Double(v) => *v,
        _ => f64::NAN,
    }
}

fn cast(value: &Value, target: LogicalType) -> Result<Value> {
    let cast_error = || {
        PenumbraError::Query(format!(
            "Cannot cast {value} of type {} to {target}.",
            value.logical_type()
        ))
    };
    Ok(match (value, target) {
        (Value::Null, _) => Value::Null,
        (v, t) if v.logical_type() == t => v.clone(),
        (v, LogicalType::Any) => v.clone(),
        (Value::Int64(v), LogicalType::Double) => Value::Double(*v as f64),
        (Value::Double(v), LogicalType::Int64) => Value::Int64(v.round() as i64),
        (Value::Bool(v), LogicalType::Int64) => Value::Int64(i64::from(*v)),
        (v, LogicalType::String) => Value::String(v.to_string()),
        (Value::String(s), LogicalType::Int64) => {
            Value::Int64(s.trim().parse().map_err(|_| cast_error())?)
        }
        (Value::String(s), LogicalType::Double) => {
            Value::Double(s.trim().parse().map_err(|_| cast_error())?)
        }
        (Value::String(s), LogicalType::Bool) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(cast_error()),
        },
        _ => return Err(cast_error()),
    })
}

/// Compiled expression.
#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionEvaluator {
    /// Constant (literals and bound parameters).
    Literal(Value),
    /// Value read from a result set vector.
    Reference(DataPos),
    /// Computed function call.
    Function {
        /// Function applied.
        function: ScalarFunction,
        /// Argument evaluators.
        children: Vec<ExpressionEvaluator>,
    },
}

/// Row binding of one evaluation: the driving chunk iterates, every other
/// referenced chunk is pinned to its single active row.
#[derive(Debug)]
struct RowBinding {
    driving: Option<usize>,
    pinned: SmallVec<[Option<usize>; 4]>,
}

impl ExpressionEvaluator {
    /// Compiles `expr` against the input `schema`.
    pub fn build(expr: &ExpressionRef, schema: &Schema) -> Result<Self> {
        if schema.contains(expr) {
            return Ok(ExpressionEvaluator::Reference(schema.data_pos(expr)?));
        }
        match &expr.kind {
            ExpressionKind::Literal(value) | ExpressionKind::Parameter { value, .. } => {
                Ok(ExpressionEvaluator::Literal(value.clone()))
            }
            ExpressionKind::ScalarFunction { name } => {
                let function = ScalarFunction::resolve(name, expr.data_type)?;
                if expr.children.len() != function.arity() {
                    return Err(PenumbraError::Query(format!(
                        "{name} expects {} arguments, got {}",
                        function.arity(),
                        expr.children.len()
                    )));
                }
                let children = expr
                    .children
                    .iter()
                    .map(|child| Self::build(child, schema))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ExpressionEvaluator::Function { function, children })
            }
            ExpressionKind::AggregateFunction { name, .. } => Err(PenumbraError::Query(format!(
                "aggregate {name} cannot be evaluated per row"
            ))),
            ExpressionKind::Variable { .. }
            | ExpressionKind::Property { .. }
            | ExpressionKind::Node { .. }
            | ExpressionKind::Rel { .. } => Err(variable_not_in_scope(expr.unique_name())),
        }
    }

    /// Chunk positions read by the expression, ascending and deduplicated.
    pub fn referenced_chunks(&self) -> SmallVec<[usize; 4]> {
        let mut chunks = SmallVec::new();
        self.collect_chunks(&mut chunks);
        chunks.sort_unstable();
        chunks.dedup();
        chunks
    }

    fn collect_chunks(&self, out: &mut SmallVec<[usize; 4]>) {
        match self {
            ExpressionEvaluator::Literal(_) => {}
            ExpressionEvaluator::Reference(pos) => out.push(pos.chunk_pos),
            ExpressionEvaluator::Function { children, .. } => {
                for child in children {
                    child.collect_chunks(out);
                }
            }
        }
    }

    fn bind(&self, result_set: &ResultSet) -> Result<RowBinding> {
        let chunks = self.referenced_chunks();
        let sizes: SmallVec<[usize; 4]> = chunks
            .iter()
            .map(|&pos| result_set.chunk(pos).sel_size())
            .collect();
        let mut unflat = chunks.iter().zip(&sizes).filter(|(_, size)| **size != 1);
        let driving = match (unflat.next(), unflat.next()) {
            (Some(_), Some(_)) => {
                return Err(PenumbraError::Query(
                    "expression spans several unflattened groups".into(),
                ))
            }
            (Some((&pos, _)), None) => Some(pos),
            (None, _) => chunks.last().copied(),
        };
        let mut pinned: SmallVec<[Option<usize>; 4]> =
            SmallVec::from_elem(None, result_set.num_chunks());
        for &pos in &chunks {
            if Some(pos) != driving {
                pinned[pos] = Some(result_set.chunk(pos).state().read().sel_vector().get(0));
            }
        }
        Ok(RowBinding { driving, pinned })
    }

    fn eval_row(&self, result_set: &ResultSet, binding: &RowBinding, row: usize) -> Result<Value> {
        match self {
            ExpressionEvaluator::Literal(value) => Ok(value.clone()),
            ExpressionEvaluator::Reference(pos) => {
                let physical = if Some(pos.chunk_pos) == binding.driving {
                    row
                } else {
                    binding.pinned[pos.chunk_pos].unwrap_or(0)
                };
                Ok(result_set.vector(*pos).get_value(physical))
            }
            ExpressionEvaluator::Function { function, children } => {
                let args = children
                    .iter()
                    .map(|child| child.eval_row(result_set, binding, row))
                    .collect::<Result<SmallVec<[Value; 2]>>>()?;
                function.apply(&args)
            }
        }
    }

    /// Evaluates the expression for every active row of the driving chunk.
    ///
    /// Returns the driving chunk (`None` for constant expressions) and one
    /// `(physical position, value)` pair per active row; a constant yields a
    /// single pair at position 0.
    pub fn evaluate(&self, result_set: &ResultSet) -> Result<(Option<usize>, Vec<(usize, Value)>)> {
        let binding = self.bind(result_set)?;
        let Some(driving) = binding.driving else {
            return Ok((None, vec![(0, self.eval_row(result_set, &binding, 0)?)]));
        };
        let positions: Vec<usize> = result_set
            .chunk(driving)
            .state()
            .read()
            .sel_vector()
            .iter()
            .collect();
        let values = positions
            .into_iter()
            .map(|pos| Ok((pos, self.eval_row(result_set, &binding, pos)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok((Some(driving), values))
    }

    /// Evaluates an expression that references no vector.
    pub fn evaluate_constant(&self) -> Result<Value> {
        let binding = RowBinding {
            driving: None,
            pinned: SmallVec::new(),
        };
        if !self.referenced_chunks().is_empty() {
            return Err(PenumbraError::Query(
                "expression is not a constant".into(),
            ));
        }
        self.eval_row(&ResultSet::default(), &binding, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::vector::DataChunk;
    use crate::query::expression::Expression;

    fn ages(values: &[i64]) -> (Schema, ResultSet, ExpressionRef) {
        let age = Expression::property("n", "age", LogicalType::Int64);
        let mut schema = Schema::new();
        let group = schema.create_group();
        schema.insert_to_group_and_scope(&age, group);
        let mut chunk = DataChunk::new(&[LogicalType::Int64]);
        for (pos, value) in values.iter().enumerate() {
            chunk.vector_mut(0).set_i64(pos, *value);
        }
        chunk.state().write().sel_vector_mut().set_to_unfiltered(values.len());
        (schema, ResultSet::new(vec![chunk]), age)
    }

    #[test]
    fn computes_over_selected_rows() {
        let (schema, result_set, age) = ages(&[10, 20, 30]);
        let expr = Expression::scalar(
            "GREATER_THAN",
            vec![
                Expression::scalar(
                    "ADD",
                    vec![age, Expression::literal(Value::Int64(1))],
                    LogicalType::Int64,
                ),
                Expression::literal(Value::Int64(20)),
            ],
            LogicalType::Bool,
        );
        let evaluator = ExpressionEvaluator::build(&expr, &schema).unwrap();
        let (driving, values) = evaluator.evaluate(&result_set).unwrap();
        assert_eq!(driving, Some(0));
        assert_eq!(
            values,
            vec![
                (0, Value::Bool(false)),
                (1, Value::Bool(true)),
                (2, Value::Bool(true)),
            ]
        );
    }

    #[test]
    fn unknown_variable_and_function_fail_to_compile() {
        let (schema, _, age) = ages(&[]);
        let missing = Expression::property("m", "age", LogicalType::Int64);
        let err = ExpressionEvaluator::build(&missing, &schema).unwrap_err();
        assert_eq!(err.to_string(), "query error: Variable m.age is not in scope.");
        let unknown = Expression::scalar("LEVENSHTEIN", vec![age], LogicalType::Int64);
        assert!(ExpressionEvaluator::build(&unknown, &schema).is_err());
    }

    #[test]
    fn null_semantics() {
        let and = ScalarFunction::And;
        assert_eq!(and.apply(&[Value::Null, Value::Bool(false)]).unwrap(), Value::Bool(false));
        assert_eq!(and.apply(&[Value::Null, Value::Bool(true)]).unwrap(), Value::Null);
        let eq = ScalarFunction::Compare(CompareOp::Eq);
        assert_eq!(eq.apply(&[Value::Null, Value::Null]).unwrap(), Value::Null);
        let div = ScalarFunction::Divide;
        assert_eq!(div.apply(&[Value::Int64(1), Value::Int64(0)]).unwrap(), Value::Null);
        assert_eq!(
            cast(&Value::String("42".into()), LogicalType::Int64).unwrap(),
            Value::Int64(42)
        );
    }

    #[test]
    fn constant_evaluation() {
        let schema = Schema::new();
        let expr = Expression::scalar(
            "MULTIPLY",
            vec![
                Expression::literal(Value::Int64(6)),
                Expression::parameter("k", Value::Int64(7)),
            ],
            LogicalType::Int64,
        );
        let evaluator = ExpressionEvaluator::build(&expr, &schema).unwrap();
        assert_eq!(evaluator.evaluate_constant().unwrap(), Value::Int64(42));
    }
}
