use std::fmt;

use crate::primitives::vector::{DataPos, ResultSet};
use crate::processor::{
    evaluator::ExpressionEvaluator, ExecutionContext, OperatorState, PhysicalOperator,
    PhysicalOperatorType, PrintInfo, TextPrintInfo,
};
use crate::types::{OperatorId, PenumbraError, Result};

/// Materializes computed expressions next to the child's vectors.
///
/// Expressions the child already provides are not listed; they are read in
/// place. A computed value lands in the chunk of its highest dependency,
/// or in a single-state chunk when it depends on nothing.
pub struct Projection {
    id: OperatorId,
    child: Box<dyn PhysicalOperator>,
    expressions: Vec<(ExpressionEvaluator, DataPos)>,
    print_info: TextPrintInfo,
    state: OperatorState,
}

impl Projection {
    /// Creates the projection; each evaluator writes to its paired position.
    pub fn new(
        id: OperatorId,
        child: Box<dyn PhysicalOperator>,
        expressions: Vec<(ExpressionEvaluator, DataPos)>,
        print_info: TextPrintInfo,
    ) -> Self {
        Self {
            id,
            child,
            expressions,
            print_info,
            state: OperatorState::Uninitialized,
        }
    }

    fn project(&self, result_set: &mut ResultSet) -> Result<()> {
        for (evaluator, target) in &self.expressions {
            let (driving, values) = evaluator.evaluate(result_set)?;
            if driving == Some(target.chunk_pos) {
                let vector = result_set.vector_mut(*target);
                for (pos, value) in &values {
                    vector.set_value(*pos, value);
                }
                continue;
            }
            let [(_, value)] = values.as_slice() else {
                return Err(PenumbraError::Query(
                    "projection target group does not match its input rows".into(),
                ));
            };
            let rows: Vec<usize> = result_set
                .chunk(target.chunk_pos)
                .state()
                .read()
                .sel_vector()
                .iter()
                .collect();
            let vector = result_set.vector_mut(*target);
            for row in rows {
                vector.set_value(row, value);
            }
        }
        Ok(())
    }
}

impl PhysicalOperator for Projection {
    fn operator_type(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::Projection
    }

    fn id(&self) -> OperatorId {
        self.id
    }

    fn print_info(&self) -> &dyn PrintInfo {
        &self.print_info
    }

    fn init_local_state(
        &mut self,
        result_set: &mut ResultSet,
        context: &ExecutionContext<'_>,
    ) -> Result<()> {
        self.state.initialize(self.operator_type())?;
        self.child.init_local_state(result_set, context)
    }

    fn get_next_tuples(
        &mut self,
        result_set: &mut ResultSet,
        context: &ExecutionContext<'_>,
    ) -> Result<bool> {
        if !self.state.can_produce(self.operator_type())? {
            return Ok(false);
        }
        if !self.child.get_next_tuples(result_set, context)? {
            return Ok(self.state.exhaust());
        }
        self.project(result_set)?;
        Ok(true)
    }

    fn copy(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self::new(
            self.id,
            self.child.copy(),
            self.expressions.clone(),
            self.print_info.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("id", &self.id)
            .field("expressions", &self.expressions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::function::InMemoryTableFunction;
    use crate::primitives::vector::DataChunk;
    use crate::processor::evaluator::ScalarFunction;
    use crate::processor::operators::TableFunctionCall;
    use crate::transaction::{Transaction, TransactionKind};
    use crate::types::{LogicalType, TransactionId, Value};

    #[test]
    fn writes_computed_and_constant_columns() {
        let source = TableFunctionCall::new(
            OperatorId(0),
            Arc::new(InMemoryTableFunction::new(
                "ages",
                vec![("age".into(), LogicalType::Int64)],
                vec![vec![Value::Int64(30)], vec![Value::Int64(41)]],
            )),
            None,
            vec![DataPos::new(0, 0)],
        );
        let plus_one = ExpressionEvaluator::Function {
            function: ScalarFunction::Add,
            children: vec![
                ExpressionEvaluator::Reference(DataPos::new(0, 0)),
                ExpressionEvaluator::Literal(Value::Int64(1)),
            ],
        };
        let mut op = Projection::new(
            OperatorId(1),
            Box::new(source),
            vec![
                (plus_one, DataPos::new(0, 1)),
                (
                    ExpressionEvaluator::Literal(Value::String("x".into())),
                    DataPos::new(1, 0),
                ),
            ],
            TextPrintInfo("age + 1, 'x'".into()),
        );
        let txn = Transaction::detached(TransactionId(1), TransactionKind::ReadOnly);
        let context = ExecutionContext::new(&txn);
        let mut result_set = ResultSet::new(vec![
            DataChunk::new(&[LogicalType::Int64, LogicalType::Int64]),
            DataChunk::single_state(&[LogicalType::String]),
        ]);
        op.init_local_state(&mut result_set, &context).unwrap();
        assert!(op.get_next_tuples(&mut result_set, &context).unwrap());
        let rows = result_set.flat_tuples(&[
            DataPos::new(0, 0),
            DataPos::new(0, 1),
            DataPos::new(1, 0),
        ]);
        assert_eq!(
            rows,
            vec![
                vec![Value::Int64(30), Value::Int64(31), Value::String("x".into())],
                vec![Value::Int64(41), Value::Int64(42), Value::String("x".into())],
            ]
        );
        assert!(!op.get_next_tuples(&mut result_set, &context).unwrap());
    }
}
