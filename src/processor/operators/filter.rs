use std::fmt;

use crate::primitives::vector::{ResultSet, SelectionVector};
use crate::processor::{
    evaluator::ExpressionEvaluator, ExecutionContext, OperatorState, PhysicalOperator,
    PhysicalOperatorType, PrintInfo, TextPrintInfo,
};
use crate::types::{OperatorId, Result, Value};

use super::set_selection;

/// Keeps the rows whose predicate evaluates to `true`; null counts as false.
///
/// Batches left without rows are skipped, so a returned batch is never empty.
pub struct Filter {
    id: OperatorId,
    child: Box<dyn PhysicalOperator>,
    predicate: ExpressionEvaluator,
    print_info: TextPrintInfo,
    state: OperatorState,
}

impl Filter {
    /// Creates the filter over `child`.
    pub fn new(
        id: OperatorId,
        child: Box<dyn PhysicalOperator>,
        predicate: ExpressionEvaluator,
        print_info: TextPrintInfo,
    ) -> Self {
        Self {
            id,
            child,
            predicate,
            print_info,
            state: OperatorState::Uninitialized,
        }
    }
}

impl PhysicalOperator for Filter {
    fn operator_type(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::Filter
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
        loop {
            if !self.child.get_next_tuples(result_set, context)? {
                return Ok(self.state.exhaust());
            }
            let (driving, values) = self.predicate.evaluate(result_set)?;
            let Some(chunk_pos) = driving else {
                if values.iter().any(|(_, value)| *value == Value::Bool(true)) {
                    return Ok(true);
                }
                continue;
            };
            let total = values.len();
            let kept: Vec<u16> = values
                .into_iter()
                .filter(|(_, value)| *value == Value::Bool(true))
                .map(|(pos, _)| pos as u16)
                .collect();
            if kept.is_empty() {
                continue;
            }
            if kept.len() != total {
                set_selection(result_set, chunk_pos, SelectionVector::filtered(kept));
            }
            return Ok(true);
        }
    }

    fn copy(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self::new(
            self.id,
            self.child.copy(),
            self.predicate.clone(),
            self.print_info.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("id", &self.id)
            .field("predicate", &self.predicate)
            .finish()
    }
}
