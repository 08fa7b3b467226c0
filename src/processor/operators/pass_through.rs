use std::fmt;

use crate::primitives::vector::ResultSet;
use crate::processor::{
    ExecutionContext, OperatorState, PhysicalOperator, PhysicalOperatorType, PrintInfo,
    TextPrintInfo,
};
use crate::types::{OperatorId, Result};

/// Operator that forwards its child's batches unchanged.
///
/// Backs `ACCUMULATE`, `MULTIPLICITY_REDUCER` and `EXPLAIN`, whose effect in
/// this engine is limited to plan shape and explain output.
pub struct PassThrough {
    id: OperatorId,
    kind: PhysicalOperatorType,
    child: Box<dyn PhysicalOperator>,
    print_info: TextPrintInfo,
    state: OperatorState,
}

impl PassThrough {
    /// Wraps `child`, reporting `kind` as the operator type.
    pub fn new(id: OperatorId, kind: PhysicalOperatorType, child: Box<dyn PhysicalOperator>) -> Self {
        Self {
            id,
            kind,
            child,
            print_info: TextPrintInfo::default(),
            state: OperatorState::Uninitialized,
        }
    }
}

impl PhysicalOperator for PassThrough {
    fn operator_type(&self) -> PhysicalOperatorType {
        self.kind
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
        self.state.initialize(self.kind)?;
        self.child.init_local_state(result_set, context)
    }

    fn get_next_tuples(
        &mut self,
        result_set: &mut ResultSet,
        context: &ExecutionContext<'_>,
    ) -> Result<bool> {
        if !self.state.can_produce(self.kind)? {
            return Ok(false);
        }
        if self.child.get_next_tuples(result_set, context)? {
            Ok(true)
        } else {
            Ok(self.state.exhaust())
        }
    }

    fn copy(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self::new(self.id, self.kind, self.child.copy()))
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

impl fmt::Debug for PassThrough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassThrough")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
