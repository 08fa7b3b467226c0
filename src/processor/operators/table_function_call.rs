//! Source over a [`TableFunction`].

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::function::TableFunction;
use crate::primitives::vector::{DataPos, ResultSet};
use crate::processor::{
    ExecutionContext, OperatorState, PhysicalOperator, PhysicalOperatorType, PrintInfo,
    TextPrintInfo,
};
use crate::types::{OperatorId, PenumbraError, Result};

use super::RowBuffer;

/// Calls the function once and streams its rows.
pub struct TableFunctionCall {
    id: OperatorId,
    function: Arc<dyn TableFunction>,
    order_by: Option<String>,
    column_pos: Vec<DataPos>,
    print_info: TextPrintInfo,
    rows: Option<RowBuffer>,
    state: OperatorState,
}

impl TableFunctionCall {
    /// Creates the call. `order_by` is forwarded to the function verbatim.
    pub fn new(
        id: OperatorId,
        function: Arc<dyn TableFunction>,
        order_by: Option<String>,
        column_pos: Vec<DataPos>,
    ) -> Self {
        let print_info = TextPrintInfo(format!(
            "{}{}",
            function.name(),
            order_by.as_deref().unwrap_or("")
        ));
        Self {
            id,
            function,
            order_by,
            column_pos,
            print_info,
            rows: None,
            state: OperatorState::Uninitialized,
        }
    }

    fn fetch(&self) -> Result<RowBuffer> {
        let rows = self.function.scan(self.order_by.as_deref())?;
        if let Some(row) = rows.iter().find(|row| row.len() != self.column_pos.len()) {
            return Err(PenumbraError::Query(format!(
                "table function {} returned {} columns, expected {}",
                self.function.name(),
                row.len(),
                self.column_pos.len()
            )));
        }
        debug!(
            function = self.function.name(),
            rows = rows.len(),
            ordered = self.order_by.is_some(),
            "processor.table_function_call.scanned"
        );
        Ok(RowBuffer::new(rows))
    }
}

impl PhysicalOperator for TableFunctionCall {
    fn operator_type(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::TableFunctionCall
    }

    fn id(&self) -> OperatorId {
        self.id
    }

    fn print_info(&self) -> &dyn PrintInfo {
        &self.print_info
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_parallel(&self) -> bool {
        false
    }

    fn init_local_state(
        &mut self,
        _result_set: &mut ResultSet,
        _context: &ExecutionContext<'_>,
    ) -> Result<()> {
        self.state.initialize(self.operator_type())
    }

    fn get_next_tuples(
        &mut self,
        result_set: &mut ResultSet,
        context: &ExecutionContext<'_>,
    ) -> Result<bool> {
        if !self.state.can_produce(self.operator_type())? {
            return Ok(false);
        }
        context.check_interrupted()?;
        let rows = match &mut self.rows {
            Some(rows) => rows,
            None => self.rows.insert(self.fetch()?),
        };
        if rows.emit(result_set, &self.column_pos) {
            Ok(true)
        } else {
            Ok(self.state.exhaust())
        }
    }

    fn copy(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self::new(
            self.id,
            Arc::clone(&self.function),
            self.order_by.clone(),
            self.column_pos.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        Vec::new()
    }
}

impl fmt::Debug for TableFunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableFunctionCall")
            .field("id", &self.id)
            .field("function", &self.function.name())
            .field("order_by", &self.order_by)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::InMemoryTableFunction;
    use crate::primitives::vector::{DataChunk, VECTOR_CAPACITY};
    use crate::transaction::{Transaction, TransactionKind};
    use crate::types::{LogicalType, TransactionId, Value};

    fn numbers(count: i64) -> Arc<dyn TableFunction> {
        Arc::new(InMemoryTableFunction::new(
            "numbers",
            vec![("n".into(), LogicalType::Int64)],
            (0..count).rev().map(|n| vec![Value::Int64(n)]).collect(),
        ))
    }

    fn drain(op: &mut TableFunctionCall) -> Result<Vec<usize>> {
        let txn = Transaction::detached(TransactionId(1), TransactionKind::ReadOnly);
        let context = ExecutionContext::new(&txn);
        let mut result_set = ResultSet::new(vec![DataChunk::new(&[LogicalType::Int64])]);
        op.init_local_state(&mut result_set, &context)?;
        let mut batches = Vec::new();
        while op.get_next_tuples(&mut result_set, &context)? {
            batches.push(result_set.chunk(0).sel_size());
        }
        Ok(batches)
    }

    #[test]
    fn emits_in_vector_sized_batches() {
        let mut op = TableFunctionCall::new(
            OperatorId(0),
            numbers(VECTOR_CAPACITY as i64 + 5),
            None,
            vec![DataPos::new(0, 0)],
        );
        assert_eq!(drain(&mut op).unwrap(), vec![VECTOR_CAPACITY, 5]);
    }

    #[test]
    fn forwards_order_clause_and_describes_it() {
        let mut op = TableFunctionCall::new(
            OperatorId(0),
            numbers(3),
            Some(" ORDER BY n ASC".into()),
            vec![DataPos::new(0, 0)],
        );
        assert_eq!(op.print_info().to_string(), "numbers ORDER BY n ASC");
        let txn = Transaction::detached(TransactionId(1), TransactionKind::ReadOnly);
        let context = ExecutionContext::new(&txn);
        let mut result_set = ResultSet::new(vec![DataChunk::new(&[LogicalType::Int64])]);
        op.init_local_state(&mut result_set, &context).unwrap();
        assert!(op.get_next_tuples(&mut result_set, &context).unwrap());
        assert_eq!(
            result_set.vector(DataPos::new(0, 0)).selected_values(),
            vec![Value::Int64(0), Value::Int64(1), Value::Int64(2)]
        );
    }

    #[test]
    fn row_width_mismatch_is_rejected() {
        let mut op = TableFunctionCall::new(
            OperatorId(0),
            numbers(1),
            None,
            vec![DataPos::new(0, 0), DataPos::new(0, 1)],
        );
        assert!(matches!(drain(&mut op), Err(PenumbraError::Query(_))));
    }
}
