//! Physical operators.

mod aggregate;
mod count_rel_table;
mod filter;
mod order_by;
mod pass_through;
mod projection;
mod scan_node_table;
mod scan_rel_table;
mod table_function_call;

pub use aggregate::{AggregateFunction, AggregateSpec, SimpleAggregate};
pub use count_rel_table::{CountRelTable, CountRelTablePrintInfo, CountScanMode};
pub use filter::Filter;
pub use order_by::{skip_limit_count, OrderBy, SortKey};
pub use pass_through::PassThrough;
pub use projection::Projection;
pub use scan_node_table::{NodeGroupMorsels, NodeScanTarget, ScanNodeTable};
pub use scan_rel_table::{RelScanOutput, RelScanTarget, ScanRelTable};
pub use table_function_call::TableFunctionCall;

use crate::primitives::vector::{DataPos, ResultSet, SelectionVector, ValueVector, VECTOR_CAPACITY};
use crate::types::Value;

/// Copies the active rows of `src` into the same positions of `dst`.
pub(crate) fn copy_selected(src: &ValueVector, dst: &mut ValueVector, selection: &SelectionVector) {
    for pos in selection.iter() {
        dst.set_value(pos, &src.get_value(pos));
    }
}

/// Replaces the selection of the chunk at `chunk_pos`.
pub(crate) fn set_selection(result_set: &ResultSet, chunk_pos: usize, selection: SelectionVector) {
    *result_set.chunk(chunk_pos).state().write().sel_vector_mut() = selection;
}

/// Materialized rows emitted in batches of at most [`VECTOR_CAPACITY`].
#[derive(Clone, Debug, Default)]
pub(crate) struct RowBuffer {
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

impl RowBuffer {
    pub(crate) fn new(rows: Vec<Vec<Value>>) -> Self {
        Self { rows, cursor: 0 }
    }

    /// Writes the next batch into `positions`, which all live in one chunk.
    /// Returns `false` once every row was emitted.
    pub(crate) fn emit(&mut self, result_set: &mut ResultSet, positions: &[DataPos]) -> bool {
        let remaining = self.rows.len() - self.cursor;
        if remaining == 0 {
            return false;
        }
        let count = remaining.min(VECTOR_CAPACITY);
        for (i, row) in self.rows[self.cursor..self.cursor + count].iter().enumerate() {
            for (pos, value) in positions.iter().zip(row) {
                result_set.vector_mut(*pos).set_value(i, value);
            }
        }
        self.cursor += count;
        if let Some(first) = positions.first() {
            set_selection(result_set, first.chunk_pos, SelectionVector::unfiltered(count));
        }
        true
    }
}
