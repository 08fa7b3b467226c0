//! Parallel node table scan.
//!
//! Copies of one scan share a [`NodeGroupMorsels`] dispenser, so every node
//! group (committed, then the transaction's own uncommitted ones) is read by
//! exactly one copy.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::primitives::vector::{DataPos, ResultSet};
use crate::processor::{
    ExecutionContext, OperatorState, PhysicalOperator, PhysicalOperatorType, PrintInfo,
    TextPrintInfo,
};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::storage::{ColumnPredicateSet, NodeTable, NodeTableScanState, TableScanSource};
use crate::transaction::Transaction;
use crate::types::{ColumnId, NodeGroupIdx, OperatorId, Result};

use super::{copy_selected, set_selection};

/// One node table read by a scan, with its column bindings.
#[derive(Clone, Debug)]
pub struct NodeScanTarget {
    /// Table scanned.
    pub table: Arc<NodeTable>,
    /// `(output index, column)` for each property present in the table.
    /// Properties the table lacks are emitted as null.
    pub columns: Vec<(usize, ColumnId)>,
    /// Pushed-down predicates.
    pub predicates: Vec<ColumnPredicateSet>,
}

#[derive(Debug, Default)]
struct MorselQueue {
    initialized: bool,
    pending: VecDeque<(usize, TableScanSource, NodeGroupIdx)>,
}

/// Hands out `(target, source, node group)` work units to scan copies.
///
/// Filled on first use, when the transaction is known.
#[derive(Debug, Default)]
pub struct NodeGroupMorsels {
    queue: Mutex<MorselQueue>,
}

impl NodeGroupMorsels {
    /// Creates an empty dispenser.
    pub fn new() -> Self {
        Self::default()
    }

    fn next(
        &self,
        targets: &[NodeScanTarget],
        txn: &Transaction,
    ) -> Option<(usize, TableScanSource, NodeGroupIdx)> {
        let mut queue = self.queue.lock();
        if !queue.initialized {
            queue.initialized = true;
            for (idx, target) in targets.iter().enumerate() {
                for group in 0..target.table.num_committed_node_groups() {
                    queue.pending.push_back((idx, TableScanSource::Committed, group));
                }
                if txn.is_write_transaction() {
                    for group in 0..target.table.num_uncommitted_node_groups(txn) {
                        queue.pending.push_back((idx, TableScanSource::Uncommitted, group));
                    }
                }
            }
        }
        queue.pending.pop_front()
    }
}

/// Source emitting node ids and properties of one or more node tables.
pub struct ScanNodeTable {
    id: OperatorId,
    targets: Vec<NodeScanTarget>,
    morsels: Arc<NodeGroupMorsels>,
    node_pos: DataPos,
    property_pos: Vec<DataPos>,
    print_info: TextPrintInfo,
    scan_state: NodeTableScanState,
    current: Option<usize>,
    state: OperatorState,
}

impl ScanNodeTable {
    /// Creates the scan.
    pub fn new(
        id: OperatorId,
        targets: Vec<NodeScanTarget>,
        morsels: Arc<NodeGroupMorsels>,
        node_pos: DataPos,
        property_pos: Vec<DataPos>,
        print_info: TextPrintInfo,
    ) -> Self {
        Self {
            id,
            targets,
            morsels,
            node_pos,
            property_pos,
            print_info,
            scan_state: NodeTableScanState::new(),
            current: None,
            state: OperatorState::Uninitialized,
        }
    }

    fn next_morsel(&mut self, context: &ExecutionContext<'_>) -> Result<bool> {
        context.check_interrupted()?;
        let Some((idx, source, group)) = self.morsels.next(&self.targets, context.txn) else {
            return Ok(false);
        };
        let target = &self.targets[idx];
        let column_ids = target.columns.iter().map(|(_, column)| *column).collect();
        self.scan_state
            .set_to_table(context.txn, &target.table, column_ids, target.predicates.clone())?;
        self.scan_state.source = source;
        self.scan_state.node_group_idx = group;
        target.table.init_scan_state(context.txn, &mut self.scan_state)?;
        self.current = Some(idx);
        Ok(true)
    }

    fn emit(&self, idx: usize, result_set: &mut ResultSet) {
        let selection = self.scan_state.out_state().read().sel_vector().clone();
        copy_selected(
            self.scan_state.node_id_vector(),
            result_set.vector_mut(self.node_pos),
            &selection,
        );
        let target = &self.targets[idx];
        for (out, pos) in self.property_pos.iter().enumerate() {
            let vector = result_set.vector_mut(*pos);
            match target.columns.iter().position(|(index, _)| *index == out) {
                Some(scanned) => {
                    copy_selected(self.scan_state.output_vector(scanned), vector, &selection)
                }
                None => {
                    for row in selection.iter() {
                        vector.set_null(row, true);
                    }
                }
            }
        }
        set_selection(result_set, self.node_pos.chunk_pos, selection);
    }
}

impl PhysicalOperator for ScanNodeTable {
    fn operator_type(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::ScanNodeTable
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
        loop {
            let idx = match self.current {
                Some(idx) => idx,
                None => {
                    if !self.next_morsel(context)? {
                        return Ok(self.state.exhaust());
                    }
                    continue;
                }
            };
            let timer = profile_timer();
            let produced = self.targets[idx]
                .table
                .scan(context.txn, &mut self.scan_state)?;
            record_profile_timer(QueryProfileKind::Scan, timer);
            if produced {
                self.emit(idx, result_set);
                return Ok(true);
            }
            self.current = None;
        }
    }

    fn copy(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self::new(
            self.id,
            self.targets.clone(),
            Arc::clone(&self.morsels),
            self.node_pos,
            self.property_pos.clone(),
            self.print_info.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        Vec::new()
    }
}

impl fmt::Debug for ScanNodeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanNodeTable")
            .field("id", &self.id)
            .field("tables", &self.targets.len())
            .field("state", &self.state)
            .finish()
    }
}
