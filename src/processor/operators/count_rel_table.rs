//! Fused `COUNT(*)` over the relationships of one group.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::primitives::vector::{DataPos, ResultSet, SelectionVector};
use crate::processor::{
    ExecutionContext, OperatorState, PhysicalOperator, PhysicalOperatorType, PrintInfo,
};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::storage::{
    NodeTable, NodeTableScanState, RelDirection, RelTable, RelTableScanState, TableScanSource,
};
use crate::transaction::Transaction;
use crate::types::{OperatorId, Result};

use super::set_selection;

/// How the count is computed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CountScanMode {
    /// Sum of per-table row counts. Only valid without predicates or
    /// projected properties.
    Aggregate,
    /// Scan every bound node and accumulate its relationships.
    Scan,
}

/// Explain description of the fused count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountRelTablePrintInfo {
    rel_group_name: String,
}

impl CountRelTablePrintInfo {
    /// Describes a count over `rel_group_name`.
    pub fn new(rel_group_name: impl Into<String>) -> Self {
        Self {
            rel_group_name: rel_group_name.into(),
        }
    }
}

impl fmt::Display for CountRelTablePrintInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table: {}", self.rel_group_name)
    }
}

impl PrintInfo for CountRelTablePrintInfo {
    fn copy(&self) -> Box<dyn PrintInfo> {
        Box::new(self.clone())
    }
}

/// Source producing a single row holding the relationship count.
pub struct CountRelTable {
    id: OperatorId,
    node_tables: Vec<Arc<NodeTable>>,
    rel_tables: Vec<Arc<RelTable>>,
    direction: RelDirection,
    count_pos: DataPos,
    mode: CountScanMode,
    fast_path_eligible: bool,
    print_info: CountRelTablePrintInfo,
    state: OperatorState,
}

impl CountRelTable {
    /// Creates the operator.
    ///
    /// Panics when `mode` is [`CountScanMode::Aggregate`] but the optimizer did
    /// not prove the fast path valid.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OperatorId,
        node_tables: Vec<Arc<NodeTable>>,
        rel_tables: Vec<Arc<RelTable>>,
        direction: RelDirection,
        count_pos: DataPos,
        mode: CountScanMode,
        fast_path_eligible: bool,
        print_info: CountRelTablePrintInfo,
    ) -> Self {
        assert!(
            mode != CountScanMode::Aggregate || fast_path_eligible,
            "aggregate count requested for an ineligible plan"
        );
        Self {
            id,
            node_tables,
            rel_tables,
            direction,
            count_pos,
            mode,
            fast_path_eligible,
            print_info,
            state: OperatorState::Uninitialized,
        }
    }

    /// Count strategy.
    pub fn mode(&self) -> CountScanMode {
        self.mode
    }

    fn count_aggregate(&self, txn: &Transaction) -> u64 {
        assert!(self.fast_path_eligible, "aggregate count on an ineligible plan");
        self.rel_tables
            .iter()
            .map(|table| table.num_total_rows(txn))
            .sum()
    }

    fn count_scan(&self, context: &ExecutionContext<'_>) -> Result<u64> {
        let txn = context.txn;
        let mut total = 0u64;
        let mut node_state = NodeTableScanState::new();
        let mut rel_state = RelTableScanState::new();
        for node_table in &self.node_tables {
            let rel_tables: Vec<&Arc<RelTable>> = self
                .rel_tables
                .iter()
                .filter(|rel| rel.bound_table(self.direction) == node_table.id())
                .collect();
            if rel_tables.is_empty() {
                continue;
            }
            node_state.set_to_table(txn, node_table, Vec::new(), Vec::new())?;
            let uncommitted = if txn.is_write_transaction() {
                node_table.num_uncommitted_node_groups(txn)
            } else {
                0
            };
            let sources = [
                (TableScanSource::Committed, node_table.num_committed_node_groups()),
                (TableScanSource::Uncommitted, uncommitted),
            ];
            for (source, num_groups) in sources {
                for idx in 0..num_groups {
                    context.check_interrupted()?;
                    node_state.source = source;
                    node_state.node_group_idx = idx;
                    node_table.init_scan_state(txn, &mut node_state)?;
                    while node_table.scan(txn, &mut node_state)? {
                        for rel_table in &rel_tables {
                            rel_state.set_to_table(
                                txn,
                                rel_table,
                                Vec::new(),
                                Vec::new(),
                                self.direction,
                            )?;
                            rel_state.bind_nodes(node_state.node_id_vector());
                            rel_table.init_scan_state(txn, &mut rel_state)?;
                            while rel_table.scan(txn, &mut rel_state)? {
                                total += rel_state.out_state().read().sel_size() as u64;
                            }
                        }
                    }
                }
            }
        }
        Ok(total)
    }
}

impl PhysicalOperator for CountRelTable {
    fn operator_type(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::CountRelTable
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
        let timer = profile_timer();
        let total = match self.mode {
            CountScanMode::Aggregate => self.count_aggregate(context.txn),
            CountScanMode::Scan => self.count_scan(context)?,
        };
        record_profile_timer(QueryProfileKind::Scan, timer);
        debug!(
            mode = ?self.mode,
            tables = self.rel_tables.len(),
            total,
            "processor.count_rel_table.counted"
        );
        result_set
            .vector_mut(self.count_pos)
            .set_i64(0, i64::try_from(total).unwrap_or(i64::MAX));
        set_selection(result_set, self.count_pos.chunk_pos, SelectionVector::unfiltered(1));
        self.state.exhaust();
        Ok(true)
    }

    fn copy(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            id: self.id,
            node_tables: self.node_tables.clone(),
            rel_tables: self.rel_tables.clone(),
            direction: self.direction,
            count_pos: self.count_pos,
            mode: self.mode,
            fast_path_eligible: self.fast_path_eligible,
            print_info: self.print_info.clone(),
            state: OperatorState::Uninitialized,
        })
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::vector::DataChunk;
    use crate::storage::{StorageManager, StorageOptions};
    use crate::transaction::TransactionManager;
    use crate::types::{LogicalType, TableId, Value};

    fn graph() -> (StorageManager, TransactionManager) {
        let storage = StorageManager::new(StorageOptions::default().node_group_capacity(3));
        storage
            .create_node_table(TableId(0), "Person", Vec::new())
            .unwrap();
        storage
            .create_rel_table(TableId(1), "KNOWS", TableId(0), TableId(0), Vec::new())
            .unwrap();
        let manager = TransactionManager::new();
        let txn = manager.begin_write().unwrap();
        let people: Vec<_> = (0..7)
            .map(|_| storage.insert_node(&txn, TableId(0), Vec::new()).unwrap())
            .collect();
        for (src, dst) in [(0, 1), (0, 2), (3, 4), (6, 0), (6, 5)] {
            storage
                .insert_rel(&txn, TableId(1), people[src], people[dst], Vec::new())
                .unwrap();
        }
        manager.commit(txn, &storage).unwrap();
        (storage, manager)
    }

    fn run(op: &mut CountRelTable, txn: &Transaction) -> Value {
        let mut result_set = ResultSet::new(vec![DataChunk::single_state(&[LogicalType::Int64])]);
        let context = ExecutionContext::new(txn);
        op.init_local_state(&mut result_set, &context).unwrap();
        assert!(op.get_next_tuples(&mut result_set, &context).unwrap());
        assert!(!op.get_next_tuples(&mut result_set, &context).unwrap());
        result_set.vector(DataPos::new(0, 0)).get_value(0)
    }

    fn operator(storage: &StorageManager, mode: CountScanMode, direction: RelDirection) -> CountRelTable {
        CountRelTable::new(
            OperatorId(0),
            vec![storage.get_node_table(TableId(0)).unwrap()],
            vec![storage.get_rel_table(TableId(1)).unwrap()],
            direction,
            DataPos::new(0, 0),
            mode,
            true,
            CountRelTablePrintInfo::new("KNOWS"),
        )
    }

    #[test]
    fn both_modes_agree_across_node_groups() {
        let (storage, manager) = graph();
        let txn = manager.begin_read();
        for direction in [RelDirection::Forward, RelDirection::Backward] {
            let mut scan = operator(&storage, CountScanMode::Scan, direction);
            let mut fast = operator(&storage, CountScanMode::Aggregate, direction);
            assert_eq!(run(&mut scan, &txn), Value::Int64(5));
            assert_eq!(run(&mut fast, &txn), Value::Int64(5));
        }
    }

    #[test]
    fn copy_resets_state_and_keeps_print_info() {
        let (storage, manager) = graph();
        let txn = manager.begin_read();
        let mut op = operator(&storage, CountScanMode::Scan, RelDirection::Forward);
        run(&mut op, &txn);
        let copy = op.copy();
        assert_eq!(copy.print_info().to_string(), "Table: KNOWS");
        let mut result_set = ResultSet::new(vec![DataChunk::single_state(&[LogicalType::Int64])]);
        let context = ExecutionContext::new(&txn);
        let mut copy = copy;
        assert!(copy.get_next_tuples(&mut result_set, &context).is_err());
    }

    #[test]
    #[should_panic(expected = "ineligible")]
    fn aggregate_mode_requires_eligibility() {
        let (storage, _) = graph();
        CountRelTable::new(
            OperatorId(0),
            Vec::new(),
            vec![storage.get_rel_table(TableId(1)).unwrap()],
            RelDirection::Forward,
            DataPos::new(0, 0),
            CountScanMode::Aggregate,
            false,
            CountRelTablePrintInfo::new("KNOWS"),
        );
    }
}
