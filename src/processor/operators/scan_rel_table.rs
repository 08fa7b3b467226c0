//! Relationship expansion from a batch of bound nodes.

use std::fmt;
use std::sync::Arc;

use crate::primitives::vector::{DataPos, ResultSet, SelectionVector};
use crate::processor::{
    ExecutionContext, OperatorState, PhysicalOperator, PhysicalOperatorType, PrintInfo,
    TextPrintInfo,
};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::storage::{ColumnPredicateSet, RelDirection, RelTable, RelTableScanState};
use crate::types::{ColumnId, OperatorId, Result};

use super::{copy_selected, set_selection};

/// One relationship table traversed in one direction.
#[derive(Clone, Debug)]
pub struct RelScanTarget {
    /// Table scanned.
    pub table: Arc<RelTable>,
    /// Traversal direction.
    pub direction: RelDirection,
    /// `(output index, column)` per projected property.
    pub columns: Vec<(usize, ColumnId)>,
    /// Pushed-down predicates.
    pub predicates: Vec<ColumnPredicateSet>,
}

/// Output vectors written by the expansion.
#[derive(Clone, Debug)]
pub struct RelScanOutput {
    /// Bound node ids, read from the child.
    pub bound_pos: DataPos,
    /// Neighbour node ids.
    pub nbr_pos: DataPos,
    /// Relationship ids.
    pub rel_pos: DataPos,
    /// Projected relationship properties.
    pub property_pos: Vec<DataPos>,
}

/// Expands every bound node of the child batch, one node at a time.
///
/// While a node's relationships are emitted the bound chunk is narrowed to
/// that node; the child's selection is restored before each table.
pub struct ScanRelTable {
    id: OperatorId,
    child: Box<dyn PhysicalOperator>,
    targets: Vec<RelScanTarget>,
    output: RelScanOutput,
    print_info: TextPrintInfo,
    scan_state: RelTableScanState,
    bound_selection: SelectionVector,
    current: Option<usize>,
    state: OperatorState,
}

impl ScanRelTable {
    /// Creates the expansion over `child`.
    pub fn new(
        id: OperatorId,
        child: Box<dyn PhysicalOperator>,
        targets: Vec<RelScanTarget>,
        output: RelScanOutput,
        print_info: TextPrintInfo,
    ) -> Self {
        Self {
            id,
            child,
            targets,
            output,
            print_info,
            scan_state: RelTableScanState::new(),
            bound_selection: SelectionVector::default(),
            current: None,
            state: OperatorState::Uninitialized,
        }
    }

    fn start_target(
        &mut self,
        idx: usize,
        result_set: &ResultSet,
        context: &ExecutionContext<'_>,
    ) -> Result<()> {
        set_selection(result_set, self.output.bound_pos.chunk_pos, self.bound_selection.clone());
        let target = &self.targets[idx];
        self.scan_state.set_to_table(
            context.txn,
            &target.table,
            target.columns.iter().map(|(_, column)| *column).collect(),
            target.predicates.clone(),
            target.direction,
        )?;
        self.scan_state
            .bind_nodes(result_set.vector(self.output.bound_pos));
        target.table.init_scan_state(context.txn, &mut self.scan_state)?;
        self.current = Some(idx);
        Ok(())
    }

    fn emit(&self, idx: usize, result_set: &mut ResultSet) {
        let selection = self.scan_state.out_state().read().sel_vector().clone();
        copy_selected(
            self.scan_state.nbr_id_vector(),
            result_set.vector_mut(self.output.nbr_pos),
            &selection,
        );
        copy_selected(
            self.scan_state.rel_id_vector(),
            result_set.vector_mut(self.output.rel_pos),
            &selection,
        );
        let columns = &self.targets[idx].columns;
        for (out, pos) in self.output.property_pos.iter().enumerate() {
            let vector = result_set.vector_mut(*pos);
            match columns.iter().position(|(index, _)| *index == out) {
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
        set_selection(result_set, self.output.nbr_pos.chunk_pos, selection);
        if let Some(bound) = self.scan_state.current_bound_pos() {
            set_selection(
                result_set,
                self.output.bound_pos.chunk_pos,
                SelectionVector::filtered(vec![bound as u16]),
            );
        }
    }
}

impl PhysicalOperator for ScanRelTable {
    fn operator_type(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::ScanRelTable
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
            if let Some(idx) = self.current {
                let timer = profile_timer();
                let produced = self.targets[idx]
                    .table
                    .scan(context.txn, &mut self.scan_state)?;
                record_profile_timer(QueryProfileKind::Scan, timer);
                if produced {
                    self.emit(idx, result_set);
                    return Ok(true);
                }
                if idx + 1 < self.targets.len() {
                    self.start_target(idx + 1, result_set, context)?;
                    continue;
                }
                self.current = None;
            }
            if !self.child.get_next_tuples(result_set, context)? {
                return Ok(self.state.exhaust());
            }
            context.check_interrupted()?;
            if self.targets.is_empty() {
                continue;
            }
            self.bound_selection = result_set
                .chunk(self.output.bound_pos.chunk_pos)
                .state()
                .read()
                .sel_vector()
                .clone();
            self.start_target(0, result_set, context)?;
        }
    }

    fn copy(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self::new(
            self.id,
            self.child.copy(),
            self.targets.clone(),
            self.output.clone(),
            self.print_info.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

impl fmt::Debug for ScanRelTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanRelTable")
            .field("id", &self.id)
            .field("tables", &self.targets.len())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::vector::DataChunk;
    use crate::processor::operators::{NodeGroupMorsels, NodeScanTarget, ScanNodeTable};
    use crate::storage::{ColumnPredicate, CompareOp, StorageManager, StorageOptions};
    use crate::transaction::{Transaction, TransactionManager};
    use crate::types::{InternalId, LogicalType, TableId, Value};

    fn graph() -> (StorageManager, TransactionManager, Vec<InternalId>) {
        let storage = StorageManager::new(StorageOptions::default().node_group_capacity(2));
        storage
            .create_node_table(TableId(0), "Person", Vec::new())
            .unwrap();
        storage
            .create_rel_table(
                TableId(1),
                "KNOWS",
                TableId(0),
                TableId(0),
                vec![("since".into(), LogicalType::Int64)],
            )
            .unwrap();
        let manager = TransactionManager::new();
        let txn = manager.begin_write().unwrap();
        let people: Vec<_> = (0..4)
            .map(|_| storage.insert_node(&txn, TableId(0), Vec::new()).unwrap())
            .collect();
        for (src, dst, since) in [(0, 1, 2001), (0, 2, 2002), (2, 3, 2003), (3, 0, 2004)] {
            storage
                .insert_rel(&txn, TableId(1), people[src], people[dst], vec![Value::Int64(since)])
                .unwrap();
        }
        manager.commit(txn, &storage).unwrap();
        (storage, manager, people)
    }

    fn expand(
        storage: &StorageManager,
        directions: &[RelDirection],
        predicates: Vec<ColumnPredicateSet>,
    ) -> ScanRelTable {
        let scan = ScanNodeTable::new(
            OperatorId(0),
            vec![NodeScanTarget {
                table: storage.get_node_table(TableId(0)).unwrap(),
                columns: Vec::new(),
                predicates: Vec::new(),
            }],
            Arc::new(NodeGroupMorsels::new()),
            DataPos::new(0, 0),
            Vec::new(),
            TextPrintInfo("Person".into()),
        );
        let rel_table = storage.get_rel_table(TableId(1)).unwrap();
        let targets = directions
            .iter()
            .map(|direction| RelScanTarget {
                table: Arc::clone(&rel_table),
                direction: *direction,
                columns: vec![(0, 0)],
                predicates: predicates.clone(),
            })
            .collect();
        ScanRelTable::new(
            OperatorId(1),
            Box::new(scan),
            targets,
            RelScanOutput {
                bound_pos: DataPos::new(0, 0),
                nbr_pos: DataPos::new(1, 0),
                rel_pos: DataPos::new(1, 1),
                property_pos: vec![DataPos::new(1, 2)],
            },
            TextPrintInfo("KNOWS".into()),
        )
    }

    fn drain(op: &mut ScanRelTable, txn: &Transaction) -> Vec<Vec<Value>> {
        let mut result_set = ResultSet::new(vec![
            DataChunk::new(&[LogicalType::InternalId]),
            DataChunk::new(&[LogicalType::InternalId, LogicalType::InternalId, LogicalType::Int64]),
        ]);
        let context = ExecutionContext::new(txn);
        op.init_local_state(&mut result_set, &context).unwrap();
        let mut rows = Vec::new();
        while op.get_next_tuples(&mut result_set, &context).unwrap() {
            rows.extend(result_set.flat_tuples(&[
                DataPos::new(0, 0),
                DataPos::new(1, 0),
                DataPos::new(1, 2),
            ]));
        }
        rows
    }

    #[test]
    fn forward_expansion_pairs_bound_and_neighbour() {
        let (storage, manager, people) = graph();
        let txn = manager.begin_read();
        let rows = drain(&mut expand(&storage, &[RelDirection::Forward], Vec::new()), &txn);
        let pairs: Vec<_> = rows
            .iter()
            .map(|row| (row[0].clone(), row[1].clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Value::InternalId(people[0]), Value::InternalId(people[1])),
                (Value::InternalId(people[0]), Value::InternalId(people[2])),
                (Value::InternalId(people[2]), Value::InternalId(people[3])),
                (Value::InternalId(people[3]), Value::InternalId(people[0])),
            ]
        );
    }

    #[test]
    fn both_directions_visit_each_relationship_twice() {
        let (storage, manager, _) = graph();
        let txn = manager.begin_read();
        let op = &mut expand(
            &storage,
            &[RelDirection::Forward, RelDirection::Backward],
            Vec::new(),
        );
        assert_eq!(drain(op, &txn).len(), 8);
    }

    #[test]
    fn predicates_narrow_relationships() {
        let (storage, manager, _) = graph();
        let txn = manager.begin_read();
        let predicates = vec![ColumnPredicateSet::new(
            0,
            vec![ColumnPredicate::new(CompareOp::Gt, Value::Int64(2002))],
        )];
        let rows = drain(&mut expand(&storage, &[RelDirection::Forward], predicates), &txn);
        let since: Vec<_> = rows.into_iter().map(|row| row[2].clone()).collect();
        assert_eq!(since, vec![Value::Int64(2003), Value::Int64(2004)]);
    }
}
