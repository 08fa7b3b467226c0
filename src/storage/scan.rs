//! Scan states retargeted per table before each scan.

use std::fmt;
use std::sync::Arc;

use crate::primitives::vector::{DataChunkState, SharedChunkState, ValueVector};
use crate::transaction::Transaction;
use crate::types::{
    ColumnId, InternalId, LogicalType, NodeGroupIdx, PenumbraError, Result, TableId,
    TransactionId,
};

use super::node_group::NodeGroup;
use super::predicate::ColumnPredicateSet;
use super::rel_table::RelStore;

/// Which version of a table's rows a node scan reads.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TableScanSource {
    /// Durable node groups shared by every transaction.
    Committed,
    /// The transaction's own overlay.
    Uncommitted,
}

/// Adjacency structure traversed by a relationship scan.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RelDirection {
    /// Source to destination.
    Forward,
    /// Destination to source.
    Backward,
}

impl RelDirection {
    /// Opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            RelDirection::Forward => RelDirection::Backward,
            RelDirection::Backward => RelDirection::Forward,
        }
    }
}

impl fmt::Display for RelDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelDirection::Forward => f.write_str("fwd"),
            RelDirection::Backward => f.write_str("bwd"),
        }
    }
}

/// Binding of a scan state to one table within one transaction.
#[derive(Clone, Debug, Default)]
pub(crate) struct ScanTarget {
    pub(crate) table: Option<TableId>,
    pub(crate) txn: Option<TransactionId>,
    pub(crate) column_ids: Vec<ColumnId>,
    pub(crate) predicates: Vec<ColumnPredicateSet>,
}

impl ScanTarget {
    pub(crate) fn bind(
        &mut self,
        txn: &Transaction,
        table: TableId,
        column_ids: Vec<ColumnId>,
        predicates: Vec<ColumnPredicateSet>,
    ) {
        self.table = Some(table);
        self.txn = Some(txn.id());
        self.column_ids = column_ids;
        self.predicates = predicates;
    }

    /// Fails unless the state was retargeted at `table` within `txn`.
    pub(crate) fn check(&self, txn: &Transaction, table: TableId) -> Result<()> {
        match self.table {
            None => Err(PenumbraError::Storage(
                "scan state used before set_to_table".into(),
            )),
            Some(bound) if bound != table => Err(PenumbraError::Storage(format!(
                "scan state is bound to table {bound}, not {table}"
            ))),
            Some(_) if self.txn != Some(txn.id()) => Err(PenumbraError::Storage(format!(
                "scan state is bound to another transaction than {}",
                txn.id()
            ))),
            Some(_) => Ok(()),
        }
    }
}

fn validate_columns(
    column_ids: &[ColumnId],
    predicates: &[ColumnPredicateSet],
    types: &[LogicalType],
) -> Result<()> {
    let num_columns = types.len() as ColumnId;
    if let Some(bad) = column_ids
        .iter()
        .copied()
        .chain(predicates.iter().map(|set| set.column_id))
        .find(|id| *id >= num_columns)
    {
        return Err(PenumbraError::Query(format!(
            "invalid scan retarget: column {bad} out of range ({num_columns} columns)"
        )));
    }
    Ok(())
}

/// Scan state over the node groups of one node table.
///
/// Output vectors share one chunk state so that predicate filtering narrows
/// every column at once.
#[derive(Debug)]
pub struct NodeTableScanState {
    /// Whether committed or uncommitted node groups are read.
    pub source: TableScanSource,
    /// Node group to read on the next `init_scan_state`.
    pub node_group_idx: NodeGroupIdx,
    pub(crate) target: ScanTarget,
    pub(crate) node_id_vector: ValueVector,
    pub(crate) output_vectors: Vec<ValueVector>,
    pub(crate) group: Option<Arc<NodeGroup>>,
    pub(crate) next_row: u64,
}

impl Default for NodeTableScanState {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTableScanState {
    /// Creates an unbound scan state with its own output state.
    pub fn new() -> Self {
        Self::with_state(DataChunkState::shared())
    }

    /// Creates an unbound scan state writing into `state`.
    pub fn with_state(state: SharedChunkState) -> Self {
        Self {
            source: TableScanSource::Committed,
            node_group_idx: 0,
            target: ScanTarget::default(),
            node_id_vector: ValueVector::with_state(LogicalType::InternalId, state),
            output_vectors: Vec::new(),
            group: None,
            next_row: 0,
        }
    }

    /// Retargets the state at `table`, resetting the group cursor.
    pub fn set_to_table(
        &mut self,
        txn: &Transaction,
        table: &super::NodeTable,
        column_ids: Vec<ColumnId>,
        predicates: Vec<ColumnPredicateSet>,
    ) -> Result<()> {
        validate_columns(&column_ids, &predicates, table.column_types())?;
        let state = Arc::clone(self.node_id_vector.state());
        self.output_vectors = column_ids
            .iter()
            .map(|id| ValueVector::with_state(table.column_types()[*id as usize], Arc::clone(&state)))
            .collect();
        self.target.bind(txn, table.id(), column_ids, predicates);
        self.source = TableScanSource::Committed;
        self.node_group_idx = 0;
        self.group = None;
        self.next_row = 0;
        state.write().reset();
        Ok(())
    }

    /// Table the state is bound to.
    pub fn table_id(&self) -> Option<TableId> {
        self.target.table
    }

    /// Vector receiving scanned node ids.
    pub fn node_id_vector(&self) -> &ValueVector {
        &self.node_id_vector
    }

    /// Vector receiving the `idx`-th requested column.
    pub fn output_vector(&self, idx: usize) -> &ValueVector {
        &self.output_vectors[idx]
    }

    /// Shared selection state of the output.
    pub fn out_state(&self) -> &SharedChunkState {
        self.node_id_vector.state()
    }
}

/// Scan state over the adjacency of one relationship table, bound to a batch
/// of node ids produced by a node scan.
#[derive(Debug)]
pub struct RelTableScanState {
    pub(crate) direction: RelDirection,
    pub(crate) target: ScanTarget,
    pub(crate) bound_nodes: Vec<(usize, InternalId)>,
    pub(crate) nbr_id_vector: ValueVector,
    pub(crate) rel_id_vector: ValueVector,
    pub(crate) output_vectors: Vec<ValueVector>,
    pub(crate) committed: Option<Arc<RelStore>>,
    pub(crate) bound_idx: usize,
    pub(crate) adj_pos: usize,
    pub(crate) current_bound_pos: Option<usize>,
}

impl Default for RelTableScanState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelTableScanState {
    /// Creates an unbound state with its own output state.
    pub fn new() -> Self {
        Self::with_state(DataChunkState::shared())
    }

    /// Creates an unbound state writing into `out_state`.
    pub fn with_state(out_state: SharedChunkState) -> Self {
        Self {
            direction: RelDirection::Forward,
            target: ScanTarget::default(),
            bound_nodes: Vec::new(),
            nbr_id_vector: ValueVector::with_state(LogicalType::InternalId, Arc::clone(&out_state)),
            rel_id_vector: ValueVector::with_state(LogicalType::InternalId, out_state),
            output_vectors: Vec::new(),
            committed: None,
            bound_idx: 0,
            adj_pos: 0,
            current_bound_pos: None,
        }
    }

    /// Retargets the state at `table` in `direction`, clearing bound nodes.
    pub fn set_to_table(
        &mut self,
        txn: &Transaction,
        table: &super::RelTable,
        column_ids: Vec<ColumnId>,
        predicates: Vec<ColumnPredicateSet>,
        direction: RelDirection,
    ) -> Result<()> {
        validate_columns(&column_ids, &predicates, table.column_types())?;
        let state = Arc::clone(self.nbr_id_vector.state());
        self.output_vectors = column_ids
            .iter()
            .map(|id| ValueVector::with_state(table.column_types()[*id as usize], Arc::clone(&state)))
            .collect();
        self.target.bind(txn, table.id(), column_ids, predicates);
        self.direction = direction;
        self.bound_nodes.clear();
        self.committed = None;
        self.bound_idx = 0;
        self.adj_pos = 0;
        self.current_bound_pos = None;
        state.write().reset();
        Ok(())
    }

    /// Binds the active rows of `node_ids` as scan inputs.
    pub fn bind_nodes(&mut self, node_ids: &ValueVector) {
        let state = node_ids.state().read();
        self.bound_nodes = state
            .sel_vector()
            .iter()
            .filter_map(|pos| node_ids.get_internal_id(pos).map(|id| (pos, id)))
            .collect();
        self.bound_idx = 0;
        self.adj_pos = 0;
        self.current_bound_pos = None;
    }

    /// Direction of the traversal.
    pub fn direction(&self) -> RelDirection {
        self.direction
    }

    /// Table the state is bound to.
    pub fn table_id(&self) -> Option<TableId> {
        self.target.table
    }

    /// Position (in the bound node vector) of the node whose relationships
    /// the last successful `scan` produced.
    pub fn current_bound_pos(&self) -> Option<usize> {
        self.current_bound_pos
    }

    /// Vector receiving neighbour node ids.
    pub fn nbr_id_vector(&self) -> &ValueVector {
        &self.nbr_id_vector
    }

    /// Vector receiving relationship ids.
    pub fn rel_id_vector(&self) -> &ValueVector {
        &self.rel_id_vector
    }

    /// Vector receiving the `idx`-th requested property.
    pub fn output_vector(&self, idx: usize) -> &ValueVector {
        &self.output_vectors[idx]
    }

    /// Shared selection state of the output.
    pub fn out_state(&self) -> &SharedChunkState {
        self.nbr_id_vector.state()
    }
}
