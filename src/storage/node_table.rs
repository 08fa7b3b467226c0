use std::sync::Arc;

use parking_lot::RwLock;

use crate::primitives::vector::VECTOR_CAPACITY;
use crate::transaction::Transaction;
use crate::types::{
    InternalId, LogicalType, NodeGroupIdx, NodeOffset, PenumbraError, Result, TableId, Value,
};

use super::local::{LocalNodeTable, LocalTable};
use super::node_group::NodeGroup;
use super::options::StorageOptions;
use super::scan::{NodeTableScanState, TableScanSource};

/// Node table stored as a sequence of committed node groups.
#[derive(Debug)]
pub struct NodeTable {
    id: TableId,
    name: String,
    column_names: Vec<String>,
    column_types: Vec<LogicalType>,
    node_group_capacity: u64,
    committed: RwLock<Vec<Arc<NodeGroup>>>,
}

impl NodeTable {
    pub(crate) fn new(
        id: TableId,
        name: impl Into<String>,
        columns: Vec<(String, LogicalType)>,
        node_group_capacity: u64,
    ) -> Self {
        let (column_names, column_types) = columns.into_iter().unzip();
        Self {
            id,
            name: name.into(),
            column_names,
            column_types,
            node_group_capacity: node_group_capacity.max(1),
            committed: RwLock::new(Vec::new()),
        }
    }

    /// Table id.
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Property column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Property column types.
    pub fn column_types(&self) -> &[LogicalType] {
        &self.column_types
    }

    /// Column id of a property, if present.
    pub fn column_id(&self, name: &str) -> Option<u32> {
        self.column_names
            .iter()
            .position(|column| column == name)
            .map(|idx| idx as u32)
    }

    /// Rows per node group.
    pub fn node_group_capacity(&self) -> u64 {
        self.node_group_capacity
    }

    /// Number of committed node groups.
    pub fn num_committed_node_groups(&self) -> NodeGroupIdx {
        self.committed.read().len() as NodeGroupIdx
    }

    /// Number of committed rows.
    pub fn num_committed_rows(&self) -> u64 {
        self.committed.read().iter().map(|group| group.num_rows()).sum()
    }

    /// Number of uncommitted node groups owned by `txn`.
    pub fn num_uncommitted_node_groups(&self, txn: &Transaction) -> NodeGroupIdx {
        self.with_local(txn, LocalNodeTable::num_node_groups)
            .unwrap_or(0)
    }

    /// Rows visible to `txn`: committed plus, for write transactions, its own
    /// uncommitted ones.
    pub fn num_total_rows(&self, txn: &Transaction) -> u64 {
        self.num_committed_rows() + self.with_local(txn, LocalNodeTable::num_rows).unwrap_or(0)
    }

    /// Returns `true` when `offset` addresses a row visible to `txn`.
    pub fn contains(&self, txn: &Transaction, offset: NodeOffset) -> bool {
        offset < self.num_total_rows(txn)
    }

    fn with_local<T>(&self, txn: &Transaction, f: impl FnOnce(&LocalNodeTable) -> T) -> Option<T> {
        let local = txn.local_storage()?;
        local.local_table(self.id).and_then(LocalTable::as_node).map(f)
    }

    /// Positions `state` at the node group named by its source and index.
    pub fn init_scan_state(&self, txn: &Transaction, state: &mut NodeTableScanState) -> Result<()> {
        state.target.check(txn, self.id)?;
        let idx = state.node_group_idx;
        let group = match state.source {
            TableScanSource::Committed => self.committed.read().get(idx as usize).cloned(),
            TableScanSource::Uncommitted => {
                if !txn.is_write_transaction() {
                    return Err(PenumbraError::Storage(format!(
                        "transaction {} has no uncommitted node groups",
                        txn.id()
                    )));
                }
                self.with_local(txn, |local| local.node_group(idx)).flatten()
            }
        };
        let Some(group) = group else {
            return Err(PenumbraError::Storage(format!(
                "node group {idx} ({:?}) out of range for table {}",
                state.source, self.name
            )));
        };
        state.group = Some(group);
        state.next_row = 0;
        state.out_state().write().reset();
        Ok(())
    }

    /// Produces the next batch of at most [`VECTOR_CAPACITY`] rows of the
    /// current node group. Batches in which predicates reject every row are
    /// skipped. Returns `false` when the group is exhausted.
    pub fn scan(&self, txn: &Transaction, state: &mut NodeTableScanState) -> Result<bool> {
        state.target.check(txn, self.id)?;
        let Some(group) = state.group.clone() else {
            return Err(PenumbraError::Storage(
                "node scan used before init_scan_state".into(),
            ));
        };
        loop {
            let remaining = group.num_rows().saturating_sub(state.next_row);
            if remaining == 0 {
                state.out_state().write().reset();
                return Ok(false);
            }
            let count = (remaining as usize).min(VECTOR_CAPACITY);
            let mut selected = Vec::with_capacity(count);
            for i in 0..count {
                let row = state.next_row + i as u64;
                let keep = state
                    .target
                    .predicates
                    .iter()
                    .all(|set| set.evaluate(group.value(set.column_id, row)));
                if !keep {
                    continue;
                }
                selected.push(i as u16);
                state
                    .node_id_vector
                    .set_internal_id(i, InternalId::new(self.id, group.start_offset() + row));
                for (out, column) in state.target.column_ids.iter().enumerate() {
                    state.output_vectors[out].set_value(i, group.value(*column, row));
                }
            }
            state.next_row += count as u64;
            if selected.is_empty() {
                continue;
            }
            let mut out = state.out_state().write();
            if selected.len() == count {
                out.sel_vector_mut().set_to_unfiltered(count);
            } else {
                out.sel_vector_mut().set_to_filtered(selected);
            }
            return Ok(true);
        }
    }

    pub(crate) fn new_local(&self) -> LocalNodeTable {
        LocalNodeTable::new(
            self.num_committed_rows(),
            self.node_group_capacity,
            self.column_types.len(),
        )
    }

    /// Appends committed rows from a transaction's overlay.
    ///
    /// With `compact_on_commit` the last partially filled committed group is
    /// replaced by an extended copy; otherwise new rows start a fresh group.
    pub(crate) fn merge_local(&self, local: &LocalNodeTable, options: &StorageOptions) -> Result<()> {
        let mut committed = self.committed.write();
        let mut fresh_group = !options.compact_on_commit;
        for group in local.groups() {
            for row in 0..group.num_rows() {
                let values: Vec<Value> = (0..self.column_types.len() as u32)
                    .map(|column| group.value(column, row).clone())
                    .collect();
                let needs_group = fresh_group || committed.last().map_or(true, |last| last.is_full());
                if needs_group {
                    let start = committed.iter().map(|group| group.num_rows()).sum();
                    committed.push(Arc::new(NodeGroup::new(
                        start,
                        self.node_group_capacity,
                        self.column_types.len(),
                    )));
                    fresh_group = false;
                }
                if let Some(last) = committed.last_mut() {
                    Arc::make_mut(last).append(values)?;
                }
            }
        }
        Ok(())
    }
}
