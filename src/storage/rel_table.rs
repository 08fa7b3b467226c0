use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::primitives::vector::VECTOR_CAPACITY;
use crate::transaction::Transaction;
use crate::types::{InternalId, LogicalType, NodeOffset, Result, TableId, Value};

use super::local::LocalTable;
use super::scan::{RelDirection, RelTableScanState};

/// One stored relationship.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RelRow {
    pub(crate) offset: u64,
    pub(crate) src: NodeOffset,
    pub(crate) dst: NodeOffset,
    pub(crate) props: Vec<Value>,
}

/// Relationship rows plus forward and backward adjacency indexes.
#[derive(Clone, Debug, Default)]
pub(crate) struct RelStore {
    rels: Vec<RelRow>,
    fwd: FxHashMap<NodeOffset, Vec<usize>>,
    bwd: FxHashMap<NodeOffset, Vec<usize>>,
}

impl RelStore {
    pub(crate) fn push(&mut self, row: RelRow) {
        let idx = self.rels.len();
        self.fwd.entry(row.src).or_default().push(idx);
        self.bwd.entry(row.dst).or_default().push(idx);
        self.rels.push(row);
    }

    pub(crate) fn len(&self) -> usize {
        self.rels.len()
    }

    pub(crate) fn row(&self, idx: usize) -> &RelRow {
        &self.rels[idx]
    }

    /// Row indexes adjacent to `node` in `direction`.
    pub(crate) fn adjacency(&self, direction: RelDirection, node: NodeOffset) -> &[usize] {
        let index = match direction {
            RelDirection::Forward => &self.fwd,
            RelDirection::Backward => &self.bwd,
        };
        index.get(&node).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn into_rows(self) -> Vec<RelRow> {
        self.rels
    }
}

/// Relationship table between a source and a destination node table.
#[derive(Debug)]
pub struct RelTable {
    id: TableId,
    name: String,
    src_table: TableId,
    dst_table: TableId,
    column_names: Vec<String>,
    column_types: Vec<LogicalType>,
    committed: RwLock<Arc<RelStore>>,
}

impl RelTable {
    pub(crate) fn new(
        id: TableId,
        name: impl Into<String>,
        src_table: TableId,
        dst_table: TableId,
        columns: Vec<(String, LogicalType)>,
    ) -> Self {
        let (column_names, column_types) = columns.into_iter().unzip();
        Self {
            id,
            name: name.into(),
            src_table,
            dst_table,
            column_names,
            column_types,
            committed: RwLock::new(Arc::new(RelStore::default())),
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

    /// Source node table.
    pub fn src_table(&self) -> TableId {
        self.src_table
    }

    /// Destination node table.
    pub fn dst_table(&self) -> TableId {
        self.dst_table
    }

    /// Node table a scan in `direction` starts from.
    pub fn bound_table(&self, direction: RelDirection) -> TableId {
        match direction {
            RelDirection::Forward => self.src_table,
            RelDirection::Backward => self.dst_table,
        }
    }

    /// Node table a scan in `direction` reaches.
    pub fn nbr_table(&self, direction: RelDirection) -> TableId {
        self.bound_table(direction.reverse())
    }

    /// Property column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Property column types.
    pub fn column_types(&self) -> &[LogicalType] {
        &self.column_types
    }

    /// Number of committed relationships.
    pub fn num_committed_rows(&self) -> u64 {
        self.committed.read().len() as u64
    }

    /// Relationships visible to `txn`: committed plus, for write transactions,
    /// its own uncommitted ones.
    pub fn num_total_rows(&self, txn: &Transaction) -> u64 {
        let local = txn
            .local_storage()
            .and_then(|local| {
                local
                    .local_table(self.id)
                    .and_then(LocalTable::as_rel)
                    .map(|table| table.num_rows())
            })
            .unwrap_or(0);
        self.num_committed_rows() + local
    }

    /// Pins the committed snapshot and rewinds the cursor to the first bound node.
    pub fn init_scan_state(&self, txn: &Transaction, state: &mut RelTableScanState) -> Result<()> {
        state.target.check(txn, self.id)?;
        state.committed = Some(Arc::clone(&self.committed.read()));
        state.bound_idx = 0;
        state.adj_pos = 0;
        state.current_bound_pos = None;
        state.out_state().write().reset();
        Ok(())
    }

    /// Produces the next batch of relationships of a single bound node.
    ///
    /// Returns `false` once every bound node is exhausted. Bound nodes of a
    /// table other than the scan's start table are skipped.
    pub fn scan(&self, txn: &Transaction, state: &mut RelTableScanState) -> Result<bool> {
        state.target.check(txn, self.id)?;
        let committed = match &state.committed {
            Some(store) => Arc::clone(store),
            None => Arc::clone(&self.committed.read()),
        };
        let local_guard = txn.local_storage();
        let local = local_guard.as_ref().and_then(|local| {
            local
                .local_table(self.id)
                .and_then(LocalTable::as_rel)
                .map(|table| table.store())
        });
        let direction = state.direction;
        let bound_table = self.bound_table(direction);
        let nbr_table = self.nbr_table(direction);

        loop {
            let Some(&(pos, node)) = state.bound_nodes.get(state.bound_idx) else {
                state.current_bound_pos = None;
                state.out_state().write().reset();
                return Ok(false);
            };
            if node.table != bound_table {
                state.bound_idx += 1;
                state.adj_pos = 0;
                continue;
            }
            let committed_adj = committed.adjacency(direction, node.offset);
            let local_adj = local.map_or(&[][..], |store| store.adjacency(direction, node.offset));
            let total = committed_adj.len() + local_adj.len();
            if state.adj_pos >= total {
                state.bound_idx += 1;
                state.adj_pos = 0;
                continue;
            }

            let count = (total - state.adj_pos).min(VECTOR_CAPACITY);
            let mut selected = Vec::with_capacity(count);
            for i in 0..count {
                let k = state.adj_pos + i;
                let row = match local {
                    Some(store) if k >= committed_adj.len() => {
                        store.row(local_adj[k - committed_adj.len()])
                    }
                    _ => committed.row(committed_adj[k]),
                };
                let nbr = match direction {
                    RelDirection::Forward => row.dst,
                    RelDirection::Backward => row.src,
                };
                state
                    .nbr_id_vector
                    .set_internal_id(i, InternalId::new(nbr_table, nbr));
                state
                    .rel_id_vector
                    .set_internal_id(i, InternalId::new(self.id, row.offset));
                for (out, column) in state.target.column_ids.iter().enumerate() {
                    state.output_vectors[out].set_value(i, &row.props[*column as usize]);
                }
                let keep = state
                    .target
                    .predicates
                    .iter()
                    .all(|set| set.evaluate(&row.props[set.column_id as usize]));
                if keep {
                    selected.push(i as u16);
                }
            }
            state.adj_pos += count;

            if selected.is_empty() {
                continue;
            }
            {
                let mut out = state.out_state().write();
                if selected.len() == count {
                    out.sel_vector_mut().set_to_unfiltered(count);
                } else {
                    out.sel_vector_mut().set_to_filtered(selected);
                }
            }
            state.current_bound_pos = Some(pos);
            return Ok(true);
        }
    }

    /// Publishes uncommitted rows as a new committed snapshot.
    pub(crate) fn merge_local(&self, rows: Vec<RelRow>) {
        if rows.is_empty() {
            return;
        }
        let mut committed = self.committed.write();
        let store = Arc::make_mut(&mut committed);
        for row in rows {
            store.push(row);
        }
    }
}
