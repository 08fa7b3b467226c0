//! Transaction-local (uncommitted) row storage.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::types::{NodeGroupIdx, NodeOffset, Result, TableId, Value};

use super::node_group::NodeGroup;
use super::rel_table::{RelRow, RelStore};

/// Uncommitted rows of one node table, grouped like committed storage.
#[derive(Clone, Debug)]
pub struct LocalNodeTable {
    start_offset: NodeOffset,
    capacity: u64,
    num_columns: usize,
    groups: Vec<Arc<NodeGroup>>,
}

impl LocalNodeTable {
    pub(crate) fn new(start_offset: NodeOffset, capacity: u64, num_columns: usize) -> Self {
        Self {
            start_offset,
            capacity,
            num_columns,
            groups: Vec::new(),
        }
    }

    /// Offset assigned to the first uncommitted row.
    pub fn start_offset(&self) -> NodeOffset {
        self.start_offset
    }

    /// Number of uncommitted node groups.
    pub fn num_node_groups(&self) -> NodeGroupIdx {
        self.groups.len() as NodeGroupIdx
    }

    /// Number of uncommitted rows.
    pub fn num_rows(&self) -> u64 {
        self.groups.iter().map(|group| group.num_rows()).sum()
    }

    pub(crate) fn node_group(&self, idx: NodeGroupIdx) -> Option<Arc<NodeGroup>> {
        self.groups.get(idx as usize).cloned()
    }

    pub(crate) fn groups(&self) -> &[Arc<NodeGroup>] {
        &self.groups
    }

    pub(crate) fn append(&mut self, row: Vec<Value>) -> Result<NodeOffset> {
        if let Some(last) = self.groups.last_mut() {
            if !last.is_full() {
                return Arc::make_mut(last).append(row);
            }
        }
        let start = self.start_offset + self.num_rows();
        let mut group = NodeGroup::new(start, self.capacity, self.num_columns);
        let offset = group.append(row)?;
        self.groups.push(Arc::new(group));
        Ok(offset)
    }
}

/// Uncommitted relationships of one rel table.
#[derive(Clone, Debug, Default)]
pub struct LocalRelTable {
    start_offset: u64,
    store: RelStore,
}

impl LocalRelTable {
    pub(crate) fn new(start_offset: u64) -> Self {
        Self {
            start_offset,
            store: RelStore::default(),
        }
    }

    /// Number of uncommitted relationships.
    pub fn num_rows(&self) -> u64 {
        self.store.len() as u64
    }

    pub(crate) fn store(&self) -> &RelStore {
        &self.store
    }

    pub(crate) fn append(
        &mut self,
        src: NodeOffset,
        dst: NodeOffset,
        props: Vec<Value>,
    ) -> u64 {
        let offset = self.start_offset + self.store.len() as u64;
        self.store.push(RelRow {
            offset,
            src,
            dst,
            props,
        });
        offset
    }

    pub(crate) fn into_rows(self) -> Vec<RelRow> {
        self.store.into_rows()
    }
}

/// Local table variants held by a write transaction.
#[derive(Clone, Debug)]
pub enum LocalTable {
    /// Uncommitted node rows.
    Node(LocalNodeTable),
    /// Uncommitted relationships.
    Rel(LocalRelTable),
}

impl LocalTable {
    /// Downcasts to a local node table.
    pub fn as_node(&self) -> Option<&LocalNodeTable> {
        match self {
            LocalTable::Node(table) => Some(table),
            LocalTable::Rel(_) => None,
        }
    }

    /// Downcasts to a local rel table.
    pub fn as_rel(&self) -> Option<&LocalRelTable> {
        match self {
            LocalTable::Rel(table) => Some(table),
            LocalTable::Node(_) => None,
        }
    }
}

/// Uncommitted overlay of a write transaction, keyed by table.
#[derive(Clone, Debug, Default)]
pub struct LocalStorage {
    tables: FxHashMap<TableId, LocalTable>,
}

impl LocalStorage {
    /// Creates an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Local rows of `table`, if the transaction touched it.
    pub fn local_table(&self, table: TableId) -> Option<&LocalTable> {
        self.tables.get(&table)
    }

    /// Returns `true` when no table was touched.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub(crate) fn local_node_table_mut(
        &mut self,
        table: TableId,
        init: impl FnOnce() -> LocalNodeTable,
    ) -> Option<&mut LocalNodeTable> {
        match self
            .tables
            .entry(table)
            .or_insert_with(|| LocalTable::Node(init()))
        {
            LocalTable::Node(local) => Some(local),
            LocalTable::Rel(_) => None,
        }
    }

    pub(crate) fn local_rel_table_mut(
        &mut self,
        table: TableId,
        init: impl FnOnce() -> LocalRelTable,
    ) -> Option<&mut LocalRelTable> {
        match self
            .tables
            .entry(table)
            .or_insert_with(|| LocalTable::Rel(init()))
        {
            LocalTable::Rel(local) => Some(local),
            LocalTable::Node(_) => None,
        }
    }

    pub(crate) fn into_tables(self) -> impl Iterator<Item = (TableId, LocalTable)> {
        self.tables.into_iter()
    }
}
