use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::transaction::Transaction;
use crate::types::{InternalId, LogicalType, PenumbraError, Result, TableId, Value};

use super::local::{LocalRelTable, LocalStorage, LocalTable};
use super::node_group::validate_row;
use super::node_table::NodeTable;
use super::options::StorageOptions;
use super::rel_table::RelTable;

/// A storage table of either kind.
#[derive(Clone, Debug)]
pub enum Table {
    /// Node table.
    Node(Arc<NodeTable>),
    /// Relationship table.
    Rel(Arc<RelTable>),
}

impl Table {
    /// Table id.
    pub fn id(&self) -> TableId {
        match self {
            Table::Node(table) => table.id(),
            Table::Rel(table) => table.id(),
        }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        match self {
            Table::Node(table) => table.name(),
            Table::Rel(table) => table.name(),
        }
    }

    /// Downcasts to a node table.
    pub fn as_node(&self) -> Option<&Arc<NodeTable>> {
        match self {
            Table::Node(table) => Some(table),
            Table::Rel(_) => None,
        }
    }

    /// Downcasts to a relationship table.
    pub fn as_rel(&self) -> Option<&Arc<RelTable>> {
        match self {
            Table::Rel(table) => Some(table),
            Table::Node(_) => None,
        }
    }
}

/// Owns every table and applies committed overlays.
#[derive(Debug, Default)]
pub struct StorageManager {
    options: StorageOptions,
    tables: RwLock<FxHashMap<TableId, Table>>,
}

impl StorageManager {
    /// Creates an empty storage manager.
    pub fn new(options: StorageOptions) -> Self {
        Self {
            options,
            tables: RwLock::new(FxHashMap::default()),
        }
    }

    /// Options applied to tables.
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Creates a node table under `id`.
    pub fn create_node_table(
        &self,
        id: TableId,
        name: &str,
        columns: Vec<(String, LogicalType)>,
    ) -> Result<Arc<NodeTable>> {
        let table = Arc::new(NodeTable::new(
            id,
            name,
            columns,
            self.options.node_group_capacity,
        ));
        self.register(Table::Node(Arc::clone(&table)))?;
        Ok(table)
    }

    /// Creates a relationship table under `id` between two existing node tables.
    pub fn create_rel_table(
        &self,
        id: TableId,
        name: &str,
        src_table: TableId,
        dst_table: TableId,
        columns: Vec<(String, LogicalType)>,
    ) -> Result<Arc<RelTable>> {
        self.get_node_table(src_table)?;
        self.get_node_table(dst_table)?;
        let table = Arc::new(RelTable::new(id, name, src_table, dst_table, columns));
        self.register(Table::Rel(Arc::clone(&table)))?;
        Ok(table)
    }

    fn register(&self, table: Table) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(&table.id()) {
            return Err(PenumbraError::Storage(format!(
                "table {} already exists",
                table.id()
            )));
        }
        debug!(table = %table.id(), name = table.name(), "storage.table.created");
        tables.insert(table.id(), table);
        Ok(())
    }

    /// Resolves a table of either kind.
    pub fn get_table(&self, id: TableId) -> Result<Table> {
        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or(PenumbraError::TableNotFound(id))
    }

    /// Resolves a node table.
    pub fn get_node_table(&self, id: TableId) -> Result<Arc<NodeTable>> {
        match self.get_table(id)? {
            Table::Node(table) => Ok(table),
            Table::Rel(_) => Err(PenumbraError::Storage(format!(
                "table {id} is not a node table"
            ))),
        }
    }

    /// Resolves a relationship table.
    pub fn get_rel_table(&self, id: TableId) -> Result<Arc<RelTable>> {
        match self.get_table(id)? {
            Table::Rel(table) => Ok(table),
            Table::Node(_) => Err(PenumbraError::Storage(format!(
                "table {id} is not a relationship table"
            ))),
        }
    }

    /// Appends a node to the transaction's overlay.
    pub fn insert_node(&self, txn: &Transaction, table: TableId, row: Vec<Value>) -> Result<InternalId> {
        let node_table = self.get_node_table(table)?;
        validate_row(node_table.column_types(), &row)?;
        let mut local = txn.local_storage_mut()?;
        let local_table = local
            .local_node_table_mut(table, || node_table.new_local())
            .ok_or_else(|| PenumbraError::Storage(format!("table {table} overlay kind mismatch")))?;
        let offset = local_table.append(row)?;
        Ok(InternalId::new(table, offset))
    }

    /// Appends a relationship between two visible nodes to the overlay.
    pub fn insert_rel(
        &self,
        txn: &Transaction,
        table: TableId,
        src: InternalId,
        dst: InternalId,
        props: Vec<Value>,
    ) -> Result<InternalId> {
        let rel_table = self.get_rel_table(table)?;
        validate_row(rel_table.column_types(), &props)?;
        for (endpoint, expected) in [(src, rel_table.src_table()), (dst, rel_table.dst_table())] {
            if endpoint.table != expected {
                return Err(PenumbraError::Storage(format!(
                    "node {endpoint} is not in table {expected}"
                )));
            }
            if !self.get_node_table(expected)?.contains(txn, endpoint.offset) {
                return Err(PenumbraError::Storage(format!("node {endpoint} does not exist")));
            }
        }
        let start = rel_table.num_committed_rows();
        let mut local = txn.local_storage_mut()?;
        let local_table = local
            .local_rel_table_mut(table, || LocalRelTable::new(start))
            .ok_or_else(|| PenumbraError::Storage(format!("table {table} overlay kind mismatch")))?;
        let offset = local_table.append(src.offset, dst.offset, props);
        Ok(InternalId::new(table, offset))
    }

    /// Merges a transaction overlay into committed storage.
    pub fn commit(&self, local: LocalStorage) -> Result<()> {
        if local.is_empty() {
            return Ok(());
        }
        let mut node_rows = 0u64;
        let mut rel_rows = 0u64;
        for (id, table) in local.into_tables() {
            match table {
                LocalTable::Node(local) => {
                    node_rows += local.num_rows();
                    self.get_node_table(id)?.merge_local(&local, &self.options)?;
                }
                LocalTable::Rel(local) => {
                    rel_rows += local.num_rows();
                    self.get_rel_table(id)?.merge_local(local.into_rows());
                }
            }
        }
        info!(node_rows, rel_rows, "storage.commit");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionManager;

    fn setup() -> StorageManager {
        let storage = StorageManager::new(StorageOptions::default().node_group_capacity(2));
        storage
            .create_node_table(TableId(0), "Person", vec![("age".into(), LogicalType::Int64)])
            .expect("node table");
        storage
            .create_rel_table(TableId(1), "Knows", TableId(0), TableId(0), Vec::new())
            .expect("rel table");
        storage
    }

    #[test]
    fn uncommitted_offsets_follow_committed_rows() {
        let storage = setup();
        let txns = TransactionManager::new();
        let txn = txns.begin_write().expect("writer");
        for age in 0..3 {
            storage
                .insert_node(&txn, TableId(0), vec![Value::Int64(age)])
                .expect("insert");
        }
        txns.commit(txn, &storage).expect("commit");

        let txn = txns.begin_write().expect("writer");
        let id = storage
            .insert_node(&txn, TableId(0), vec![Value::Int64(9)])
            .expect("insert");
        assert_eq!(id.offset, 3);
        let table = storage.get_node_table(TableId(0)).expect("table");
        assert_eq!(table.num_total_rows(&txn), 4);
        assert_eq!(table.num_committed_rows(), 3);
    }

    #[test]
    fn insert_rel_checks_endpoints() {
        let storage = setup();
        let txns = TransactionManager::new();
        let txn = txns.begin_write().expect("writer");
        let a = storage
            .insert_node(&txn, TableId(0), vec![Value::Int64(1)])
            .expect("insert");
        let missing = InternalId::new(TableId(0), 7);
        assert!(storage.insert_rel(&txn, TableId(1), a, missing, Vec::new()).is_err());
        assert!(storage.insert_rel(&txn, TableId(1), a, a, Vec::new()).is_ok());
    }

    #[test]
    fn read_only_transaction_cannot_insert() {
        let storage = setup();
        let txns = TransactionManager::new();
        let txn = txns.begin_read();
        assert!(storage
            .insert_node(&txn, TableId(0), vec![Value::Int64(1)])
            .is_err());
    }

    #[test]
    fn lookups_distinguish_table_kinds() {
        let storage = setup();
        assert!(storage.get_rel_table(TableId(0)).is_err());
        assert!(matches!(
            storage.get_table(TableId(9)),
            Err(PenumbraError::TableNotFound(TableId(9)))
        ));
        assert_eq!(storage.get_table(TableId(1)).expect("table").name(), "Knows");
    }
}
