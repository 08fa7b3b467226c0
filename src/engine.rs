//! Embedded engine facade.
//!
//! Owns the catalog, storage and transaction manager and runs logical plans
//! through the optimizer, the plan mapper and the executor.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::catalog::{Catalog, NodeTableEntry, PropertyDefinition, RelGroupEntry};
use crate::config::EngineConfig;
use crate::processor::{
    ExecutionContext, Executor, PhysicalPlan, PlanExplain, PlanMapper, QueryResult,
};
use crate::query::logical::LogicalPlan;
use crate::query::optimizer::Optimizer;
use crate::storage::StorageManager;
use crate::transaction::{Transaction, TransactionManager};
use crate::types::{InternalId, LogicalType, PenumbraError, Result, Value};

/// In-memory graph engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    catalog: RwLock<Catalog>,
    storage: StorageManager,
    transactions: TransactionManager,
}

impl Engine {
    /// Opens an empty engine.
    pub fn new(config: EngineConfig) -> Self {
        info!(
            threads = config.num_threads,
            count_rel_table = config.enable_count_rel_table,
            order_by_push_down = config.enable_order_by_push_down,
            "engine.opened"
        );
        let storage = StorageManager::new(config.storage.clone());
        Self {
            config,
            catalog: RwLock::new(Catalog::new()),
            storage,
            transactions: TransactionManager::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read access to the catalog.
    pub fn catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read()
    }

    /// Table storage.
    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Creates a node table in the catalog and in storage.
    pub fn create_node_table(
        &self,
        name: &str,
        properties: Vec<PropertyDefinition>,
    ) -> Result<Arc<NodeTableEntry>> {
        let mut catalog = self.catalog.write();
        let entry = catalog.create_node_table(name, properties)?;
        self.storage
            .create_node_table(entry.id, name, columns(&entry.properties))?;
        Ok(entry)
    }

    /// Creates a relationship group with one storage table per connection.
    pub fn create_rel_group(
        &self,
        name: &str,
        connections: &[(&str, &str)],
        properties: Vec<PropertyDefinition>,
        multiplicity: &str,
    ) -> Result<Arc<RelGroupEntry>> {
        let mut catalog = self.catalog.write();
        let entry = catalog.create_rel_group(name, connections, properties, multiplicity)?;
        for info in &entry.rel_entry_infos {
            self.storage.create_rel_table(
                info.oid,
                name,
                info.src,
                info.dst,
                columns(&entry.properties),
            )?;
        }
        Ok(entry)
    }

    /// Starts a read-only transaction.
    pub fn begin_read(&self) -> Transaction {
        self.transactions.begin_read()
    }

    /// Starts the write transaction; only one may be active.
    pub fn begin_write(&self) -> Result<Transaction> {
        self.transactions.begin_write()
    }

    /// Publishes a transaction's overlay.
    pub fn commit(&self, txn: Transaction) -> Result<()> {
        self.transactions.commit(txn, &self.storage)
    }

    /// Discards a transaction's overlay.
    pub fn rollback(&self, txn: Transaction) {
        self.transactions.rollback(txn)
    }

    /// Inserts a node row into `table` within `txn`.
    pub fn insert_node(&self, txn: &Transaction, table: &str, row: Vec<Value>) -> Result<InternalId> {
        let id = self.catalog.read().node_table(table)?.id;
        self.storage.insert_node(txn, id, row)
    }

    /// Inserts a relationship of `group`; the physical table is picked by the
    /// endpoints' node tables.
    pub fn insert_rel(
        &self,
        txn: &Transaction,
        group: &str,
        src: InternalId,
        dst: InternalId,
        props: Vec<Value>,
    ) -> Result<InternalId> {
        let entry = self.catalog.read().rel_group(group)?;
        let info = entry
            .rel_entry_infos
            .iter()
            .find(|info| info.src == src.table && info.dst == dst.table)
            .ok_or_else(|| {
                PenumbraError::Query(format!(
                    "relationship group {group} does not connect {} to {}",
                    src.table, dst.table
                ))
            })?;
        self.storage.insert_rel(txn, info.oid, src, dst, props)
    }

    /// Runs the configured optimizer passes over `plan`.
    pub fn optimize(&self, plan: &mut LogicalPlan) -> Result<()> {
        Optimizer::new(&self.config).optimize(plan)
    }

    /// Optimizes and maps `plan` without executing it.
    pub fn prepare(&self, plan: &mut LogicalPlan) -> Result<PhysicalPlan> {
        self.optimize(plan)?;
        PlanMapper::new(&self.storage, &self.config).map(plan)
    }

    /// Explain tree of the optimized physical plan.
    pub fn explain(&self, mut plan: LogicalPlan) -> Result<PlanExplain> {
        Ok(self.prepare(&mut plan)?.explain)
    }

    /// Optimizes, maps and executes `plan` under the configured timeout.
    pub fn execute(&self, plan: LogicalPlan, txn: &Transaction) -> Result<QueryResult> {
        self.execute_with_interrupt(plan, txn, Arc::new(AtomicBool::new(false)))
    }

    /// Like [`Engine::execute`], stopping with `Interrupted` once `interrupt`
    /// is raised.
    pub fn execute_with_interrupt(
        &self,
        mut plan: LogicalPlan,
        txn: &Transaction,
        interrupt: Arc<AtomicBool>,
    ) -> Result<QueryResult> {
        let mut physical = self.prepare(&mut plan)?;
        debug!(plan_hash = physical.explain.plan_hash, "engine.query.prepared");
        let context = ExecutionContext::new(txn)
            .with_interrupt(interrupt)
            .with_timeout(self.config.query_timeout());
        Executor::new(self.config.num_threads).execute(&mut physical, &context)
    }
}

fn columns(properties: &[PropertyDefinition]) -> Vec<(String, LogicalType)> {
    properties
        .iter()
        .map(|prop| (prop.name.clone(), prop.data_type))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rel_insert_picks_table_by_endpoints() {
        let engine = Engine::new(EngineConfig::default());
        engine
            .create_node_table("Person", vec![PropertyDefinition::new("age", LogicalType::Int64)])
            .unwrap();
        engine.create_node_table("City", Vec::new()).unwrap();
        let group = engine
            .create_rel_group(
                "Visits",
                &[("Person", "Person"), ("Person", "City")],
                Vec::new(),
                "MANY_MANY",
            )
            .unwrap();
        let txn = engine.begin_write().unwrap();
        let ada = engine.insert_node(&txn, "Person", vec![Value::Int64(36)]).unwrap();
        let oslo = engine.insert_node(&txn, "City", Vec::new()).unwrap();
        let rel = engine.insert_rel(&txn, "Visits", ada, oslo, Vec::new()).unwrap();
        assert_eq!(rel.table, group.rel_entry_infos[1].oid);
        assert!(engine.insert_rel(&txn, "Visits", oslo, ada, Vec::new()).is_err());
        engine.commit(txn).unwrap();
        let rel_table = engine.storage().get_rel_table(group.rel_entry_infos[1].oid).unwrap();
        assert_eq!(rel_table.num_total_rows(&engine.begin_read()), 1);
    }

    #[test]
    fn duplicate_table_names_are_rejected() {
        let engine = Engine::new(EngineConfig::default());
        engine.create_node_table("Person", Vec::new()).unwrap();
        assert!(engine.create_node_table("Person", Vec::new()).is_err());
    }
}
