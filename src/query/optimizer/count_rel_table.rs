//! Fuses `COUNT(*)` over a single-label relationship expansion into one
//! counting leaf.
//!
//! Matched shape, top-down:
//!
//! ```text
//! AGGREGATE (COUNT_STAR, no keys)
//!   PROJECTION*            (empty, or projecting only the count)
//!     EXTEND               (one rel group, one direction, no properties/predicates)
//!       SCAN_NODE_TABLE    (no properties/predicates)
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::query::logical::{
    LogicalCountRelTable, LogicalExtend, LogicalOp, LogicalOperator, LogicalOperatorType,
    LogicalPlan, LogicalScanNodeTable,
};
use crate::storage::RelDirection;
use crate::types::{Result, TableId};

use super::{visit_bottom_up, OptimizerPass};

/// Count-over-relationship fusion pass.
#[derive(Debug, Default)]
pub struct CountRelTableOptimizer;

impl CountRelTableOptimizer {
    /// Creates the pass.
    pub fn new() -> Self {
        Self
    }
}

impl OptimizerPass for CountRelTableOptimizer {
    fn name(&self) -> &'static str {
        "count_rel_table"
    }

    fn rewrite(&mut self, plan: &mut LogicalPlan) -> Result<()> {
        let flat = plan.is_flat_schema();
        visit_bottom_up(&mut plan.root, flat, &mut |op| Ok(fuse(op)))
    }
}

fn is_simple_count_star(op: &LogicalOperator) -> bool {
    let Some(aggregate) = op.as_aggregate() else {
        return false;
    };
    !aggregate.has_keys()
        && aggregate.aggregates.len() == 1
        && aggregate.aggregates[0].is_count_star()
}

/// Walks down from the aggregate through pass-through projections.
fn below_projections<'a>(aggregate: &'a LogicalOperator) -> Option<&'a LogicalOperator> {
    let count = aggregate.as_aggregate()?.aggregates.first()?;
    let mut current = aggregate.children().first()?;
    while let Some(projection) = current.as_projection() {
        let passes_count = projection
            .expressions
            .iter()
            .all(|expr| expr.unique_name() == count.unique_name());
        if !passes_count {
            return None;
        }
        current = current.children().first()?;
    }
    Some(current)
}

fn can_optimize(aggregate: &LogicalOperator) -> bool {
    let Some(current) = below_projections(aggregate) else {
        return false;
    };
    let Some(extend) = current.as_extend() else {
        return false;
    };
    if extend.rel.rel_entries().len() != 1
        || !extend.properties.is_empty()
        || !extend.predicates.is_empty()
        || extend.direction.single().is_none()
    {
        return false;
    }
    let Some(scan) = current.children().first().and_then(LogicalOperator::as_scan_node_table)
    else {
        return false;
    };
    scan.properties.is_empty()
        && scan.predicates.is_empty()
        && scan.node.unique_name() == extend.bound_node.unique_name()
}

/// Rel tables of the group whose bound side is scanned and whose neighbour
/// side is one of the neighbour node's tables.
fn resolve_rel_tables(
    extend: &LogicalExtend,
    scan: &LogicalScanNodeTable,
    direction: RelDirection,
) -> Vec<TableId> {
    let nbr_tables = extend.nbr_node.node_table_ids();
    extend.rel.rel_entries()[0]
        .rel_entry_infos
        .iter()
        .filter(|info| {
            let (bound, nbr) = match direction {
                RelDirection::Forward => (info.src, info.dst),
                RelDirection::Backward => (info.dst, info.src),
            };
            scan.table_ids.contains(&bound) && (nbr_tables.is_empty() || nbr_tables.contains(&nbr))
        })
        .map(|info| info.oid)
        .collect()
}

fn fuse(op: &LogicalOperator) -> Option<LogicalOperator> {
    if !is_simple_count_star(op) || !can_optimize(op) {
        return None;
    }
    let current = below_projections(op)?;
    debug_assert_eq!(
        current.operator_type(),
        LogicalOperatorType::Extend,
        "count fusion matched a non-extend operator"
    );
    let extend = current.as_extend()?;
    let scan = current.child(0).as_scan_node_table()?;
    let direction = extend.direction.single()?;
    let rel_group = Arc::clone(&extend.rel.rel_entries()[0]);
    let rel_table_ids = resolve_rel_tables(extend, scan, direction);
    let count_expr = op.as_aggregate()?.aggregates[0].clone();

    debug!(
        rel_group = %rel_group.name,
        tables = rel_table_ids.len(),
        direction = %direction,
        "query.optimizer.count_rel_table.fused"
    );
    Some(LogicalOperator::leaf(LogicalOp::CountRelTable(
        LogicalCountRelTable {
            rel_group,
            rel_table_ids,
            bound_node_table_ids: scan.table_ids.clone(),
            direction,
            count_expr,
            fast_path_eligible: true,
        },
    )))
}
