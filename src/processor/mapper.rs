//! Logical to physical lowering.
//!
//! Children are mapped before their parent, so operator ids grow in
//! post-order. Mapping resolves table handles and result-set positions but
//! reads no data.

use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::primitives::vector::DataPos;
use crate::processor::explain::PlanExplain;
use crate::processor::operators::{
    skip_limit_count, AggregateFunction, AggregateSpec, CountRelTable, CountRelTablePrintInfo,
    CountScanMode, Filter, NodeGroupMorsels, NodeScanTarget, OrderBy, PassThrough, Projection,
    RelScanOutput, RelScanTarget, ScanNodeTable, ScanRelTable, SimpleAggregate, SortKey,
    TableFunctionCall,
};
use crate::processor::{
    evaluator::ExpressionEvaluator, PhysicalOperator, PhysicalOperatorType, TextPrintInfo,
};
use crate::query::expression::{variable_not_in_scope, ExpressionKind, ExpressionRef};
use crate::query::logical::{
    LogicalAggregate, LogicalCountRelTable, LogicalExtend, LogicalOp, LogicalOperator,
    LogicalOrderBy, LogicalPlan, LogicalProjection, LogicalScanNodeTable,
    LogicalTableFunctionCall, ScanPredicate,
};
use crate::query::optimizer::check_sort_directions;
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::schema::Schema;
use crate::storage::{ColumnPredicate, ColumnPredicateSet, RelDirection, StorageManager};
use crate::types::{ColumnId, OperatorId, PenumbraError, Result};

/// Physical plan ready for execution.
#[derive(Debug)]
pub struct PhysicalPlan {
    /// Root operator.
    pub root: Box<dyn PhysicalOperator>,
    /// Output schema of the root; the executor lays out its result set from it.
    pub schema: Schema,
    /// Explain tree of `root`.
    pub explain: PlanExplain,
}

/// Lowers logical plans against live storage.
#[derive(Debug)]
pub struct PlanMapper<'a> {
    storage: &'a StorageManager,
    config: &'a EngineConfig,
    next_id: u32,
}

impl<'a> PlanMapper<'a> {
    /// Creates a mapper whose operator ids start at zero.
    pub fn new(storage: &'a StorageManager, config: &'a EngineConfig) -> Self {
        Self {
            storage,
            config,
            next_id: 0,
        }
    }

    /// Maps `plan` into a physical operator tree.
    pub fn map(&mut self, plan: &LogicalPlan) -> Result<PhysicalPlan> {
        let timer = profile_timer();
        let root = self.map_operator(&plan.root)?;
        let explain = PlanExplain::from_operator(root.as_ref());
        record_profile_timer(QueryProfileKind::Map, timer);
        debug!(
            operators = self.next_id,
            plan_hash = explain.plan_hash,
            "processor.mapper.mapped"
        );
        Ok(PhysicalPlan {
            root,
            schema: plan.root.schema().clone(),
            explain,
        })
    }

    fn next_operator_id(&mut self) -> OperatorId {
        let id = OperatorId(self.next_id);
        self.next_id += 1;
        id
    }

    fn map_operator(&mut self, op: &LogicalOperator) -> Result<Box<dyn PhysicalOperator>> {
        let mut children = op
            .children()
            .iter()
            .map(|child| self.map_operator(child))
            .collect::<Result<Vec<_>>>()?;
        let schema = op.schema();
        let mut child = || {
            children
                .pop()
                .ok_or(PenumbraError::Invalid("operator is missing its child"))
        };
        let id = self.next_operator_id();
        let mapped: Box<dyn PhysicalOperator> = match op.op() {
            LogicalOp::ScanNodeTable(scan) => {
                Box::new(self.map_scan_node_table(id, scan, schema)?)
            }
            LogicalOp::Extend(extend) => {
                Box::new(self.map_extend(id, extend, child()?, schema)?)
            }
            LogicalOp::Filter(filter) => {
                let evaluator =
                    ExpressionEvaluator::build(&filter.predicate, op.child(0).schema())?;
                Box::new(Filter::new(
                    id,
                    child()?,
                    evaluator,
                    TextPrintInfo(filter.predicate.to_string()),
                ))
            }
            LogicalOp::Projection(projection) => Box::new(Self::map_projection(
                id,
                projection,
                child()?,
                op.child(0).schema(),
                schema,
            )?),
            LogicalOp::Aggregate(aggregate) => Box::new(Self::map_aggregate(
                id,
                aggregate,
                child()?,
                op.child(0).schema(),
                schema,
            )?),
            LogicalOp::OrderBy(order_by) => Box::new(Self::map_order_by(
                id,
                order_by,
                child()?,
                op.child(0).schema(),
                schema,
            )?),
            LogicalOp::Accumulate => Box::new(PassThrough::new(
                id,
                PhysicalOperatorType::Accumulate,
                child()?,
            )),
            LogicalOp::MultiplicityReducer => Box::new(PassThrough::new(
                id,
                PhysicalOperatorType::MultiplicityReducer,
                child()?,
            )),
            LogicalOp::Explain => Box::new(PassThrough::new(
                id,
                PhysicalOperatorType::Explain,
                child()?,
            )),
            LogicalOp::TableFunctionCall(call) => {
                Box::new(Self::map_table_function_call(id, call, schema)?)
            }
            LogicalOp::CountRelTable(count) => {
                Box::new(self.map_count_rel_table(id, count, schema)?)
            }
        };
        Ok(mapped)
    }

    fn map_scan_node_table(
        &self,
        id: OperatorId,
        scan: &LogicalScanNodeTable,
        schema: &Schema,
    ) -> Result<ScanNodeTable> {
        let node_pos = schema.data_pos(&scan.node)?;
        let property_pos = data_positions(schema, &scan.properties)?;
        let property_names = scan
            .properties
            .iter()
            .map(property_name)
            .collect::<Result<Vec<_>>>()?;
        let mut targets = Vec::with_capacity(scan.table_ids.len());
        let mut names = Vec::with_capacity(scan.table_ids.len());
        for table_id in &scan.table_ids {
            let table = self.storage.get_node_table(*table_id)?;
            names.push(table.name().to_owned());
            let lookup = |name: &str| table.column_id(name);
            let Some(predicates) = predicate_sets(&scan.predicates, lookup) else {
                continue;
            };
            let columns = bound_columns(&property_names, lookup);
            targets.push(NodeScanTarget {
                table,
                columns,
                predicates,
            });
        }
        Ok(ScanNodeTable::new(
            id,
            targets,
            Arc::new(NodeGroupMorsels::new()),
            node_pos,
            property_pos,
            TextPrintInfo(format!("Tables: {}", names.join(", "))),
        ))
    }

    fn map_extend(
        &self,
        id: OperatorId,
        extend: &LogicalExtend,
        child: Box<dyn PhysicalOperator>,
        schema: &Schema,
    ) -> Result<ScanRelTable> {
        let output = RelScanOutput {
            bound_pos: schema.data_pos(&extend.bound_node)?,
            nbr_pos: schema.data_pos(&extend.nbr_node)?,
            rel_pos: schema.data_pos(&extend.rel)?,
            property_pos: data_positions(schema, &extend.properties)?,
        };
        let property_names = extend
            .properties
            .iter()
            .map(property_name)
            .collect::<Result<Vec<_>>>()?;
        let bound_tables = extend.bound_node.node_table_ids();
        let nbr_tables = extend.nbr_node.node_table_ids();
        let mut targets = Vec::new();
        let mut names = Vec::new();
        for entry in extend.rel.rel_entries() {
            names.push(entry.name.clone());
            for info in &entry.rel_entry_infos {
                for direction in extend.direction.rel_directions() {
                    let (bound, nbr) = match direction {
                        RelDirection::Forward => (info.src, info.dst),
                        RelDirection::Backward => (info.dst, info.src),
                    };
                    let reaches_nbr = nbr_tables.is_empty() || nbr_tables.contains(&nbr);
                    if !bound_tables.contains(&bound) || !reaches_nbr {
                        continue;
                    }
                    let table = self.storage.get_rel_table(info.oid)?;
                    let lookup = |name: &str| {
                        table
                            .column_names()
                            .iter()
                            .position(|column| column == name)
                            .map(|pos| pos as ColumnId)
                    };
                    let Some(predicates) = predicate_sets(&extend.predicates, lookup) else {
                        continue;
                    };
                    let columns = bound_columns(&property_names, lookup);
                    targets.push(RelScanTarget {
                        table: Arc::clone(&table),
                        direction: *direction,
                        columns,
                        predicates,
                    });
                }
            }
        }
        let print_info = TextPrintInfo(format!(
            "({})-[{}:{}]-({})",
            extend.bound_node.unique_name(),
            extend.rel.unique_name(),
            names.join("|"),
            extend.nbr_node.unique_name()
        ));
        Ok(ScanRelTable::new(id, child, targets, output, print_info))
    }

    fn map_projection(
        id: OperatorId,
        projection: &LogicalProjection,
        child: Box<dyn PhysicalOperator>,
        child_schema: &Schema,
        schema: &Schema,
    ) -> Result<Projection> {
        let mut expressions = Vec::new();
        for expr in &projection.expressions {
            if child_schema.contains(expr) {
                continue;
            }
            let evaluator = ExpressionEvaluator::build(expr, child_schema)?;
            expressions.push((evaluator, schema.data_pos(expr)?));
        }
        let print_info = TextPrintInfo(join_expressions(&projection.expressions));
        Ok(Projection::new(id, child, expressions, print_info))
    }

    fn map_aggregate(
        id: OperatorId,
        aggregate: &LogicalAggregate,
        child: Box<dyn PhysicalOperator>,
        child_schema: &Schema,
        schema: &Schema,
    ) -> Result<SimpleAggregate> {
        if aggregate.has_keys() {
            return Err(PenumbraError::Query(
                "aggregation with grouping keys is not supported".into(),
            ));
        }
        let mut specs = Vec::with_capacity(aggregate.aggregates.len());
        for expr in &aggregate.aggregates {
            let ExpressionKind::AggregateFunction { name, distinct } = &expr.kind else {
                return Err(PenumbraError::Query(format!(
                    "{} is not an aggregate function",
                    expr.unique_name()
                )));
            };
            let function = AggregateFunction::resolve(name)?;
            let input = match function {
                AggregateFunction::CountStar => None,
                AggregateFunction::Count | AggregateFunction::Sum => {
                    let argument = expr.children.first().ok_or_else(|| {
                        PenumbraError::Query(format!("{name} expects one argument"))
                    })?;
                    Some(ExpressionEvaluator::build(argument, child_schema)?)
                }
            };
            specs.push(AggregateSpec {
                function,
                distinct: *distinct,
                input,
                output: schema.data_pos(expr)?,
            });
        }
        Ok(SimpleAggregate::new(
            id,
            child,
            child_schema.clone(),
            specs,
            TextPrintInfo(join_expressions(&aggregate.aggregates)),
        ))
    }

    fn map_order_by(
        id: OperatorId,
        order_by: &LogicalOrderBy,
        child: Box<dyn PhysicalOperator>,
        child_schema: &Schema,
        schema: &Schema,
    ) -> Result<OrderBy> {
        check_sort_directions(&order_by.expressions, &order_by.is_asc_orders)?;
        let scope = child_schema.expressions_in_scope();
        let payload = data_positions(child_schema, scope)?;
        let output = data_positions(schema, scope)?;
        let keys = order_by
            .expressions
            .iter()
            .zip(&order_by.is_asc_orders)
            .map(|(expr, ascending)| {
                if !child_schema.contains(expr) {
                    return Err(variable_not_in_scope(expr.unique_name()));
                }
                Ok(SortKey {
                    pos: child_schema.data_pos(expr)?,
                    ascending: *ascending,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let skip = order_by
            .skip
            .as_ref()
            .map(|expr| skip_limit_count(expr, "SKIP"))
            .transpose()?
            .unwrap_or(0);
        let limit = order_by
            .limit
            .as_ref()
            .map(|expr| skip_limit_count(expr, "LIMIT"))
            .transpose()?;
        Ok(OrderBy::new(
            id,
            child,
            child_schema.clone(),
            payload,
            keys,
            skip,
            limit,
            output,
            TextPrintInfo(join_expressions(&order_by.expressions)),
        ))
    }

    fn map_table_function_call(
        id: OperatorId,
        call: &LogicalTableFunctionCall,
        schema: &Schema,
    ) -> Result<TableFunctionCall> {
        Ok(TableFunctionCall::new(
            id,
            Arc::clone(&call.function),
            call.order_by.clone(),
            data_positions(schema, &call.columns)?,
        ))
    }

    fn map_count_rel_table(
        &self,
        id: OperatorId,
        count: &LogicalCountRelTable,
        schema: &Schema,
    ) -> Result<CountRelTable> {
        let rel_tables = count
            .rel_table_ids
            .iter()
            .map(|table| self.storage.get_rel_table(*table))
            .collect::<Result<Vec<_>>>()?;
        let node_tables = count
            .bound_node_table_ids
            .iter()
            .map(|table| self.storage.get_node_table(*table))
            .collect::<Result<Vec<_>>>()?;
        let mode = if count.fast_path_eligible && self.config.count_fast_path {
            CountScanMode::Aggregate
        } else {
            CountScanMode::Scan
        };
        Ok(CountRelTable::new(
            id,
            node_tables,
            rel_tables,
            count.direction,
            schema.data_pos(&count.count_expr)?,
            mode,
            count.fast_path_eligible,
            CountRelTablePrintInfo::new(count.rel_group.name.clone()),
        ))
    }
}

fn data_positions(schema: &Schema, exprs: &[ExpressionRef]) -> Result<Vec<DataPos>> {
    exprs.iter().map(|expr| schema.data_pos(expr)).collect()
}

fn property_name(expr: &ExpressionRef) -> Result<&str> {
    match &expr.kind {
        ExpressionKind::Property { property, .. } => Ok(property),
        _ => Err(PenumbraError::Query(format!(
            "{} is not a property expression",
            expr.unique_name()
        ))),
    }
}

fn join_expressions(exprs: &[ExpressionRef]) -> String {
    exprs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `(output index, column)` for every property the table stores.
fn bound_columns(
    names: &[&str],
    lookup: impl Fn(&str) -> Option<ColumnId>,
) -> Vec<(usize, ColumnId)> {
    names
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| lookup(name).map(|column| (idx, column)))
        .collect()
}

/// Groups scan predicates by column. `None` when a predicate reads a column
/// the table lacks: null never satisfies a comparison, so the table is skipped.
fn predicate_sets(
    predicates: &[ScanPredicate],
    lookup: impl Fn(&str) -> Option<ColumnId>,
) -> Option<Vec<ColumnPredicateSet>> {
    let mut sets: Vec<ColumnPredicateSet> = Vec::new();
    for predicate in predicates {
        let column = lookup(&predicate.property)?;
        let bound = ColumnPredicate::new(predicate.op, predicate.value.clone());
        match sets.iter_mut().find(|set| set.column_id == column) {
            Some(set) => set.predicates.push(bound),
            None => sets.push(ColumnPredicateSet::new(column, vec![bound])),
        }
    }
    Some(sets)
}
