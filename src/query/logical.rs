//! Logical operator tree consumed by the optimizer and the plan mapper.
//!
//! Each operator exclusively owns its children, addressed by index. After a
//! child slot is replaced, the parent's schema must be recomputed before any
//! ancestor reads it.

use std::fmt;
use std::sync::Arc;

use crate::catalog::RelGroupEntry;
use crate::function::TableFunction;
use crate::storage::{CompareOp, RelDirection};
use crate::types::{TableId, Value};

use super::expression::ExpressionRef;
use super::schema::Schema;

/// Field-less tag of a logical operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LogicalOperatorType {
    /// Node table scan.
    ScanNodeTable,
    /// Relationship expansion.
    Extend,
    /// Row filter.
    Filter,
    /// Projection.
    Projection,
    /// Aggregation.
    Aggregate,
    /// Sort.
    OrderBy,
    /// Materialization barrier.
    Accumulate,
    /// Multiplicity flattening.
    MultiplicityReducer,
    /// Plan explanation wrapper.
    Explain,
    /// Table function source.
    TableFunctionCall,
    /// Fused relationship count.
    CountRelTable,
}

impl fmt::Display for LogicalOperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalOperatorType::ScanNodeTable => "SCAN_NODE_TABLE",
            LogicalOperatorType::Extend => "EXTEND",
            LogicalOperatorType::Filter => "FILTER",
            LogicalOperatorType::Projection => "PROJECTION",
            LogicalOperatorType::Aggregate => "AGGREGATE",
            LogicalOperatorType::OrderBy => "ORDER_BY",
            LogicalOperatorType::Accumulate => "ACCUMULATE",
            LogicalOperatorType::MultiplicityReducer => "MULTIPLICITY_REDUCER",
            LogicalOperatorType::Explain => "EXPLAIN",
            LogicalOperatorType::TableFunctionCall => "TABLE_FUNCTION_CALL",
            LogicalOperatorType::CountRelTable => "COUNT_REL_TABLE",
        };
        f.write_str(name)
    }
}

/// Comparison of a stored property against a constant, pushed into a scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanPredicate {
    /// Property name.
    pub property: String,
    /// Comparison.
    pub op: CompareOp,
    /// Constant operand.
    pub value: Value,
}

/// Direction of an extend.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExtendDirection {
    /// Follow relationships from source to destination.
    Forward,
    /// Follow relationships from destination to source.
    Backward,
    /// Follow both.
    Both,
}

impl ExtendDirection {
    /// Storage directions scanned by the extend.
    pub fn rel_directions(self) -> &'static [RelDirection] {
        match self {
            ExtendDirection::Forward => &[RelDirection::Forward],
            ExtendDirection::Backward => &[RelDirection::Backward],
            ExtendDirection::Both => &[RelDirection::Forward, RelDirection::Backward],
        }
    }

    /// Single storage direction, `None` for `Both`.
    pub fn single(self) -> Option<RelDirection> {
        match self {
            ExtendDirection::Forward => Some(RelDirection::Forward),
            ExtendDirection::Backward => Some(RelDirection::Backward),
            ExtendDirection::Both => None,
        }
    }
}

/// Scan of one or more node tables bound to a node variable.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalScanNodeTable {
    /// Node pattern expression; its value is the node id.
    pub node: ExpressionRef,
    /// Node tables to scan.
    pub table_ids: Vec<TableId>,
    /// Property expressions read by the scan.
    pub properties: Vec<ExpressionRef>,
    /// Pushed-down predicates.
    pub predicates: Vec<ScanPredicate>,
}

/// Expansion from a bound node to its neighbours.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalExtend {
    /// Node the expansion starts from.
    pub bound_node: ExpressionRef,
    /// Node reached.
    pub nbr_node: ExpressionRef,
    /// Relationship pattern.
    pub rel: ExpressionRef,
    /// Direction relative to the relationship's source and destination.
    pub direction: ExtendDirection,
    /// Relationship properties read.
    pub properties: Vec<ExpressionRef>,
    /// Pushed-down relationship predicates.
    pub predicates: Vec<ScanPredicate>,
}

/// Predicate filter.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalFilter {
    /// Boolean predicate.
    pub predicate: ExpressionRef,
}

/// Projection of expressions.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalProjection {
    /// Expressions to project; empty keeps the child's scope.
    pub expressions: Vec<ExpressionRef>,
}

/// Aggregation with optional grouping keys.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalAggregate {
    /// Grouping keys.
    pub keys: Vec<ExpressionRef>,
    /// Aggregate expressions.
    pub aggregates: Vec<ExpressionRef>,
}

impl LogicalAggregate {
    /// Returns `true` when the aggregate groups by keys.
    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }
}

/// Sort with optional skip and limit.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalOrderBy {
    /// Sort keys.
    pub expressions: Vec<ExpressionRef>,
    /// Per-key ascending flags.
    pub is_asc_orders: Vec<bool>,
    /// Rows to skip after sorting.
    pub skip: Option<ExpressionRef>,
    /// Maximum rows returned after skipping.
    pub limit: Option<ExpressionRef>,
}

/// Call of a table function.
#[derive(Clone)]
pub struct LogicalTableFunctionCall {
    /// Function producing the rows.
    pub function: Arc<dyn TableFunction>,
    /// Output column expressions, one per function column.
    pub columns: Vec<ExpressionRef>,
    /// Pushed-down order clause.
    pub order_by: Option<String>,
}

impl LogicalTableFunctionCall {
    /// Attaches a pushed-down order clause.
    pub fn set_order_by(&mut self, clause: String) {
        self.order_by = Some(clause);
    }
}

impl fmt::Debug for LogicalTableFunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalTableFunctionCall")
            .field("function", &self.function.name())
            .field("columns", &self.columns)
            .field("order_by", &self.order_by)
            .finish()
    }
}

impl PartialEq for LogicalTableFunctionCall {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.function, &other.function)
            && self.columns == other.columns
            && self.order_by == other.order_by
    }
}

/// Fused count of all relationships of a group reachable from scanned nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalCountRelTable {
    /// Relationship group counted.
    pub rel_group: Arc<RelGroupEntry>,
    /// Physical rel tables counted.
    pub rel_table_ids: Vec<TableId>,
    /// Node tables the replaced scan bound.
    pub bound_node_table_ids: Vec<TableId>,
    /// Scan direction of the replaced extend.
    pub direction: RelDirection,
    /// Output expression of the replaced aggregate.
    pub count_expr: ExpressionRef,
    /// Set only when no predicate or property was involved in the match.
    pub fast_path_eligible: bool,
}

/// Closed set of logical operators.
#[derive(Clone, Debug, PartialEq)]
pub enum LogicalOp {
    /// See [`LogicalScanNodeTable`].
    ScanNodeTable(LogicalScanNodeTable),
    /// See [`LogicalExtend`].
    Extend(LogicalExtend),
    /// See [`LogicalFilter`].
    Filter(LogicalFilter),
    /// See [`LogicalProjection`].
    Projection(LogicalProjection),
    /// See [`LogicalAggregate`].
    Aggregate(LogicalAggregate),
    /// See [`LogicalOrderBy`].
    OrderBy(LogicalOrderBy),
    /// Materializes its input before passing it on.
    Accumulate,
    /// Collapses tuple multiplicity.
    MultiplicityReducer,
    /// Marks a plan being explained.
    Explain,
    /// See [`LogicalTableFunctionCall`].
    TableFunctionCall(LogicalTableFunctionCall),
    /// See [`LogicalCountRelTable`].
    CountRelTable(LogicalCountRelTable),
}

impl LogicalOp {
    /// Tag of the operator.
    pub fn operator_type(&self) -> LogicalOperatorType {
        match self {
            LogicalOp::ScanNodeTable(_) => LogicalOperatorType::ScanNodeTable,
            LogicalOp::Extend(_) => LogicalOperatorType::Extend,
            LogicalOp::Filter(_) => LogicalOperatorType::Filter,
            LogicalOp::Projection(_) => LogicalOperatorType::Projection,
            LogicalOp::Aggregate(_) => LogicalOperatorType::Aggregate,
            LogicalOp::OrderBy(_) => LogicalOperatorType::OrderBy,
            LogicalOp::Accumulate => LogicalOperatorType::Accumulate,
            LogicalOp::MultiplicityReducer => LogicalOperatorType::MultiplicityReducer,
            LogicalOp::Explain => LogicalOperatorType::Explain,
            LogicalOp::TableFunctionCall(_) => LogicalOperatorType::TableFunctionCall,
            LogicalOp::CountRelTable(_) => LogicalOperatorType::CountRelTable,
        }
    }
}

/// Node of the logical plan tree.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalOperator {
    op: LogicalOp,
    children: Vec<LogicalOperator>,
    schema: Option<Schema>,
}

impl LogicalOperator {
    /// Creates an operator over `children`; the schema is computed lazily.
    pub fn new(op: LogicalOp, children: Vec<LogicalOperator>) -> Self {
        Self {
            op,
            children,
            schema: None,
        }
    }

    /// Creates a leaf operator.
    pub fn leaf(op: LogicalOp) -> Self {
        Self::new(op, Vec::new())
    }

    /// Creates an operator with a single child.
    pub fn unary(op: LogicalOp, child: LogicalOperator) -> Self {
        Self::new(op, vec![child])
    }

    /// Operator payload.
    pub fn op(&self) -> &LogicalOp {
        &self.op
    }

    /// Mutable operator payload. Recompute the schema after structural edits.
    pub fn op_mut(&mut self) -> &mut LogicalOp {
        &mut self.op
    }

    /// Tag of the operator.
    pub fn operator_type(&self) -> LogicalOperatorType {
        self.op.operator_type()
    }

    /// Number of children.
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// Child at `idx`.
    pub fn child(&self, idx: usize) -> &LogicalOperator {
        &self.children[idx]
    }

    /// Mutable child at `idx`.
    pub fn child_mut(&mut self, idx: usize) -> &mut LogicalOperator {
        &mut self.children[idx]
    }

    /// Children in order.
    pub fn children(&self) -> &[LogicalOperator] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut [LogicalOperator] {
        &mut self.children
    }

    /// Replaces the child at `idx`.
    pub fn set_child(&mut self, idx: usize, child: LogicalOperator) {
        self.children[idx] = child;
        self.schema = None;
    }

    /// Removes and returns the child at `idx`.
    pub fn take_child(&mut self, idx: usize) -> LogicalOperator {
        self.schema = None;
        self.children.remove(idx)
    }

    /// Output schema.
    ///
    /// Panics if the schema was not computed since the last structural change.
    pub fn schema(&self) -> &Schema {
        self.schema
            .as_ref()
            .unwrap_or_else(|| panic!("schema of {} read before it was computed", self.operator_type()))
    }

    /// Output schema if computed.
    pub fn try_schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Downcast to a node table scan.
    pub fn as_scan_node_table(&self) -> Option<&LogicalScanNodeTable> {
        match &self.op {
            LogicalOp::ScanNodeTable(op) => Some(op),
            _ => None,
        }
    }

    /// Downcast to an extend.
    pub fn as_extend(&self) -> Option<&LogicalExtend> {
        match &self.op {
            LogicalOp::Extend(op) => Some(op),
            _ => None,
        }
    }

    /// Downcast to a filter.
    pub fn as_filter(&self) -> Option<&LogicalFilter> {
        match &self.op {
            LogicalOp::Filter(op) => Some(op),
            _ => None,
        }
    }

    /// Downcast to a projection.
    pub fn as_projection(&self) -> Option<&LogicalProjection> {
        match &self.op {
            LogicalOp::Projection(op) => Some(op),
            _ => None,
        }
    }

    /// Downcast to an aggregate.
    pub fn as_aggregate(&self) -> Option<&LogicalAggregate> {
        match &self.op {
            LogicalOp::Aggregate(op) => Some(op),
            _ => None,
        }
    }

    /// Downcast to an order-by.
    pub fn as_order_by(&self) -> Option<&LogicalOrderBy> {
        match &self.op {
            LogicalOp::OrderBy(op) => Some(op),
            _ => None,
        }
    }

    /// Downcast to a table function call.
    pub fn as_table_function_call(&self) -> Option<&LogicalTableFunctionCall> {
        match &self.op {
            LogicalOp::TableFunctionCall(op) => Some(op),
            _ => None,
        }
    }

    /// Mutable downcast to a table function call.
    pub fn as_table_function_call_mut(&mut self) -> Option<&mut LogicalTableFunctionCall> {
        match &mut self.op {
            LogicalOp::TableFunctionCall(op) => Some(op),
            _ => None,
        }
    }

    /// Downcast to a fused count.
    pub fn as_count_rel_table(&self) -> Option<&LogicalCountRelTable> {
        match &self.op {
            LogicalOp::CountRelTable(op) => Some(op),
            _ => None,
        }
    }

    fn child_schema(&self) -> Schema {
        self.children
            .first()
            .map(|child| child.schema().clone())
            .unwrap_or_default()
    }

    /// Computes the factorized schema from the children's schemas.
    pub fn compute_factorized_schema(&mut self) {
        let schema = match &self.op {
            LogicalOp::ScanNodeTable(scan) => {
                let mut schema = Schema::new();
                let group = schema.create_group();
                schema.insert_to_group_and_scope(&scan.node, group);
                for property in &scan.properties {
                    schema.insert_to_group_and_scope(property, group);
                }
                schema
            }
            LogicalOp::Extend(extend) => {
                let mut schema = self.child_schema();
                if let Some(bound) = schema.group_pos(&extend.bound_node) {
                    schema.flatten_group(bound);
                }
                let group = schema.create_group();
                schema.insert_to_group_and_scope(&extend.nbr_node, group);
                schema.insert_to_group_and_scope(&extend.rel, group);
                for property in &extend.properties {
                    schema.insert_to_group_and_scope(property, group);
                }
                schema
            }
            LogicalOp::Projection(projection) => {
                let mut schema = self.child_schema();
                for expr in &projection.expressions {
                    if schema.contains(expr) {
                        continue;
                    }
                    let group = match schema.dependent_group(expr) {
                        Some(group) => group,
                        None => {
                            let group = schema.create_group();
                            schema.set_group_as_single_state(group);
                            group
                        }
                    };
                    schema.insert_to_group(expr, group);
                }
                if !projection.expressions.is_empty() {
                    schema.set_scope(&projection.expressions);
                }
                schema
            }
            LogicalOp::Aggregate(aggregate) => {
                let mut schema = Schema::new();
                let group = schema.create_group();
                for expr in aggregate.keys.iter().chain(&aggregate.aggregates) {
                    schema.insert_to_group_and_scope(expr, group);
                }
                if !aggregate.has_keys() {
                    schema.set_group_as_single_state(group);
                }
                schema
            }
            LogicalOp::OrderBy(_) => {
                let child = self.child_schema();
                let mut schema = Schema::new();
                let group = schema.create_group();
                for expr in child.expressions_in_scope() {
                    schema.insert_to_group_and_scope(expr, group);
                }
                schema
            }
            LogicalOp::TableFunctionCall(call) => {
                let mut schema = Schema::new();
                let group = schema.create_group();
                for column in &call.columns {
                    schema.insert_to_group_and_scope(column, group);
                }
                schema
            }
            LogicalOp::CountRelTable(count) => {
                let mut schema = Schema::new();
                let group = schema.create_group();
                schema.insert_to_group_and_scope(&count.count_expr, group);
                schema.set_group_as_single_state(group);
                schema
            }
            LogicalOp::Filter(_)
            | LogicalOp::Accumulate
            | LogicalOp::MultiplicityReducer
            | LogicalOp::Explain => self.child_schema(),
        };
        self.schema = Some(schema);
    }

    /// Computes a schema in which every group is flat.
    pub fn compute_flat_schema(&mut self) {
        if let LogicalOp::CountRelTable(count) = &self.op {
            let mut schema = Schema::new();
            let group = schema.create_group();
            schema.insert_to_group_and_scope(&count.count_expr, group);
            schema.flatten_all();
            self.schema = Some(schema);
            return;
        }
        self.compute_factorized_schema();
        if let Some(schema) = self.schema.as_mut() {
            schema.flatten_all();
        }
    }

    /// Computes this operator's schema in the requested mode.
    pub fn compute_schema(&mut self, flat: bool) {
        if flat {
            self.compute_flat_schema();
        } else {
            self.compute_factorized_schema();
        }
    }

    /// Computes schemas of the whole subtree bottom-up.
    pub fn compute_schemas(&mut self, flat: bool) {
        for child in &mut self.children {
            child.compute_schemas(flat);
        }
        self.compute_schema(flat);
    }
}

/// Logical plan: the operator tree plus its schema mode.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalPlan {
    /// Root operator.
    pub root: LogicalOperator,
    flat_schema: bool,
}

impl LogicalPlan {
    /// Wraps `root` and computes every schema.
    pub fn new(mut root: LogicalOperator, flat_schema: bool) -> Self {
        root.compute_schemas(flat_schema);
        Self { root, flat_schema }
    }

    /// Whether schemas are flat.
    pub fn is_flat_schema(&self) -> bool {
        self.flat_schema
    }

    /// Root operator.
    pub fn last_operator(&self) -> &LogicalOperator {
        &self.root
    }

    /// Renders the tree, one operator per line, children indented.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        describe_into(&self.root, 0, &mut out);
        out
    }
}

fn describe_into(op: &LogicalOperator, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&op.operator_type().to_string());
    if let Some(count) = op.as_count_rel_table() {
        out.push_str(&format!("[{}]", count.rel_group.name));
    }
    if let Some(call) = op.as_table_function_call() {
        out.push_str(&format!("[{}{}]", call.function.name(), call.order_by.as_deref().unwrap_or("")));
    }
    out.push('\n');
    for child in op.children() {
        describe_into(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::query::expression::Expression;
    use crate::types::LogicalType;

    fn scan_person(catalog: &mut Catalog) -> LogicalOperator {
        let person = catalog.create_node_table("Person", Vec::new()).unwrap();
        LogicalOperator::leaf(LogicalOp::ScanNodeTable(LogicalScanNodeTable {
            node: Expression::node("a", vec![Arc::clone(&person)]),
            table_ids: vec![person.id],
            properties: vec![Expression::property("a", "age", LogicalType::Int64)],
            predicates: Vec::new(),
        }))
    }

    #[test]
    fn extend_flattens_bound_group_and_adds_one() {
        let mut catalog = Catalog::new();
        let scan = scan_person(&mut catalog);
        let knows = catalog
            .create_rel_group("KNOWS", &[("Person", "Person")], Vec::new(), "MANY_MANY")
            .unwrap();
        let person = catalog.node_table("Person").unwrap();
        let extend = LogicalOperator::unary(
            LogicalOp::Extend(LogicalExtend {
                bound_node: Expression::node("a", vec![Arc::clone(&person)]),
                nbr_node: Expression::node("b", vec![person]),
                rel: Expression::rel("r", vec![knows]),
                direction: ExtendDirection::Forward,
                properties: Vec::new(),
                predicates: Vec::new(),
            }),
            scan,
        );
        let plan = LogicalPlan::new(extend, false);
        let schema = plan.root.schema();
        assert_eq!(schema.num_groups(), 2);
        assert!(schema.group(0).is_flat());
        assert!(!schema.group(1).is_flat());
        assert_eq!(schema.expressions_in_scope().len(), 4);
    }

    #[test]
    fn projection_places_computed_expression_with_inputs() {
        let mut catalog = Catalog::new();
        let scan = scan_person(&mut catalog);
        let age = Expression::property("a", "age", LogicalType::Int64);
        let plus = Expression::scalar(
            "ADD",
            vec![age, Expression::literal(Value::Int64(1))],
            LogicalType::Int64,
        );
        let projection = LogicalOperator::unary(
            LogicalOp::Projection(LogicalProjection {
                expressions: vec![plus.clone()],
            }),
            scan,
        );
        let plan = LogicalPlan::new(projection, false);
        let schema = plan.root.schema();
        assert_eq!(schema.group_pos(&plus), Some(0));
        assert_eq!(schema.expressions_in_scope(), &[plus]);
    }

    #[test]
    fn set_child_invalidates_schema() {
        let mut catalog = Catalog::new();
        let scan = scan_person(&mut catalog);
        let mut root = LogicalOperator::unary(LogicalOp::Accumulate, scan.clone());
        root.compute_schemas(false);
        root.set_child(0, scan);
        assert!(root.try_schema().is_none());
        root.compute_schemas(false);
        assert_eq!(root.schema().num_groups(), 1);
    }
}
