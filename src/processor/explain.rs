use std::hash::Hasher;

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::types::{PenumbraError, Result};

use super::PhysicalOperator;

/// Explain tree of a physical plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlanExplain {
    /// Root node of the explain tree.
    pub root: ExplainNode,
    /// Deterministic hash over operator names and descriptions.
    pub plan_hash: u64,
}

/// One physical operator in an explain tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExplainNode {
    /// Operator name, e.g. `COUNT_REL_TABLE`.
    pub op: String,
    /// Operator id.
    pub id: u32,
    /// Operator description; empty when there is none.
    pub info: String,
    /// Input operators.
    pub inputs: Vec<ExplainNode>,
}

impl PlanExplain {
    /// Builds the explain tree rooted at `root`.
    pub fn from_operator(root: &dyn PhysicalOperator) -> Self {
        let root = build_explain_tree(root);
        let mut hasher = Xxh64::new(0);
        hash_explain_node(&root, &mut hasher);
        Self {
            root,
            plan_hash: hasher.finish(),
        }
    }

    /// Serializes the tree as JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| PenumbraError::Query(format!("explain serialization failed: {err}")))
    }

    /// Renders one operator per line, inputs indented below their parent.
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_node(&self.root, 0, &mut out);
        out
    }

    /// Operator names in pre-order.
    pub fn operator_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_names(&self.root, &mut names);
        names
    }
}

fn build_explain_tree(op: &dyn PhysicalOperator) -> ExplainNode {
    ExplainNode {
        op: op.operator_type().to_string(),
        id: op.id().0,
        info: op.print_info().to_string(),
        inputs: op.children().into_iter().map(build_explain_tree).collect(),
    }
}

fn hash_explain_node(node: &ExplainNode, hasher: &mut Xxh64) {
    hasher.write(node.op.as_bytes());
    hasher.write(node.info.as_bytes());
    hasher.write_u64(node.inputs.len() as u64);
    for child in &node.inputs {
        hash_explain_node(child, hasher);
    }
}

fn render_node(node: &ExplainNode, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&node.op);
    if !node.info.is_empty() {
        out.push_str(" [");
        out.push_str(&node.info);
        out.push(']');
    }
    out.push('\n');
    for child in &node.inputs {
        render_node(child, depth + 1, out);
    }
}

fn collect_names<'a>(node: &'a ExplainNode, out: &mut Vec<&'a str>) {
    out.push(&node.op);
    for child in &node.inputs {
        collect_names(child, out);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::function::InMemoryTableFunction;
    use crate::primitives::vector::DataPos;
    use crate::processor::operators::{PassThrough, TableFunctionCall};
    use crate::processor::PhysicalOperatorType;
    use crate::types::{LogicalType, OperatorId};

    fn plan(order_by: Option<&str>) -> PassThrough {
        let call = TableFunctionCall::new(
            OperatorId(0),
            Arc::new(InMemoryTableFunction::new(
                "people",
                vec![("age".into(), LogicalType::Int64)],
                Vec::new(),
            )),
            order_by.map(str::to_owned),
            vec![DataPos::new(0, 0)],
        );
        PassThrough::new(OperatorId(1), PhysicalOperatorType::Explain, Box::new(call))
    }

    #[test]
    fn renders_tree_and_hashes_descriptions() {
        let plain = PlanExplain::from_operator(&plan(None));
        assert_eq!(plain.render(), "EXPLAIN\n  TABLE_FUNCTION_CALL [people]\n");
        assert_eq!(plain.operator_names(), vec!["EXPLAIN", "TABLE_FUNCTION_CALL"]);
        assert_eq!(plain, PlanExplain::from_operator(&plan(None)));

        let ordered = PlanExplain::from_operator(&plan(Some(" ORDER BY age ASC")));
        assert_ne!(plain.plan_hash, ordered.plan_hash);
        let json = ordered.to_json().unwrap();
        assert!(json.contains("\"TABLE_FUNCTION_CALL\""));
        assert!(json.contains("ORDER BY age ASC"));
    }
}
