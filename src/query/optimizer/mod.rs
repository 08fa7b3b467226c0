//! Ordered pipeline of logical plan rewrites.
//!
//! Passes rewrite the plan in place. Bottom-up passes use
//! [`visit_bottom_up`], which rewrites children before their parent and
//! recomputes each visited operator's schema before returning upwards.

mod count_rel_table;
mod order_by_push_down;

pub use count_rel_table::CountRelTableOptimizer;
pub use order_by_push_down::{
    build_order_by_clause, check_sort_directions, OrderByPushDownOptimizer,
};

use tracing::debug;

use crate::config::EngineConfig;
use crate::query::logical::{LogicalOperator, LogicalPlan};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::types::Result;

/// A logical plan rewrite.
pub trait OptimizerPass: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Rewrites `plan` in place. A pass that finds nothing to do leaves the
    /// plan unchanged, so running it twice is a no-op.
    fn rewrite(&mut self, plan: &mut LogicalPlan) -> Result<()>;
}

/// Rewrites the tree rooted at `op` bottom-up.
///
/// `replace` sees every operator after its children were visited and may
/// return a replacement. The visited operator's schema is recomputed in
/// either case.
pub fn visit_bottom_up<F>(op: &mut LogicalOperator, flat: bool, replace: &mut F) -> Result<()>
where
    F: FnMut(&LogicalOperator) -> Result<Option<LogicalOperator>>,
{
    for child in op.children_mut() {
        visit_bottom_up(child, flat, replace)?;
    }
    if let Some(replacement) = replace(op)? {
        *op = replacement;
    }
    op.compute_schema(flat);
    Ok(())
}

/// Runs configured passes in order.
pub struct Optimizer {
    passes: Vec<Box<dyn OptimizerPass>>,
}

impl Optimizer {
    /// Builds the default pipeline: count fusion, then order-by pushdown,
    /// each subject to its config toggle.
    pub fn new(config: &EngineConfig) -> Self {
        let mut passes: Vec<Box<dyn OptimizerPass>> = Vec::new();
        if config.enable_count_rel_table {
            passes.push(Box::new(CountRelTableOptimizer::new()));
        }
        if config.enable_order_by_push_down {
            passes.push(Box::new(OrderByPushDownOptimizer::new()));
        }
        Self { passes }
    }

    /// Builds a pipeline from explicit passes.
    pub fn with_passes(passes: Vec<Box<dyn OptimizerPass>>) -> Self {
        Self { passes }
    }

    /// Names of the configured passes, in run order.
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Runs every pass over `plan`.
    pub fn optimize(&mut self, plan: &mut LogicalPlan) -> Result<()> {
        let timer = profile_timer();
        for pass in &mut self.passes {
            debug!(pass = pass.name(), "query.optimizer.pass");
            pass.rewrite(plan)?;
        }
        record_profile_timer(QueryProfileKind::Optimize, timer);
        Ok(())
    }
}
