#![forbid(unsafe_code)]

//! Pull-based vectorized physical execution.
//!
//! A physical plan is a tree of [`PhysicalOperator`]s owned parent-to-child.
//! Each pipeline instance shares one [`ResultSet`] laid out from the
//! pipeline's output [`Schema`]; operators write their outputs into it and
//! their parents read them back by [`DataPos`](crate::primitives::vector::DataPos).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::primitives::vector::{DataChunk, ResultSet};
use crate::query::schema::Schema;
use crate::transaction::Transaction;
use crate::types::{OperatorId, PenumbraError, Result};

/// Row-wise expression evaluation over result sets.
pub mod evaluator;
/// Plan execution and result collection.
pub mod executor;
/// Explain trees and plan hashes.
pub mod explain;
/// Logical to physical lowering.
pub mod mapper;
/// Physical operator implementations.
pub mod operators;

pub use evaluator::ExpressionEvaluator;
pub use executor::{Executor, QueryResult};
pub use explain::{ExplainNode, PlanExplain};
pub use mapper::{PhysicalPlan, PlanMapper};

/// Field-less tag of a physical operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PhysicalOperatorType {
    /// Node table scan source.
    ScanNodeTable,
    /// Relationship expansion.
    ScanRelTable,
    /// Row filter.
    Filter,
    /// Projection.
    Projection,
    /// Keyless aggregation.
    SimpleAggregate,
    /// Materializing sort.
    OrderBy,
    /// Materialization barrier.
    Accumulate,
    /// Multiplicity flattening.
    MultiplicityReducer,
    /// Plan explanation wrapper.
    Explain,
    /// Table function source.
    TableFunctionCall,
    /// Fused relationship count source.
    CountRelTable,
}

impl fmt::Display for PhysicalOperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhysicalOperatorType::ScanNodeTable => "SCAN_NODE_TABLE",
            PhysicalOperatorType::ScanRelTable => "SCAN_REL_TABLE",
            PhysicalOperatorType::Filter => "FILTER",
            PhysicalOperatorType::Projection => "PROJECTION",
            PhysicalOperatorType::SimpleAggregate => "SIMPLE_AGGREGATE",
            PhysicalOperatorType::OrderBy => "ORDER_BY",
            PhysicalOperatorType::Accumulate => "ACCUMULATE",
            PhysicalOperatorType::MultiplicityReducer => "MULTIPLICITY_REDUCER",
            PhysicalOperatorType::Explain => "EXPLAIN",
            PhysicalOperatorType::TableFunctionCall => "TABLE_FUNCTION_CALL",
            PhysicalOperatorType::CountRelTable => "COUNT_REL_TABLE",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one operator instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OperatorState {
    /// `init_local_state` has not run.
    #[default]
    Uninitialized,
    /// Producing batches.
    Initialized,
    /// Returned `false` from `get_next_tuples`; stays exhausted.
    Exhausted,
}

impl OperatorState {
    /// Moves to `Initialized`. Initializing twice is an error.
    pub fn initialize(&mut self, op: PhysicalOperatorType) -> Result<()> {
        if *self != OperatorState::Uninitialized {
            return Err(PenumbraError::Query(format!(
                "{op} initialized more than once"
            )));
        }
        *self = OperatorState::Initialized;
        Ok(())
    }

    /// Whether the operator may produce another batch.
    ///
    /// Fails when `init_local_state` has not run; `Ok(false)` once exhausted.
    pub fn can_produce(self, op: PhysicalOperatorType) -> Result<bool> {
        match self {
            OperatorState::Uninitialized => Err(PenumbraError::Query(format!(
                "{op} pulled before init_local_state"
            ))),
            OperatorState::Initialized => Ok(true),
            OperatorState::Exhausted => Ok(false),
        }
    }

    /// Marks the operator exhausted and returns `false` for convenience.
    pub fn exhaust(&mut self) -> bool {
        *self = OperatorState::Exhausted;
        false
    }
}

/// Human-readable operator description used in explain output.
pub trait PrintInfo: fmt::Display + Send + Sync {
    /// Boxed copy of the description.
    fn copy(&self) -> Box<dyn PrintInfo>;
}

impl fmt::Debug for dyn PrintInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrintInfo({self})")
    }
}

/// Free-form description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextPrintInfo(pub String);

impl fmt::Display for TextPrintInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PrintInfo for TextPrintInfo {
    fn copy(&self) -> Box<dyn PrintInfo> {
        Box::new(self.clone())
    }
}

/// Per-query collaborators handed to every operator call.
///
/// Shared by reference across worker threads.
#[derive(Debug)]
pub struct ExecutionContext<'a> {
    /// Transaction the query runs in.
    pub txn: &'a Transaction,
    interrupt: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl<'a> ExecutionContext<'a> {
    /// Creates a context without interrupt or deadline.
    pub fn new(txn: &'a Transaction) -> Self {
        Self {
            txn,
            interrupt: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Uses `flag` as the interrupt signal.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Aborts scans once `timeout` has elapsed from now.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deadline = timeout.map(|timeout| Instant::now() + timeout);
        self
    }

    /// Handle that interrupts the query when set.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Fails with `Interrupted` or `Timeout` when either signal fired.
    pub fn check_interrupted(&self) -> Result<()> {
        if self.interrupt.load(Ordering::Relaxed) {
            return Err(PenumbraError::Interrupted);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(PenumbraError::Timeout);
        }
        Ok(())
    }
}

/// Pull-based vectorized operator.
///
/// Protocol: `init_local_state` exactly once per instance, then
/// `get_next_tuples` until it returns `false`. Sources have no children.
/// Non-parallel operators run as a single instance.
pub trait PhysicalOperator: Send {
    /// Operator tag.
    fn operator_type(&self) -> PhysicalOperatorType;

    /// Plan-unique id.
    fn id(&self) -> OperatorId;

    /// Explain description.
    fn print_info(&self) -> &dyn PrintInfo;

    /// Whether the operator is a scan leaf.
    fn is_source(&self) -> bool {
        false
    }

    /// Whether independent copies may run on several threads.
    fn is_parallel(&self) -> bool {
        true
    }

    /// Binds output positions in `result_set` and initializes children.
    fn init_local_state(
        &mut self,
        result_set: &mut ResultSet,
        context: &ExecutionContext<'_>,
    ) -> Result<()>;

    /// Produces the next batch into `result_set`; `false` once exhausted.
    fn get_next_tuples(
        &mut self,
        result_set: &mut ResultSet,
        context: &ExecutionContext<'_>,
    ) -> Result<bool>;

    /// Fresh uninitialized copy sharing only thread-safe collaborators.
    fn copy(&self) -> Box<dyn PhysicalOperator>;

    /// Children in order.
    fn children(&self) -> Vec<&dyn PhysicalOperator>;
}

impl fmt::Debug for dyn PhysicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalOperator")
            .field("type", &self.operator_type())
            .field("id", &self.id())
            .finish()
    }
}

/// Returns `true` when every operator in the tree may run in parallel.
pub fn is_parallel_tree(op: &dyn PhysicalOperator) -> bool {
    op.is_parallel() && op.children().into_iter().all(is_parallel_tree)
}

/// Builds a result set with one chunk per schema group.
pub fn result_set_from_schema(schema: &Schema) -> ResultSet {
    let chunks = schema
        .groups()
        .iter()
        .map(|group| {
            let types = group.types();
            let chunk = if group.is_single_state() {
                DataChunk::single_state(&types)
            } else {
                DataChunk::new(&types)
            };
            chunk.state().write().set_flat(group.is_flat());
            chunk
        })
        .collect();
    ResultSet::new(chunks)
}
