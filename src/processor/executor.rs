//! Drives a physical plan to completion.

use std::thread;

use serde::Serialize;
use tracing::debug;

use crate::primitives::vector::DataPos;
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::schema::Schema;
use crate::types::{PenumbraError, Result, Value};

use super::mapper::PhysicalPlan;
use super::{is_parallel_tree, result_set_from_schema, ExecutionContext, PhysicalOperator};

/// Materialized rows of a query.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column names, one per expression in the output scope.
    pub columns: Vec<String>,
    /// Flat rows in column order.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// The only value of a one-row, one-column result.
    pub fn single_value(&self) -> Option<&Value> {
        match self.rows.as_slice() {
            [row] if row.len() == 1 => row.first(),
            _ => None,
        }
    }
}

/// Runs plans on up to `num_threads` workers.
#[derive(Clone, Copy, Debug)]
pub struct Executor {
    num_threads: usize,
}

impl Executor {
    /// Creates an executor; zero threads is treated as one.
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }

    /// Executes `plan` and collects every row.
    ///
    /// Plans whose operators are all parallel run on `num_threads` copies of
    /// the tree; worker rows are concatenated in worker order. A plan executes
    /// once: running it again fails at initialization.
    pub fn execute(
        &self,
        plan: &mut PhysicalPlan,
        context: &ExecutionContext<'_>,
    ) -> Result<QueryResult> {
        let timer = profile_timer();
        let scope = plan.schema.expressions_in_scope();
        let columns = scope
            .iter()
            .map(|expr| expr.unique_name().to_owned())
            .collect();
        let positions = scope
            .iter()
            .map(|expr| plan.schema.data_pos(expr))
            .collect::<Result<Vec<_>>>()?;
        let workers = if is_parallel_tree(plan.root.as_ref()) {
            self.num_threads
        } else {
            1
        };
        let rows = if workers == 1 {
            run_pipeline(plan.root.as_mut(), &plan.schema, &positions, context)?
        } else {
            run_parallel(plan, workers, &positions, context)?
        };
        record_profile_timer(QueryProfileKind::Execute, timer);
        debug!(workers, rows = rows.len(), "processor.executor.finished");
        Ok(QueryResult { columns, rows })
    }
}

fn run_pipeline(
    root: &mut dyn PhysicalOperator,
    schema: &Schema,
    positions: &[DataPos],
    context: &ExecutionContext<'_>,
) -> Result<Vec<Vec<Value>>> {
    let mut result_set = result_set_from_schema(schema);
    root.init_local_state(&mut result_set, context)?;
    let mut rows = Vec::new();
    while root.get_next_tuples(&mut result_set, context)? {
        rows.extend(result_set.flat_tuples(positions));
    }
    Ok(rows)
}

fn run_parallel(
    plan: &mut PhysicalPlan,
    workers: usize,
    positions: &[DataPos],
    context: &ExecutionContext<'_>,
) -> Result<Vec<Vec<Value>>> {
    let mut copies: Vec<Box<dyn PhysicalOperator>> =
        (1..workers).map(|_| plan.root.copy()).collect();
    let schema = &plan.schema;
    let root = plan.root.as_mut();
    thread::scope(|scope| {
        let handles: Vec<_> = copies
            .iter_mut()
            .map(|copy| {
                scope.spawn(move || run_pipeline(copy.as_mut(), schema, positions, context))
            })
            .collect();
        let mut rows = run_pipeline(root, schema, positions, context);
        for handle in handles {
            let worker = handle
                .join()
                .map_err(|_| PenumbraError::Query("execution worker panicked".into()))
                .and_then(|result| result);
            match (&mut rows, worker) {
                (Ok(rows), Ok(more)) => rows.extend(more),
                (Ok(_), Err(err)) => rows = Err(err),
                (Err(_), _) => {}
            }
        }
        rows
    })
}
