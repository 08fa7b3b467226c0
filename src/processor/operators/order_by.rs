//! Materializing sort with optional `SKIP` and `LIMIT`.

use std::cmp::Ordering;
use std::fmt;

use tracing::debug;

use crate::primitives::vector::{DataPos, ResultSet};
use crate::processor::{
    result_set_from_schema, ExecutionContext, OperatorState, PhysicalOperator,
    PhysicalOperatorType, PrintInfo, TextPrintInfo,
};
use crate::query::expression::{invalid_skip_limit, ExpressionKind, ExpressionRef};
use crate::query::schema::Schema;
use crate::types::{OperatorId, Result, Value};

use super::RowBuffer;

/// One sort key, read from the child's result set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SortKey {
    /// Key vector in the child result set.
    pub pos: DataPos,
    /// Ascending when `true`. Nulls sort last ascending, first descending.
    pub ascending: bool,
}

/// Resolves a `SKIP`/`LIMIT` expression to a row count.
///
/// Only integer literals and bound parameters that are non-negative qualify.
pub fn skip_limit_count(expr: &ExpressionRef, skip_or_limit: &str) -> Result<u64> {
    let value = match &expr.kind {
        ExpressionKind::Literal(value) | ExpressionKind::Parameter { value, .. } => value,
        _ => return Err(invalid_skip_limit(&expr.to_string(), skip_or_limit)),
    };
    match value {
        Value::Int64(n) if *n >= 0 => Ok(*n as u64),
        _ => Err(invalid_skip_limit(&expr.to_string(), skip_or_limit)),
    }
}

/// Sorts every child tuple, then streams the requested window.
pub struct OrderBy {
    id: OperatorId,
    child: Box<dyn PhysicalOperator>,
    child_schema: Schema,
    child_result_set: ResultSet,
    payload: Vec<DataPos>,
    keys: Vec<SortKey>,
    skip: u64,
    limit: Option<u64>,
    output: Vec<DataPos>,
    print_info: TextPrintInfo,
    rows: Option<RowBuffer>,
    state: OperatorState,
}

impl OrderBy {
    /// Creates the sort. `payload[i]` of the child is written to `output[i]`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OperatorId,
        child: Box<dyn PhysicalOperator>,
        child_schema: Schema,
        payload: Vec<DataPos>,
        keys: Vec<SortKey>,
        skip: u64,
        limit: Option<u64>,
        output: Vec<DataPos>,
        print_info: TextPrintInfo,
    ) -> Self {
        Self {
            id,
            child,
            child_schema,
            child_result_set: ResultSet::default(),
            payload,
            keys,
            skip,
            limit,
            output,
            print_info,
            rows: None,
            state: OperatorState::Uninitialized,
        }
    }

    fn materialize(&mut self, context: &ExecutionContext<'_>) -> Result<RowBuffer> {
        let positions: Vec<DataPos> = self
            .payload
            .iter()
            .chain(self.keys.iter().map(|key| &key.pos))
            .copied()
            .collect();
        let mut tuples = Vec::new();
        while self
            .child
            .get_next_tuples(&mut self.child_result_set, context)?
        {
            context.check_interrupted()?;
            tuples.extend(self.child_result_set.flat_tuples(&positions));
        }
        let width = self.payload.len();
        tuples.sort_by(|a, b| {
            for (idx, key) in self.keys.iter().enumerate() {
                let ordering = a[width + idx].total_cmp(&b[width + idx]);
                let ordering = if key.ascending {
                    ordering
                } else {
                    ordering.reverse()
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        let total = tuples.len();
        let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
        let limit = self
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        let rows: Vec<Vec<Value>> = tuples
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|mut row| {
                row.truncate(width);
                row
            })
            .collect();
        debug!(total, emitted = rows.len(), "processor.order_by.sorted");
        Ok(RowBuffer::new(rows))
    }
}

impl PhysicalOperator for OrderBy {
    fn operator_type(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::OrderBy
    }

    fn id(&self) -> OperatorId {
        self.id
    }

    fn print_info(&self) -> &dyn PrintInfo {
        &self.print_info
    }

    fn is_parallel(&self) -> bool {
        false
    }

    fn init_local_state(
        &mut self,
        _result_set: &mut ResultSet,
        context: &ExecutionContext<'_>,
    ) -> Result<()> {
        self.state.initialize(self.operator_type())?;
        self.child_result_set = result_set_from_schema(&self.child_schema);
        self.child
            .init_local_state(&mut self.child_result_set, context)
    }

    fn get_next_tuples(
        &mut self,
        result_set: &mut ResultSet,
        context: &ExecutionContext<'_>,
    ) -> Result<bool> {
        if !self.state.can_produce(self.operator_type())? {
            return Ok(false);
        }
        if self.rows.is_none() {
            self.rows = Some(self.materialize(context)?);
        }
        let emitted = match &mut self.rows {
            Some(rows) => rows.emit(result_set, &self.output),
            None => false,
        };
        if emitted {
            Ok(true)
        } else {
            Ok(self.state.exhaust())
        }
    }

    fn copy(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self::new(
            self.id,
            self.child.copy(),
            self.child_schema.clone(),
            self.payload.clone(),
            self.keys.clone(),
            self.skip,
            self.limit,
            self.output.clone(),
            self.print_info.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

impl fmt::Debug for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderBy")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .finish()
    }
}
