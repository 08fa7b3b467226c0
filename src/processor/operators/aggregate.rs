//! Keyless aggregation: the pipeline breaker behind `RETURN COUNT(*)` and
//! friends.

use std::cmp::Ordering;
use std::fmt;

use tracing::debug;

use crate::primitives::vector::{DataPos, ResultSet, SelectionVector};
use crate::processor::{
    evaluator::ExpressionEvaluator, result_set_from_schema, ExecutionContext, OperatorState,
    PhysicalOperator, PhysicalOperatorType, PrintInfo, TextPrintInfo,
};
use crate::query::expression::{COUNT, COUNT_STAR, SUM};
use crate::query::schema::Schema;
use crate::types::{OperatorId, PenumbraError, Result, Value};

use super::set_selection;

/// Aggregate functions supported without grouping keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AggregateFunction {
    /// Number of tuples.
    CountStar,
    /// Number of non-null inputs.
    Count,
    /// Sum of non-null inputs; null when there are none.
    Sum,
}

impl AggregateFunction {
    /// Resolves an aggregate by its bound name.
    pub fn resolve(name: &str) -> Result<Self> {
        match name {
            COUNT_STAR => Ok(AggregateFunction::CountStar),
            COUNT => Ok(AggregateFunction::Count),
            SUM => Ok(AggregateFunction::Sum),
            other => Err(PenumbraError::Query(format!(
                "aggregate function {other} is not supported"
            ))),
        }
    }
}

/// One aggregate computed by [`SimpleAggregate`].
#[derive(Clone, Debug)]
pub struct AggregateSpec {
    /// Function applied.
    pub function: AggregateFunction,
    /// Whether duplicates are removed before aggregating.
    pub distinct: bool,
    /// Input expression, `None` for `COUNT_STAR`.
    pub input: Option<ExpressionEvaluator>,
    /// Output vector.
    pub output: DataPos,
}

#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    sum: Option<Value>,
    distinct: Vec<Value>,
}

fn add_weighted(acc: Option<Value>, value: &Value, weight: u64) -> Result<Value> {
    let overflow = || PenumbraError::Query("integer overflow in SUM".into());
    let weighted = match value {
        Value::Int64(v) => Value::Int64(
            i64::try_from(weight)
                .ok()
                .and_then(|w| v.checked_mul(w))
                .ok_or_else(overflow)?,
        ),
        Value::Double(v) => Value::Double(v * weight as f64),
        other => {
            return Err(PenumbraError::Query(format!(
                "SUM is not defined for {}",
                other.logical_type()
            )))
        }
    };
    Ok(match (acc, weighted) {
        (None, weighted) => weighted,
        (Some(Value::Int64(a)), Value::Int64(b)) => {
            Value::Int64(a.checked_add(b).ok_or_else(overflow)?)
        }
        (Some(Value::Int64(a)), Value::Double(b)) => Value::Double(a as f64 + b),
        (Some(Value::Double(a)), Value::Int64(b)) => Value::Double(a + b as f64),
        (Some(Value::Double(a)), Value::Double(b)) => Value::Double(a + b),
        (Some(acc), _) => acc,
    })
}

impl Accumulator {
    fn update(&mut self, agg: &AggregateSpec, value: &Value, weight: u64) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        if agg.distinct {
            self.distinct.push(value.clone());
            return Ok(());
        }
        match agg.function {
            AggregateFunction::CountStar | AggregateFunction::Count => self.count += weight,
            AggregateFunction::Sum => self.sum = Some(add_weighted(self.sum.take(), value, weight)?),
        }
        Ok(())
    }

    fn finalize(mut self, agg: &AggregateSpec) -> Result<Value> {
        if agg.distinct {
            self.distinct.sort_by(Value::total_cmp);
            self.distinct.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
            for value in std::mem::take(&mut self.distinct) {
                self.count += 1;
                if agg.function == AggregateFunction::Sum {
                    self.sum = Some(add_weighted(self.sum.take(), &value, 1)?);
                }
            }
        }
        Ok(match agg.function {
            AggregateFunction::CountStar | AggregateFunction::Count => {
                Value::Int64(i64::try_from(self.count).unwrap_or(i64::MAX))
            }
            AggregateFunction::Sum => self.sum.unwrap_or(Value::Null),
        })
    }
}

/// Drains its child into accumulators and emits one single-state row.
pub struct SimpleAggregate {
    id: OperatorId,
    child: Box<dyn PhysicalOperator>,
    child_schema: Schema,
    child_result_set: ResultSet,
    aggregates: Vec<AggregateSpec>,
    print_info: TextPrintInfo,
    state: OperatorState,
}

impl SimpleAggregate {
    /// Creates the aggregate; the child runs against its own result set laid
    /// out from `child_schema`.
    pub fn new(
        id: OperatorId,
        child: Box<dyn PhysicalOperator>,
        child_schema: Schema,
        aggregates: Vec<AggregateSpec>,
        print_info: TextPrintInfo,
    ) -> Self {
        Self {
            id,
            child,
            child_schema,
            child_result_set: ResultSet::default(),
            aggregates,
            print_info,
            state: OperatorState::Uninitialized,
        }
    }

    fn accumulate(
        &mut self,
        accumulators: &mut [Accumulator],
        context: &ExecutionContext<'_>,
    ) -> Result<u64> {
        let mut tuples = 0u64;
        while self
            .child
            .get_next_tuples(&mut self.child_result_set, context)?
        {
            context.check_interrupted()?;
            let multiplicity = self.child_result_set.multiplicity();
            if multiplicity == 0 {
                continue;
            }
            tuples += multiplicity;
            for (agg, acc) in self.aggregates.iter().zip(accumulators.iter_mut()) {
                let Some(input) = &agg.input else {
                    acc.count += multiplicity;
                    continue;
                };
                let (driving, values) = input.evaluate(&self.child_result_set)?;
                let weight = match driving {
                    Some(chunk) => {
                        multiplicity / self.child_result_set.chunk(chunk).sel_size() as u64
                    }
                    None => multiplicity,
                };
                for (_, value) in &values {
                    acc.update(agg, value, weight)?;
                }
            }
        }
        Ok(tuples)
    }
}

impl PhysicalOperator for SimpleAggregate {
    fn operator_type(&self) -> PhysicalOperatorType {
        PhysicalOperatorType::SimpleAggregate
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
        let mut accumulators: Vec<Accumulator> =
            self.aggregates.iter().map(|_| Accumulator::default()).collect();
        let tuples = self.accumulate(&mut accumulators, context)?;
        for (agg, acc) in self.aggregates.iter().zip(accumulators) {
            let value = acc.finalize(agg)?;
            result_set.vector_mut(agg.output).set_value(0, &value);
        }
        if let Some(first) = self.aggregates.first() {
            set_selection(result_set, first.output.chunk_pos, SelectionVector::unfiltered(1));
        }
        debug!(
            aggregates = self.aggregates.len(),
            tuples,
            "processor.aggregate.finished"
        );
        self.state.exhaust();
        Ok(true)
    }

    fn copy(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self::new(
            self.id,
            self.child.copy(),
            self.child_schema.clone(),
            self.aggregates.clone(),
            self.print_info.clone(),
        ))
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

impl fmt::Debug for SimpleAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleAggregate")
            .field("id", &self.id)
            .field("aggregates", &self.aggregates)
            .finish()
    }
}
