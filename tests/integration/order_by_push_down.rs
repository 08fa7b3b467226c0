#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;
use penumbra::function::{InMemoryTableFunction, TableFunction};
use penumbra::query::expression::{Expression, ExpressionRef};
use penumbra::query::logical::{
    LogicalFilter, LogicalOp, LogicalOperator, LogicalOrderBy, LogicalPlan,
    LogicalTableFunctionCall,
};
use penumbra::types::{LogicalType, PenumbraError, Result, Value};
use penumbra::{Engine, EngineConfig};
use proptest::prelude::*;

/// Table function that remembers the order clause of every scan.
struct RecordingFunction {
    inner: InMemoryTableFunction,
    clauses: Mutex<Vec<Option<String>>>,
}

impl RecordingFunction {
    fn new(rows: Vec<Vec<Value>>) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryTableFunction::new(
                "people",
                vec![
                    ("name".into(), LogicalType::String),
                    ("age".into(), LogicalType::Int64),
                ],
                rows,
            ),
            clauses: Mutex::new(Vec::new()),
        })
    }

    fn clauses(&self) -> Vec<Option<String>> {
        self.clauses.lock().clone()
    }
}

impl TableFunction for RecordingFunction {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn columns(&self) -> Vec<(String, LogicalType)> {
        self.inner.columns()
    }

    fn scan(&self, order_by: Option<&str>) -> Result<Vec<Vec<Value>>> {
        self.clauses.lock().push(order_by.map(str::to_owned));
        self.inner.scan(order_by)
    }
}

fn name_expr() -> ExpressionRef {
    Expression::property("n", "name", LogicalType::String)
}

fn age_expr() -> ExpressionRef {
    Expression::property("n", "age", LogicalType::Int64)
}

fn people_rows(people: &[(&str, Option<i64>)]) -> Vec<Vec<Value>> {
    people
        .iter()
        .map(|(name, age)| {
            vec![
                Value::String((*name).into()),
                age.map_or(Value::Null, Value::Int64),
            ]
        })
        .collect()
}

fn call(function: Arc<RecordingFunction>) -> LogicalOperator {
    LogicalOperator::leaf(LogicalOp::TableFunctionCall(LogicalTableFunctionCall {
        function,
        columns: vec![name_expr(), age_expr()],
        order_by: None,
    }))
}

fn order_by(
    child: LogicalOperator,
    key: ExpressionRef,
    ascending: bool,
    limit: Option<i64>,
) -> LogicalOperator {
    LogicalOperator::unary(
        LogicalOp::OrderBy(LogicalOrderBy {
            expressions: vec![key],
            is_asc_orders: vec![ascending],
            skip: None,
            limit: limit.map(|n| Expression::literal(Value::Int64(n))),
        }),
        child,
    )
}

fn names(rows: &[Vec<Value>]) -> Vec<String> {
    rows.iter()
        .map(|row| match &row[0] {
            Value::String(name) => name.clone(),
            other => panic!("unexpected name {other:?}"),
        })
        .collect()
}

#[test]
fn descending_key_is_pushed_to_the_table_function() -> Result<()> {
    let engine = Engine::new(EngineConfig::default());
    let function = RecordingFunction::new(people_rows(&[
        ("ada", Some(36)),
        ("bob", None),
        ("cy", Some(19)),
        ("di", Some(52)),
    ]));
    let plan = LogicalPlan::new(
        order_by(call(Arc::clone(&function)), age_expr(), false, None),
        false,
    );

    let explain = engine.explain(plan.clone())?;
    assert!(explain
        .render()
        .contains("TABLE_FUNCTION_CALL [people ORDER BY age DESC]"));

    let txn = engine.begin_read();
    let result = engine.execute(plan, &txn)?;
    assert_eq!(result.columns, vec!["n.name".to_owned(), "n.age".to_owned()]);
    assert_eq!(names(&result.rows), vec!["bob", "di", "ada", "cy"]);
    assert_eq!(
        function.clauses(),
        vec![Some(" ORDER BY age DESC".to_owned())]
    );
    Ok(())
}

#[test]
fn pushdown_reaches_through_filters_and_keeps_the_limit() -> Result<()> {
    let engine = Engine::new(EngineConfig::default());
    let function = RecordingFunction::new(people_rows(&[
        ("ada", Some(36)),
        ("bob", None),
        ("cy", Some(19)),
        ("di", Some(52)),
        ("ed", Some(27)),
    ]));
    let filter = LogicalOperator::unary(
        LogicalOp::Filter(LogicalFilter {
            predicate: Expression::scalar("IS_NOT_NULL", vec![age_expr()], LogicalType::Bool),
        }),
        call(Arc::clone(&function)),
    );
    let plan = LogicalPlan::new(order_by(filter, age_expr(), true, Some(2)), false);
    let txn = engine.begin_read();
    let result = engine.execute(plan, &txn)?;
    assert_eq!(names(&result.rows), vec!["cy", "ed"]);
    assert_eq!(function.clauses(), vec![Some(" ORDER BY age ASC".to_owned())]);
    Ok(())
}

#[test]
fn computed_sort_key_fails_the_query() {
    let engine = Engine::new(EngineConfig::default());
    let function = RecordingFunction::new(people_rows(&[("ada", Some(36))]));
    let plus_one = Expression::scalar(
        "ADD",
        vec![age_expr(), Expression::literal(Value::Int64(1))],
        LogicalType::Int64,
    );
    let plan = LogicalPlan::new(
        order_by(call(Arc::clone(&function)), plus_one, true, None),
        false,
    );
    let txn = engine.begin_read();
    let err = engine.execute(plan, &txn).unwrap_err();
    assert!(
        matches!(&err, PenumbraError::Query(msg) if msg.contains("only supports variable expressions")),
        "unexpected error {err:?}"
    );
    assert!(function.clauses().is_empty(), "function must not run");
}

#[test]
fn disabled_pass_leaves_the_call_unordered() -> Result<()> {
    let engine = Engine::new(EngineConfig::default().enable_order_by_push_down(false));
    let function = RecordingFunction::new(people_rows(&[("ada", Some(36)), ("cy", Some(19))]));
    let plan = LogicalPlan::new(
        order_by(call(Arc::clone(&function)), age_expr(), true, None),
        false,
    );
    let txn = engine.begin_read();
    let result = engine.execute(plan, &txn)?;
    assert_eq!(names(&result.rows), vec!["cy", "ada"]);
    assert_eq!(function.clauses(), vec![None]);
    Ok(())
}

#[test]
fn call_without_order_by_gets_no_clause() -> Result<()> {
    let engine = Engine::new(EngineConfig::default());
    let function = RecordingFunction::new(people_rows(&[("ada", Some(36)), ("cy", Some(19))]));
    let txn = engine.begin_read();
    let result = engine.execute(LogicalPlan::new(call(Arc::clone(&function)), false), &txn)?;
    assert_eq!(names(&result.rows), vec!["ada", "cy"]);
    assert_eq!(function.clauses(), vec![None]);
    Ok(())
}

#[test]
fn keys_without_a_direction_each_fail_the_query() {
    for push_down in [true, false] {
        let engine = Engine::new(EngineConfig::default().enable_order_by_push_down(push_down));
        let function = RecordingFunction::new(people_rows(&[("ada", Some(1)), ("bob", Some(1))]));
        let root = LogicalOperator::unary(
            LogicalOp::OrderBy(LogicalOrderBy {
                expressions: vec![age_expr(), name_expr()],
                is_asc_orders: vec![true],
                skip: None,
                limit: None,
            }),
            call(Arc::clone(&function)),
        );
        let txn = engine.begin_read();
        let err = engine
            .execute(LogicalPlan::new(root, false), &txn)
            .unwrap_err();
        assert!(
            matches!(&err, PenumbraError::Query(msg) if msg.contains("2 keys but 1")),
            "unexpected error {err:?}"
        );
        assert!(function.clauses().is_empty(), "function must not run");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn pushed_and_unpushed_sorts_agree(
        ages in proptest::collection::vec(proptest::option::of(-5i64..5), 0..40),
        ascending in any::<bool>(),
        limit in proptest::option::of(0i64..45),
    ) {
        let rows: Vec<Vec<Value>> = ages
            .iter()
            .enumerate()
            .map(|(idx, age)| {
                vec![
                    Value::String(format!("p{idx}")),
                    age.map_or(Value::Null, Value::Int64),
                ]
            })
            .collect();
        let run = |push_down: bool| {
            let config = EngineConfig::default().enable_order_by_push_down(push_down);
            let engine = Engine::new(config);
            let function = RecordingFunction::new(rows.clone());
            let root = order_by(call(function), age_expr(), ascending, limit);
            let plan = LogicalPlan::new(root, false);
            let txn = engine.begin_read();
            engine.execute(plan, &txn).unwrap().rows
        };
        let pushed = run(true);
        prop_assert_eq!(&pushed, &run(false));
        let expected = limit.map_or(rows.len(), |n| rows.len().min(n as usize));
        prop_assert_eq!(pushed.len(), expected);
    }
}
