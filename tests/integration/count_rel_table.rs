#![allow(missing_docs)]

use std::sync::Arc;

use penumbra::catalog::PropertyDefinition;
use penumbra::processor::{ExecutionContext, Executor, PlanMapper};
use penumbra::query::expression::Expression;
use penumbra::query::logical::{
    ExtendDirection, LogicalAggregate, LogicalExtend, LogicalOp, LogicalOperator,
    LogicalOperatorType, LogicalPlan, LogicalScanNodeTable,
};
use penumbra::query::Optimizer;
use penumbra::storage::StorageOptions;
use penumbra::transaction::Transaction;
use penumbra::types::{InternalId, LogicalType, Result, Value};
use penumbra::{Engine, EngineConfig};
use proptest::prelude::*;

fn engine(node_group_capacity: u64) -> Result<Engine> {
    let config = EngineConfig::new()
        .num_threads(2)
        .storage(StorageOptions::default().node_group_capacity(node_group_capacity));
    let engine = Engine::new(config);
    engine.create_node_table(
        "Person",
        vec![PropertyDefinition::new("age", LogicalType::Int64)],
    )?;
    engine.create_node_table("City", Vec::new())?;
    engine.create_rel_group(
        "KNOWS",
        &[("Person", "Person"), ("Person", "City")],
        vec![PropertyDefinition::new("since", LogicalType::Int64)],
        "MANY_MANY",
    )?;
    Ok(engine)
}

fn count_plan(engine: &Engine, direction: ExtendDirection) -> Result<LogicalPlan> {
    let catalog = engine.catalog();
    let person = catalog.node_table("Person")?;
    let scan = LogicalOperator::leaf(LogicalOp::ScanNodeTable(LogicalScanNodeTable {
        node: Expression::node("a", vec![Arc::clone(&person)]),
        table_ids: vec![person.id],
        properties: Vec::new(),
        predicates: Vec::new(),
    }));
    let extend = LogicalOperator::unary(
        LogicalOp::Extend(LogicalExtend {
            bound_node: Expression::node("a", vec![Arc::clone(&person)]),
            nbr_node: Expression::node("b", vec![person]),
            rel: Expression::rel("r", vec![catalog.rel_group("KNOWS")?]),
            direction,
            properties: Vec::new(),
            predicates: Vec::new(),
        }),
        scan,
    );
    let aggregate = LogicalOperator::unary(
        LogicalOp::Aggregate(LogicalAggregate {
            keys: Vec::new(),
            aggregates: vec![Expression::count_star()],
        }),
        extend,
    );
    Ok(LogicalPlan::new(aggregate, false))
}

/// Counts `KNOWS` relationships between persons with the given switches.
fn count_with(
    engine: &Engine,
    txn: &Transaction,
    fuse: bool,
    fast_path: bool,
) -> Result<(i64, Vec<String>)> {
    let config = engine
        .config()
        .clone()
        .enable_count_rel_table(fuse)
        .count_fast_path(fast_path);
    let mut plan = count_plan(engine, ExtendDirection::Forward)?;
    Optimizer::new(&config).optimize(&mut plan)?;
    let mut physical = PlanMapper::new(engine.storage(), &config).map(&plan)?;
    let operators = physical
        .explain
        .operator_names()
        .into_iter()
        .map(str::to_owned)
        .collect();
    let context = ExecutionContext::new(txn);
    let result = Executor::new(config.num_threads).execute(&mut physical, &context)?;
    match result.single_value() {
        Some(Value::Int64(count)) => Ok((*count, operators)),
        other => panic!("count returned {other:?}"),
    }
}

fn load(
    engine: &Engine,
    txn: &Transaction,
    people: usize,
    edges: &[(usize, usize)],
) -> Result<Vec<InternalId>> {
    let mut ids = Vec::with_capacity(people);
    for age in 0..people {
        ids.push(engine.insert_node(txn, "Person", vec![Value::Int64(age as i64)])?);
    }
    for &(src, dst) in edges {
        engine.insert_rel(txn, "KNOWS", ids[src], ids[dst], vec![Value::Null])?;
    }
    Ok(ids)
}

fn knows_total_rows(engine: &Engine, txn: &Transaction) -> Result<u64> {
    let group = engine.catalog().rel_group("KNOWS")?;
    let person = engine.catalog().node_table("Person")?;
    let mut total = 0;
    for info in &group.rel_entry_infos {
        if info.src == person.id && info.dst == person.id {
            total += engine.storage().get_rel_table(info.oid)?.num_total_rows(txn);
        }
    }
    Ok(total)
}

#[test]
fn fused_count_matches_total_rows() -> Result<()> {
    let engine = engine(4)?;
    let txn = engine.begin_write()?;
    load(&engine, &txn, 10, &[(0, 1), (0, 2), (3, 3), (9, 0), (5, 6)])?;
    let city = engine.insert_node(&txn, "City", Vec::new())?;
    let first = engine.catalog().node_table("Person")?;
    let first = InternalId::new(first.id, 0);
    engine.insert_rel(&txn, "KNOWS", first, city, vec![Value::Null])?;
    engine.commit(txn)?;

    let txn = engine.begin_read();
    let (count, operators) = count_with(&engine, &txn, true, true)?;
    assert_eq!(operators, vec!["COUNT_REL_TABLE".to_owned()]);
    assert_eq!(count, 5);
    assert_eq!(count as u64, knows_total_rows(&engine, &txn)?);

    let result = engine.execute(count_plan(&engine, ExtendDirection::Forward)?, &txn)?;
    assert_eq!(result.single_value(), Some(&Value::Int64(5)));
    Ok(())
}

#[test]
fn empty_tables_count_zero_on_both_paths() -> Result<()> {
    let engine = engine(4)?;
    let txn = engine.begin_read();
    assert_eq!(count_with(&engine, &txn, true, true)?.0, 0);
    assert_eq!(count_with(&engine, &txn, true, false)?.0, 0);
    assert_eq!(count_with(&engine, &txn, false, false)?.0, 0);
    Ok(())
}

#[test]
fn uncommitted_relationships_are_visible_to_their_writer_only() -> Result<()> {
    let engine = engine(3)?;
    let txn = engine.begin_write()?;
    let ids = load(&engine, &txn, 5, &[(0, 1), (1, 2)])?;
    engine.commit(txn)?;

    let writer = engine.begin_write()?;
    let extra = engine.insert_node(&writer, "Person", vec![Value::Int64(99)])?;
    engine.insert_rel(&writer, "KNOWS", extra, ids[0], vec![Value::Int64(2024)])?;
    engine.insert_rel(&writer, "KNOWS", ids[4], extra, vec![Value::Null])?;
    let reader = engine.begin_read();

    for fast_path in [true, false] {
        assert_eq!(count_with(&engine, &writer, true, fast_path)?.0, 4);
        assert_eq!(count_with(&engine, &reader, true, fast_path)?.0, 2);
    }
    assert_eq!(count_with(&engine, &writer, false, false)?.0, 4);

    engine.rollback(writer);
    let after = engine.begin_read();
    assert_eq!(count_with(&engine, &after, true, true)?.0, 2);
    Ok(())
}

#[test]
fn backward_count_fuses_and_matches_forward() -> Result<()> {
    let engine = engine(2)?;
    let txn = engine.begin_write()?;
    load(&engine, &txn, 6, &[(0, 1), (2, 1), (5, 4)])?;
    engine.commit(txn)?;
    let txn = engine.begin_read();
    let mut plan = count_plan(&engine, ExtendDirection::Backward)?;
    engine.optimize(&mut plan)?;
    assert_eq!(plan.root.operator_type(), LogicalOperatorType::CountRelTable);
    let result = engine.execute(count_plan(&engine, ExtendDirection::Backward)?, &txn)?;
    assert_eq!(result.single_value(), Some(&Value::Int64(3)));
    Ok(())
}

#[test]
fn both_directions_stay_unfused_and_count_twice() -> Result<()> {
    let engine = engine(2)?;
    let txn = engine.begin_write()?;
    load(&engine, &txn, 4, &[(0, 1), (1, 2), (3, 0)])?;
    engine.commit(txn)?;
    let txn = engine.begin_read();
    let explain = engine.explain(count_plan(&engine, ExtendDirection::Both)?)?;
    assert!(!explain.operator_names().contains(&"COUNT_REL_TABLE"));
    let result = engine.execute(count_plan(&engine, ExtendDirection::Both)?, &txn)?;
    assert_eq!(result.single_value(), Some(&Value::Int64(6)));
    Ok(())
}

#[test]
fn optimizing_twice_keeps_the_fused_plan() -> Result<()> {
    let engine = engine(4)?;
    let mut plan = count_plan(&engine, ExtendDirection::Forward)?;
    engine.optimize(&mut plan)?;
    let once = plan.clone();
    engine.optimize(&mut plan)?;
    assert_eq!(plan, once);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_count_path_agrees(
        people in 1usize..24,
        raw_edges in proptest::collection::vec((0usize..24, 0usize..24), 0..60),
        committed_split in 0usize..60,
        capacity in 1u64..6,
    ) {
        let engine = engine(capacity).unwrap();
        let edges: Vec<(usize, usize)> = raw_edges
            .into_iter()
            .map(|(src, dst)| (src % people, dst % people))
            .collect();
        let split = committed_split.min(edges.len());

        let txn = engine.begin_write().unwrap();
        let ids = load(&engine, &txn, people, &edges[..split]).unwrap();
        engine.commit(txn).unwrap();

        let writer = engine.begin_write().unwrap();
        for &(src, dst) in &edges[split..] {
            engine.insert_rel(&writer, "KNOWS", ids[src], ids[dst], vec![Value::Null]).unwrap();
        }

        let expected = edges.len() as i64;
        let unfused = count_with(&engine, &writer, false, false).unwrap().0;
        let generic = count_with(&engine, &writer, true, false).unwrap().0;
        let fast = count_with(&engine, &writer, true, true).unwrap().0;
        prop_assert_eq!(unfused, expected);
        prop_assert_eq!(generic, expected);
        prop_assert_eq!(fast, expected);
        prop_assert_eq!(fast as u64, knows_total_rows(&engine, &writer).unwrap());
        engine.rollback(writer);
    }
}
