#![allow(missing_docs)]

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use penumbra::catalog::PropertyDefinition;
use penumbra::query::expression::Expression;
use penumbra::query::logical::{
    LogicalOp, LogicalOperator, LogicalPlan, LogicalScanNodeTable, ScanPredicate,
};
use penumbra::storage::{
    ColumnPredicate, ColumnPredicateSet, CompareOp, NodeTable, NodeTableScanState, StorageOptions,
    TableScanSource,
};
use penumbra::transaction::Transaction;
use penumbra::types::{LogicalType, PenumbraError, Result, Value};
use penumbra::{Engine, EngineConfig};
use proptest::prelude::*;
use tempfile::tempdir;

fn person_engine(config: EngineConfig) -> Result<Engine> {
    let engine = Engine::new(config);
    engine.create_node_table(
        "Person",
        vec![
            PropertyDefinition::new("age", LogicalType::Int64),
            PropertyDefinition::new("name", LogicalType::String),
        ],
    )?;
    Ok(engine)
}

fn capacity(rows: u64) -> EngineConfig {
    EngineConfig::new().storage(StorageOptions::default().node_group_capacity(rows))
}

fn person_table(engine: &Engine) -> Result<Arc<NodeTable>> {
    let id = engine.catalog().node_table("Person")?.id;
    engine.storage().get_node_table(id)
}

fn insert_people(engine: &Engine, txn: &Transaction, ages: std::ops::Range<i64>) -> Result<()> {
    for age in ages {
        let name = Value::String(format!("p{age}"));
        engine.insert_node(txn, "Person", vec![Value::Int64(age), name])?;
    }
    Ok(())
}

/// Drives the storage scan loop over every visible node group.
fn scan_all(
    table: &NodeTable,
    txn: &Transaction,
    predicates: Vec<ColumnPredicateSet>,
) -> Result<Vec<Value>> {
    let mut state = NodeTableScanState::new();
    state.set_to_table(txn, table, vec![0], predicates)?;
    let mut ages = Vec::new();
    let sources = [
        (TableScanSource::Committed, table.num_committed_node_groups()),
        (TableScanSource::Uncommitted, table.num_uncommitted_node_groups(txn)),
    ];
    for (source, num_groups) in sources {
        for idx in 0..num_groups {
            state.source = source;
            state.node_group_idx = idx;
            table.init_scan_state(txn, &mut state)?;
            while table.scan(txn, &mut state)? {
                ages.extend(state.output_vector(0).selected_values());
            }
        }
    }
    Ok(ages)
}

fn scan_plan(engine: &Engine, predicates: Vec<ScanPredicate>) -> Result<LogicalPlan> {
    let person = engine.catalog().node_table("Person")?;
    let scan = LogicalOperator::leaf(LogicalOp::ScanNodeTable(LogicalScanNodeTable {
        node: Expression::node("p", vec![Arc::clone(&person)]),
        table_ids: vec![person.id],
        properties: vec![Expression::property("p", "age", LogicalType::Int64)],
        predicates,
    }));
    Ok(LogicalPlan::new(scan, false))
}

fn sorted_ages(rows: &[Vec<Value>]) -> Vec<i64> {
    let mut ages: Vec<i64> = rows
        .iter()
        .map(|row| match row[1] {
            Value::Int64(age) => age,
            ref other => panic!("unexpected age {other:?}"),
        })
        .collect();
    ages.sort_unstable();
    ages
}

#[test]
fn write_transaction_reads_its_overlay_after_committed_groups() -> Result<()> {
    let engine = person_engine(capacity(4))?;
    let txn = engine.begin_write()?;
    insert_people(&engine, &txn, 0..10)?;
    engine.commit(txn)?;

    let writer = engine.begin_write()?;
    insert_people(&engine, &writer, 10..15)?;
    let reader = engine.begin_read();
    let table = person_table(&engine)?;

    assert_eq!(table.num_committed_node_groups(), 3);
    assert_eq!(table.num_uncommitted_node_groups(&writer), 2);
    assert_eq!(table.num_uncommitted_node_groups(&reader), 0);

    let writer_ages = scan_all(&table, &writer, Vec::new())?;
    assert_eq!(writer_ages, (0..15).map(Value::Int64).collect::<Vec<_>>());
    assert_eq!(scan_all(&table, &reader, Vec::new())?.len(), 10);

    let result = engine.execute(scan_plan(&engine, Vec::new())?, &writer)?;
    assert_eq!(sorted_ages(&result.rows), (0..15).collect::<Vec<_>>());
    let result = engine.execute(scan_plan(&engine, Vec::new())?, &reader)?;
    assert_eq!(sorted_ages(&result.rows), (0..10).collect::<Vec<_>>());
    engine.rollback(writer);
    Ok(())
}

#[test]
fn pushed_predicates_filter_scanned_rows() -> Result<()> {
    let engine = person_engine(capacity(8).num_threads(3))?;
    let txn = engine.begin_write()?;
    insert_people(&engine, &txn, 0..40)?;
    engine.commit(txn)?;
    let txn = engine.begin_read();

    let table = person_table(&engine)?;
    let between = ColumnPredicateSet::new(
        0,
        vec![
            ColumnPredicate::new(CompareOp::Ge, Value::Int64(10)),
            ColumnPredicate::new(CompareOp::Lt, Value::Int64(13)),
        ],
    );
    let ages = scan_all(&table, &txn, vec![between])?;
    assert_eq!(ages, vec![Value::Int64(10), Value::Int64(11), Value::Int64(12)]);

    let predicate = ScanPredicate {
        property: "age".into(),
        op: CompareOp::Gt,
        value: Value::Int64(35),
    };
    let result = engine.execute(scan_plan(&engine, vec![predicate])?, &txn)?;
    assert_eq!(sorted_ages(&result.rows), vec![36, 37, 38, 39]);
    Ok(())
}

#[test]
fn scan_state_misuse_is_reported() -> Result<()> {
    let engine = person_engine(capacity(4))?;
    engine.create_node_table("City", Vec::new())?;
    let txn = engine.begin_write()?;
    insert_people(&engine, &txn, 0..3)?;
    engine.commit(txn)?;
    let reader = engine.begin_read();
    let table = person_table(&engine)?;
    let city = engine
        .storage()
        .get_node_table(engine.catalog().node_table("City")?.id)?;

    let mut state = NodeTableScanState::new();
    assert!(table.init_scan_state(&reader, &mut state).is_err(), "unbound state");

    let err = state
        .set_to_table(&reader, &table, vec![7], Vec::new())
        .unwrap_err();
    assert!(matches!(err, PenumbraError::Query(ref msg) if msg.contains("out of range")));

    state.set_to_table(&reader, &table, vec![0, 1], Vec::new())?;
    assert!(table.scan(&reader, &mut state).is_err(), "scan before init");
    assert!(city.init_scan_state(&reader, &mut state).is_err(), "other table");

    let other = engine.begin_read();
    assert!(table.init_scan_state(&other, &mut state).is_err(), "other transaction");

    state.source = TableScanSource::Uncommitted;
    assert!(table.init_scan_state(&reader, &mut state).is_err(), "read-only overlay");

    state.source = TableScanSource::Committed;
    state.node_group_idx = 5;
    assert!(table.init_scan_state(&reader, &mut state).is_err(), "group out of range");

    state.node_group_idx = 0;
    table.init_scan_state(&reader, &mut state)?;
    assert!(table.scan(&reader, &mut state)?);
    assert_eq!(state.output_vector(1).selected_values()[2], Value::String("p2".into()));
    assert!(!table.scan(&reader, &mut state)?);
    Ok(())
}

#[test]
fn empty_table_scans_nothing() -> Result<()> {
    let engine = person_engine(capacity(4))?;
    let writer = engine.begin_write()?;
    let table = person_table(&engine)?;
    assert_eq!(table.num_committed_node_groups(), 0);
    assert_eq!(table.num_uncommitted_node_groups(&writer), 0);
    assert!(scan_all(&table, &writer, Vec::new())?.is_empty());
    let result = engine.execute(scan_plan(&engine, Vec::new())?, &writer)?;
    assert!(result.rows.is_empty());
    Ok(())
}

#[test]
fn raised_interrupt_stops_the_scan() -> Result<()> {
    let engine = person_engine(capacity(4))?;
    let txn = engine.begin_write()?;
    insert_people(&engine, &txn, 0..20)?;
    engine.commit(txn)?;
    let txn = engine.begin_read();
    let interrupt = Arc::new(AtomicBool::new(false));
    interrupt.store(true, Ordering::Relaxed);
    let err = engine
        .execute_with_interrupt(scan_plan(&engine, Vec::new())?, &txn, interrupt)
        .unwrap_err();
    assert!(matches!(err, PenumbraError::Interrupted));
    Ok(())
}

#[test]
fn elapsed_deadline_times_out() -> Result<()> {
    let engine = person_engine(capacity(4).query_timeout_ms(Some(0)))?;
    let txn = engine.begin_write()?;
    insert_people(&engine, &txn, 0..20)?;
    engine.commit(txn)?;
    let txn = engine.begin_read();
    let err = engine
        .execute(scan_plan(&engine, Vec::new())?, &txn)
        .unwrap_err();
    assert_eq!(err.code(), "Timeout");
    Ok(())
}

#[test]
fn configuration_loads_from_toml_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("penumbra.toml");
    assert_eq!(EngineConfig::load(&path)?, EngineConfig::default());

    fs::write(
        &path,
        "num_threads = 3\ncount_fast_path = false\nquery_timeout_ms = 250\n\n\
         [storage]\nnode_group_capacity = 16\n",
    )?;
    let config = EngineConfig::load(&path)?;
    assert_eq!(config.num_threads, 3);
    assert!(!config.count_fast_path);
    assert!(config.enable_order_by_push_down);
    assert_eq!(config.storage.node_group_capacity, 16);
    assert_eq!(EngineConfig::from_toml_str(&config.to_toml_string()?)?, config);

    fs::write(&path, "num_threads = 0\n")?;
    assert!(matches!(EngineConfig::load(&path), Err(PenumbraError::Config(_))));
    fs::write(&path, "num_threads = \"many\"\n")?;
    assert!(matches!(EngineConfig::load(&path), Err(PenumbraError::Config(_))));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn scanned_rows_match_total_rows(
        batches in proptest::collection::vec(0i64..12, 0..5),
        uncommitted in 0i64..15,
        capacity_rows in 1u64..7,
        compact in any::<bool>(),
    ) {
        let config = EngineConfig::new().storage(
            StorageOptions::default()
                .node_group_capacity(capacity_rows)
                .compact_on_commit(compact),
        );
        let engine = person_engine(config).unwrap();
        let mut next = 0;
        for batch in batches {
            let txn = engine.begin_write().unwrap();
            insert_people(&engine, &txn, next..next + batch).unwrap();
            engine.commit(txn).unwrap();
            next += batch;
        }
        let writer = engine.begin_write().unwrap();
        insert_people(&engine, &writer, next..next + uncommitted).unwrap();
        let reader = engine.begin_read();
        let table = person_table(&engine).unwrap();

        let seen = scan_all(&table, &writer, Vec::new()).unwrap();
        prop_assert_eq!(seen.len() as u64, table.num_total_rows(&writer));
        prop_assert_eq!(seen, (0..next + uncommitted).map(Value::Int64).collect::<Vec<_>>());
        let committed = scan_all(&table, &reader, Vec::new()).unwrap();
        prop_assert_eq!(committed.len() as u64, table.num_total_rows(&reader));
        prop_assert_eq!(committed.len() as i64, next);
        engine.rollback(writer);
    }
}
