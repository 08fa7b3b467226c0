#![allow(missing_docs)]

use std::sync::Arc;

use penumbra::catalog::PropertyDefinition;
use penumbra::query::expression::Expression;
use penumbra::query::logical::{LogicalOp, LogicalOperator, LogicalPlan, LogicalScanNodeTable};
use penumbra::query::profile::profile_snapshot;
use penumbra::types::{LogicalType, Result, Value};
use penumbra::{Engine, EngineConfig};

// The profiling switch is read once per process, so this target holds a
// single test that turns it on before any query runs.
#[test]
fn each_phase_is_recorded_once_per_query() -> Result<()> {
    std::env::set_var("PENUMBRA_PROFILE", "1");
    let engine = Engine::new(EngineConfig::default());
    let person = engine.create_node_table(
        "Person",
        vec![PropertyDefinition::new("age", LogicalType::Int64)],
    )?;
    let txn = engine.begin_write()?;
    for age in 0..5 {
        engine.insert_node(&txn, "Person", vec![Value::Int64(age)])?;
    }
    engine.commit(txn)?;

    let plan = || {
        LogicalPlan::new(
            LogicalOperator::leaf(LogicalOp::ScanNodeTable(LogicalScanNodeTable {
                node: Expression::node("p", vec![Arc::clone(&person)]),
                table_ids: vec![person.id],
                properties: vec![Expression::property("p", "age", LogicalType::Int64)],
                predicates: Vec::new(),
            })),
            false,
        )
    };

    profile_snapshot(true);
    let mut optimized = plan();
    engine.optimize(&mut optimized)?;
    let snapshot = profile_snapshot(true).expect("profiling is enabled");
    assert_eq!(snapshot.optimize_count, 1);
    assert_eq!(snapshot.map_count, 0);
    assert_eq!(snapshot.execute_count, 0);

    let txn = engine.begin_read();
    let result = engine.execute(plan(), &txn)?;
    assert_eq!(result.rows.len(), 5);
    let snapshot = profile_snapshot(false).expect("profiling is enabled");
    assert_eq!(snapshot.optimize_count, 1);
    assert_eq!(snapshot.map_count, 1);
    assert_eq!(snapshot.execute_count, 1);
    assert!(snapshot.scan_count >= 1);

    let reset = profile_snapshot(true).expect("profiling is enabled");
    assert_eq!(reset, snapshot);
    assert_eq!(profile_snapshot(false), Some(Default::default()));
    Ok(())
}
