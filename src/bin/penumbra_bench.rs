//! Relationship count benchmark.
//!
//! Loads a random graph and times `MATCH (a)-[r]->(b) RETURN COUNT(*)` through
//! the unfused pipeline and both count paths of the fused operator.

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use penumbra::catalog::PropertyDefinition;
use penumbra::processor::{ExecutionContext, Executor, PlanMapper};
use penumbra::query::expression::Expression;
use penumbra::query::logical::{
    ExtendDirection, LogicalAggregate, LogicalExtend, LogicalOp, LogicalOperator, LogicalPlan,
    LogicalScanNodeTable,
};
use penumbra::query::profile::{profile_snapshot, QueryProfileSnapshot};
use penumbra::query::Optimizer;
use penumbra::storage::StorageOptions;
use penumbra::transaction::Transaction;
use penumbra::types::{InternalId, LogicalType, Value};
use penumbra::{Engine, EngineConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    if let Err(err) = try_main() {
        eprintln!("penumbra-bench failed: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[derive(Parser, Debug)]
struct Args {
    /// Committed nodes.
    #[arg(long, default_value_t = 10_000)]
    nodes: usize,

    /// Average out-degree of a node.
    #[arg(long, default_value_t = 8)]
    degree: usize,

    /// Nodes per node group.
    #[arg(long, default_value_t = 2_048)]
    node_group_capacity: u64,

    /// Worker threads.
    #[arg(long, env = "PENUMBRA_THREADS", default_value_t = 4)]
    threads: usize,

    /// Count inside a write transaction that holds this many extra
    /// uncommitted relationships.
    #[arg(long, default_value_t = 0)]
    uncommitted: usize,

    /// Which plans to run.
    #[arg(long, value_enum, default_value_t = Variant::All)]
    variant: Variant,

    /// RNG seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Timed repetitions per plan.
    #[arg(long, default_value_t = 5)]
    iterations: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum, Eq, PartialEq)]
#[value(rename_all = "kebab_case")]
enum Variant {
    Unfused,
    Generic,
    Fast,
    All,
}

impl Variant {
    fn label(self) -> &'static str {
        match self {
            Variant::Unfused => "unfused",
            Variant::Generic => "fused-generic",
            Variant::Fast => "fused-fast",
            Variant::All => "all",
        }
    }

    fn expand(self) -> Vec<Variant> {
        match self {
            Variant::All => vec![Variant::Unfused, Variant::Generic, Variant::Fast],
            other => vec![other],
        }
    }

    fn config(self, base: &EngineConfig) -> EngineConfig {
        base.clone()
            .enable_count_rel_table(self != Variant::Unfused)
            .count_fast_path(self == Variant::Fast)
    }
}

#[derive(Debug)]
struct BenchResult {
    variant: Variant,
    count: i64,
    operators: String,
    best: Duration,
    mean: Duration,
}

impl BenchResult {
    fn print_header() {
        println!(
            "{:<14} {:>12} {:>12} {:>12}  PLAN",
            "VARIANT", "COUNT", "BEST", "MEAN"
        );
    }

    fn print(&self) {
        println!(
            "{:<14} {:>12} {:>12} {:>12}  {}",
            self.variant.label(),
            self.count,
            format_duration(self.best),
            format_duration(self.mean),
            self.operators
        );
    }
}

fn format_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1_000 {
        format!("{micros} µs")
    } else if micros < 1_000_000 {
        format!("{:.2} ms", micros as f64 / 1_000.0)
    } else {
        format!("{:.2} s", micros as f64 / 1_000_000.0)
    }
}

fn print_telemetry(snapshot: &QueryProfileSnapshot) {
    let phase = |ns: u64, count: u64| {
        format!("{} over {count}", format_duration(Duration::from_nanos(ns)))
    };
    println!(
        "  optimize {} | map {} | scan {} | execute {}",
        phase(snapshot.optimize_ns, snapshot.optimize_count),
        phase(snapshot.map_ns, snapshot.map_count),
        phase(snapshot.scan_ns, snapshot.scan_count),
        phase(snapshot.execute_ns, snapshot.execute_count),
    );
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = EngineConfig::new()
        .num_threads(args.threads)
        .storage(StorageOptions::default().node_group_capacity(args.node_group_capacity));
    let engine = Engine::new(config.clone());
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let nodes = load_graph(&engine, &args, &mut rng)?;

    let txn = if args.uncommitted > 0 && !nodes.is_empty() {
        let txn = engine.begin_write()?;
        for _ in 0..args.uncommitted {
            let src = nodes[rng.gen_range(0..nodes.len())];
            let dst = nodes[rng.gen_range(0..nodes.len())];
            let since = Value::Int64(rng.gen_range(0..100));
            engine.insert_rel(&txn, "Knows", src, dst, vec![since])?;
        }
        txn
    } else {
        engine.begin_read()
    };

    BenchResult::print_header();
    for variant in args.variant.expand() {
        profile_snapshot(true);
        let result = run_variant(&engine, &txn, variant, &config, args.iterations.max(1))?;
        result.print();
        if let Some(snapshot) = profile_snapshot(true) {
            print_telemetry(&snapshot);
        }
    }
    if txn.is_write_transaction() {
        engine.rollback(txn);
    }
    Ok(())
}

fn load_graph(
    engine: &Engine,
    args: &Args,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<InternalId>, Box<dyn Error>> {
    engine.create_node_table(
        "Person",
        vec![PropertyDefinition::new("age", LogicalType::Int64)],
    )?;
    engine.create_rel_group(
        "Knows",
        &[("Person", "Person")],
        vec![PropertyDefinition::new("since", LogicalType::Int64)],
        "MANY_MANY",
    )?;
    let txn = engine.begin_write()?;
    let mut nodes = Vec::with_capacity(args.nodes);
    for _ in 0..args.nodes {
        let age = Value::Int64(rng.gen_range(18..90));
        nodes.push(engine.insert_node(&txn, "Person", vec![age])?);
    }
    if !nodes.is_empty() {
        for _ in 0..args.nodes * args.degree {
            let src = nodes[rng.gen_range(0..nodes.len())];
            let dst = nodes[rng.gen_range(0..nodes.len())];
            let since = Value::Int64(rng.gen_range(1990..2025));
            engine.insert_rel(&txn, "Knows", src, dst, vec![since])?;
        }
    }
    let start = Instant::now();
    engine.commit(txn)?;
    eprintln!(
        "loaded {} nodes, {} rels in {}",
        args.nodes,
        args.nodes * args.degree,
        format_duration(start.elapsed())
    );
    Ok(nodes)
}

fn count_plan(engine: &Engine) -> Result<LogicalPlan, Box<dyn Error>> {
    let catalog = engine.catalog();
    let person = catalog.node_table("Person")?;
    let knows = catalog.rel_group("Knows")?;
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
            rel: Expression::rel("r", vec![knows]),
            direction: ExtendDirection::Forward,
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

fn run_variant(
    engine: &Engine,
    txn: &Transaction,
    variant: Variant,
    base: &EngineConfig,
    iterations: usize,
) -> Result<BenchResult, Box<dyn Error>> {
    let config = variant.config(base);
    let executor = Executor::new(config.num_threads);
    let mut timings = Vec::with_capacity(iterations);
    let mut count = 0;
    let mut operators = String::new();
    for _ in 0..iterations {
        let mut plan = count_plan(engine)?;
        Optimizer::new(&config).optimize(&mut plan)?;
        let mut physical = PlanMapper::new(engine.storage(), &config).map(&plan)?;
        operators = physical.explain.operator_names().join(" <- ");
        let context = ExecutionContext::new(txn).with_timeout(config.query_timeout());
        let start = Instant::now();
        let result = executor.execute(&mut physical, &context)?;
        timings.push(start.elapsed());
        count = match result.single_value() {
            Some(Value::Int64(n)) => *n,
            other => return Err(format!("unexpected count result {other:?}").into()),
        };
    }
    let best = timings.iter().min().copied().unwrap_or_default();
    let total: Duration = timings.iter().sum();
    Ok(BenchResult {
        variant,
        count,
        operators,
        best,
        mean: total / iterations as u32,
    })
}
