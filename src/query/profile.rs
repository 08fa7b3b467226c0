use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of query profiling metrics.
///
/// Profiling is enabled by setting the `PENUMBRA_PROFILE` environment
/// variable. Each phase records total nanoseconds and the number of times it
/// ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent in optimizer passes.
    pub optimize_ns: u64,
    /// Number of optimizer runs.
    pub optimize_count: u64,
    /// Total nanoseconds spent mapping logical plans to operators.
    pub map_ns: u64,
    /// Number of mapped plans.
    pub map_count: u64,
    /// Total nanoseconds spent scanning storage.
    pub scan_ns: u64,
    /// Number of storage scan calls that produced output.
    pub scan_count: u64,
    /// Total nanoseconds spent executing plans.
    pub execute_ns: u64,
    /// Number of executed plans.
    pub execute_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    optimize_ns: AtomicU64,
    optimize_count: AtomicU64,
    map_ns: AtomicU64,
    map_count: AtomicU64,
    scan_ns: AtomicU64,
    scan_count: AtomicU64,
    execute_ns: AtomicU64,
    execute_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("PENUMBRA_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// Optimizer pipeline.
    Optimize,
    /// Plan mapping.
    Map,
    /// Storage scans.
    Scan,
    /// Plan execution.
    Execute,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Optimize => (&counters.optimize_ns, &counters.optimize_count),
        QueryProfileKind::Map => (&counters.map_ns, &counters.map_count),
        QueryProfileKind::Scan => (&counters.scan_ns, &counters.scan_count),
        QueryProfileKind::Execute => (&counters.execute_ns, &counters.execute_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current query profiling metrics.
///
/// Returns `None` when `PENUMBRA_PROFILE` is unset. With `reset`, counters
/// are zeroed as they are read.
///
/// ```no_run
/// use penumbra::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("scan time: {}ns", snapshot.scan_ns);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        optimize_ns: load(&counters.optimize_ns),
        optimize_count: load(&counters.optimize_count),
        map_ns: load(&counters.map_ns),
        map_count: load(&counters.map_count),
        scan_ns: load(&counters.scan_ns),
        scan_count: load(&counters.scan_count),
        execute_ns: load(&counters.execute_ns),
        execute_count: load(&counters.execute_count),
    })
}
