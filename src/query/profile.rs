use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of query pipeline profiling counters.
///
/// Profiling is enabled via the `RUNQUERY_PROFILE` environment variable and
/// accumulates process-wide across calls.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent normalizing and compiling requests.
    pub compile_ns: u64,
    /// Number of compilations.
    pub compile_count: u64,
    /// Total nanoseconds spent in store calls.
    pub store_ns: u64,
    /// Number of store calls.
    pub store_count: u64,
    /// Total nanoseconds spent loading artifacts.
    pub artifact_load_ns: u64,
    /// Number of artifact loads (successful or not).
    pub artifact_load_count: u64,
    /// Total nanoseconds spent evaluating caller functions.
    pub artifact_eval_ns: u64,
    /// Number of caller function evaluations.
    pub artifact_eval_count: u64,
    /// Total nanoseconds spent reconciling and regrouping.
    pub reconcile_ns: u64,
    /// Number of reconcile passes.
    pub reconcile_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    compile_ns: AtomicU64,
    compile_count: AtomicU64,
    store_ns: AtomicU64,
    store_count: AtomicU64,
    artifact_load_ns: AtomicU64,
    artifact_load_count: AtomicU64,
    artifact_eval_ns: AtomicU64,
    artifact_eval_count: AtomicU64,
    reconcile_ns: AtomicU64,
    reconcile_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("RUNQUERY_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    Compile,
    Store,
    ArtifactLoad,
    ArtifactEval,
    Reconcile,
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
        QueryProfileKind::Compile => (&counters.compile_ns, &counters.compile_count),
        QueryProfileKind::Store => (&counters.store_ns, &counters.store_count),
        QueryProfileKind::ArtifactLoad => {
            (&counters.artifact_load_ns, &counters.artifact_load_count)
        }
        QueryProfileKind::ArtifactEval => {
            (&counters.artifact_eval_ns, &counters.artifact_eval_count)
        }
        QueryProfileKind::Reconcile => (&counters.reconcile_ns, &counters.reconcile_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Returns the current counters, or `None` when profiling is disabled.
pub fn profile_snapshot() -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    Some(QueryProfileSnapshot {
        compile_ns: counters.compile_ns.load(Ordering::Relaxed),
        compile_count: counters.compile_count.load(Ordering::Relaxed),
        store_ns: counters.store_ns.load(Ordering::Relaxed),
        store_count: counters.store_count.load(Ordering::Relaxed),
        artifact_load_ns: counters.artifact_load_ns.load(Ordering::Relaxed),
        artifact_load_count: counters.artifact_load_count.load(Ordering::Relaxed),
        artifact_eval_ns: counters.artifact_eval_ns.load(Ordering::Relaxed),
        artifact_eval_count: counters.artifact_eval_count.load(Ordering::Relaxed),
        reconcile_ns: counters.reconcile_ns.load(Ordering::Relaxed),
        reconcile_count: counters.reconcile_count.load(Ordering::Relaxed),
    })
}
