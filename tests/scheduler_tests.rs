//! End-to-end scheduler scenarios with mock collaborators
//!
//! The fixer mocks below short-circuit the network: instead of a node
//! POSTing to the callback server, they feed the same `apply_status` path
//! the HTTP handler uses. The Scheduler under test cannot tell the
//! difference.

use async_trait::async_trait;
use rangemend::fixer::RepairRunner;
use rangemend::model::{
    ClusterConfig, KeyspaceConfig, Repair, RepairStatus, StatusKind, TableConfig, TableKey,
};
use rangemend::obtainer::{StaticObtainer, UnreachableObtainer};
use rangemend::regulator::Regulator;
use rangemend::scheduler::{Components, RepairIds, Scheduler, SchedulerConfig};
use rangemend::server::{CallbackState, CompletionBoard};
use rangemend::store::MemoryDatabase;
use rangemend::tracker::Tracker;
use rangemend::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixer that acknowledges the dispatch and reports a terminal callback
/// after a fixed repair duration.
struct EchoFixer {
    state: CallbackState,
    duration: Duration,
    kind: StatusKind,
}

#[async_trait]
impl RepairRunner for EchoFixer {
    async fn start(&self, repair: &Repair) -> Result<()> {
        let state = self.state.clone();
        let repair = repair.clone();
        let duration = self.duration;
        let kind = self.kind;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            state.apply_status(&RepairStatus {
                session: format!("session-{}", repair.id),
                repair,
                kind,
                message: "done".into(),
            });
        });
        Ok(())
    }
}

/// Fixer that accepts every dispatch but never reports back.
struct SilentFixer;

#[async_trait]
impl RepairRunner for SilentFixer {
    async fn start(&self, _repair: &Repair) -> Result<()> {
        Ok(())
    }
}

/// Fixer whose node rejects every repair command.
struct RejectingFixer;

#[async_trait]
impl RepairRunner for RejectingFixer {
    async fn start(&self, repair: &Repair) -> Result<()> {
        Err(Error::Dispatch(format!("node refused repair {}", repair.id)))
    }
}

struct Harness {
    components: Components,
    state: CallbackState,
}

fn harness(endpoints: &[&str], fixer: Arc<dyn RepairRunner>) -> Harness {
    let tracker = Arc::new(Tracker::new(Arc::new(MemoryDatabase::new())));
    let regulator = Arc::new(Regulator::new(10));
    let board = Arc::new(CompletionBoard::new());
    let state = CallbackState::new(tracker.clone(), regulator.clone(), board.clone());
    let components = Components {
        obtainer: Arc::new(StaticObtainer::new(
            endpoints.iter().map(|e| e.to_string()).collect(),
        )),
        fixer,
        tracker,
        regulator,
        board,
        ids: Arc::new(RepairIds::new()),
    };
    Harness { components, state }
}

fn one_table_cluster() -> ClusterConfig {
    ClusterConfig {
        id: 1,
        name: "c1".into(),
        interval: "1w".into(),
        keyspaces: vec![KeyspaceConfig {
            name: "events".into(),
            slices: 3,
            tables: vec![TableConfig {
                name: "visits".into(),
                size: 0,
                slices: 0,
                weight: 1.0,
            }],
        }],
    }
}

fn scheduler(harness: &Harness, config: SchedulerConfig, shutdown: CancellationToken) -> Scheduler {
    Scheduler::new(
        one_table_cluster(),
        "http://localhost:8888/status".into(),
        config,
        harness.components.clone(),
        shutdown,
    )
}

#[tokio::test]
async fn cluster_drains_and_regulator_learns_endpoint_latency() {
    // Start with a placeholder fixer, then wire the echo fixer to the
    // harness's own callback state.
    let h = harness(&["e1", "e1", "e2"], Arc::new(SilentFixer));
    let mut components = h.components.clone();
    components.fixer = Arc::new(EchoFixer {
        state: h.state.clone(),
        duration: Duration::from_millis(5),
        kind: StatusKind::Complete,
    });
    let sched = Scheduler::new(
        one_table_cluster(),
        "http://localhost:8888/status".into(),
        SchedulerConfig {
            max_pace: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
            attempts: 2,
            retry_backoff: Duration::from_millis(10),
        },
        components.clone(),
        CancellationToken::new(),
    );

    let report = sched.run_once().await;
    assert!(!report.cancelled);
    assert_eq!(report.tables, 1);
    assert_eq!(report.fragments, 3);
    assert_eq!(report.failed, 0);

    let key = TableKey::new("c1", "events", "visits");
    assert!(components.tracker.is_complete(&key));
    let stats = components.tracker.stats(&key).unwrap();
    assert_eq!(stats.percent, 100);
    assert_eq!(stats.percent_cluster, 100);
    assert_eq!(stats.failed, 0);

    // Two repairs hit e1, one hit e2; pacing now reflects their latency.
    assert_eq!(components.regulator.samples("e1"), 2);
    assert_eq!(components.regulator.samples("e2"), 1);
    assert!(components.regulator.admit("e1") >= Duration::from_millis(5));
    assert!(components.regulator.admit("e1") < Duration::from_secs(1));

    // Fully successful cycle records the cluster's last success.
    assert!(components.tracker.last_cluster_success("c1").is_some());
    assert_eq!(components.board.pending(), 0);
}

#[tokio::test]
async fn timed_out_fragments_are_failed_but_the_cluster_still_drains() {
    let h = harness(&["e1", "e1", "e2"], Arc::new(SilentFixer));
    let sched = scheduler(
        &h,
        SchedulerConfig {
            max_pace: Duration::from_millis(50),
            timeout: Duration::from_millis(30),
            attempts: 2,
            retry_backoff: Duration::from_millis(5),
        },
        CancellationToken::new(),
    );

    let report = sched.run_once().await;
    assert!(!report.cancelled, "timeouts must not wedge the loop");
    assert_eq!(report.fragments, 3);
    assert_eq!(report.failed, 3);

    let key = TableKey::new("c1", "events", "visits");
    assert!(
        h.components.tracker.is_complete(&key),
        "failed fragments still count as terminal coverage"
    );
    let stats = h.components.tracker.stats(&key).unwrap();
    assert_eq!(stats.percent, 100);
    assert_eq!(stats.failed, 3);

    // No success ever observed: pacing stays cold, no waiters leak.
    assert_eq!(h.components.regulator.samples("e1"), 0);
    assert_eq!(h.components.board.pending(), 0);
    assert!(h.components.tracker.last_cluster_success("c1").is_none());
}

#[tokio::test]
async fn rejected_dispatches_exhaust_the_retry_budget() {
    let h = harness(&["e1"], Arc::new(RejectingFixer));
    let sched = scheduler(
        &h,
        SchedulerConfig {
            max_pace: Duration::from_millis(50),
            timeout: Duration::from_millis(100),
            attempts: 3,
            retry_backoff: Duration::from_millis(5),
        },
        CancellationToken::new(),
    );

    let report = sched.run_once().await;
    assert_eq!(report.fragments, 1);
    assert_eq!(report.failed, 1);

    let key = TableKey::new("c1", "events", "visits");
    let stats = h.components.tracker.stats(&key).unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(h.components.board.pending(), 0);
}

#[tokio::test]
async fn unreachable_topology_skips_the_table_and_continues() {
    let h = harness(&["e1"], Arc::new(SilentFixer));
    let mut components = h.components.clone();
    components.obtainer = Arc::new(UnreachableObtainer);
    let sched = Scheduler::new(
        one_table_cluster(),
        "http://localhost:8888/status".into(),
        SchedulerConfig::default(),
        components.clone(),
        CancellationToken::new(),
    );

    let report = sched.run_once().await;
    assert!(!report.cancelled);
    assert_eq!(report.skipped_tables, 1);
    assert_eq!(report.fragments, 0);
    assert!(components.tracker.last_cluster_success("c1").is_none());
}

#[tokio::test]
async fn cancellation_stops_the_loop_and_late_callbacks_are_stale() {
    let h = harness(&["e1", "e1", "e2"], Arc::new(SilentFixer));
    let shutdown = CancellationToken::new();
    let sched = scheduler(
        &h,
        SchedulerConfig {
            max_pace: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
            attempts: 3,
            retry_backoff: Duration::from_secs(1),
        },
        shutdown.clone(),
    );

    let handle = tokio::spawn(async move { sched.run_once().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    let report = handle.await.unwrap();

    assert!(report.cancelled);
    let key = TableKey::new("c1", "events", "visits");
    assert!(!h.components.tracker.is_complete(&key));
    assert_eq!(h.components.board.pending(), 0, "cancelled waiters must be dropped");

    // The abandoned in-flight repair (first dispatched ID) may still call
    // back late; it must be ignored for counting.
    let outcome = h.state.apply_status(&RepairStatus {
        repair: Repair {
            id: 1,
            cluster: "c1".into(),
            keyspace: "events".into(),
            table: "visits".into(),
            start: "0".into(),
            end: "100".into(),
            endpoint: "e1".into(),
            callback: "http://localhost:8888/status".into(),
            started: std::time::Instant::now(),
        },
        kind: StatusKind::Complete,
        message: String::new(),
        session: "late".into(),
    });
    assert!(matches!(
        outcome,
        rangemend::tracker::ApplyOutcome::Stale
    ));
    assert_eq!(h.components.tracker.stats(&key).unwrap().completed, 0);
}
