//! Per-cluster repair dispatch loop
//!
//! One Scheduler instance owns one cluster and walks its keyspaces and
//! tables in declared order, dispatching each fragment to its endpoint:
//! ask the Regulator for pacing, hand the repair to the Fixer, then wait
//! for the callback server to signal the terminal outcome. Timeouts and
//! rejected dispatches are retried a bounded number of times before the
//! fragment is marked failed; a failed fragment never halts the cluster.
//! Cancellation is cooperative: the loop stops requesting new fragments
//! and abandons the in-flight repair so its late callback cannot be
//! double-counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fixer::RepairRunner;
use crate::model::{ClusterConfig, Fragment, Repair, TableKey};
use crate::obtainer::Obtainer;
use crate::regulator::Regulator;
use crate::server::{CompletionBoard, FragmentOutcome};
use crate::tracker::Tracker;

/// Scheduler tuning knobs, derived from configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on the Regulator's advisory pacing delay.
    pub max_pace: Duration,
    /// Deadline for a repair's terminal callback.
    pub timeout: Duration,
    /// Dispatch attempts per fragment before it is marked failed.
    pub attempts: u32,
    /// Pause between attempts after a rejected dispatch.
    pub retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_pace: Duration::from_secs(300),
            timeout: Duration::from_secs(30 * 60),
            attempts: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Process-unique repair ID source, shared by all cluster schedulers.
#[derive(Default)]
pub struct RepairIds(AtomicU64);

impl RepairIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Shared component handles every scheduler and the server operate on.
#[derive(Clone)]
pub struct Components {
    pub obtainer: Arc<dyn Obtainer>,
    pub fixer: Arc<dyn RepairRunner>,
    pub tracker: Arc<Tracker>,
    pub regulator: Arc<Regulator>,
    pub board: Arc<CompletionBoard>,
    pub ids: Arc<RepairIds>,
}

/// Summary of one full pass over a cluster's tables.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub tables: usize,
    pub skipped_tables: usize,
    pub fragments: usize,
    pub failed: usize,
    pub cancelled: bool,
}

enum FragmentResult {
    Done(FragmentOutcome),
    Failed,
    Cancelled,
}

/// Dispatch state machine for one cluster.
pub struct Scheduler {
    cluster: ClusterConfig,
    callback: String,
    config: SchedulerConfig,
    components: Components,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        cluster: ClusterConfig,
        callback: String,
        config: SchedulerConfig,
        components: Components,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            callback,
            config,
            components,
            shutdown,
        }
    }

    /// Repair the cluster on its configured interval until cancelled.
    pub async fn run(self) {
        let interval = match self.cluster.interval() {
            Ok(interval) => interval,
            Err(e) => {
                // Validated at startup; only reachable with a hand-built config.
                error!(cluster = %self.cluster.name, error = %e, "cannot schedule cluster");
                return;
            }
        };
        loop {
            let report = self.run_once().await;
            if report.cancelled || self.shutdown.is_cancelled() {
                break;
            }
            info!(
                cluster = %self.cluster.name,
                next_cycle_in = %humantime::format_duration(interval),
                "cluster cycle finished"
            );
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }
        info!(cluster = %self.cluster.name, "scheduler stopped");
    }

    /// One full pass over every keyspace and table of the cluster.
    pub async fn run_once(&self) -> CycleReport {
        info!(cluster = %self.cluster.name, "starting repair cycle");
        let mut report = CycleReport::default();

        'cycle: for keyspace in &self.cluster.keyspaces {
            for table in &keyspace.tables {
                if self.shutdown.is_cancelled() {
                    report.cancelled = true;
                    break 'cycle;
                }

                let slices = if table.slices > 0 {
                    table.slices
                } else {
                    keyspace.slices
                };
                let fragments = match self
                    .components
                    .obtainer
                    .fragments(&self.cluster.name, &keyspace.name, &table.name, slices)
                    .await
                {
                    Ok(fragments) => fragments,
                    Err(e) => {
                        warn!(
                            cluster = %self.cluster.name,
                            keyspace = %keyspace.name,
                            table = %table.name,
                            error = %e,
                            "cannot obtain fragments, skipping table"
                        );
                        report.skipped_tables += 1;
                        continue;
                    }
                };

                let key = TableKey::new(&self.cluster.name, &keyspace.name, &table.name);
                self.components
                    .tracker
                    .register_table(key.clone(), fragments.len());
                info!(table = %key, fragments = fragments.len(), "repairing table");

                for fragment in &fragments {
                    if self.shutdown.is_cancelled() {
                        report.cancelled = true;
                        break 'cycle;
                    }
                    match self.repair_fragment(fragment).await {
                        FragmentResult::Done(outcome) => {
                            report.fragments += 1;
                            if outcome.failed {
                                report.failed += 1;
                            }
                        }
                        FragmentResult::Failed => {
                            report.fragments += 1;
                            report.failed += 1;
                        }
                        FragmentResult::Cancelled => {
                            report.cancelled = true;
                            break 'cycle;
                        }
                    }
                }

                report.tables += 1;
                if let Some(stats) = self.components.tracker.stats(&key) {
                    info!(
                        table = %key,
                        percent = stats.percent,
                        percent_cluster = stats.percent_cluster,
                        failed = stats.failed,
                        "table drained"
                    );
                }
            }
        }

        if report.cancelled {
            info!(cluster = %self.cluster.name, "repair cycle cancelled");
        } else {
            info!(
                cluster = %self.cluster.name,
                tables = report.tables,
                fragments = report.fragments,
                failed = report.failed,
                skipped_tables = report.skipped_tables,
                "cluster drained"
            );
            if report.failed == 0 && report.skipped_tables == 0 {
                if let Err(e) = self
                    .components
                    .tracker
                    .complete_cluster(&self.cluster.name)
                    .await
                {
                    warn!(cluster = %self.cluster.name, error = %e, "cannot persist cluster success");
                }
            }
        }
        report
    }

    /// Dispatch one fragment to a terminal state: paced dispatch, bounded
    /// retries on rejection or timeout, then failure.
    async fn repair_fragment(&self, fragment: &Fragment) -> FragmentResult {
        let suggested = self.components.regulator.admit(&fragment.endpoint);
        let pace = suggested.min(self.config.max_pace);
        if !pace.is_zero() {
            debug!(
                endpoint = %fragment.endpoint,
                pace_ms = pace.as_millis() as u64,
                "pacing dispatch"
            );
            tokio::select! {
                _ = tokio::time::sleep(pace) => {}
                _ = self.shutdown.cancelled() => return FragmentResult::Cancelled,
            }
        }

        let mut last_id = 0;
        for attempt in 1..=self.config.attempts {
            let repair = self.build_repair(fragment);
            last_id = repair.id;
            let waiter = self.components.board.register(repair.id);
            self.components.tracker.begin(&repair);

            if let Err(e) = self.components.fixer.start(&repair).await {
                warn!(
                    repair = repair.id,
                    endpoint = %fragment.endpoint,
                    attempt,
                    error = %e,
                    "dispatch rejected"
                );
                self.components.board.forget(repair.id);
                if attempt == self.config.attempts {
                    break;
                }
                self.components.tracker.abandon(repair.id);
                tokio::select! {
                    _ = tokio::time::sleep(self.config.retry_backoff) => continue,
                    _ = self.shutdown.cancelled() => return FragmentResult::Cancelled,
                }
            }

            tokio::select! {
                outcome = waiter => match outcome {
                    Ok(outcome) => return FragmentResult::Done(outcome),
                    Err(_) => {
                        warn!(repair = repair.id, "completion channel closed without outcome");
                    }
                },
                _ = tokio::time::sleep(self.config.timeout) => {
                    warn!(
                        repair = repair.id,
                        endpoint = %fragment.endpoint,
                        attempt,
                        "no callback within deadline"
                    );
                }
                _ = self.shutdown.cancelled() => {
                    self.components.board.forget(repair.id);
                    self.components.tracker.abandon(repair.id);
                    return FragmentResult::Cancelled;
                }
            }

            // Timed out (or the channel died). Give up on this dispatch;
            // the final attempt is failed below instead of abandoned. A
            // callback racing the deadline has already been counted, so the
            // fragment must not be retried.
            self.components.board.forget(repair.id);
            if attempt < self.config.attempts {
                if !self.components.tracker.abandon(repair.id) {
                    if let Some(failed) = self.components.tracker.counted_outcome(repair.id) {
                        return FragmentResult::Done(FragmentOutcome {
                            repair_id: repair.id,
                            failed,
                            elapsed: Duration::ZERO,
                            message: String::new(),
                        });
                    }
                }
            } else if let Some(failed) = self.components.tracker.counted_outcome(repair.id) {
                return FragmentResult::Done(FragmentOutcome {
                    repair_id: repair.id,
                    failed,
                    elapsed: Duration::ZERO,
                    message: String::new(),
                });
            }
        }

        if self.components.tracker.fail(last_id) {
            warn!(
                repair = last_id,
                table = %fragment.table_key(),
                position = fragment.position,
                "retry budget exhausted, fragment marked failed"
            );
        }
        FragmentResult::Failed
    }

    fn build_repair(&self, fragment: &Fragment) -> Repair {
        Repair {
            id: self.components.ids.next(),
            cluster: fragment.cluster.clone(),
            keyspace: fragment.keyspace.clone(),
            table: fragment.table.clone(),
            start: fragment.start.clone(),
            end: fragment.end.clone(),
            endpoint: fragment.endpoint.clone(),
            callback: self.callback.clone(),
            started: Instant::now(),
        }
    }
}
