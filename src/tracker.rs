//! Hierarchical repair progress tracking
//!
//! The Tracker is the single source of truth for fragment completion. It
//! keeps an arena of per-table progress entries keyed by
//! (cluster, keyspace, table) and an index from repair ID to its table, so
//! out-of-order and duplicate callbacks can always be correlated. Counter
//! updates for one table are serialized on its arena entry; unrelated
//! tables never contend.
//!
//! Terminal accounting is exactly-once per repair ID: the first terminal
//! callback counts, later duplicates and callbacks for abandoned dispatches
//! are logged and dropped. Percentages and ETAs are derived on read from
//! the primitive counters and aggregated upward, weighted by fragment
//! totals.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::model::{Repair, RepairStatus, StatusKind, TableKey};
use crate::store::Database;
use crate::Result;

/// Lifecycle of one dispatched repair inside its table's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepairState {
    /// Dispatched, awaiting its terminal callback.
    Pending,
    Succeeded,
    Failed,
    /// Given up by the Scheduler (timeout retry or cancellation); a late
    /// callback for this ID is stale and never counted.
    Abandoned,
}

struct RepairEntry {
    state: RepairState,
    started: Instant,
}

struct TableProgress {
    total: usize,
    completed: usize,
    failed: usize,
    started: Instant,
    repairs: HashMap<u64, RepairEntry>,
}

/// Result of feeding one callback into the Tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First terminal callback for a pending repair; counted.
    Terminal { elapsed: Duration, failed: bool },
    /// Duplicate terminal callback, or a callback for an abandoned
    /// dispatch. Logged, never counted.
    Stale,
    /// Repair ID was never registered. Logged inconsistency, dropped.
    Unknown,
    /// Non-terminal progress report; no counter mutation.
    Progress,
}

/// Derived progress snapshot for one table and its enclosing levels.
#[derive(Debug, Clone, Serialize)]
pub struct RepairStats {
    pub cluster: String,
    pub keyspace: String,
    pub table: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub percent: u8,
    pub percent_keyspace: u8,
    pub percent_cluster: u8,
    pub estimate_ms: u64,
    pub estimate_keyspace_ms: u64,
    pub estimate_cluster_ms: u64,
    pub last_cluster_success: Option<DateTime<Utc>>,
}

/// Concurrent hierarchical progress aggregator.
pub struct Tracker {
    tables: DashMap<TableKey, TableProgress>,
    index: DashMap<u64, TableKey>,
    cluster_success: DashMap<String, DateTime<Utc>>,
    db: Arc<dyn Database>,
}

impl Tracker {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            tables: DashMap::new(),
            index: DashMap::new(),
            cluster_success: DashMap::new(),
            db,
        }
    }

    /// Register a table about to be repaired, fixing its fragment total.
    /// Re-registration (a new repair cycle) resets the entry and prunes the
    /// previous cycle's IDs from the correlation index, so the index stays
    /// bounded by the in-flight cycle. Callbacks for a pruned cycle report
    /// Unknown instead of Stale; either way they are dropped uncounted.
    pub fn register_table(&self, key: TableKey, total: usize) {
        if let Some((_, previous)) = self.tables.remove(&key) {
            for id in previous.repairs.keys() {
                self.index.remove(id);
            }
        }
        self.tables.insert(
            key,
            TableProgress {
                total,
                completed: 0,
                failed: 0,
                started: Instant::now(),
                repairs: HashMap::new(),
            },
        );
    }

    /// Register a dispatched repair under its table. Must precede any
    /// `apply` for the same ID.
    pub fn begin(&self, repair: &Repair) {
        let key = repair.table_key();
        self.index.insert(repair.id, key.clone());
        match self.tables.get_mut(&key) {
            Some(mut table) => {
                table.repairs.insert(
                    repair.id,
                    RepairEntry {
                        state: RepairState::Pending,
                        started: Instant::now(),
                    },
                );
            }
            None => {
                warn!(repair = repair.id, table = %key, "begin for unregistered table");
            }
        }
    }

    /// Feed one callback into the bookkeeping. Only the first terminal
    /// callback for a pending ID mutates counters.
    pub fn apply(&self, status: &RepairStatus) -> ApplyOutcome {
        let id = status.repair.id;
        if !status.kind.is_terminal() {
            debug!(repair = id, session = %status.session, "progress report");
            return ApplyOutcome::Progress;
        }

        let key = match self.index.get(&id) {
            Some(key) => key.clone(),
            None => {
                warn!(repair = id, "callback for unknown repair ID dropped");
                return ApplyOutcome::Unknown;
            }
        };
        let mut table = match self.tables.get_mut(&key) {
            Some(table) => table,
            None => {
                warn!(repair = id, table = %key, "callback for unregistered table dropped");
                return ApplyOutcome::Unknown;
            }
        };

        let failed = status.kind == StatusKind::Error;
        let elapsed = match table.repairs.get_mut(&id) {
            Some(entry) if entry.state == RepairState::Pending => {
                entry.state = if failed {
                    RepairState::Failed
                } else {
                    RepairState::Succeeded
                };
                entry.started.elapsed()
            }
            Some(entry) => {
                debug!(repair = id, state = ?entry.state, "stale callback ignored for counting");
                return ApplyOutcome::Stale;
            }
            None => {
                warn!(repair = id, table = %key, "callback for repair missing from its table");
                return ApplyOutcome::Unknown;
            }
        };

        table.completed += 1;
        if failed {
            table.failed += 1;
        }
        ApplyOutcome::Terminal { elapsed, failed }
    }

    /// Mark a pending repair abandoned without counting it; its fragment
    /// will be retried (or was cancelled). Returns false if the ID was not
    /// pending.
    pub fn abandon(&self, id: u64) -> bool {
        self.transition(id, RepairState::Abandoned, false)
    }

    /// Mark a pending repair terminally failed and count its fragment.
    /// Used when the retry budget for a fragment is exhausted.
    pub fn fail(&self, id: u64) -> bool {
        self.transition(id, RepairState::Failed, true)
    }

    fn transition(&self, id: u64, target: RepairState, count: bool) -> bool {
        let key = match self.index.get(&id) {
            Some(key) => key.clone(),
            None => return false,
        };
        let mut table = match self.tables.get_mut(&key) {
            Some(table) => table,
            None => return false,
        };
        let transitioned = match table.repairs.get_mut(&id) {
            Some(entry) if entry.state == RepairState::Pending => {
                entry.state = target;
                true
            }
            _ => false,
        };
        if transitioned && count {
            table.completed += 1;
            table.failed += 1;
        }
        transitioned
    }

    /// Counted terminal outcome of a repair: `Some(failed)` once the repair
    /// has been counted, `None` while pending or abandoned. Lets the
    /// Scheduler detect a callback that raced its own deadline.
    pub fn counted_outcome(&self, id: u64) -> Option<bool> {
        let key = self.index.get(&id)?.clone();
        let table = self.tables.get(&key)?;
        match table.repairs.get(&id)?.state {
            RepairState::Succeeded => Some(false),
            RepairState::Failed => Some(true),
            RepairState::Pending | RepairState::Abandoned => None,
        }
    }

    /// Whether every fragment of the table has reached a terminal state.
    pub fn is_complete(&self, key: &TableKey) -> bool {
        self.tables
            .get(key)
            .map(|t| t.total > 0 && t.completed >= t.total)
            .unwrap_or(false)
    }

    /// Derived progress for a table, with keyspace- and cluster-level
    /// aggregates weighted by fragment totals.
    pub fn stats(&self, key: &TableKey) -> Option<RepairStats> {
        let (total, completed, failed, started) = {
            let table = self.tables.get(key)?;
            (table.total, table.completed, table.failed, table.started)
        };

        let mut keyspace = LevelAggregate::default();
        let mut cluster = LevelAggregate::default();
        for entry in self.tables.iter() {
            if entry.key().cluster != key.cluster {
                continue;
            }
            cluster.add(entry.total, entry.completed, entry.started);
            if entry.key().keyspace == key.keyspace {
                keyspace.add(entry.total, entry.completed, entry.started);
            }
        }

        Some(RepairStats {
            cluster: key.cluster.clone(),
            keyspace: key.keyspace.clone(),
            table: key.table.clone(),
            total,
            completed,
            failed,
            percent: percent(completed, total),
            percent_keyspace: keyspace.percent(),
            percent_cluster: cluster.percent(),
            estimate_ms: estimate_remaining(started, completed, total).as_millis() as u64,
            estimate_keyspace_ms: keyspace.estimate().as_millis() as u64,
            estimate_cluster_ms: cluster.estimate().as_millis() as u64,
            last_cluster_success: self.last_cluster_success(&key.cluster),
        })
    }

    /// Record a fully successful cluster cycle in the durable store.
    pub async fn complete_cluster(&self, cluster: &str) -> Result<()> {
        let now = Utc::now();
        self.db
            .put(&success_key(cluster), &now.to_rfc3339())
            .await?;
        self.cluster_success.insert(cluster.to_string(), now);
        Ok(())
    }

    /// Load persisted last-success timestamps at startup.
    pub async fn restore(&self, clusters: &[String]) -> Result<()> {
        for cluster in clusters {
            if let Some(raw) = self.db.get(&success_key(cluster)).await? {
                match DateTime::parse_from_rfc3339(&raw) {
                    Ok(ts) => {
                        self.cluster_success
                            .insert(cluster.clone(), ts.with_timezone(&Utc));
                    }
                    Err(e) => {
                        warn!(cluster = %cluster, error = %e, "ignoring unparseable last-success timestamp");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn last_cluster_success(&self, cluster: &str) -> Option<DateTime<Utc>> {
        self.cluster_success.get(cluster).map(|ts| *ts)
    }

    /// Number of repair IDs currently held in the correlation index.
    pub fn tracked_repairs(&self) -> usize {
        self.index.len()
    }
}

fn success_key(cluster: &str) -> String {
    format!("cluster/{}/last_success", cluster)
}

fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed * 100) / total) as u8
}

/// Remaining-time estimate: elapsed scaled by the uncompleted fraction.
fn estimate_remaining(started: Instant, completed: usize, total: usize) -> Duration {
    if completed == 0 || total == 0 || completed >= total {
        return Duration::ZERO;
    }
    let elapsed = started.elapsed().as_secs_f64();
    let fraction = completed as f64 / total as f64;
    Duration::from_secs_f64((elapsed / fraction - elapsed).max(0.0))
}

/// Fragment-total-weighted rollup for one keyspace or cluster.
#[derive(Default)]
struct LevelAggregate {
    total: usize,
    completed: usize,
    started: Option<Instant>,
}

impl LevelAggregate {
    fn add(&mut self, total: usize, completed: usize, started: Instant) {
        self.total += total;
        self.completed += completed;
        self.started = Some(match self.started {
            Some(existing) => existing.min(started),
            None => started,
        });
    }

    fn percent(&self) -> u8 {
        percent(self.completed, self.total)
    }

    fn estimate(&self) -> Duration {
        match self.started {
            Some(started) => estimate_remaining(started, self.completed, self.total),
            None => Duration::ZERO,
        }
    }
}
