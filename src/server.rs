//! Callback server and per-repair completion signaling
//!
//! Nodes report repair outcomes out-of-band by POSTing a RepairStatus to
//! this server. On a first terminal callback the server updates the
//! Tracker, feeds the measured duration into the Regulator, then wakes the
//! Scheduler task waiting on that repair. Malformed payloads are rejected
//! at the boundary; unknown IDs are logged and dropped; duplicates are
//! acknowledged without any counter mutation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::{RepairStatus, TableKey};
use crate::regulator::Regulator;
use crate::tracker::{ApplyOutcome, Tracker};
use crate::Result;

/// Terminal outcome delivered to the Scheduler task awaiting one repair.
#[derive(Debug, Clone)]
pub struct FragmentOutcome {
    pub repair_id: u64,
    pub failed: bool,
    pub elapsed: Duration,
    pub message: String,
}

/// One-shot notification registry keyed by repair ID.
///
/// The Scheduler registers a waiter at dispatch time; the server fulfills
/// it exactly once on the first terminal callback. Fulfillment with no
/// registered waiter (the Scheduler already timed out) is dropped.
#[derive(Default)]
pub struct CompletionBoard {
    waiters: DashMap<u64, oneshot::Sender<FragmentOutcome>>,
}

impl CompletionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a repair's terminal outcome.
    pub fn register(&self, repair_id: u64) -> oneshot::Receiver<FragmentOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(repair_id, tx);
        rx
    }

    /// Deliver an outcome to the waiter, if any. Returns whether a waiter
    /// consumed it.
    pub fn fulfill(&self, outcome: FragmentOutcome) -> bool {
        match self.waiters.remove(&outcome.repair_id) {
            Some((_, tx)) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Drop a registration the Scheduler no longer cares about.
    pub fn forget(&self, repair_id: u64) {
        self.waiters.remove(&repair_id);
    }

    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

/// Shared handles behind every callback request.
#[derive(Clone)]
pub struct CallbackState {
    pub tracker: Arc<Tracker>,
    pub regulator: Arc<Regulator>,
    pub board: Arc<CompletionBoard>,
}

impl CallbackState {
    pub fn new(
        tracker: Arc<Tracker>,
        regulator: Arc<Regulator>,
        board: Arc<CompletionBoard>,
    ) -> Self {
        Self {
            tracker,
            regulator,
            board,
        }
    }

    /// Apply one status notification: Tracker first, then Regulator, then
    /// the waiting Scheduler. Exposed so tests and in-process runners can
    /// drive the same path the HTTP handler takes.
    pub fn apply_status(&self, status: &RepairStatus) -> ApplyOutcome {
        let outcome = self.tracker.apply(status);
        if let ApplyOutcome::Terminal { elapsed, failed } = outcome {
            self.regulator.record(&status.repair.endpoint, elapsed);
            let delivered = self.board.fulfill(FragmentOutcome {
                repair_id: status.repair.id,
                failed,
                elapsed,
                message: status.message.clone(),
            });
            if !delivered {
                // The Scheduler moved on (timeout); the count above stands.
                debug!(repair = status.repair.id, "terminal callback with no waiter");
            }
        }
        outcome
    }
}

/// Build the callback router: status intake, progress reads, liveness.
pub fn router(state: CallbackState) -> Router {
    Router::new()
        .route("/status", post(receive_status))
        .route(
            "/progress/:cluster/:keyspace/:table",
            get(table_progress),
        )
        .route("/health", get(health_check))
        .with_state(state)
}

/// Serve the callback API until the shutdown token fires.
pub async fn serve(
    state: CallbackState,
    addr: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(state, listener, shutdown).await
}

/// Serve on an already-bound listener; used by tests with ephemeral ports.
pub async fn serve_with_listener(
    state: CallbackState,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "callback server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!(%addr, "callback server stopped");
    Ok(())
}

async fn receive_status(
    State(state): State<CallbackState>,
    Json(status): Json<RepairStatus>,
) -> Response {
    let id = status.repair.id;
    match state.apply_status(&status) {
        ApplyOutcome::Terminal { elapsed, failed } => {
            info!(
                repair = id,
                endpoint = %status.repair.endpoint,
                session = %status.session,
                elapsed_ms = elapsed.as_millis() as u64,
                failed,
                "repair finished"
            );
            ack()
        }
        ApplyOutcome::Progress => {
            debug!(repair = id, session = %status.session, message = %status.message, "repair running");
            ack()
        }
        ApplyOutcome::Stale => {
            debug!(repair = id, "duplicate terminal callback acknowledged");
            ack()
        }
        ApplyOutcome::Unknown => {
            warn!(repair = id, "callback for unknown repair");
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": format!("unknown repair ID {}", id) })),
            )
                .into_response()
        }
    }
}

fn ack() -> Response {
    Json(serde_json::json!({ "status": "acknowledged" })).into_response()
}

async fn table_progress(
    State(state): State<CallbackState>,
    Path((cluster, keyspace, table)): Path<(String, String, String)>,
) -> Response {
    let key = TableKey::new(cluster, keyspace, table);
    match state.tracker.stats(&key) {
        Some(stats) => Json(stats).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no progress for {}", key) })),
        )
            .into_response(),
    }
}

async fn health_check() -> &'static str {
    "OK"
}
