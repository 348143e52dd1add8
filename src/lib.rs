//! # rangemend
//!
//! A distributed anti-entropy repair orchestrator for Cassandra-style
//! clusters. Each table's token range is split into fragments, repair
//! commands are dispatched to the owning nodes through an agent, and
//! completion is reported back out-of-band to a callback server.
//!
//! ## Architecture
//!
//! - **Regulator**: per-endpoint pacing derived from a rolling window of
//!   recent repair durations — slow endpoints are throttled harder
//! - **Tracker**: concurrent hierarchical progress and ETA accounting
//!   (cluster → keyspace → table → fragment), exactly-once terminal
//!   counting under out-of-order and duplicate callbacks
//! - **Scheduler**: one dispatch loop per cluster, bounded retries on
//!   rejection or timeout, cooperative cancellation
//! - **Server**: the callback endpoint that feeds Tracker and Regulator
//!   and wakes the Scheduler task waiting on each repair

pub mod config;
pub mod fixer;
pub mod model;
pub mod obtainer;
pub mod regulator;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod tracker;
pub mod window;

mod error;

pub use error::{Error, Result};
