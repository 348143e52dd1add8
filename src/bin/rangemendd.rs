//! rangemend daemon
//!
//! Loads the cluster configuration, starts the callback server and one
//! scheduler task per cluster, then runs until every cluster drains or a
//! shutdown signal arrives. Configuration and bind errors are fatal before
//! any repair is dispatched.

use clap::Parser;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use rangemend::config::Config;
use rangemend::fixer::HttpFixer;
use rangemend::obtainer::HttpObtainer;
use rangemend::regulator::Regulator;
use rangemend::scheduler::{Components, RepairIds, Scheduler};
use rangemend::server::{self, CallbackState, CompletionBoard};
use rangemend::store::FileDatabase;
use rangemend::tracker::Tracker;

/// Cassandra range repair daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "RANGEMEND_CONFIG", default_value = "/etc/rangemend/config.yml")]
    config: String,

    /// Override the callback listen address (host:port)
    #[arg(short = 'a', long, env = "RANGEMEND_LISTEN")]
    listen: Option<String>,

    /// State file for last-success timestamps
    #[arg(long, env = "RANGEMEND_DB", default_value = "/var/lib/rangemend/state.json")]
    db: String,

    /// Log level: error, warn, info, debug, trace
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Run a single repair cycle per cluster and exit
    #[arg(long, default_value = "false")]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    rangemend::telemetry::init(&args.log_level)?;

    let mut config = Config::load(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    info!(
        config = %args.config,
        listen = %config.listen,
        clusters = config.clusters.len(),
        buffer = config.buffer,
        "starting rangemend"
    );

    let db = Arc::new(FileDatabase::open(&args.db)?);
    let tracker = Arc::new(Tracker::new(db));
    let regulator = Arc::new(Regulator::new(config.buffer));
    let board = Arc::new(CompletionBoard::new());

    let cluster_names: Vec<String> = config.clusters.iter().map(|c| c.name.clone()).collect();
    tracker.restore(&cluster_names).await?;

    let components = Components {
        obtainer: Arc::new(HttpObtainer::new(&config.conn)),
        fixer: Arc::new(HttpFixer::new(&config.conn)),
        tracker: tracker.clone(),
        regulator: regulator.clone(),
        board: board.clone(),
        ids: Arc::new(RepairIds::new()),
    };

    let shutdown = CancellationToken::new();
    let state = CallbackState::new(tracker, regulator, board);

    let server_shutdown = shutdown.clone();
    let listen = config.listen.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::serve(state, &listen, server_shutdown.clone()).await {
            error!(error = %e, "callback server failed");
            // Schedulers cannot complete without callbacks.
            server_shutdown.cancel();
        }
    });

    let scheduler_config = config.scheduler_config()?;
    let callback = config.callback_url();
    let mut schedulers = JoinSet::new();
    for cluster in config.clusters {
        let scheduler = Scheduler::new(
            cluster,
            callback.clone(),
            scheduler_config.clone(),
            components.clone(),
            shutdown.clone(),
        );
        let once = args.once;
        schedulers.spawn(async move {
            if once {
                scheduler.run_once().await;
            } else {
                scheduler.run().await;
            }
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
        _ = join_all(&mut schedulers) => {
            info!("all cluster schedulers finished");
            shutdown.cancel();
        }
    }

    // Drain whatever is still running after cancellation.
    while let Some(result) = schedulers.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "scheduler task panicked");
        }
    }
    let _ = server_task.await;
    info!("rangemend stopped");
    Ok(())
}

async fn join_all(schedulers: &mut JoinSet<()>) {
    while let Some(result) = schedulers.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "scheduler task panicked");
        }
    }
}
