//! Logging bootstrap for rangemend binaries.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::{Error, Result};

/// Install the global tracing subscriber at the requested level.
///
/// `RUST_LOG`-style filtering is honored when set; otherwise the flat
/// level applies crate-wide.
pub fn init(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .map_err(|_| Error::Config(format!("unknown log level {:?}", level)))?;

    if std::env::var("RUST_LOG").is_ok() {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| Error::Config(format!("cannot install subscriber: {}", e)))?;
    } else {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| Error::Config(format!("cannot install subscriber: {}", e)))?;
    }
    Ok(())
}
