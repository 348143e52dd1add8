//! Configuration file loading and validation
//!
//! The daemon is driven by a single YAML file enumerating the repair agent
//! connection, the callback listen address, the Regulator window capacity
//! and the cluster/keyspace/table tree. All validation failures are fatal
//! startup errors; nothing is repaired on a half-valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::model::{ClusterConfig, Connector};
use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

/// Top-level configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Repair agent connection.
    pub conn: Connector,
    /// Regulator rolling-window capacity (samples per endpoint).
    pub buffer: usize,
    /// host:port the callback server binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Upper bound on the Regulator's advisory pacing delay.
    #[serde(default)]
    pub max_pace: Option<String>,
    /// Per-repair callback deadline.
    #[serde(default)]
    pub timeout: Option<String>,
    /// Dispatch attempts per fragment before it is marked failed.
    #[serde(default)]
    pub attempts: Option<u32>,
    pub clusters: Vec<ClusterConfig>,
}

fn default_listen() -> String {
    "localhost:8888".to_string()
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::parse(&raw)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.buffer == 0 {
            return Err(Error::Config("buffer must be greater than zero".into()));
        }
        if self.clusters.is_empty() {
            return Err(Error::Config("no clusters configured".into()));
        }
        for cluster in &self.clusters {
            if cluster.name.is_empty() {
                return Err(Error::Config("cluster with empty name".into()));
            }
            // Surface bad interval strings at startup, not mid-cycle.
            cluster.interval()?;
            if cluster.keyspaces.is_empty() {
                return Err(Error::Config(format!(
                    "cluster {} has no keyspaces",
                    cluster.name
                )));
            }
            for keyspace in &cluster.keyspaces {
                if keyspace.tables.is_empty() {
                    return Err(Error::Config(format!(
                        "keyspace {}/{} has no tables",
                        cluster.name, keyspace.name
                    )));
                }
                if keyspace.slices == 0 {
                    return Err(Error::Config(format!(
                        "keyspace {}/{} has zero slices",
                        cluster.name, keyspace.name
                    )));
                }
            }
        }
        self.scheduler_config()?;
        Ok(())
    }

    /// Scheduler tuning derived from the optional top-level knobs.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let mut sched = SchedulerConfig::default();
        if let Some(pace) = &self.max_pace {
            sched.max_pace = parse_span("max_pace", pace)?;
        }
        if let Some(timeout) = &self.timeout {
            sched.timeout = parse_span("timeout", timeout)?;
        }
        if let Some(attempts) = self.attempts {
            if attempts == 0 {
                return Err(Error::Config("attempts must be at least 1".into()));
            }
            sched.attempts = attempts;
        }
        Ok(sched)
    }

    /// Callback URL the dispatched repairs embed.
    pub fn callback_url(&self) -> String {
        format!("http://{}/status", self.listen)
    }
}

fn parse_span(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::Config(format!("bad {} {:?}: {}", field, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
conn:
  host: localhost
  port: 8080
buffer: 500
listen: "localhost:8888"
max_pace: 2m
timeout: 30m
attempts: 3
clusters:
  - name: production
    interval: 1w
    keyspaces:
      - name: events
        slices: 100
        tables:
          - name: visits
            size: 10000
          - name: clicks
            slices: 20
"#;

    #[test]
    fn parses_full_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.buffer, 500);
        assert_eq!(config.conn.port, 8080);
        assert_eq!(config.clusters.len(), 1);
        let cluster = &config.clusters[0];
        assert_eq!(cluster.interval().unwrap(), Duration::from_secs(7 * 86400));
        assert_eq!(cluster.keyspaces[0].tables[1].slices, 20);
        assert_eq!(config.callback_url(), "http://localhost:8888/status");

        let sched = config.scheduler_config().unwrap();
        assert_eq!(sched.max_pace, Duration::from_secs(120));
        assert_eq!(sched.timeout, Duration::from_secs(30 * 60));
        assert_eq!(sched.attempts, 3);
    }

    #[test]
    fn rejects_zero_buffer() {
        let raw = SAMPLE.replace("buffer: 500", "buffer: 0");
        assert!(matches!(Config::parse(&raw), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_empty_clusters() {
        let raw = r#"
conn: { host: localhost, port: 8080 }
buffer: 10
clusters: []
"#;
        assert!(matches!(Config::parse(raw), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_bad_interval() {
        let raw = SAMPLE.replace("interval: 1w", "interval: eventually");
        assert!(matches!(Config::parse(&raw), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zero_attempts() {
        let raw = SAMPLE.replace("attempts: 3", "attempts: 0");
        assert!(matches!(Config::parse(&raw), Err(Error::Config(_))));
    }
}
