//! Token range fragmentation boundary
//!
//! The Obtainer turns a table into the ordered list of fragments the
//! Scheduler dispatches. The HTTP implementation asks the repair agent for
//! the ring; the static obtainer drives deterministic tests.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::model::{Connector, Fragment, Token};
use crate::{Error, Result};

/// Produces a table's fragments, deterministic for a given topology.
#[async_trait]
pub trait Obtainer: Send + Sync {
    async fn fragments(
        &self,
        cluster: &str,
        keyspace: &str,
        table: &str,
        slices: u32,
    ) -> Result<Vec<Fragment>>;
}

/// Obtainer backed by the repair agent's ring endpoint.
pub struct HttpObtainer {
    client: Client,
    base: String,
}

impl HttpObtainer {
    pub fn new(conn: &Connector) -> Self {
        Self {
            client: Client::new(),
            base: conn.base_url(),
        }
    }

    fn ring_url(&self, cluster: &str, keyspace: &str, slices: u32) -> String {
        format!(
            "{}/ring/{}/{}?slices={}",
            self.base, cluster, keyspace, slices
        )
    }
}

#[async_trait]
impl Obtainer for HttpObtainer {
    async fn fragments(
        &self,
        cluster: &str,
        keyspace: &str,
        table: &str,
        slices: u32,
    ) -> Result<Vec<Fragment>> {
        let url = self.ring_url(cluster, keyspace, slices);
        let tokens: Vec<Token> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Topology(format!("ring request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::Topology(format!("ring request rejected: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::Topology(format!("unreadable ring payload: {}", e)))?;

        let mut fragments = Vec::new();
        for token in tokens {
            for mut fragment in token.ranges {
                fragment.cluster = cluster.to_string();
                fragment.keyspace = keyspace.to_string();
                fragment.table = table.to_string();
                fragment.position = fragments.len();
                fragments.push(fragment);
            }
        }
        if fragments.is_empty() {
            return Err(Error::Topology(format!(
                "agent returned an empty ring for {}/{}",
                cluster, keyspace
            )));
        }
        Ok(fragments)
    }
}

/// Obtainer returning one fragment per listed endpoint, in order.
/// Deterministic fixture for scheduler tests.
pub struct StaticObtainer {
    endpoints: Vec<String>,
}

impl StaticObtainer {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl Obtainer for StaticObtainer {
    async fn fragments(
        &self,
        cluster: &str,
        keyspace: &str,
        table: &str,
        _slices: u32,
    ) -> Result<Vec<Fragment>> {
        Ok(self
            .endpoints
            .iter()
            .enumerate()
            .map(|(i, endpoint)| Fragment {
                id: i as u32,
                cluster: cluster.to_string(),
                keyspace: keyspace.to_string(),
                table: table.to_string(),
                position: i,
                endpoint: endpoint.clone(),
                start: (i as i64 * 100).to_string(),
                end: ((i as i64 + 1) * 100).to_string(),
            })
            .collect())
    }
}

/// Obtainer that always fails, for topology-error paths in tests.
pub struct UnreachableObtainer;

#[async_trait]
impl Obtainer for UnreachableObtainer {
    async fn fragments(&self, _: &str, _: &str, _: &str, _: u32) -> Result<Vec<Fragment>> {
        // Simulates the topology source being down.
        tokio::time::sleep(Duration::from_millis(1)).await;
        Err(Error::Topology("ring source unreachable".into()))
    }
}
