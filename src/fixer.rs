//! Repair dispatch boundary
//!
//! A RepairRunner tells a node to begin repairing one fragment and returns
//! as soon as the node accepts the request; the actual outcome arrives
//! later through the callback server. The HTTP implementation posts the
//! repair to the agent fronting the cluster.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::model::{Connector, Repair};
use crate::{Error, Result};

/// Issues the physical repair command for one fragment. Success means the
/// node accepted the request, not that the repair completed.
#[async_trait]
pub trait RepairRunner: Send + Sync {
    async fn start(&self, repair: &Repair) -> Result<()>;
}

/// RepairRunner backed by the agent's repair endpoint.
pub struct HttpFixer {
    client: Client,
    base: String,
}

impl HttpFixer {
    pub fn new(conn: &Connector) -> Self {
        // Acceptance should be fast; long waits belong to the callback path.
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base: conn.base_url(),
        }
    }
}

#[async_trait]
impl RepairRunner for HttpFixer {
    async fn start(&self, repair: &Repair) -> Result<()> {
        let url = format!("{}/repair", self.base);
        let response = self
            .client
            .post(&url)
            .json(repair)
            .send()
            .await
            .map_err(|e| Error::Dispatch(format!("repair {} not sent: {}", repair.id, e)))?;
        response.error_for_status().map_err(|e| {
            Error::Dispatch(format!("repair {} rejected by agent: {}", repair.id, e))
        })?;
        Ok(())
    }
}
