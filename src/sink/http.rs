use std::time::Duration;

use anyhow::{bail, Context, Result};

use super::{Snapshot, SnapshotSink};

/// POSTs each snapshot as JSON to a collector endpoint.
pub struct HttpSink {
    address: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(address: &str, timeout: Duration) -> Result<Self> {
        if address.is_empty() {
            bail!("http sink address is required");
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            address: address.to_string(),
            client,
        })
    }
}

impl SnapshotSink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<()> {
        let resp = self
            .client
            .post(&self.address)
            .json(snapshot)
            .send()
            .await
            .with_context(|| format!("posting snapshot to {}", self.address))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("snapshot POST returned status {status}: {body}");
        }

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}
