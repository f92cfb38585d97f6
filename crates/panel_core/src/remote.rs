//! HTTP transport to a host automation bridge.
//!
//! The bridge terminates these calls inside the host process; scope ids and
//! batch receipts are its own. Descriptors cross the wire exactly as the
//! host interpreter defines them, nothing is reinterpreted here.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use host_bridge::{BatchReceipt, HostGateway};
use shared::{descriptor::CommandBatch, domain::ScopeId};

#[derive(Debug, Clone)]
pub struct RemoteHostGateway {
    http: Client,
    base: String,
}

#[derive(Debug, Serialize)]
struct EnterModalRequest<'a> {
    label: &'a str,
}

#[derive(Debug, Deserialize)]
struct EnterModalResponse {
    scope_id: ScopeId,
}

impl RemoteHostGateway {
    /// `base` is the bridge root, e.g. `http://127.0.0.1:8206`.
    pub fn new(base: &Url) -> Self {
        Self {
            http: Client::new(),
            base: base.as_str().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl HostGateway for RemoteHostGateway {
    async fn enter_modal(&self, label: &str) -> Result<ScopeId> {
        let response = self
            .http
            .post(format!("{}/modal", self.base))
            .json(&EnterModalRequest { label })
            .send()
            .await
            .context("bridge unreachable while entering modal scope")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("bridge refused modal scope: {status} {body}"));
        }
        let parsed: EnterModalResponse = response
            .json()
            .await
            .context("malformed enter-modal response")?;
        debug!(scope = parsed.scope_id.0, label, "host: modal scope entered");
        Ok(parsed.scope_id)
    }

    async fn submit_batch(&self, scope: ScopeId, batch: &CommandBatch) -> Result<BatchReceipt> {
        let response = self
            .http
            .post(format!("{}/modal/{}/batches", self.base, scope.0))
            .json(batch)
            .send()
            .await
            .context("bridge unreachable while submitting batch")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("bridge rejected batch: {status} {body}"));
        }
        let receipt: BatchReceipt = response.json().await.context("malformed batch receipt")?;
        debug!(
            scope = scope.0,
            sequence = receipt.sequence.0,
            "host: batch applied"
        );
        Ok(receipt)
    }

    async fn leave_modal(&self, scope: ScopeId) {
        let url = format!("{}/modal/{}/leave", self.base, scope.0);
        match self.http.post(&url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(scope = scope.0, "host: modal scope released");
            }
            Ok(response) => {
                warn!(
                    scope = scope.0,
                    status = %response.status(),
                    "host: scope release refused"
                );
            }
            Err(err) => {
                warn!(scope = scope.0, "host: scope release failed: {err}");
            }
        }
    }
}
