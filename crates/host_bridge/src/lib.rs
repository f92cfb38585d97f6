//! The narrow seam between insertion flows and the host application: one
//! gateway trait for entering the exclusive modal scope and submitting
//! command batches, plus the scope wrapper that guarantees release.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::warn;

use shared::{
    descriptor::CommandBatch,
    domain::{BatchSequence, ScopeId},
};

/// Host acknowledgement for one applied batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub sequence: BatchSequence,
    pub applied_at: DateTime<Utc>,
}

/// Everything the flows may ask of the host.
///
/// The host's document model, command vocabulary, and token resolution stay
/// behind this trait; callers only construct descriptors and submit them in
/// order while a scope is held.
#[async_trait]
pub trait HostGateway: Send + Sync {
    /// Enter the host's exclusive modification scope. `label` names the
    /// unit of work for the host's progress surface and logs. Acquisition
    /// queues behind whoever currently holds the scope.
    async fn enter_modal(&self, label: &str) -> Result<ScopeId>;

    /// Submit one ordered batch inside the scope. A rejection fails this
    /// submission only; batches already applied stay applied.
    async fn submit_batch(&self, scope: ScopeId, batch: &CommandBatch) -> Result<BatchReceipt>;

    /// Release the scope. Callers treat release as infallible;
    /// implementations log problems instead of returning them.
    async fn leave_modal(&self, scope: ScopeId);
}

/// Exclusive-scope handle that releases on every exit path.
///
/// A flow holds one of these for the duration of its batch submissions and
/// calls `leave` when it is done, so the host has acknowledged the release
/// before the flow reports completion. Dropping the handle instead, through
/// `?` or otherwise, posts the release from a detached task as a backstop.
pub struct ModalScope {
    gateway: Arc<dyn HostGateway>,
    id: ScopeId,
    released: bool,
}

impl ModalScope {
    pub async fn enter(gateway: Arc<dyn HostGateway>, label: &str) -> Result<Self> {
        let id = gateway.enter_modal(label).await?;
        Ok(Self {
            gateway,
            id,
            released: false,
        })
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub async fn submit(&self, batch: &CommandBatch) -> Result<BatchReceipt> {
        self.gateway.submit_batch(self.id, batch).await
    }

    /// Release the scope and wait for the host to acknowledge it.
    pub async fn leave(mut self) {
        self.released = true;
        self.gateway.leave_modal(self.id).await;
    }
}

impl Drop for ModalScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let gateway = self.gateway.clone();
        let id = self.id;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { gateway.leave_modal(id).await });
            }
            Err(_) => {
                warn!(scope = id.0, "host: scope dropped outside a runtime, release skipped");
            }
        }
    }
}

/// Null gateway for wiring a panel without a host attached. Scope entry
/// fails with a clear message, so flows fail once at their catch boundary
/// instead of panicking deeper in.
pub struct MissingHostGateway;

#[async_trait]
impl HostGateway for MissingHostGateway {
    async fn enter_modal(&self, _label: &str) -> Result<ScopeId> {
        Err(anyhow!(
            "host is not wired: no gateway configured for this panel"
        ))
    }

    async fn submit_batch(&self, _scope: ScopeId, _batch: &CommandBatch) -> Result<BatchReceipt> {
        Err(anyhow!(
            "host is not wired: no gateway configured for this panel"
        ))
    }

    async fn leave_modal(&self, scope: ScopeId) {
        warn!(scope = scope.0, "host: leave for unwired gateway ignored");
    }
}
