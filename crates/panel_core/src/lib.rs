//! The two insertion flows behind the panel: stage-and-place an image,
//! create a styled text layer. Each flow runs fire-and-forget, reports
//! progress over a broadcast channel, and fails silently past its single
//! catch boundary.

use std::{fmt, sync::Arc};

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use host_bridge::{BatchReceipt, HostGateway, MissingHostGateway, ModalScope};
use shared::{
    descriptor::{CommandBatch, CommandDescriptor, TextLayerSpec},
    domain::FlowKind,
};
use staging::{AssetSource, AssetStager, ScratchStore, StageError};

mod remote;
pub use remote::RemoteHostGateway;

const SCALE_PERCENT: f64 = 50.0;
const IMAGE_SCOPE_LABEL: &str = "insert image";
const TEXT_SCOPE_LABEL: &str = "insert text";
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("modal scope acquisition failed: {0}")]
    ScopeAcquisition(String),
    #[error("host rejected batch {index}: {message}")]
    CommandRejected { index: usize, message: String },
}

/// Where a flow currently is. `Done` and `Failed` are re-armable: the next
/// trigger restarts the flow from the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Staging,
    AwaitingScope,
    Executing,
    Done,
    Failed,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::Idle => "idle",
            FlowState::Staging => "staging",
            FlowState::AwaitingScope => "awaiting_scope",
            FlowState::Executing => "executing",
            FlowState::Done => "done",
            FlowState::Failed => "failed",
        }
    }

    fn in_flight(&self) -> bool {
        matches!(
            self,
            FlowState::Staging | FlowState::AwaitingScope | FlowState::Executing
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum FlowEvent {
    StateChanged { flow: FlowKind, state: FlowState },
    BatchApplied { flow: FlowKind, receipt: BatchReceipt },
    Failed { flow: FlowKind, message: String },
}

#[derive(Debug, Clone, Copy)]
struct FlowTable {
    image: FlowState,
    text: FlowState,
}

impl Default for FlowTable {
    fn default() -> Self {
        Self {
            image: FlowState::Idle,
            text: FlowState::Idle,
        }
    }
}

impl FlowTable {
    fn get(&self, flow: FlowKind) -> FlowState {
        match flow {
            FlowKind::Image => self.image,
            FlowKind::Text => self.text,
        }
    }

    fn set(&mut self, flow: FlowKind, state: FlowState) {
        match flow {
            FlowKind::Image => self.image = state,
            FlowKind::Text => self.text = state,
        }
    }
}

/// Drives the host's command interpreter for the panel.
///
/// Holds the staging collaborators and the host gateway; each insertion is
/// one flow instance tracked by the per-flow state table.
pub struct InsertionClient {
    gateway: Arc<dyn HostGateway>,
    stager: AssetStager,
    flows: Mutex<FlowTable>,
    events: broadcast::Sender<FlowEvent>,
}

impl InsertionClient {
    /// Client without a host attached; flows fail cleanly at scope
    /// acquisition until a gateway is wired.
    pub fn new(assets: Arc<dyn AssetSource>, scratch: Arc<dyn ScratchStore>) -> Arc<Self> {
        Self::new_with_gateway(Arc::new(MissingHostGateway), assets, scratch)
    }

    pub fn new_with_gateway(
        gateway: Arc<dyn HostGateway>,
        assets: Arc<dyn AssetSource>,
        scratch: Arc<dyn ScratchStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            gateway,
            stager: AssetStager::new(assets, scratch),
            flows: Mutex::new(FlowTable::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    pub async fn flow_state(&self, flow: FlowKind) -> FlowState {
        self.flows.lock().await.get(flow)
    }

    /// Raw bytes of a bundled asset for the front-end's thumbnail. A failed
    /// read is logged and surfaces as a missing preview, nothing more.
    pub async fn load_preview(&self, asset: &str) -> Option<Vec<u8>> {
        match self.stager.peek(asset).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                error!(asset, "preview: loading bundled asset failed: {err}");
                None
            }
        }
    }

    /// Image insertion, end to end: stage the bundled asset, place the
    /// scratch copy by session token, scale the placed layer to 50%.
    ///
    /// This is the flow's single catch boundary. Failures are logged once
    /// with the flow marker and emitted as a `Failed` event; the trigger
    /// caller never sees them.
    pub async fn insert_image(&self, asset: &str) {
        if !self.try_begin(FlowKind::Image, FlowState::Staging).await {
            warn!(asset, "image flow: already running, trigger skipped");
            return;
        }
        match self.run_image_flow(asset).await {
            Ok(receipts) => {
                info!(batches = receipts.len(), "image flow: insertion finished");
                self.transition(FlowKind::Image, FlowState::Done).await;
            }
            Err(err) => {
                error!(asset, "image flow: insertion failed: {err}");
                self.fail(FlowKind::Image, err).await;
            }
        }
    }

    /// Text insertion: one batch, one instruction, the whole layer spec in
    /// its payload. Same catch boundary contract as `insert_image`.
    pub async fn insert_text(&self, spec: TextLayerSpec) {
        if !self
            .try_begin(FlowKind::Text, FlowState::AwaitingScope)
            .await
        {
            warn!("text flow: already running, trigger skipped");
            return;
        }
        match self.run_text_flow(spec).await {
            Ok(receipts) => {
                info!(batches = receipts.len(), "text flow: insertion finished");
                self.transition(FlowKind::Text, FlowState::Done).await;
            }
            Err(err) => {
                error!("text flow: insertion failed: {err}");
                self.fail(FlowKind::Text, err).await;
            }
        }
    }

    async fn run_image_flow(&self, asset: &str) -> Result<Vec<BatchReceipt>, FlowError> {
        let staged = self.stager.stage(asset).await?;
        self.transition(FlowKind::Image, FlowState::AwaitingScope)
            .await;
        let batches = vec![
            vec![CommandDescriptor::place_in_active_document(staged.token)],
            vec![CommandDescriptor::scale_active_layer(
                SCALE_PERCENT,
                SCALE_PERCENT,
            )],
        ];
        self.run_modal(FlowKind::Image, IMAGE_SCOPE_LABEL, batches)
            .await
    }

    async fn run_text_flow(&self, spec: TextLayerSpec) -> Result<Vec<BatchReceipt>, FlowError> {
        let batches = vec![vec![CommandDescriptor::make_text_layer(spec)]];
        self.run_modal(FlowKind::Text, TEXT_SCOPE_LABEL, batches)
            .await
    }

    /// Submits `batches` in order inside one exclusive scope. The scope is
    /// released on every exit path; a rejected batch aborts the rest and
    /// leaves earlier batches applied.
    async fn run_modal(
        &self,
        flow: FlowKind,
        label: &str,
        batches: Vec<Vec<CommandDescriptor>>,
    ) -> Result<Vec<BatchReceipt>, FlowError> {
        let scope = ModalScope::enter(self.gateway.clone(), label)
            .await
            .map_err(|err| FlowError::ScopeAcquisition(err.to_string()))?;
        self.transition(flow, FlowState::Executing).await;

        let mut receipts = Vec::with_capacity(batches.len());
        for (index, commands) in batches.into_iter().enumerate() {
            let batch = CommandBatch::execute(commands);
            let receipt =
                scope
                    .submit(&batch)
                    .await
                    .map_err(|err| FlowError::CommandRejected {
                        index,
                        message: err.to_string(),
                    })?;
            info!(
                flow = %flow,
                batch = index,
                sequence = receipt.sequence.0,
                "host applied batch"
            );
            let _ = self.events.send(FlowEvent::BatchApplied {
                flow,
                receipt: receipt.clone(),
            });
            receipts.push(receipt);
        }
        scope.leave().await;
        Ok(receipts)
    }

    /// Marks `flow` in flight unless it already is; a skipped trigger never
    /// starts a second instance.
    async fn try_begin(&self, flow: FlowKind, first: FlowState) -> bool {
        let mut flows = self.flows.lock().await;
        if flows.get(flow).in_flight() {
            return false;
        }
        flows.set(flow, first);
        drop(flows);
        let _ = self
            .events
            .send(FlowEvent::StateChanged { flow, state: first });
        true
    }

    async fn transition(&self, flow: FlowKind, state: FlowState) {
        self.flows.lock().await.set(flow, state);
        let _ = self.events.send(FlowEvent::StateChanged { flow, state });
    }

    async fn fail(&self, flow: FlowKind, err: FlowError) {
        let _ = self.events.send(FlowEvent::Failed {
            flow,
            message: err.to_string(),
        });
        self.transition(flow, FlowState::Failed).await;
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod remote_tests;
