//! Backend-to-surface events for the panel's status output.

use panel_core::FlowState;
use shared::domain::FlowKind;

pub enum PanelEvent {
    Info(String),
    BackendFailed(String),
    PreviewLoaded { asset: String, byte_len: usize },
    PreviewMissing { asset: String },
    FlowProgress { flow: FlowKind, state: FlowState },
    BatchApplied { flow: FlowKind, sequence: u64 },
    FlowFailed { flow: FlowKind, message: String },
}
