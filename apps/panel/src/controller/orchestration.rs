//! Trigger orchestration from the panel surface to the backend queue.
//!
//! Dispatch never blocks: a full queue or a dead backend drops the trigger
//! with a log line, the same contract the flows themselves follow.

use crossbeam_channel::{Sender, TrySendError};

use crate::backend_bridge::commands::PanelCommand;

pub fn dispatch_panel_command(cmd_tx: &Sender<PanelCommand>, cmd: PanelCommand) {
    let cmd_name = match &cmd {
        PanelCommand::InsertImage { .. } => "insert_image",
        PanelCommand::InsertText { .. } => "insert_text",
    };

    match cmd_tx.try_send(cmd) {
        Ok(()) => tracing::debug!(command = cmd_name, "queued panel trigger"),
        Err(TrySendError::Full(_)) => {
            tracing::warn!(command = cmd_name, "trigger queue is full, trigger dropped");
        }
        Err(TrySendError::Disconnected(_)) => {
            tracing::warn!(
                command = cmd_name,
                "insertion backend is gone, trigger dropped"
            );
        }
    }
}
