//! Triggers queued from the panel surface to the insertion backend.

#[derive(Debug)]
pub enum PanelCommand {
    InsertImage { asset: String },
    InsertText { text: String },
}
