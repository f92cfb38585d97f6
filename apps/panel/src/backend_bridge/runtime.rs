//! Worker thread that owns the insertion backend and its tokio runtime.
//!
//! The surface talks to this worker exclusively through the bounded command
//! queue; flow progress comes back over the event channel. Triggers are
//! spawned fire-and-forget so a slow host never blocks the queue.

use std::{sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::broadcast;
use url::Url;

use panel_core::{FlowEvent, InsertionClient, RemoteHostGateway};
use shared::{
    descriptor::{RgbColor, TextClickPoint, TextLayerSpec, TextStyleRange},
    domain::{Justification, Orientation},
};
use staging::{DirAssetSource, DirScratchStore, SessionLedger};

use crate::backend_bridge::commands::PanelCommand;
use crate::config::Settings;
use crate::controller::events::PanelEvent;

const TEXT_ANCHOR_OFFSET: f64 = 10.0;
const TEXT_SIZE_POINTS: f64 = 20.0;

/// Demo layer the text trigger inserts: anchored near the document origin,
/// left-justified, horizontal, one style range covering the whole text.
pub(crate) fn demo_text_layer(text: &str) -> TextLayerSpec {
    let styled_len = text.chars().count() as u32;
    TextLayerSpec::new(
        text,
        TextClickPoint::offset(TEXT_ANCHOR_OFFSET, TEXT_ANCHOR_OFFSET),
        Justification::Left,
        Orientation::Horizontal,
    )
    .with_style_range(TextStyleRange::new(
        0,
        styled_len,
        TEXT_SIZE_POINTS,
        RgbColor::black(),
    ))
}

async fn build_insertion_client(settings: &Settings) -> Result<Arc<InsertionClient>, String> {
    let assets = Arc::new(DirAssetSource::new(settings.bundle_dir.as_str()));
    let ledger = SessionLedger::new();
    let scratch = DirScratchStore::open(settings.scratch_dir.as_str(), ledger)
        .await
        .map_err(|err| {
            format!(
                "could not prepare scratch directory '{}': {err:#}",
                settings.scratch_dir
            )
        })?;
    let scratch = Arc::new(scratch);

    match settings.bridge_url.as_deref() {
        Some(raw) => {
            let base =
                Url::parse(raw).map_err(|err| format!("invalid bridge url '{raw}': {err}"))?;
            Ok(InsertionClient::new_with_gateway(
                Arc::new(RemoteHostGateway::new(&base)),
                assets,
                scratch,
            ))
        }
        None => {
            tracing::warn!("no bridge url configured, host triggers will fail cleanly");
            Ok(InsertionClient::new(assets, scratch))
        }
    }
}

pub fn spawn_backend_thread(
    settings: Settings,
    cmd_rx: Receiver<PanelCommand>,
    event_tx: Sender<PanelEvent>,
) {
    thread::spawn(move || {
        let _ = event_tx.try_send(PanelEvent::Info("insertion backend starting".to_string()));
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = event_tx.try_send(PanelEvent::BackendFailed(format!(
                    "failed to build backend runtime: {err}"
                )));
                tracing::error!("failed to build backend runtime: {err}");
                return;
            }
        };

        runtime.block_on(async move {
            let client = match build_insertion_client(&settings).await {
                Ok(client) => client,
                Err(message) => {
                    tracing::error!("{message}");
                    let _ = event_tx.try_send(PanelEvent::BackendFailed(message));
                    return;
                }
            };

            let mut events = client.subscribe_events();
            let event_tx_clone = event_tx.clone();
            tokio::spawn(async move {
                loop {
                    let event = match events.recv().await {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "flow event relay lagged, events dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    let evt = match event {
                        FlowEvent::StateChanged { flow, state } => {
                            PanelEvent::FlowProgress { flow, state }
                        }
                        FlowEvent::BatchApplied { flow, receipt } => PanelEvent::BatchApplied {
                            flow,
                            sequence: receipt.sequence.0,
                        },
                        FlowEvent::Failed { flow, message } => {
                            PanelEvent::FlowFailed { flow, message }
                        }
                    };
                    let _ = event_tx_clone.try_send(evt);
                }
            });

            match client.load_preview(&settings.demo_image_asset).await {
                Some(bytes) => {
                    let _ = event_tx.try_send(PanelEvent::PreviewLoaded {
                        asset: settings.demo_image_asset.clone(),
                        byte_len: bytes.len(),
                    });
                }
                None => {
                    let _ = event_tx.try_send(PanelEvent::PreviewMissing {
                        asset: settings.demo_image_asset.clone(),
                    });
                }
            }

            let _ = event_tx.try_send(PanelEvent::Info("insertion backend ready".to_string()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    PanelCommand::InsertImage { asset } => {
                        let client = client.clone();
                        tokio::spawn(async move {
                            client.insert_image(&asset).await;
                        });
                    }
                    PanelCommand::InsertText { text } => {
                        let spec = demo_text_layer(&text);
                        let client = client.clone();
                        tokio::spawn(async move {
                            client.insert_text(spec).await;
                        });
                    }
                }
            }
        });
    });
}
