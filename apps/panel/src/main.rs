use std::{
    io::{self, BufRead},
    thread,
    time::Duration,
};

mod backend_bridge;
mod config;
mod controller;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, Receiver, Sender};

use panel_core::FlowState;
use shared::domain::FlowKind;

use backend_bridge::commands::PanelCommand;
use backend_bridge::runtime::spawn_backend_thread;
use controller::events::PanelEvent;
use controller::orchestration::dispatch_panel_command;

#[derive(Parser, Debug)]
struct Cli {
    /// Host bridge endpoint, e.g. http://127.0.0.1:8206. Overrides panel.toml.
    #[arg(long)]
    bridge_url: Option<String>,
    /// Directory holding the panel's bundled assets.
    #[arg(long)]
    bundle_dir: Option<String>,
    /// Writable directory staged copies land in.
    #[arg(long)]
    scratch_dir: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage the bundled image and place it into the active document.
    InsertImage {
        #[arg(long)]
        asset: Option<String>,
    },
    /// Create the demo text layer.
    InsertText {
        #[arg(long)]
        text: Option<String>,
    },
    /// Keep the panel open and read triggers from stdin.
    Run,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let mut settings = config::load_settings();
    if let Some(v) = cli.bridge_url {
        settings.bridge_url = Some(v);
    }
    if let Some(v) = cli.bundle_dir {
        settings.bundle_dir = v;
    }
    if let Some(v) = cli.scratch_dir {
        settings.scratch_dir = v;
    }

    let demo_image_asset = settings.demo_image_asset.clone();
    let demo_text = settings.demo_text.clone();

    let (cmd_tx, cmd_rx) = bounded::<PanelCommand>(256);
    let (event_tx, event_rx) = bounded::<PanelEvent>(2048);
    spawn_backend_thread(settings, cmd_rx, event_tx);

    match cli.command {
        Command::InsertImage { asset } => {
            let asset = asset.unwrap_or(demo_image_asset);
            dispatch_panel_command(&cmd_tx, PanelCommand::InsertImage { asset });
            wait_for_flow(&event_rx, FlowKind::Image)
        }
        Command::InsertText { text } => {
            let text = text.unwrap_or(demo_text);
            dispatch_panel_command(&cmd_tx, PanelCommand::InsertText { text });
            wait_for_flow(&event_rx, FlowKind::Text)
        }
        Command::Run => run_trigger_loop(&cmd_tx, event_rx, &demo_image_asset, &demo_text),
    }
}

/// Prints backend events until `flow` reaches a terminal state. Flow
/// failures are already logged by the backend, so the exit code stays zero
/// either way; only a dead backend is an error here.
fn wait_for_flow(event_rx: &Receiver<PanelEvent>, flow: FlowKind) -> Result<()> {
    loop {
        let event = match event_rx.recv_timeout(Duration::from_secs(60)) {
            Ok(event) => event,
            Err(_) => bail!("insertion backend went quiet before the {flow} flow finished"),
        };
        print_event(&event);
        match event {
            PanelEvent::BackendFailed(message) => bail!("insertion backend failed: {message}"),
            PanelEvent::FlowProgress {
                flow: progressed,
                state,
            } if progressed == flow
                && matches!(state, FlowState::Done | FlowState::Failed) =>
            {
                return Ok(());
            }
            _ => {}
        }
    }
}

/// Interactive surface: one trigger per line, events printed as they land.
fn run_trigger_loop(
    cmd_tx: &Sender<PanelCommand>,
    event_rx: Receiver<PanelEvent>,
    demo_image_asset: &str,
    demo_text: &str,
) -> Result<()> {
    thread::spawn(move || {
        while let Ok(event) = event_rx.recv() {
            print_event(&event);
        }
    });

    println!("triggers: image [asset] | text [words...] | quit");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_trigger_line(&line, demo_image_asset, demo_text) {
            Some(TriggerLine::Image { asset }) => {
                dispatch_panel_command(cmd_tx, PanelCommand::InsertImage { asset });
            }
            Some(TriggerLine::Text { text }) => {
                dispatch_panel_command(cmd_tx, PanelCommand::InsertText { text });
            }
            Some(TriggerLine::Quit) => break,
            None => println!("unknown trigger: {line}"),
        }
    }
    Ok(())
}

fn print_event(event: &PanelEvent) {
    match event {
        PanelEvent::Info(message) => println!("{message}"),
        PanelEvent::BackendFailed(message) => eprintln!("backend failure: {message}"),
        PanelEvent::PreviewLoaded { asset, byte_len } => {
            println!("preview ready: {asset} ({byte_len} bytes)");
        }
        PanelEvent::PreviewMissing { asset } => println!("preview unavailable: {asset}"),
        PanelEvent::FlowProgress { flow, state } => println!("{flow} flow: {state}"),
        PanelEvent::BatchApplied { flow, sequence } => {
            println!("{flow} flow: host applied batch sequence={sequence}");
        }
        PanelEvent::FlowFailed { flow, message } => println!("{flow} flow failed: {message}"),
    }
}

#[derive(Debug, PartialEq)]
enum TriggerLine {
    Image { asset: String },
    Text { text: String },
    Quit,
}

fn parse_trigger_line(line: &str, demo_image_asset: &str, demo_text: &str) -> Option<TriggerLine> {
    let trimmed = line.trim();
    let (keyword, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (trimmed, ""),
    };
    match keyword {
        "image" => Some(TriggerLine::Image {
            asset: if rest.is_empty() {
                demo_image_asset
            } else {
                rest
            }
            .to_string(),
        }),
        "text" => Some(TriggerLine::Text {
            text: if rest.is_empty() { demo_text } else { rest }.to_string(),
        }),
        "quit" | "exit" => Some(TriggerLine::Quit),
        _ => None,
    }
}
