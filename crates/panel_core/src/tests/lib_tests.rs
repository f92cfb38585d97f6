use super::*;

use std::{collections::HashMap, sync::Mutex as StdMutex, time::Duration};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use tempfile::{tempdir, TempDir};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use shared::{
    descriptor::{ExecutionMode, RgbColor, TextClickPoint, TextStyleRange, Unit},
    domain::{BatchSequence, Justification, Orientation, ScopeId},
};
use staging::{DirAssetSource, DirScratchStore, SessionLedger};

/// In-process stand-in for the host: a semaphore plays the exclusive scope,
/// and session tokens are resolved against the staging ledger when one is
/// wired in.
struct ScriptedHost {
    exclusive: Arc<Semaphore>,
    ledger: Option<Arc<SessionLedger>>,
    fail_enter: Option<String>,
    reject_attempt: Option<usize>,
    enter_delay: Option<Duration>,
    state: StdMutex<ScriptedHostState>,
}

#[derive(Default)]
struct ScriptedHostState {
    next_scope: u64,
    next_sequence: u64,
    permits: HashMap<u64, OwnedSemaphorePermit>,
    entered_labels: Vec<String>,
    attempts: usize,
    applied: Vec<AppliedBatch>,
    left: Vec<u64>,
}

#[derive(Clone)]
struct AppliedBatch {
    scope: ScopeId,
    batch: CommandBatch,
}

impl ScriptedHost {
    fn ok() -> Self {
        Self {
            exclusive: Arc::new(Semaphore::new(1)),
            ledger: None,
            fail_enter: None,
            reject_attempt: None,
            enter_delay: None,
            state: StdMutex::new(ScriptedHostState::default()),
        }
    }

    fn with_ledger(ledger: Arc<SessionLedger>) -> Self {
        Self {
            ledger: Some(ledger),
            ..Self::ok()
        }
    }

    fn failing_enter(message: &str) -> Self {
        Self {
            fail_enter: Some(message.to_string()),
            ..Self::ok()
        }
    }

    fn with_enter_delay(delay: Duration) -> Self {
        Self {
            enter_delay: Some(delay),
            ..Self::ok()
        }
    }

    fn entered_labels(&self) -> Vec<String> {
        self.state.lock().expect("host state").entered_labels.clone()
    }

    fn attempts(&self) -> usize {
        self.state.lock().expect("host state").attempts
    }

    fn applied(&self) -> Vec<AppliedBatch> {
        self.state.lock().expect("host state").applied.clone()
    }

    fn left(&self) -> Vec<u64> {
        self.state.lock().expect("host state").left.clone()
    }
}

#[async_trait]
impl HostGateway for ScriptedHost {
    async fn enter_modal(&self, label: &str) -> anyhow::Result<ScopeId> {
        if let Some(message) = &self.fail_enter {
            return Err(anyhow!("{message}"));
        }
        if let Some(delay) = self.enter_delay {
            tokio::time::sleep(delay).await;
        }
        let permit = self
            .exclusive
            .clone()
            .acquire_owned()
            .await
            .expect("scope semaphore closed");
        let mut state = self.state.lock().expect("host state");
        state.next_scope += 1;
        let id = state.next_scope;
        state.permits.insert(id, permit);
        state.entered_labels.push(label.to_string());
        Ok(ScopeId(id))
    }

    async fn submit_batch(
        &self,
        scope: ScopeId,
        batch: &CommandBatch,
    ) -> anyhow::Result<BatchReceipt> {
        let attempt = {
            let mut state = self.state.lock().expect("host state");
            let attempt = state.attempts;
            state.attempts += 1;
            attempt
        };
        if self.reject_attempt == Some(attempt) {
            return Err(anyhow!("interpreter refused the descriptor"));
        }
        if let Some(ledger) = &self.ledger {
            for command in &batch.commands {
                if let CommandDescriptor::PlaceEvent { source, .. } = command {
                    ledger
                        .consume(&source.token)
                        .await
                        .map_err(|rejection| anyhow!("session token rejected: {rejection}"))?;
                }
            }
        }
        let mut state = self.state.lock().expect("host state");
        state.next_sequence += 1;
        let receipt = BatchReceipt {
            sequence: BatchSequence(state.next_sequence),
            applied_at: Utc::now(),
        };
        state.applied.push(AppliedBatch {
            scope,
            batch: batch.clone(),
        });
        Ok(receipt)
    }

    async fn leave_modal(&self, scope: ScopeId) {
        let mut state = self.state.lock().expect("host state");
        state.permits.remove(&scope.0);
        state.left.push(scope.0);
    }
}

struct ClientSetup {
    client: Arc<InsertionClient>,
    host: Arc<ScriptedHost>,
    ledger: Arc<SessionLedger>,
    bundle: TempDir,
    scratch: TempDir,
}

async fn setup_with_ledger(host: ScriptedHost, ledger: Arc<SessionLedger>) -> ClientSetup {
    let bundle = tempdir().expect("bundle dir");
    let scratch = tempdir().expect("scratch dir");
    let host = Arc::new(host);
    let assets = Arc::new(DirAssetSource::new(bundle.path()));
    let store = DirScratchStore::open(scratch.path(), ledger.clone())
        .await
        .expect("scratch store");
    let client = InsertionClient::new_with_gateway(host.clone(), assets, Arc::new(store));
    ClientSetup {
        client,
        host,
        ledger,
        bundle,
        scratch,
    }
}

async fn setup(host: ScriptedHost) -> ClientSetup {
    setup_with_ledger(host, SessionLedger::new()).await
}

fn write_bundle_asset(setup: &ClientSetup, relative: &str, bytes: &[u8]) {
    let path = setup.bundle.path().join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("bundle subdir");
    }
    std::fs::write(path, bytes).expect("bundle file");
}

fn scratch_entries(setup: &ClientSetup) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(setup.scratch.path())
        .expect("scratch dir listing")
        .map(|entry| entry.expect("scratch entry").path())
        .collect()
}

fn demo_text_spec() -> TextLayerSpec {
    TextLayerSpec::new(
        "Hola Texto",
        TextClickPoint::offset(10.0, 10.0),
        Justification::Left,
        Orientation::Horizontal,
    )
    .with_style_range(TextStyleRange::new(0, 10, 20.0, RgbColor::black()))
}

fn drain_events(rx: &mut broadcast::Receiver<FlowEvent>) -> Vec<FlowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn state_sequence(events: &[FlowEvent], wanted: FlowKind) -> Vec<FlowState> {
    events
        .iter()
        .filter_map(|event| match event {
            FlowEvent::StateChanged { flow, state } if *flow == wanted => Some(*state),
            _ => None,
        })
        .collect()
}

fn failure_messages(events: &[FlowEvent], wanted: FlowKind) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            FlowEvent::Failed { flow, message } if *flow == wanted => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn text_flow_submits_one_batch_with_the_full_layer_payload() {
    let setup = setup(ScriptedHost::ok()).await;
    let mut events = setup.client.subscribe_events();

    setup.client.insert_text(demo_text_spec()).await;

    let applied = setup.host.applied();
    assert_eq!(applied.len(), 1, "text flow is a single batch");
    assert_eq!(applied[0].batch.mode, ExecutionMode::Execute);
    assert_eq!(applied[0].batch.len(), 1);

    match &applied[0].batch.commands[0] {
        CommandDescriptor::Make { target, using } => {
            assert_eq!(target.len(), 1);
            assert_eq!(target[0].class, "textLayer");
            assert_eq!(using.text, "Hola Texto");
            assert_eq!(using.click_point.horizontal, 10.0);
            assert_eq!(using.click_point.vertical, 10.0);
            assert_eq!(using.justification.value, "left");
            assert_eq!(using.shapes.len(), 1);
            assert_eq!(using.shapes[0].orientation.value, "horizontal");
            assert_eq!(using.style_ranges.len(), 1);
            let range = &using.style_ranges[0];
            assert_eq!((range.from, range.to), (0, 10));
            assert_eq!(range.style.size.unit, Unit::Points);
            assert_eq!(range.style.size.value, 20.0);
            assert_eq!(
                (range.style.color.red, range.style.color.green, range.style.color.blue),
                (0, 0, 0)
            );
        }
        other => panic!("unexpected descriptor: {other:?}"),
    }

    assert!(
        scratch_entries(&setup).is_empty(),
        "text flow must not stage anything"
    );
    let events = drain_events(&mut events);
    assert_eq!(
        state_sequence(&events, FlowKind::Text),
        vec![FlowState::AwaitingScope, FlowState::Executing, FlowState::Done]
    );
    assert_eq!(setup.host.left().len(), 1, "scope released after the flow");
}

#[tokio::test]
async fn image_flow_places_then_scales_in_submission_order() {
    let ledger = SessionLedger::new();
    let setup = setup_with_ledger(ScriptedHost::with_ledger(ledger.clone()), ledger).await;
    write_bundle_asset(&setup, "assets/test-image.png", b"fake png bytes");
    let mut events = setup.client.subscribe_events();

    setup.client.insert_image("assets/test-image.png").await;

    let applied = setup.host.applied();
    assert_eq!(applied.len(), 2, "placement batch then transform batch");
    assert_eq!(applied[0].scope, applied[1].scope, "one scope for the flow");

    let token = match &applied[0].batch.commands[..] {
        [CommandDescriptor::PlaceEvent { target, source }] => {
            assert_eq!(target[0].class, "document");
            assert_eq!(target[0].selector.as_deref(), Some("ordinal"));
            assert!(source.token.0.starts_with("sess-"));
            assert_eq!(source.kind, "local");
            source.token.clone()
        }
        other => panic!("unexpected first batch: {other:?}"),
    };

    match &applied[1].batch.commands[..] {
        [CommandDescriptor::Transform { target, width, height }] => {
            assert_eq!(target[0].class, "layer");
            assert_eq!(target[0].selector.as_deref(), Some("ordinal"));
            assert_eq!((width.unit, width.value), (Unit::Percent, 50.0));
            assert_eq!((height.unit, height.value), (Unit::Percent, 50.0));
        }
        other => panic!("unexpected second batch: {other:?}"),
    }

    match setup.ledger.consume(&token).await {
        Err(staging::TokenRejection::AlreadyConsumed) => {}
        other => panic!("placement should have consumed the token: {other:?}"),
    }

    let events = drain_events(&mut events);
    assert_eq!(
        state_sequence(&events, FlowKind::Image),
        vec![
            FlowState::Staging,
            FlowState::AwaitingScope,
            FlowState::Executing,
            FlowState::Done
        ]
    );
    assert_eq!(setup.host.entered_labels(), vec!["insert image"]);
    assert_eq!(setup.host.left().len(), 1);
}

#[tokio::test]
async fn missing_asset_aborts_with_zero_submissions_and_one_failure() {
    let setup = setup(ScriptedHost::ok()).await;
    let mut events = setup.client.subscribe_events();

    setup.client.insert_image("assets/not-there.png").await;

    assert_eq!(setup.host.attempts(), 0, "nothing must reach the host");
    assert!(setup.host.entered_labels().is_empty());

    let events = drain_events(&mut events);
    let failures = failure_messages(&events, FlowKind::Image);
    assert_eq!(failures.len(), 1, "exactly one failure per flow run");
    assert!(failures[0].contains("bundled asset not found"));
    assert_eq!(
        state_sequence(&events, FlowKind::Image),
        vec![FlowState::Staging, FlowState::Failed]
    );
}

#[tokio::test]
async fn write_failure_during_staging_aborts_with_zero_submissions() {
    let setup = setup(ScriptedHost::ok()).await;
    write_bundle_asset(&setup, "assets/test-image.png", b"fake png bytes");
    std::fs::remove_dir_all(setup.scratch.path()).expect("remove scratch root");
    let mut events = setup.client.subscribe_events();

    setup.client.insert_image("assets/test-image.png").await;

    assert_eq!(setup.host.attempts(), 0, "nothing must reach the host");
    assert!(setup.host.entered_labels().is_empty());

    let events = drain_events(&mut events);
    let failures = failure_messages(&events, FlowKind::Image);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("staging i/o failed"));
    assert_eq!(
        state_sequence(&events, FlowKind::Image),
        vec![FlowState::Staging, FlowState::Failed]
    );
}

#[tokio::test]
async fn scope_refusal_aborts_with_zero_submissions() {
    let setup = setup(ScriptedHost::failing_enter("host is busy elsewhere")).await;
    write_bundle_asset(&setup, "assets/test-image.png", b"fake png bytes");
    let mut events = setup.client.subscribe_events();

    setup.client.insert_image("assets/test-image.png").await;

    assert_eq!(setup.host.attempts(), 0);

    let events = drain_events(&mut events);
    let failures = failure_messages(&events, FlowKind::Image);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("modal scope acquisition failed"));
    assert!(failures[0].contains("host is busy elsewhere"));
    assert_eq!(
        state_sequence(&events, FlowKind::Image),
        vec![FlowState::Staging, FlowState::AwaitingScope, FlowState::Failed]
    );
    assert_eq!(
        scratch_entries(&setup).len(),
        1,
        "the staged copy stays behind, failed flows do not clean up"
    );
}

#[tokio::test]
async fn rejected_transform_keeps_placement_and_stops() {
    let ledger = SessionLedger::new();
    let host = ScriptedHost {
        reject_attempt: Some(1),
        ..ScriptedHost::with_ledger(ledger.clone())
    };
    let setup = setup_with_ledger(host, ledger).await;
    write_bundle_asset(&setup, "assets/test-image.png", b"fake png bytes");
    let mut events = setup.client.subscribe_events();

    setup.client.insert_image("assets/test-image.png").await;

    assert_eq!(setup.host.attempts(), 2, "no third submission after the rejection");
    let applied = setup.host.applied();
    assert_eq!(applied.len(), 1, "the placement stays applied");
    assert!(matches!(
        applied[0].batch.commands[0],
        CommandDescriptor::PlaceEvent { .. }
    ));

    let events = drain_events(&mut events);
    let failures = failure_messages(&events, FlowKind::Image);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("host rejected batch 1"));
    // The failure path releases through the drop backstop's spawned task.
    tokio::task::yield_now().await;
    assert_eq!(setup.host.left().len(), 1, "scope released despite the rejection");
}

#[tokio::test]
async fn placement_consumes_the_session_token_exactly_once() {
    let ledger = SessionLedger::new();
    let setup = setup_with_ledger(ScriptedHost::with_ledger(ledger.clone()), ledger).await;
    write_bundle_asset(&setup, "assets/test-image.png", b"fake png bytes");

    setup.client.insert_image("assets/test-image.png").await;
    let first_token = match &setup.host.applied()[0].batch.commands[0] {
        CommandDescriptor::PlaceEvent { source, .. } => source.token.clone(),
        other => panic!("unexpected descriptor: {other:?}"),
    };

    // Replaying the consumed token through a fresh scope must be refused.
    let scope = setup
        .host
        .enter_modal("replay attempt")
        .await
        .expect("enter scope");
    let replay = CommandBatch::execute(vec![CommandDescriptor::place_in_active_document(
        first_token.clone(),
    )]);
    let refused = setup
        .host
        .submit_batch(scope, &replay)
        .await
        .err()
        .expect("replay must be refused");
    assert!(refused.to_string().contains("already consumed"));
    setup.host.leave_modal(scope).await;

    // A fresh trigger stages again and mints a different token.
    setup.client.insert_image("assets/test-image.png").await;
    let applied = setup.host.applied();
    assert_eq!(applied.len(), 4, "two full flows worth of batches");
    let second_token = match &applied[2].batch.commands[0] {
        CommandDescriptor::PlaceEvent { source, .. } => source.token.clone(),
        other => panic!("unexpected descriptor: {other:?}"),
    };
    assert_ne!(first_token, second_token);
}

#[tokio::test]
async fn overlapping_triggers_of_the_same_flow_are_skipped() {
    let setup = setup(ScriptedHost::with_enter_delay(Duration::from_millis(50))).await;
    write_bundle_asset(&setup, "assets/test-image.png", b"fake png bytes");

    tokio::join!(
        setup.client.insert_image("assets/test-image.png"),
        setup.client.insert_image("assets/test-image.png"),
    );

    assert_eq!(
        setup.host.entered_labels().len(),
        1,
        "the second trigger must be skipped, not queued"
    );
    assert_eq!(setup.host.applied().len(), 2, "one flow's worth of batches");
}

#[tokio::test]
async fn distinct_flows_may_overlap_and_serialize_on_the_scope() {
    let setup = setup(ScriptedHost::with_enter_delay(Duration::from_millis(20))).await;
    write_bundle_asset(&setup, "assets/test-image.png", b"fake png bytes");

    tokio::join!(
        setup.client.insert_image("assets/test-image.png"),
        setup.client.insert_text(demo_text_spec()),
    );

    assert_eq!(setup.host.entered_labels().len(), 2);
    assert_eq!(setup.host.applied().len(), 3, "two image batches plus one text batch");
    assert_eq!(setup.host.left().len(), 2);

    assert_eq!(setup.client.flow_state(FlowKind::Image).await, FlowState::Done);
    assert_eq!(setup.client.flow_state(FlowKind::Text).await, FlowState::Done);
}

#[tokio::test]
async fn finished_flows_rearm_for_the_next_trigger() {
    let setup = setup(ScriptedHost::ok()).await;

    setup.client.insert_text(demo_text_spec()).await;
    setup.client.insert_text(demo_text_spec()).await;

    assert_eq!(setup.host.entered_labels().len(), 2);
    assert_eq!(setup.host.applied().len(), 2);
    assert_eq!(setup.client.flow_state(FlowKind::Text).await, FlowState::Done);
}

#[tokio::test]
async fn failed_flows_rearm_for_the_next_trigger() {
    let setup = setup(ScriptedHost::ok()).await;
    let mut events = setup.client.subscribe_events();

    setup.client.insert_image("assets/test-image.png").await;
    assert_eq!(
        setup.client.flow_state(FlowKind::Image).await,
        FlowState::Failed
    );

    write_bundle_asset(&setup, "assets/test-image.png", b"fake png bytes");
    setup.client.insert_image("assets/test-image.png").await;
    assert_eq!(
        setup.client.flow_state(FlowKind::Image).await,
        FlowState::Done
    );

    let events = drain_events(&mut events);
    assert_eq!(failure_messages(&events, FlowKind::Image).len(), 1);
}

#[tokio::test]
async fn preview_returns_bundle_bytes_and_never_stages() {
    let setup = setup(ScriptedHost::ok()).await;
    write_bundle_asset(&setup, "assets/test-image.png", b"thumbnail bytes");

    let bytes = setup.client.load_preview("assets/test-image.png").await;
    assert_eq!(bytes.as_deref(), Some(b"thumbnail bytes".as_slice()));
    assert!(scratch_entries(&setup).is_empty());

    let missing = setup.client.load_preview("assets/other.png").await;
    assert!(missing.is_none());
    assert_eq!(setup.host.attempts(), 0);
}

#[tokio::test]
async fn missing_gateway_fails_flows_at_scope_acquisition() {
    let bundle = tempdir().expect("bundle dir");
    let scratch = tempdir().expect("scratch dir");
    std::fs::create_dir_all(bundle.path().join("assets")).expect("assets dir");
    std::fs::write(bundle.path().join("assets/test-image.png"), b"bytes").expect("asset");

    let store = DirScratchStore::open(scratch.path(), SessionLedger::new())
        .await
        .expect("scratch store");
    let client = InsertionClient::new(
        Arc::new(DirAssetSource::new(bundle.path())),
        Arc::new(store),
    );
    let mut events = client.subscribe_events();

    client.insert_image("assets/test-image.png").await;

    let events = drain_events(&mut events);
    let failures = failure_messages(&events, FlowKind::Image);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("host is not wired"));
}
