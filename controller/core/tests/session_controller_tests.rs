//! Integration tests for the session controller
//!
//! Each test drives a spawned controller end to end: an in-process backend
//! plays the generation server, a recording sink plays the display surface
//! and an in-memory store plays the session storage API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use controller_core::{
    ControllerCommand, ControllerConfig, ControllerHandle, ControllerMessage, Frame,
    InProcessBackend, InProcessTransport, Intent, MemorySessionStore, NotifyLevel,
    OutputQueueConfig, OutputSink, PeerConnection, SessionController, SinkError, TransportConfig,
    WorkflowState,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Harness
// =============================================================================

#[derive(Clone, Default)]
struct RecordingSink {
    chunks: Arc<Mutex<Vec<String>>>,
    busy: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl RecordingSink {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn output(&self) -> String {
        self.chunks.lock().concat()
    }
}

#[async_trait]
impl OutputSink for RecordingSink {
    async fn write(&mut self, chunk: &str) -> Result<(), SinkError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.chunks.lock().push(chunk.to_string());
        self.busy.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct Session {
    handle: ControllerHandle,
    backend: InProcessBackend,
    messages: mpsc::Receiver<ControllerMessage>,
    store: Arc<MemorySessionStore>,
    sink: RecordingSink,
}

fn transport_config() -> TransportConfig {
    TransportConfig::default()
        .without_heartbeat()
        .with_reconnect_delay(Duration::from_millis(50))
}

fn controller_config() -> ControllerConfig {
    ControllerConfig {
        debounce: Duration::from_millis(20),
        ..ControllerConfig::default()
    }
}

async fn start(config: ControllerConfig, sink: RecordingSink) -> Session {
    let (transport, backend) = InProcessTransport::new_pair();
    let store = Arc::new(MemorySessionStore::new());
    let (tx, messages) = mpsc::channel(1024);
    let controller =
        SessionController::new(transport, transport_config(), Arc::clone(&store), &config, tx);
    let handle = controller.spawn();
    handle
        .send(ControllerCommand::AttachSink(Box::new(sink.clone())))
        .await
        .unwrap();
    Session {
        handle,
        backend,
        messages,
        store,
        sink,
    }
}

impl Session {
    async fn next_matching(
        &mut self,
        mut predicate: impl FnMut(&ControllerMessage) -> bool,
    ) -> ControllerMessage {
        tokio::time::timeout(WAIT, async {
            loop {
                let message = self.messages.recv().await.expect("controller stopped");
                if predicate(&message) {
                    return message;
                }
            }
        })
        .await
        .expect("timed out waiting for controller message")
    }

    async fn accept(&mut self) -> PeerConnection {
        let peer = tokio::time::timeout(WAIT, self.backend.accept())
            .await
            .expect("timed out waiting for connect")
            .expect("transport dropped");
        self.next_matching(|m| matches!(m, ControllerMessage::Connected { .. }))
            .await;
        peer
    }

    async fn wait_idle(&mut self) {
        self.next_matching(|m| *m == ControllerMessage::Loading { active: false })
            .await;
    }

    async fn intent(peer: &mut PeerConnection) -> Intent {
        tokio::time::timeout(WAIT, peer.next_intent())
            .await
            .expect("timed out waiting for intent")
            .expect("channel closed")
    }
}

async fn send_all(peer: &PeerConnection, frames: &[Frame]) {
    for frame in frames {
        assert!(peer.send_frame(frame).await);
    }
}

fn msg(text: &str) -> Frame {
    Frame::Message(text.to_string())
}

fn code(text: &str) -> Frame {
    Frame::Code(text.to_string())
}

async fn wait_for_output(sink: &RecordingSink, expected: &str) {
    let reached = tokio::time::timeout(WAIT, async {
        while sink.output() != expected {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(
        reached.is_ok(),
        "output never became {expected:?}, last saw {:?}",
        sink.output()
    );
}

impl Session {
    /// Push a line the controller drops, and wait until it has been read
    async fn sync_with(&mut self, peer: &PeerConnection) {
        assert!(peer.send_text("not json").await);
        self.next_matching(|m| matches!(m, ControllerMessage::FrameDropped { .. }))
            .await;
    }
}

// =============================================================================
// Output ordering
// =============================================================================

#[tokio::test]
async fn test_prose_and_code_interleave_in_arrival_order() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;

    session.handle.submit("a counter").await.unwrap();
    assert_eq!(
        Session::intent(&mut peer).await,
        Intent::Generate {
            prompt: "a counter".into()
        }
    );

    send_all(
        &peer,
        &[
            msg("Here is "),
            msg("the app:"),
            code("print("),
            code("1)"),
            msg("Run it."),
            Frame::EndOfStream,
        ],
    )
    .await;
    session.wait_idle().await;

    let sink = session.sink.clone();
    let stats = session.handle.shutdown().await.unwrap();

    assert_eq!(
        sink.output(),
        "Here is the app:\n[code] 8 chars received\nRun it.\n[done] generation complete\n"
    );
    assert_eq!(stats.frames_received, 6);
    assert_eq!(stats.protocol_errors, 0);
    assert_eq!(stats.output.failed, 0);
}

#[tokio::test]
async fn test_slow_surface_sees_chunks_in_order_one_at_a_time() {
    let config = ControllerConfig {
        output: OutputQueueConfig {
            chunk_size: 4,
            capacity: 8,
        },
        ..controller_config()
    };
    let mut session = start(config, RecordingSink::slow(Duration::from_millis(2))).await;
    let mut peer = session.accept().await;

    session.handle.submit("status please").await.unwrap();
    Session::intent(&mut peer).await;
    send_all(
        &peer,
        &[
            Frame::Status("compiling the project".into()),
            Frame::Console("line one\nline two".into()),
            Frame::EndOfStream,
        ],
    )
    .await;
    session.wait_idle().await;

    let sink = session.sink.clone();
    let stats = session.handle.shutdown().await.unwrap();

    assert_eq!(
        sink.output(),
        "[status] compiling the project\n[console]\nline one\nline two\n[done] generation complete\n"
    );
    assert!(sink.chunks.lock().iter().all(|c| c.chars().count() <= 4));
    assert!(!sink.overlapped.load(Ordering::SeqCst));
    assert_eq!(stats.output.written, stats.output.enqueued);
}

// =============================================================================
// Debounce
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_prose_waits_for_debounce_window() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;
    session.handle.submit("greeting").await.unwrap();
    Session::intent(&mut peer).await;

    let start = tokio::time::Instant::now();
    send_all(&peer, &[msg("hello "), msg("world")]).await;
    session.sync_with(&peer).await;
    assert_eq!(session.sink.output(), "");

    tokio::time::advance(Duration::from_millis(10)).await;
    session.sync_with(&peer).await;
    assert_eq!(session.sink.output(), "");

    wait_for_output(&session.sink, "hello world").await;
    assert!(start.elapsed() >= Duration::from_millis(20));

    let stats = session.handle.shutdown().await.unwrap();
    assert_eq!(stats.protocol_errors, 2);
}

#[tokio::test(start_paused = true)]
async fn test_status_inside_window_restarts_debounce() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;
    session.handle.submit("build it").await.unwrap();
    Session::intent(&mut peer).await;

    send_all(&peer, &[msg("hello "), Frame::Status("building".into())]).await;
    session.sync_with(&peer).await;
    wait_for_output(&session.sink, "hello \n[status] building\n").await;

    // The status frame disarmed the first window, so this fragment opens a
    // fresh one instead of riding the old deadline.
    tokio::time::advance(Duration::from_millis(15)).await;
    let rearmed = tokio::time::Instant::now();
    send_all(&peer, &[msg("again")]).await;
    session.sync_with(&peer).await;
    tokio::time::advance(Duration::from_millis(10)).await;
    session.sync_with(&peer).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(session.sink.output(), "hello \n[status] building\n");

    wait_for_output(&session.sink, "hello \n[status] building\nagain").await;
    assert!(rearmed.elapsed() >= Duration::from_millis(20));

    let sink = session.sink.clone();
    session.handle.shutdown().await.unwrap();
    assert_eq!(sink.output().matches("hello ").count(), 1);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_finished_run_saved_exactly_once() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;

    session.handle.submit("snake game").await.unwrap();
    Session::intent(&mut peer).await;
    send_all(
        &peer,
        &[
            code("import pygame\n"),
            code("pygame.init()\n"),
            Frame::Console("ok".into()),
            Frame::EndOfStream,
            Frame::EndOfStream,
        ],
    )
    .await;

    let saved = session
        .next_matching(|m| matches!(m, ControllerMessage::SessionSaved { .. }))
        .await;
    session
        .next_matching(|m| matches!(m, ControllerMessage::FrameDropped { .. }))
        .await;

    let ControllerMessage::SessionSaved { session: saved } = saved else {
        unreachable!()
    };
    assert_eq!(saved.prompt, "snake game");
    assert_eq!(saved.code, "import pygame\npygame.init()\n");

    let stats = session.handle.shutdown().await.unwrap();
    let stored = session.store.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].code, "import pygame\npygame.init()\n");
    assert!(stored[0].console_output.contains("[console]\nok\n"));
    assert_eq!(stats.saves_triggered, 1);
    assert_eq!(stats.protocol_errors, 1);
}

#[tokio::test]
async fn test_failed_save_is_retried_on_request() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;
    session.store.fail_next_creates(1);

    session.handle.submit("clock").await.unwrap();
    Session::intent(&mut peer).await;
    send_all(&peer, &[code("tick()"), Frame::EndOfStream]).await;

    let warning = session
        .next_matching(|m| matches!(m, ControllerMessage::Notify { .. }))
        .await;
    assert!(matches!(
        warning,
        ControllerMessage::Notify { level: NotifyLevel::Warning, ref message }
            if message.contains("/retry-save")
    ));
    assert!(session.store.stored().is_empty());

    session.handle.send(ControllerCommand::RetrySave).await.unwrap();
    session
        .next_matching(|m| matches!(m, ControllerMessage::SessionSaved { .. }))
        .await;

    let stats = session.handle.shutdown().await.unwrap();
    assert_eq!(session.store.create_calls(), 2);
    assert_eq!(session.store.stored()[0].code, "tick()");
    assert_eq!(stats.saves_triggered, 1);
}

#[tokio::test]
async fn test_later_save_does_not_discard_earlier_failure() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;
    session.store.fail_next_creates(1);

    session.handle.submit("clock").await.unwrap();
    Session::intent(&mut peer).await;
    send_all(&peer, &[code("tick()"), Frame::EndOfStream]).await;
    let warning = session
        .next_matching(|m| matches!(m, ControllerMessage::Notify { .. }))
        .await;
    assert!(matches!(
        warning,
        ControllerMessage::Notify { level: NotifyLevel::Warning, ref message }
            if message.contains("1 unsaved")
    ));

    session.handle.submit("timer").await.unwrap();
    Session::intent(&mut peer).await;
    send_all(&peer, &[code("tock()"), Frame::EndOfStream]).await;
    let ControllerMessage::SessionSaved { session: saved } = session
        .next_matching(|m| matches!(m, ControllerMessage::SessionSaved { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(saved.code, "tock()");
    let reminder = session
        .next_matching(|m| matches!(m, ControllerMessage::Notify { .. }))
        .await;
    assert_eq!(
        reminder,
        ControllerMessage::Notify {
            level: NotifyLevel::Info,
            message: "1 unsaved session(s) remain; use /retry-save".into(),
        }
    );

    session.handle.send(ControllerCommand::RetrySave).await.unwrap();
    let ControllerMessage::SessionSaved { session: retried } = session
        .next_matching(|m| matches!(m, ControllerMessage::SessionSaved { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(retried.prompt, "clock");
    assert_eq!(retried.code, "tick()");

    session.handle.send(ControllerCommand::RetrySave).await.unwrap();
    let done = session
        .next_matching(|m| matches!(m, ControllerMessage::Notify { .. }))
        .await;
    assert_eq!(
        done,
        ControllerMessage::Notify {
            level: NotifyLevel::Info,
            message: "every session is saved".into(),
        }
    );

    session.handle.shutdown().await.unwrap();
    let codes: Vec<String> = session.store.stored().into_iter().map(|c| c.code).collect();
    assert_eq!(codes, vec!["tock()".to_string(), "tick()".to_string()]);
}

#[tokio::test]
async fn test_stored_but_unreadable_session_is_not_offered_for_retry() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;
    session.store.fail_next_fetches(1);

    session.handle.submit("clock").await.unwrap();
    Session::intent(&mut peer).await;
    send_all(&peer, &[code("tick()"), Frame::EndOfStream]).await;

    let ControllerMessage::Notify { level, message } = session
        .next_matching(|m| matches!(m, ControllerMessage::Notify { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(level, NotifyLevel::Warning);
    assert!(message.starts_with("session saved as "), "{message}");
    assert!(!message.contains("/retry-save"), "{message}");
    let listed = session
        .next_matching(|m| matches!(m, ControllerMessage::SessionsListed { .. }))
        .await;
    assert!(matches!(
        listed,
        ControllerMessage::SessionsListed { ref sessions, .. } if sessions.len() == 1
    ));

    session.handle.send(ControllerCommand::RetrySave).await.unwrap();
    let retry = session
        .next_matching(|m| matches!(m, ControllerMessage::Notify { .. }))
        .await;
    assert_eq!(
        retry,
        ControllerMessage::Notify {
            level: NotifyLevel::Info,
            message: "every session is saved".into(),
        }
    );

    session.handle.shutdown().await.unwrap();
    assert_eq!(session.store.create_calls(), 1);
    assert_eq!(session.store.stored().len(), 1);
}

// =============================================================================
// Failure
// =============================================================================

#[tokio::test]
async fn test_backend_error_ends_run_without_saving() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;

    session.handle.submit("weather app").await.unwrap();
    Session::intent(&mut peer).await;
    send_all(
        &peer,
        &[msg("partial"), code("abc"), Frame::Error("X".into())],
    )
    .await;

    session
        .next_matching(|m| *m == ControllerMessage::State { state: WorkflowState::Failed })
        .await;
    let failed = session
        .next_matching(|m| matches!(m, ControllerMessage::Notify { .. }))
        .await;
    assert_eq!(
        failed,
        ControllerMessage::Notify {
            level: NotifyLevel::Error,
            message: "generation failed: X".into(),
        }
    );

    // Frames after the terminal marker have no run to join.
    send_all(&peer, &[code("late")]).await;
    session
        .next_matching(|m| matches!(m, ControllerMessage::FrameDropped { .. }))
        .await;

    let sink = session.sink.clone();
    let stats = session.handle.shutdown().await.unwrap();
    assert_eq!(sink.output(), "partial\n[code] 3 chars received\n[error] X\n");
    assert_eq!(stats.runs_failed, 1);
    assert_eq!(stats.saves_triggered, 0);
    assert_eq!(session.store.create_calls(), 0);
}

#[tokio::test]
async fn test_connection_loss_fails_run_then_reconnects() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;

    session.handle.submit("todo list").await.unwrap();
    Session::intent(&mut peer).await;
    send_all(&peer, &[msg("partial")]).await;
    peer.close("reset").await;

    let lost = session
        .next_matching(|m| matches!(m, ControllerMessage::Disconnected { .. }))
        .await;
    assert_eq!(
        lost,
        ControllerMessage::Disconnected {
            reason: Some("reset".into()),
            reconnect_pending: true,
        }
    );

    let _peer = tokio::time::timeout(WAIT, session.backend.accept())
        .await
        .unwrap()
        .unwrap();
    let connected = session
        .next_matching(|m| matches!(m, ControllerMessage::Connected { .. }))
        .await;
    assert_eq!(connected, ControllerMessage::Connected { reconnected: true });

    let sink = session.sink.clone();
    let stats = session.handle.shutdown().await.unwrap();
    assert_eq!(sink.output(), "partial\n[error] connection lost: reset\n");
    assert_eq!(stats.runs_failed, 1);
    assert_eq!(stats.connection.reconnects_scheduled, 1);
    assert_eq!(stats.connection.connects, 2);
    assert_eq!(session.store.create_calls(), 0);
}

#[tokio::test]
async fn test_idle_loss_reconnects_once() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let peer = session.accept().await;

    peer.close("server restart").await;
    let _peer = session.accept().await;

    let stats = session.handle.shutdown().await.unwrap();
    assert_eq!(stats.connection.losses, 1);
    assert_eq!(stats.connection.reconnects_scheduled, 1);
    assert_eq!(session.backend.connect_attempts(), 2);
}

#[tokio::test]
async fn test_refused_connect_retries_after_delay() {
    let (transport, mut backend) = InProcessTransport::new_pair();
    backend.refuse_next(1);
    let (tx, mut messages) = mpsc::channel(64);
    let controller = SessionController::new(
        transport,
        transport_config(),
        MemorySessionStore::new(),
        &controller_config(),
        tx,
    );
    let handle = controller.spawn();

    let first = tokio::time::timeout(WAIT, messages.recv()).await.unwrap();
    assert!(matches!(
        first,
        Some(ControllerMessage::Disconnected {
            reconnect_pending: true,
            ..
        })
    ));
    let _peer = tokio::time::timeout(WAIT, backend.accept())
        .await
        .unwrap()
        .unwrap();

    let stats = handle.shutdown().await.unwrap();
    assert_eq!(stats.connection.failed_attempts, 1);
    assert_eq!(stats.connection.connects, 1);
}

// =============================================================================
// Plan-first workflow
// =============================================================================

#[tokio::test]
async fn test_plan_clarify_accept_round_trip() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;

    session
        .handle
        .send(ControllerCommand::Submit {
            prompt: "clock".into(),
            plan_first: Some(true),
        })
        .await
        .unwrap();
    assert_eq!(
        Session::intent(&mut peer).await,
        Intent::Plan {
            prompt: "clock".into()
        }
    );
    send_all(&peer, &[msg("1. draw a face"), Frame::EndOfStream]).await;
    let plan = session
        .next_matching(|m| matches!(m, ControllerMessage::PlanReady { .. }))
        .await;
    assert_eq!(
        plan,
        ControllerMessage::PlanReady {
            plan: "1. draw a face".into()
        }
    );
    assert_eq!(session.store.create_calls(), 0);

    session
        .handle
        .send(ControllerCommand::BeginClarification)
        .await
        .unwrap();
    session
        .next_matching(|m| {
            *m == ControllerMessage::State {
                state: WorkflowState::AwaitingClarification,
            }
        })
        .await;
    session
        .handle
        .send(ControllerCommand::Clarify("make it blue".into()))
        .await
        .unwrap();
    assert_eq!(
        Session::intent(&mut peer).await,
        Intent::Plan {
            prompt: "clock\n\nClarification: make it blue".into()
        }
    );
    send_all(&peer, &[msg("1. draw a blue face"), Frame::EndOfStream]).await;
    let ControllerMessage::PlanReady { plan } = session
        .next_matching(|m| matches!(m, ControllerMessage::PlanReady { .. }))
        .await
    else {
        unreachable!()
    };
    assert!(plan.contains("> Clarification: make it blue"));
    assert!(plan.ends_with("1. draw a blue face"));

    session.handle.send(ControllerCommand::AcceptPlan).await.unwrap();
    assert_eq!(
        Session::intent(&mut peer).await,
        Intent::Implement {
            prompt: "clock\n\nClarification: make it blue".into(),
            plan: plan.clone(),
        }
    );
    send_all(&peer, &[code("root = tk.Tk()"), Frame::EndOfStream]).await;
    session
        .next_matching(|m| matches!(m, ControllerMessage::SessionSaved { .. }))
        .await;

    let stats = session.handle.shutdown().await.unwrap();
    let stored = session.store.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].prompt, "clock\n\nClarification: make it blue");
    assert_eq!(stored[0].code, "root = tk.Tk()");
    assert_eq!(stats.runs_started, 1);
    assert_eq!(stats.saves_triggered, 1);
}

#[tokio::test]
async fn test_code_during_planning_is_dropped() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let mut peer = session.accept().await;

    session
        .handle
        .send(ControllerCommand::Submit {
            prompt: "calculator".into(),
            plan_first: Some(true),
        })
        .await
        .unwrap();
    Session::intent(&mut peer).await;
    send_all(&peer, &[code("x = 1"), msg("step one"), Frame::EndOfStream]).await;

    let dropped = session
        .next_matching(|m| matches!(m, ControllerMessage::FrameDropped { .. }))
        .await;
    assert_eq!(
        dropped,
        ControllerMessage::FrameDropped {
            error: "code frame not allowed during planning".into()
        }
    );
    let plan = session
        .next_matching(|m| matches!(m, ControllerMessage::PlanReady { .. }))
        .await;
    assert_eq!(
        plan,
        ControllerMessage::PlanReady {
            plan: "step one".into()
        }
    );

    let sink = session.sink.clone();
    let stats = session.handle.shutdown().await.unwrap();
    assert_eq!(sink.output(), "");
    assert_eq!(stats.protocol_errors, 1);
}

#[tokio::test]
async fn test_accept_without_plan_is_rejected() {
    let mut session = start(controller_config(), RecordingSink::default()).await;
    let _peer = session.accept().await;

    session.handle.send(ControllerCommand::AcceptPlan).await.unwrap();
    let rejected = session
        .next_matching(|m| matches!(m, ControllerMessage::Rejected { .. }))
        .await;
    assert!(matches!(
        rejected,
        ControllerMessage::Rejected {
            request: "accept",
            ..
        }
    ));
    session.handle.shutdown().await.unwrap();
}
