//! The live session manager.
//!
//! One driver task owns the transport handle, the lifecycle state machine
//! (`Idle → Connecting → AwaitingSetupAck → Ready → Closing → Closed`, with
//! an automatic reconnect path), the playback scheduler, and tool dispatch.
//! Callers hold a [`LiveSession`] and talk to the driver over a single
//! command queue, so outbound frames leave in call order. Transport reads,
//! timers, tool completions, and playback completions are all just events
//! the driver consumes from channels; no callback ever mutates session state
//! directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::audio;
use crate::playback::{AudioSegment, AudioSink, PlaybackScheduler};
use crate::tools::ToolRegistry;
use crate::types::{
    self, ClientContentMessage, FunctionResponse, RealtimeInputMessage, ServerMessage,
    ToolResponseMessage,
};
use crate::ws::WsConnector;

pub mod config;
pub mod consts;

use config::SessionConfig;
use consts::*;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

// --- Transport abstraction ---

#[derive(Debug)]
pub enum TransportCmd {
    Frame(String),
    /// Close the connection with a normal-closure code.
    Close,
}

#[derive(Debug)]
pub enum TransportEvent {
    Frame(String),
    Closed { clean: bool },
}

/// A live connection: one writer channel, one reader channel. Dropping the
/// writer tears the connection down.
pub struct TransportHandle {
    pub outbound: mpsc::Sender<TransportCmd>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

#[async_trait::async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self) -> anyhow::Result<TransportHandle>;
}

// --- Session surface ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingSetupAck,
    Ready,
    Closing,
    Closed,
}

/// Callbacks invoked from inbound-event handling. All default to no-ops.
#[derive(Clone)]
pub struct SessionCallbacks {
    pub(crate) on_message: Arc<dyn Fn(String) + Send + Sync>,
    pub(crate) on_setup_complete: Arc<dyn Fn() + Send + Sync>,
    pub(crate) on_playing_state_change: Arc<dyn Fn(bool) + Send + Sync>,
    pub(crate) on_audio_level_change: Arc<dyn Fn(f32) + Send + Sync>,
    pub(crate) on_transcription: Arc<dyn Fn(String) + Send + Sync>,
}

impl Default for SessionCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self {
            on_message: Arc::new(|_| {}),
            on_setup_complete: Arc::new(|| {}),
            on_playing_state_change: Arc::new(|_| {}),
            on_audio_level_change: Arc::new(|_| {}),
            on_transcription: Arc::new(|_| {}),
        }
    }

    pub fn on_message(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_message = Arc::new(f);
        self
    }

    pub fn on_setup_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_setup_complete = Arc::new(f);
        self
    }

    pub fn on_playing_state_change(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.on_playing_state_change = Arc::new(f);
        self
    }

    pub fn on_audio_level_change(mut self, f: impl Fn(f32) + Send + Sync + 'static) -> Self {
        self.on_audio_level_change = Arc::new(f);
        self
    }

    pub fn on_transcription(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_transcription = Arc::new(f);
        self
    }
}

enum Command {
    Connect,
    MediaChunk { data: String, mime_type: String },
    TextTurn(String),
    NewContext { subject: String },
    SupplementaryContext { subject: String, details: String },
    Interrupt,
    SwitchContext { subject: String, details: Option<String> },
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextKind {
    New,
    Supplementary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchStage {
    Subject,
    Detail,
}

struct TimerEvent {
    epoch: u64,
    kind: TimerKind,
}

enum TimerKind {
    SendSetup,
    Reconnect,
    ContextRetry {
        kind: ContextKind,
        subject: String,
        details: Option<String>,
        attempt: u32,
    },
    SwitchStage {
        stage: SwitchStage,
        subject: String,
        details: Option<String>,
    },
    SuppressionEnd,
}

/// Handle to a running session driver. Cheap to clone; all operations are
/// serialized through the driver's command queue. Dropping the last handle
/// shuts the driver down.
#[derive(Clone)]
pub struct LiveSession {
    cmd_tx: mpsc::Sender<Command>,
    instance_id: u64,
}

impl LiveSession {
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub async fn connect(&self) {
        self.send(Command::Connect).await;
    }

    /// Transmits one captured media chunk. Dropped (not queued) unless the
    /// session is Ready and no interrupt window is active.
    pub async fn send_media_chunk(&self, data: impl Into<String>, mime_type: impl Into<String>) {
        self.send(Command::MediaChunk {
            data: data.into(),
            mime_type: mime_type.into(),
        })
        .await;
    }

    /// Sends one complete text turn. Logged no-op when the session is not
    /// Ready.
    pub async fn send_text_turn(&self, text: impl Into<String>) {
        self.send(Command::TextTurn(text.into())).await;
    }

    /// Tells the peer to discard prior context and focus on a new subject.
    /// Retries with exponential backoff while the session is not Ready;
    /// best-effort after the attempt budget is spent.
    pub async fn send_new_context(&self, subject: impl Into<String>) {
        self.send(Command::NewContext {
            subject: subject.into(),
        })
        .await;
    }

    /// Sends supplementary material for the current subject, with the same
    /// retry policy as [`send_new_context`](Self::send_new_context).
    pub async fn send_supplementary_context(
        &self,
        subject: impl Into<String>,
        details: impl Into<String>,
    ) {
        self.send(Command::SupplementaryContext {
            subject: subject.into(),
            details: details.into(),
        })
        .await;
    }

    /// Content-level interrupt: stops local playback at once, discards
    /// inbound audio for a short window, and asks the peer to stop. Safe in
    /// any state.
    pub async fn interrupt(&self) {
        self.send(Command::Interrupt).await;
    }

    /// Interrupt plus a staged sequence of context directives.
    pub async fn switch_context(&self, subject: impl Into<String>, details: Option<String>) {
        self.send(Command::SwitchContext {
            subject: subject.into(),
            details,
        })
        .await;
    }

    /// Terminal for the current connection: closes cleanly, clears queues,
    /// cancels every scheduled retry. `connect()` may be called again later.
    pub async fn disconnect(&self) {
        self.send(Command::Disconnect).await;
    }

    async fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).await.is_err() {
            tracing::warn!(session = self.instance_id, "session driver gone; command dropped");
        }
    }
}

/// Spawns a session driver with an explicit connector (tests inject a mock
/// here) and returns the caller handle.
pub fn spawn(
    config: SessionConfig,
    registry: Arc<ToolRegistry>,
    callbacks: SessionCallbacks,
    connector: Arc<dyn Connect>,
    sink: Box<dyn AudioSink>,
) -> LiveSession {
    let instance_id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (timer_tx, timer_rx) = mpsc::channel(TIMER_QUEUE_CAPACITY);
    let (tool_tx, tool_rx) = mpsc::channel(TOOL_RESULT_QUEUE_CAPACITY);
    let (done_tx, done_rx) = mpsc::channel(PLAYBACK_DONE_QUEUE_CAPACITY);

    let playback = PlaybackScheduler::new(
        sink,
        done_tx,
        callbacks.on_audio_level_change.clone(),
        callbacks.on_playing_state_change.clone(),
    );
    let driver = SessionDriver {
        id: instance_id,
        state: SessionState::Idle,
        config,
        registry,
        callbacks,
        connector,
        outbound: None,
        setup_acked: false,
        setup_signalled: false,
        suppress_audio: false,
        pending_audio_chunks: 0,
        audio_rate: None,
        epoch: 0,
        playback,
        timer_tx,
        tool_tx,
    };
    tokio::spawn(driver.run(cmd_rx, timer_rx, tool_rx, done_rx));
    LiveSession {
        cmd_tx,
        instance_id,
    }
}

/// Connects over a real WebSocket using the config's endpoint URL.
pub async fn connect(
    config: SessionConfig,
    registry: Arc<ToolRegistry>,
    callbacks: SessionCallbacks,
    sink: Box<dyn AudioSink>,
) -> LiveSession {
    let connector = Arc::new(WsConnector::new(config.ws_url()));
    let session = spawn(config, registry, callbacks, connector, sink);
    session.connect().await;
    session
}

// --- Driver ---

struct SessionDriver {
    id: u64,
    state: SessionState,
    config: SessionConfig,
    registry: Arc<ToolRegistry>,
    callbacks: SessionCallbacks,
    connector: Arc<dyn Connect>,
    outbound: Option<mpsc::Sender<TransportCmd>>,
    /// Application-level handshake flag, distinct from the transport being
    /// open.
    setup_acked: bool,
    /// Ensures `on_setup_complete` fires once per connection, even if the
    /// ack arrives more than once or Ready was forced first.
    setup_signalled: bool,
    /// While set, inbound audio is discarded and media chunks are not sent.
    suppress_audio: bool,
    pending_audio_chunks: u32,
    /// Playback rate, fixed from the first inbound audio frame of the
    /// connection.
    audio_rate: Option<u32>,
    /// Scheduled-task guard: bumped on disconnect so stale timers never fire.
    epoch: u64,
    playback: PlaybackScheduler,
    timer_tx: mpsc::Sender<TimerEvent>,
    tool_tx: mpsc::Sender<FunctionResponse>,
}

async fn transport_recv(
    inbound: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SessionDriver {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut timer_rx: mpsc::Receiver<TimerEvent>,
        mut tool_rx: mpsc::Receiver<FunctionResponse>,
        mut done_rx: mpsc::Receiver<u64>,
    ) {
        let mut inbound: Option<mpsc::Receiver<TransportEvent>> = None;
        tracing::debug!(session = self.id, "session driver started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd, &mut inbound).await,
                    None => {
                        // Last handle dropped; tear down and stop.
                        self.shutdown(&mut inbound).await;
                        break;
                    }
                },
                ev = transport_recv(&mut inbound) => match ev {
                    Some(TransportEvent::Frame(text)) => self.handle_frame(&text).await,
                    Some(TransportEvent::Closed { clean }) => {
                        inbound = None;
                        self.on_transport_closed(clean);
                    }
                    None => {
                        inbound = None;
                        self.on_transport_closed(false);
                    }
                },
                Some(timer) = timer_rx.recv() => self.handle_timer(timer, &mut inbound).await,
                Some(response) = tool_rx.recv() => self.send_tool_response(response).await,
                Some(generation) = done_rx.recv() => self.playback.on_segment_done(generation),
            }
        }
        tracing::debug!(session = self.id, "session driver stopped");
    }

    async fn handle_command(
        &mut self,
        cmd: Command,
        inbound: &mut Option<mpsc::Receiver<TransportEvent>>,
    ) {
        match cmd {
            Command::Connect => self.start_connect(inbound).await,
            Command::MediaChunk { data, mime_type } => {
                self.send_media_chunk(data, mime_type).await
            }
            Command::TextTurn(text) => self.send_text_turn(text).await,
            Command::NewContext { subject } => {
                self.send_context(ContextKind::New, subject, None, 0).await
            }
            Command::SupplementaryContext { subject, details } => {
                self.send_context(ContextKind::Supplementary, subject, Some(details), 0)
                    .await
            }
            Command::Interrupt => self.interrupt().await,
            Command::SwitchContext { subject, details } => {
                self.switch_context(subject, details).await
            }
            Command::Disconnect => self.shutdown(inbound).await,
        }
    }

    async fn start_connect(&mut self, inbound: &mut Option<mpsc::Receiver<TransportEvent>>) {
        // Liveness is judged from the handle itself, not a separate flag
        // that could diverge from it.
        if self.outbound.is_some()
            && matches!(
                self.state,
                SessionState::Connecting | SessionState::AwaitingSetupAck | SessionState::Ready
            )
        {
            tracing::debug!(session = self.id, state = ?self.state, "connect ignored; connection already live");
            return;
        }

        self.state = SessionState::Connecting;
        self.setup_acked = false;
        self.setup_signalled = false;
        self.audio_rate = None;
        tracing::info!(session = self.id, "opening transport");
        match self.connector.connect().await {
            Ok(handle) => {
                self.outbound = Some(handle.outbound);
                *inbound = Some(handle.inbound);
                // The endpoint drops frames sent straight after the open.
                self.schedule(TimerKind::SendSetup, SETUP_SEND_DELAY);
            }
            Err(e) => {
                tracing::error!(session = self.id, error = %e, "transport open failed; reconnect scheduled");
                self.state = SessionState::Idle;
                self.schedule(TimerKind::Reconnect, RECONNECT_DELAY);
            }
        }
    }

    async fn handle_timer(
        &mut self,
        timer: TimerEvent,
        inbound: &mut Option<mpsc::Receiver<TransportEvent>>,
    ) {
        if timer.epoch != self.epoch {
            tracing::trace!(session = self.id, "stale timer discarded");
            return;
        }
        match timer.kind {
            TimerKind::SendSetup => self.send_setup().await,
            TimerKind::Reconnect => {
                if self.outbound.is_none() && self.state == SessionState::Idle {
                    tracing::info!(session = self.id, "reconnecting");
                    self.start_connect(inbound).await;
                }
            }
            TimerKind::ContextRetry {
                kind,
                subject,
                details,
                attempt,
            } => self.send_context(kind, subject, details, attempt).await,
            TimerKind::SwitchStage {
                stage,
                subject,
                details,
            } => self.fire_switch_stage(stage, subject, details).await,
            TimerKind::SuppressionEnd => {
                self.suppress_audio = false;
            }
        }
    }

    async fn send_setup(&mut self) {
        if self.outbound.is_none() || self.state != SessionState::Connecting {
            tracing::debug!(session = self.id, state = ?self.state, "setup send skipped");
            return;
        }
        let frame = types::SetupMessage {
            setup: types::Setup {
                model: self.config.model.clone(),
                generation_config: types::GenerationConfig {
                    response_modalities: self.config.response_modality.as_wire(),
                },
                system_instruction: types::SystemInstruction {
                    parts: self
                        .config
                        .system_instruction
                        .iter()
                        .cloned()
                        .map(types::Part::text)
                        .collect(),
                },
                tools: if self.registry.is_empty() {
                    None
                } else {
                    Some(types::ToolConfig {
                        function_declarations: self.registry.declarations(),
                    })
                },
            },
        };
        if self.send_json(&frame).await {
            self.state = SessionState::AwaitingSetupAck;
            tracing::info!(session = self.id, model = %self.config.model, "setup frame sent");
            // The original client sends its opening turn without waiting for
            // the ack; the endpoint buffers it.
            if let Some(greeting) = self.config.greeting.clone() {
                self.send_json(&ClientContentMessage::single_turn(greeting))
                    .await;
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) {
        let msg: ServerMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                // One malformed frame must not end the session.
                tracing::error!(session = self.id, error = %e, "malformed inbound frame dropped");
                return;
            }
        };

        if msg.is_setup_ack() {
            // Handled even when Ready was already forced, so a late ack
            // still delivers the one-shot callback.
            self.setup_acked = true;
            if matches!(
                self.state,
                SessionState::Connecting | SessionState::AwaitingSetupAck
            ) {
                self.state = SessionState::Ready;
            }
            tracing::info!(session = self.id, "setup acknowledged");
            if !self.setup_signalled {
                self.setup_signalled = true;
                (self.callbacks.on_setup_complete)();
            }
        }

        if let Some(tool_call) = msg.tool_call {
            for call in tool_call.function_calls {
                self.dispatch_tool(call);
            }
        }

        if let Some(content) = msg.server_content {
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(text) = part.text {
                        (self.callbacks.on_message)(text);
                    }
                    if let Some(blob) = part.inline_data {
                        self.handle_inline_audio(blob);
                    }
                }
            }
            if let Some(transcription) = content.output_transcription {
                (self.callbacks.on_transcription)(transcription.text);
            }
            if content.turn_complete == Some(true) {
                tracing::debug!(
                    session = self.id,
                    audio_chunks = self.pending_audio_chunks,
                    "model turn complete"
                );
                self.pending_audio_chunks = 0;
            }
        }
    }

    fn handle_inline_audio(&mut self, blob: types::ServerBlob) {
        if !blob.mime_type.starts_with("audio/pcm") {
            tracing::debug!(session = self.id, mime = %blob.mime_type, "unexpected inline data ignored");
            return;
        }
        if self.suppress_audio {
            tracing::trace!(session = self.id, "stale inbound audio dropped during interrupt window");
            return;
        }
        let rate = *self.audio_rate.get_or_insert_with(|| {
            types::pcm_sample_rate(&blob.mime_type).unwrap_or(audio::DEFAULT_OUTPUT_SAMPLE_RATE)
        });
        let samples = audio::decode_f32(&blob.data);
        if samples.is_empty() {
            return;
        }
        self.pending_audio_chunks += 1;
        self.playback.enqueue(AudioSegment {
            samples,
            sample_rate: rate,
        });
    }

    fn dispatch_tool(&self, call: types::FunctionCall) {
        tracing::debug!(session = self.id, tool = %call.name, call_id = %call.id, "tool invocation");
        let registry = self.registry.clone();
        let tool_tx = self.tool_tx.clone();
        let session = self.id;
        // Handlers may complete out of order; the response carries its own
        // correlation id.
        tokio::spawn(async move {
            let response = registry.dispatch(call).await;
            if tool_tx.send(response).await.is_err() {
                tracing::warn!(session, "driver gone before tool result could be delivered");
            }
        });
    }

    async fn send_tool_response(&mut self, response: FunctionResponse) {
        tracing::debug!(session = self.id, tool = %response.name, call_id = %response.id, "sending tool response");
        let frame = ToolResponseMessage::single(response);
        if !self.send_json(&frame).await {
            tracing::warn!(session = self.id, "tool response dropped; transport not open");
        }
    }

    async fn send_media_chunk(&mut self, data: String, mime_type: String) {
        if self.state != SessionState::Ready {
            tracing::trace!(session = self.id, state = ?self.state, "media chunk dropped; session not ready");
            return;
        }
        if self.suppress_audio {
            tracing::trace!(session = self.id, "media chunk dropped during interrupt window");
            return;
        }
        self.send_json(&RealtimeInputMessage::single(mime_type, data))
            .await;
    }

    async fn send_text_turn(&mut self, text: String) {
        if self.state != SessionState::Ready {
            tracing::warn!(session = self.id, state = ?self.state, "text turn dropped; session not ready");
            return;
        }
        self.send_json(&ClientContentMessage::single_turn(text))
            .await;
    }

    async fn send_context(
        &mut self,
        kind: ContextKind,
        subject: String,
        details: Option<String>,
        attempt: u32,
    ) {
        // Known race: the ack can be lost even though the transport is fine.
        // After a couple of retries with the socket open, prefer forcing
        // Ready over wedging the session forever.
        if self.outbound.is_some() && !self.setup_acked && attempt >= FORCE_READY_AFTER_RETRIES {
            tracing::warn!(
                session = self.id,
                attempt,
                "setup ack never observed; forcing session to Ready"
            );
            self.setup_acked = true;
            self.state = SessionState::Ready;
        }

        if self.state != SessionState::Ready || self.outbound.is_none() {
            if attempt < CONTEXT_RETRY_MAX_ATTEMPTS {
                let delay = context_retry_delay(attempt);
                tracing::debug!(
                    session = self.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "session not ready; context send will retry"
                );
                self.schedule(
                    TimerKind::ContextRetry {
                        kind,
                        subject,
                        details,
                        attempt: attempt + 1,
                    },
                    delay,
                );
            } else {
                // Context refresh is best-effort; give up loudly.
                tracing::error!(
                    session = self.id,
                    attempts = CONTEXT_RETRY_MAX_ATTEMPTS,
                    "context send abandoned; session never became ready"
                );
            }
            return;
        }

        let text = match kind {
            ContextKind::New => new_context_text(&subject),
            ContextKind::Supplementary => {
                supplementary_context_text(&subject, details.as_deref().unwrap_or(""))
            }
        };
        self.send_json(&ClientContentMessage::single_turn(text))
            .await;
    }

    async fn interrupt(&mut self) {
        tracing::info!(session = self.id, "interrupt");
        self.playback.interrupt();
        self.suppress_audio = true;
        self.schedule(TimerKind::SuppressionEnd, INTERRUPT_SUPPRESS_WINDOW);
        if self.state == SessionState::Ready && self.outbound.is_some() {
            self.send_json(&ClientContentMessage::single_turn(STOP_DIRECTIVE))
                .await;
        } else {
            tracing::debug!(session = self.id, state = ?self.state, "local-only interrupt; session not ready");
        }
    }

    async fn switch_context(&mut self, subject: String, details: Option<String>) {
        // Stop first; the subject and detail directives follow on a stagger
        // so the peer does not interleave stale and fresh instructions.
        self.interrupt().await;
        self.schedule(
            TimerKind::SwitchStage {
                stage: SwitchStage::Subject,
                subject: subject.clone(),
                details: None,
            },
            SWITCH_STAGE_SUBJECT_DELAY,
        );
        if details.is_some() {
            self.schedule(
                TimerKind::SwitchStage {
                    stage: SwitchStage::Detail,
                    subject,
                    details,
                },
                SWITCH_STAGE_DETAIL_DELAY,
            );
        }
    }

    async fn fire_switch_stage(
        &mut self,
        stage: SwitchStage,
        subject: String,
        details: Option<String>,
    ) {
        // The session may have been torn down between scheduling and firing.
        if self.state != SessionState::Ready || self.outbound.is_none() {
            tracing::debug!(session = self.id, ?stage, "switch stage skipped; transport gone");
            return;
        }
        let text = match stage {
            SwitchStage::Subject => new_context_text(&subject),
            SwitchStage::Detail => {
                supplementary_context_text(&subject, details.as_deref().unwrap_or(""))
            }
        };
        self.send_json(&ClientContentMessage::single_turn(text))
            .await;
    }

    async fn shutdown(&mut self, inbound: &mut Option<mpsc::Receiver<TransportEvent>>) {
        tracing::info!(session = self.id, "disconnecting");
        self.state = SessionState::Closing;
        // Invalidate every scheduled retry, stage, and suppression timer.
        self.epoch += 1;
        self.playback.interrupt();
        self.suppress_audio = false;
        self.setup_acked = false;
        self.setup_signalled = false;
        self.audio_rate = None;
        self.pending_audio_chunks = 0;
        if let Some(tx) = self.outbound.take() {
            let _ = tx.send(TransportCmd::Close).await;
        }
        *inbound = None;
        self.state = SessionState::Closed;
    }

    fn on_transport_closed(&mut self, clean: bool) {
        self.outbound = None;
        match self.state {
            SessionState::Closing | SessionState::Closed => {
                self.state = SessionState::Closed;
            }
            _ if clean => {
                tracing::info!(session = self.id, "transport closed cleanly by peer");
                self.setup_acked = false;
                self.state = SessionState::Idle;
            }
            _ => {
                tracing::warn!(
                    session = self.id,
                    delay_ms = RECONNECT_DELAY.as_millis() as u64,
                    "transport closed unexpectedly; reconnect scheduled"
                );
                self.setup_acked = false;
                self.setup_signalled = false;
                self.state = SessionState::Idle;
                self.schedule(TimerKind::Reconnect, RECONNECT_DELAY);
            }
        }
    }

    async fn send_json<T: Serialize>(&mut self, frame: &T) -> bool {
        let Some(tx) = self.outbound.clone() else {
            return false;
        };
        match serde_json::to_string(frame) {
            Ok(text) => {
                if tx.send(TransportCmd::Frame(text)).await.is_ok() {
                    true
                } else {
                    tracing::warn!(session = self.id, "transport writer gone; frame dropped");
                    self.outbound = None;
                    false
                }
            }
            Err(e) => {
                tracing::error!(session = self.id, error = %e, "failed to serialize outbound frame");
                false
            }
        }
    }

    fn schedule(&self, kind: TimerKind, delay: Duration) {
        let tx = self.timer_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerEvent { epoch, kind }).await;
        });
    }
}

fn context_retry_delay(attempt: u32) -> Duration {
    CONTEXT_RETRY_BASE_DELAY
        .saturating_mul(1u32 << attempt.min(4))
        .min(CONTEXT_RETRY_MAX_DELAY)
}

fn new_context_text(subject: &str) -> String {
    format!(
        "IMPORTANT: Forget any previous subject. A new subject has been selected:\n\n{subject}"
    )
}

fn supplementary_context_text(subject: &str, details: &str) -> String {
    format!("Supplementary material for \"{subject}\":\n\n{details}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    struct Remote {
        out_rx: mpsc::Receiver<TransportCmd>,
        in_tx: mpsc::Sender<TransportEvent>,
    }

    impl Remote {
        async fn inject(&self, json: &str) {
            self.in_tx
                .send(TransportEvent::Frame(json.to_string()))
                .await
                .expect("driver inbound closed");
        }

        async fn close(&self, clean: bool) {
            self.in_tx
                .send(TransportEvent::Closed { clean })
                .await
                .expect("driver inbound closed");
        }

        async fn next_cmd(&mut self) -> TransportCmd {
            tokio::time::timeout(Duration::from_secs(30), self.out_rx.recv())
                .await
                .expect("timed out waiting for transport write")
                .expect("transport channel closed")
        }

        async fn next_frame(&mut self) -> serde_json::Value {
            match self.next_cmd().await {
                TransportCmd::Frame(text) => serde_json::from_str(&text).unwrap(),
                other => panic!("expected frame, got {other:?}"),
            }
        }

        fn assert_no_pending_frames(&mut self) {
            if let Ok(cmd) = self.out_rx.try_recv() {
                panic!("unexpected transport write: {cmd:?}");
            }
        }
    }

    fn transport_pair() -> (TransportHandle, Remote) {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        (
            TransportHandle {
                outbound: out_tx,
                inbound: in_rx,
            },
            Remote { out_rx, in_tx },
        )
    }

    struct MockConnector {
        connects: Arc<AtomicUsize>,
        supply: tokio::sync::Mutex<VecDeque<TransportHandle>>,
    }

    impl MockConnector {
        fn with_handles(handles: Vec<TransportHandle>) -> (Arc<Self>, Arc<AtomicUsize>) {
            let connects = Arc::new(AtomicUsize::new(0));
            (
                Arc::new(Self {
                    connects: connects.clone(),
                    supply: tokio::sync::Mutex::new(handles.into()),
                }),
                connects,
            )
        }
    }

    #[async_trait::async_trait]
    impl Connect for MockConnector {
        async fn connect(&self) -> anyhow::Result<TransportHandle> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.supply
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no transport available"))
        }
    }

    /// Sink that records starts and never completes on its own.
    struct CountingSink {
        plays: Arc<AtomicUsize>,
        pending: Arc<Mutex<Vec<oneshot::Sender<()>>>>,
    }

    impl CountingSink {
        fn new() -> (Box<Self>, Arc<AtomicUsize>) {
            let plays = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    plays: plays.clone(),
                    pending: Arc::new(Mutex::new(Vec::new())),
                }),
                plays,
            )
        }
    }

    impl AudioSink for CountingSink {
        fn play(&mut self, _samples: Vec<f32>, _sample_rate: u32, done: oneshot::Sender<()>) {
            self.plays.fetch_add(1, Ordering::SeqCst);
            self.pending.lock().unwrap().push(done);
        }

        fn stop(&mut self) {
            self.pending.lock().unwrap().clear();
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig::new("test-key").with_instruction(vec!["You are a test peer.".into()])
    }

    struct TestBed {
        session: LiveSession,
        remote: Remote,
        connects: Arc<AtomicUsize>,
        messages: Arc<Mutex<Vec<String>>>,
        plays: Arc<AtomicUsize>,
        setup_events: Arc<AtomicUsize>,
    }

    async fn connected_bed(registry: ToolRegistry, extra_handles: Vec<TransportHandle>) -> TestBed {
        let (handle, remote) = transport_pair();
        let mut handles = vec![handle];
        handles.extend(extra_handles);
        let (connector, connects) = MockConnector::with_handles(handles);
        let (sink, plays) = CountingSink::new();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let messages_clone = messages.clone();
        let setup_events = Arc::new(AtomicUsize::new(0));
        let setup_events_clone = setup_events.clone();
        let callbacks = SessionCallbacks::new()
            .on_message(move |text| messages_clone.lock().unwrap().push(text))
            .on_setup_complete(move || {
                setup_events_clone.fetch_add(1, Ordering::SeqCst);
            });
        let session = spawn(test_config(), Arc::new(registry), callbacks, connector, sink);
        session.connect().await;
        TestBed {
            session,
            remote,
            connects,
            messages,
            plays,
            setup_events,
        }
    }

    /// Drives the bed through setup-send and ack, consuming the setup frame.
    async fn ready_bed(registry: ToolRegistry, extra_handles: Vec<TransportHandle>) -> TestBed {
        let mut bed = connected_bed(registry, extra_handles).await;
        let setup = bed.remote.next_frame().await;
        assert!(setup.get("setup").is_some());
        bed.remote.inject(r#"{"setupComplete": true}"#).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bed.setup_events.load(Ordering::SeqCst), 1);
        bed
    }

    fn audio_frame_json(samples: &[f32]) -> String {
        format!(
            r#"{{"serverContent": {{"modelTurn": {{"parts": [{{"inlineData": {{"mimeType": "audio/pcm;rate=24000", "data": "{}"}}}}]}}}}}}"#,
            crate::audio::encode_f32(samples)
        )
    }

    #[tokio::test(start_paused = true)]
    async fn media_chunks_before_ready_are_never_transmitted() {
        let mut bed = connected_bed(ToolRegistry::new(), vec![]).await;

        bed.session.send_media_chunk("AAAA", "audio/pcm").await;
        let setup = bed.remote.next_frame().await;
        assert!(setup.get("setup").is_some());

        // Still AwaitingSetupAck; chunks must be dropped, not queued.
        bed.session.send_media_chunk("BBBB", "audio/pcm").await;
        bed.session.send_media_chunk("CCCC", "image/jpeg").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        bed.remote.assert_no_pending_frames();
    }

    #[tokio::test(start_paused = true)]
    async fn text_turn_after_ack_produces_one_client_content_frame() {
        let mut bed = ready_bed(ToolRegistry::new(), vec![]).await;

        bed.session.send_text_turn("hello").await;
        let frame = bed.remote.next_frame().await;
        assert_eq!(
            frame["clientContent"]["turns"][0]["parts"][0]["text"],
            serde_json::json!("hello")
        );
        assert_eq!(
            frame["clientContent"]["turnComplete"],
            serde_json::json!(true)
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        bed.remote.assert_no_pending_frames();
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_connect_creates_exactly_one_transport() {
        let (spare, _spare_remote) = transport_pair();
        let bed = connected_bed(ToolRegistry::new(), vec![spare]).await;

        bed.session.connect().await;
        bed.session.connect().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(bed.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_without_caller_action() {
        let (spare, mut spare_remote) = transport_pair();
        let bed = ready_bed(ToolRegistry::new(), vec![spare]).await;

        bed.remote.close(false).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(bed.connects.load(Ordering::SeqCst), 2);

        // The new connection performs a fresh handshake.
        let setup = spare_remote.next_frame().await;
        assert!(setup.get("setup").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn clean_disconnect_closes_and_never_reconnects() {
        let (spare, _spare_remote) = transport_pair();
        let mut bed = ready_bed(ToolRegistry::new(), vec![spare]).await;

        bed.session.disconnect().await;
        match bed.remote.next_cmd().await {
            TransportCmd::Close => {}
            other => panic!("expected close, got {other:?}"),
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(bed.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tool_call_is_answered_with_error_result() {
        let mut bed = ready_bed(ToolRegistry::new(), vec![]).await;

        bed.remote
            .inject(
                r#"{"toolCall": {"functionCalls": [{"id": "x1", "name": "unknownTool", "args": {}}]}}"#,
            )
            .await;
        let frame = bed.remote.next_frame().await;
        let response = &frame["toolResponse"]["functionResponses"][0];
        assert_eq!(response["id"], serde_json::json!("x1"));
        assert_eq!(response["name"], serde_json::json!("unknownTool"));
        assert!(response["response"]["error"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tool_handler_is_contained() {
        let mut registry = ToolRegistry::new();
        registry.register(
            types::FunctionDeclaration {
                name: "broken".into(),
                description: "always fails".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            |_args| async move { anyhow::bail!("boom") },
        );
        let mut bed = ready_bed(registry, vec![]).await;

        bed.remote
            .inject(r#"{"toolCall": {"functionCalls": [{"id": "c2", "name": "broken", "args": {}}]}}"#)
            .await;
        let frame = bed.remote.next_frame().await;
        let response = &frame["toolResponse"]["functionResponses"][0];
        assert_eq!(response["id"], serde_json::json!("c2"));
        assert_eq!(response["response"]["error"], serde_json::json!("boom"));

        // The session keeps processing content afterwards.
        bed.remote
            .inject(r#"{"serverContent": {"modelTurn": {"parts": [{"text": "still here"}]}}}"#)
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*bed.messages.lock().unwrap(), vec!["still here"]);
    }

    #[tokio::test(start_paused = true)]
    async fn context_send_retries_then_forces_ready() {
        let mut bed = connected_bed(ToolRegistry::new(), vec![]).await;
        let setup = bed.remote.next_frame().await;
        assert!(setup.get("setup").is_some());

        // No ack ever arrives. Attempt 0 and 1 back off; attempt 2 forces
        // Ready because the transport is demonstrably open.
        bed.session.send_new_context("Two Sum").await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let frame = bed.remote.next_frame().await;
        let text = frame["clientContent"]["turns"][0]["parts"][0]["text"]
            .as_str()
            .unwrap();
        assert!(text.contains("Two Sum"));
        assert!(text.contains("Forget any previous subject"));

        // Forced-Ready means ordinary sends now work too.
        bed.session.send_text_turn("follow-up").await;
        let frame = bed.remote.next_frame().await;
        assert_eq!(
            frame["clientContent"]["turns"][0]["parts"][0]["text"],
            serde_json::json!("follow-up")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_ack_after_forced_ready_still_signals_setup() {
        let mut bed = connected_bed(ToolRegistry::new(), vec![]).await;
        let setup = bed.remote.next_frame().await;
        assert!(setup.get("setup").is_some());

        // Force Ready through the context retry path; no ack has arrived.
        bed.session.send_new_context("Two Sum").await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let frame = bed.remote.next_frame().await;
        assert!(
            frame["clientContent"]["turns"][0]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .contains("Two Sum")
        );
        assert_eq!(bed.setup_events.load(Ordering::SeqCst), 0);

        // The genuine ack lands afterwards; the one-shot callback still
        // fires for this connection.
        bed.remote.inject(r#"{"setupComplete": true}"#).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bed.setup_events.load(Ordering::SeqCst), 1);

        // Repeated acks stay silent.
        bed.remote.inject(r#"{"setupComplete": {}}"#).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bed.setup_events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_discards_stale_inbound_audio_for_a_window() {
        let mut bed = ready_bed(ToolRegistry::new(), vec![]).await;

        bed.remote.inject(&audio_frame_json(&[0.4; 480])).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(bed.plays.load(Ordering::SeqCst), 1);

        bed.session.interrupt().await;
        // The stop directive goes out on the wire.
        let frame = bed.remote.next_frame().await;
        assert!(
            frame["clientContent"]["turns"][0]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .contains("Stop")
        );

        // Audio arriving inside the suppression window is discarded.
        bed.remote.inject(&audio_frame_json(&[0.4; 480])).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(bed.plays.load(Ordering::SeqCst), 1);

        // After the window, playback resumes.
        tokio::time::sleep(Duration::from_secs(1)).await;
        bed.remote.inject(&audio_frame_json(&[0.4; 480])).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(bed.plays.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_context_sends_staged_directives_in_order() {
        let mut bed = ready_bed(ToolRegistry::new(), vec![]).await;

        bed.session
            .switch_context("Valid Parentheses", Some("Use a stack.".into()))
            .await;

        let stop = bed.remote.next_frame().await;
        assert!(
            stop["clientContent"]["turns"][0]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .contains("Stop")
        );

        let subject = bed.remote.next_frame().await;
        assert!(
            subject["clientContent"]["turns"][0]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .contains("Valid Parentheses")
        );

        let detail = bed.remote.next_frame().await;
        assert!(
            detail["clientContent"]["turns"][0]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .contains("Use a stack.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_does_not_end_the_session() {
        let mut bed = ready_bed(ToolRegistry::new(), vec![]).await;

        bed.remote.inject("this is not json").await;
        bed.remote
            .inject(r#"{"serverContent": {"modelTurn": {"parts": [{"text": "survived"}]}}}"#)
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*bed.messages.lock().unwrap(), vec!["survived"]);

        bed.session.send_text_turn("still working").await;
        let frame = bed.remote.next_frame().await;
        assert_eq!(
            frame["clientContent"]["turns"][0]["parts"][0]["text"],
            serde_json::json!("still working")
        );
    }
}
