//! # WebSocket Streaming Endpoint
//!
//! Real-time speech-to-text over `GET /asr`. One connection is one streaming
//! session; there is no session id on the wire and no resume.
//!
//! ## WebSocket Protocol:
//! - **Client → Server**: binary frames of 16-bit little-endian PCM, 16 kHz, mono,
//!   any chunk size
//! - **Client → Server**: the text frame `DONE` ends the current utterance
//! - **Server → Client**: `{"type": "partial", "text": ...}` every time enough new
//!   audio has arrived
//! - **Server → Client**: `{"type": "final", "text", "language", "segments", "engine"}`
//!   once per utterance, or `{"type": "final", "error": ...}` when both engines failed
//!
//! Any other text frame is ignored. A failed utterance does not close the
//! connection; only the client (or a heartbeat timeout) does.
//!
//! ## Structure:
//! - [`AsrConnection`]: transport-free protocol logic (session + decode pipeline)
//! - [`AsrWebSocket`]: the actix actor that owns one `AsrConnection`

use crate::audio::pipeline::DecodePipeline;
use crate::audio::session::{SessionOutput, StreamingPolicy, StreamingSession};
use crate::error::AppError;
use crate::state::AppState;
use crate::transcription::engine::{EngineTag, Segment, TranscriptResult};
use crate::transcription::fallback::FallbackOrchestrator;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use futures_util::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Exact text payload that closes an utterance.
pub const END_OF_UTTERANCE: &str = "DONE";

/// Outbound JSON messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Partial { text: String },
    Final(FinalMessage),
}

/// Body of a `final` message: a transcript, or the reason there is none.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FinalMessage {
    Transcript {
        text: String,
        language: String,
        segments: Vec<Segment>,
        engine: EngineTag,
    },
    Failed {
        error: String,
    },
}

impl From<TranscriptResult> for FinalMessage {
    fn from(result: TranscriptResult) -> Self {
        FinalMessage::Transcript {
            text: result.text,
            language: result.language,
            segments: result.segments,
            engine: result.engine,
        }
    }
}

impl From<SessionOutput> for ServerMessage {
    fn from(output: SessionOutput) -> Self {
        match output {
            SessionOutput::Partial { result, .. } => ServerMessage::Partial { text: result.text },
            SessionOutput::Final { result: Ok(result), .. } => ServerMessage::Final(result.into()),
            SessionOutput::Final { result: Err(e), .. } => {
                ServerMessage::Final(FinalMessage::Failed { error: e.to_string() })
            }
        }
    }
}

/// Protocol logic for one connection, independent of the transport.
///
/// ## Flow:
/// 1. Binary frames feed the session; a due partial goes to the pipeline
/// 2. `DONE` moves the buffered utterance into a final request
/// 3. Pipeline outputs come back on the receiver returned by [`AsrConnection::open`]
///    and must pass [`AsrConnection::admit`] before they are sent
pub struct AsrConnection {
    session: StreamingSession,
    pipeline: DecodePipeline,
}

impl AsrConnection {
    /// Open a session and start its decode pipeline. Must run inside a tokio runtime.
    pub fn open(
        orchestrator: Arc<FallbackOrchestrator>,
        policy: StreamingPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SessionOutput>) {
        let session = StreamingSession::new(policy);
        let (outputs, receiver) = mpsc::unbounded_channel();
        let pipeline = DecodePipeline::spawn(session.id(), orchestrator, outputs);
        (Self { session, pipeline }, receiver)
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub fn session(&self) -> &StreamingSession {
        &self.session
    }

    /// Binary frame of PCM audio.
    pub fn on_audio(&mut self, chunk: &[u8]) {
        if let Some(request) = self.session.on_audio_chunk(chunk) {
            trace!(
                "Session {}: partial due at {} buffered bytes",
                self.session.id(),
                self.session.buffered_bytes()
            );
            if !self.pipeline.submit(request) {
                warn!("Session {}: decode pipeline is gone, partial dropped", self.session.id());
            }
        }
    }

    /// Text frame. Returns false when the payload is not the end-of-utterance signal.
    pub fn on_text(&mut self, text: &str) -> bool {
        if text != END_OF_UTTERANCE {
            return false;
        }

        match self.session.on_end_of_utterance() {
            Some(request) => {
                debug!(
                    "Session {}: utterance {} finalizing",
                    self.session.id(),
                    request.utterance()
                );
                if !self.pipeline.submit(request) {
                    error!("Session {}: decode pipeline is gone, final dropped", self.session.id());
                }
            }
            None => debug!("Session {}: end of utterance with empty buffer", self.session.id()),
        }
        true
    }

    /// Whether a pipeline output may still be sent.
    pub fn admit(&mut self, output: &SessionOutput) -> bool {
        self.session.admit(output)
    }

    /// Disconnect: nothing is delivered any more and the pipeline stops.
    pub fn close(&mut self) {
        self.session.on_disconnect();
        self.pipeline.shutdown();
    }
}

/// A decode result coming back from the pipeline.
#[derive(Message)]
#[rtype(result = "()")]
struct DeliverOutput(SessionOutput);

/// WebSocket actor for one streaming session.
///
/// ## Actor Model:
/// Frames arrive through `StreamHandler`, decode results through
/// `Handler<DeliverOutput>`. Both run on the actor's own context, so the session
/// is never touched from two places at once.
pub struct AsrWebSocket {
    connection: AsrConnection,
    outputs: Option<mpsc::UnboundedReceiver<SessionOutput>>,
    app_state: web::Data<AppState>,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

impl AsrWebSocket {
    pub fn new(
        connection: AsrConnection,
        outputs: mpsc::UnboundedReceiver<SessionOutput>,
        app_state: web::Data<AppState>,
    ) -> Self {
        let streaming = &app_state.config.streaming;
        let heartbeat_interval = Duration::from_secs(streaming.heartbeat_interval_secs);
        let client_timeout = Duration::from_secs(streaming.client_timeout_secs);

        Self {
            connection,
            outputs: Some(outputs),
            app_state,
            heartbeat_interval,
            client_timeout,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Session {}: failed to encode message: {}", self.connection.session_id(), e),
        }
    }
}

impl Actor for AsrWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Session {} opened", self.connection.session_id());

        if let Some(outputs) = self.outputs.take() {
            ctx.add_message_stream(UnboundedReceiverStream::new(outputs).map(DeliverOutput));
        }

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!("Session {}: heartbeat timeout, closing connection", act.connection.session_id());
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.connection.close();
        self.app_state.close_session();
        let session = self.connection.session();
        info!(
            "Session {} closed after {}s",
            session.id(),
            (chrono::Utc::now() - session.created_at()).num_seconds()
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AsrWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.connection.on_audio(&data);
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                if !self.connection.on_text(&text) {
                    debug!(
                        "Session {}: ignoring text frame {:?}",
                        self.connection.session_id(),
                        text.chars().take(32).collect::<String>()
                    );
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!("Session {}: client closed: {:?}", self.connection.session_id(), reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Session {}: unexpected continuation frame", self.connection.session_id());
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("Session {}: WebSocket protocol error: {}", self.connection.session_id(), err);
                ctx.stop();
            }
        }
    }
}

impl Handler<DeliverOutput> for AsrWebSocket {
    type Result = ();

    fn handle(&mut self, msg: DeliverOutput, ctx: &mut Self::Context) {
        let output = msg.0;
        let session_id = self.connection.session_id();

        if !self.connection.admit(&output) {
            debug!("Session {}: dropping stale result for utterance {}", session_id, output.utterance());
            return;
        }

        self.app_state.record_output(&output);
        match &output {
            SessionOutput::Partial { result, .. } => {
                debug!("Session {}: partial ({} chars)", session_id, result.text.len());
            }
            SessionOutput::Final { utterance, result: Ok(result) } => {
                debug!(
                    "Session {}: final for utterance {} from {:?} engine",
                    session_id, utterance, result.engine
                );
            }
            SessionOutput::Final { utterance, result: Err(e) } => {
                error!("Session {}: utterance {} failed: {}", session_id, utterance, e);
            }
        }

        self.send(ctx, &ServerMessage::from(output));
    }
}

/// WebSocket endpoint handler for `GET /asr`.
///
/// ## Admission:
/// When `performance.max_concurrent_sessions` sessions are open the upgrade is
/// refused with 503. The slot taken here is released in the actor's `stopped`,
/// or right away if the upgrade itself fails.
pub async fn asr_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let limit = app_state.config.performance.max_concurrent_sessions;
    if !app_state.try_open_session(limit) {
        warn!("Refusing streaming session: {} already open", limit);
        return Err(AppError::ServiceBusy(format!("{} streaming sessions already open", limit)).into());
    }

    debug!("New streaming connection from {:?}", req.connection_info().peer_addr());

    let (connection, outputs) = AsrConnection::open(
        app_state.orchestrator.clone(),
        app_state.config.streaming.to_policy(),
    );
    let actor = AsrWebSocket::new(connection, outputs, app_state.clone());

    ws::start(actor, &req, stream).map_err(|e| {
        app_state.close_session();
        e
    })
}
