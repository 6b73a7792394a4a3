//! # Decode Pipeline
//!
//! Per-session background task that runs decode requests one after another, in
//! the order the session produced them, and sends the outputs back.
//!
//! ## Ordering:
//! Requests are decoded strictly in submission order, so outputs come back in
//! the order their triggering frames arrived. The actor keeps accepting frames
//! while a decode is running.
//!
//! ## Back-pressure:
//! Every request is decoded, partials included. When inference falls behind,
//! requests wait in the channel and each partial message is only delayed until
//! its own decode returns. Dropping late partials is the session's job (see
//! `StreamingSession::admit`), not the pipeline's.
//!
//! ## Cancellation:
//! Dropping the pipeline aborts the task. A blocking inference already running
//! on the pool finishes there and its result is thrown away.

use crate::audio::session::{DecodeRequest, SessionOutput};
use crate::transcription::fallback::FallbackOrchestrator;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;
use uuid::Uuid;

pub struct DecodePipeline {
    requests: mpsc::UnboundedSender<DecodeRequest>,
    task: JoinHandle<()>,
}

impl DecodePipeline {
    /// Start the pipeline task for one session.
    pub fn spawn(
        session_id: Uuid,
        orchestrator: Arc<FallbackOrchestrator>,
        outputs: mpsc::UnboundedSender<SessionOutput>,
    ) -> Self {
        let (requests, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(session_id, orchestrator, receiver, outputs));
        Self { requests, task }
    }

    /// Queue a request. Returns false once the pipeline has stopped.
    pub fn submit(&self, request: DecodeRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    session_id: Uuid,
    orchestrator: Arc<FallbackOrchestrator>,
    mut requests: mpsc::UnboundedReceiver<DecodeRequest>,
    outputs: mpsc::UnboundedSender<SessionOutput>,
) {
    while let Some(request) = requests.recv().await {
        trace!("Session {}: decoding request for utterance {}", session_id, request.utterance());

        let output = match request {
            DecodeRequest::Partial { utterance, audio } => SessionOutput::Partial {
                utterance,
                result: orchestrator.transcribe_partial(&audio).await,
            },
            DecodeRequest::Final { utterance, audio } => SessionOutput::Final {
                utterance,
                result: orchestrator.transcribe_final(&audio).await,
            },
        };

        if outputs.send(output).is_err() {
            break;
        }
    }

    trace!("Session {}: decode pipeline finished", session_id);
}
