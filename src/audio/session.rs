//! # Streaming Session State Machine
//!
//! One `StreamingSession` exists per WebSocket connection. It owns the utterance
//! buffer and decides, frame by frame, when a partial or a final decode is due.
//! It never runs a decode itself: it hands back a [`DecodeRequest`] and later
//! judges whether the matching [`SessionOutput`] may still be delivered.
//!
//! ## Session Lifecycle:
//! 1. **Open**: created on connect, accepting audio
//! 2. Every `partial_threshold_bytes` of new audio → partial decode of the trailing window
//! 3. End of utterance → final decode of the whole buffer, buffer starts over empty
//! 4. **Closed**: connection gone; nothing is delivered any more
//!
//! ## Utterance Numbering:
//! Each request carries the index of the utterance it belongs to. A partial that
//! finishes after the final of its utterance was delivered is stale and is dropped.

use crate::audio::buffer::SessionBuffer;
use crate::error::AppError;
use crate::transcription::engine::TranscriptResult;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Tuning knobs for when partials fire and how much audio they see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingPolicy {
    /// New bytes required before the next partial (8000 bytes ≈ 0.5 s)
    pub partial_threshold_bytes: usize,

    /// Trailing bytes decoded for a partial (64000 bytes = 2 s)
    pub partial_window_bytes: usize,
}

impl Default for StreamingPolicy {
    fn default() -> Self {
        Self {
            partial_threshold_bytes: 8000,
            partial_window_bytes: 64000,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Work the session asks the decode pipeline to perform.
///
/// The audio is an owned copy so the decode can run while the session keeps
/// accepting frames.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeRequest {
    /// Decode the trailing window for an interim transcript
    Partial { utterance: u64, audio: Vec<u8> },

    /// Decode the entire utterance
    Final { utterance: u64, audio: Vec<u8> },
}

impl DecodeRequest {
    pub fn utterance(&self) -> u64 {
        match self {
            DecodeRequest::Partial { utterance, .. } | DecodeRequest::Final { utterance, .. } => *utterance,
        }
    }

    #[cfg(test)]
    pub fn is_partial(&self) -> bool {
        matches!(self, DecodeRequest::Partial { .. })
    }
}

/// Result of a decode, on its way back to the client.
///
/// Partials cannot fail: the orchestrator already folded any failure into an
/// empty transcript. Finals carry the typed error so it reaches the client.
#[derive(Debug, Clone)]
pub enum SessionOutput {
    Partial {
        utterance: u64,
        result: TranscriptResult,
    },
    Final {
        utterance: u64,
        result: Result<TranscriptResult, AppError>,
    },
}

impl SessionOutput {
    pub fn utterance(&self) -> u64 {
        match self {
            SessionOutput::Partial { utterance, .. } | SessionOutput::Final { utterance, .. } => *utterance,
        }
    }

    /// Whether the secondary engine produced this result.
    pub fn used_fallback(&self) -> bool {
        match self {
            SessionOutput::Partial { result, .. } | SessionOutput::Final { result: Ok(result), .. } => {
                result.is_fallback()
            }
            SessionOutput::Final { result: Err(_), .. } => false,
        }
    }
}

/// Per-connection streaming session.
///
/// ## Fields:
/// - `bytes_since_partial`: running counter, reset to 0 whenever a partial fires
///   and when an utterance is finalized
/// - `utterance`: index of the utterance currently being buffered
/// - `last_finalized`: highest utterance whose final has been delivered
#[derive(Debug)]
pub struct StreamingSession {
    id: Uuid,
    buffer: SessionBuffer,
    state: SessionState,
    policy: StreamingPolicy,
    bytes_since_partial: usize,
    utterance: u64,
    last_finalized: Option<u64>,
    created_at: DateTime<Utc>,
}

impl StreamingSession {
    pub fn new(policy: StreamingPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            buffer: SessionBuffer::new(),
            state: SessionState::Open,
            policy,
            bytes_since_partial: 0,
            utterance: 0,
            last_finalized: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub fn bytes_since_partial(&self) -> usize {
        self.bytes_since_partial
    }

    /// Index of the utterance currently accumulating audio.
    #[cfg(test)]
    pub fn current_utterance(&self) -> u64 {
        self.utterance
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Append a binary frame and decide whether a partial is due.
    ///
    /// ## Logic:
    /// - Frames arriving after close are ignored
    /// - The counter grows by the frame length; once it reaches the threshold it
    ///   resets to zero and the trailing window is copied into a partial request
    /// - A single oversized frame still yields at most one partial
    pub fn on_audio_chunk(&mut self, chunk: &[u8]) -> Option<DecodeRequest> {
        if self.state == SessionState::Closed || chunk.is_empty() {
            return None;
        }

        self.buffer.append(chunk);
        self.bytes_since_partial += chunk.len();

        if self.bytes_since_partial < self.policy.partial_threshold_bytes {
            return None;
        }

        self.bytes_since_partial = 0;
        Some(DecodeRequest::Partial {
            utterance: self.utterance,
            audio: self.buffer.partial_window(self.policy.partial_window_bytes).to_vec(),
        })
    }

    /// Close the current utterance.
    ///
    /// With audio buffered, the whole buffer moves into a final request, the
    /// counter resets and the next frame starts a new utterance. An empty buffer
    /// produces nothing at all.
    pub fn on_end_of_utterance(&mut self) -> Option<DecodeRequest> {
        if self.state == SessionState::Closed || self.buffer.is_empty() {
            return None;
        }

        let audio = self.buffer.take();
        let utterance = self.utterance;
        self.bytes_since_partial = 0;
        self.utterance += 1;

        Some(DecodeRequest::Final { utterance, audio })
    }

    /// Mark the session closed; any result still in flight will be discarded.
    pub fn on_disconnect(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Decide whether a finished decode may still be sent to the client.
    ///
    /// ## Rules:
    /// - Nothing is delivered after disconnect
    /// - A partial for an utterance whose final has been delivered is stale
    /// - Delivering a final records its utterance as finalized
    pub fn admit(&mut self, output: &SessionOutput) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }

        let finalized = |utterance: u64| self.last_finalized.is_some_and(|last| utterance <= last);

        match output {
            SessionOutput::Partial { utterance, .. } => !finalized(*utterance),
            SessionOutput::Final { utterance, .. } => {
                if finalized(*utterance) {
                    return false;
                }
                self.last_finalized = Some(*utterance);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::TranscriptResult;

    fn session() -> StreamingSession {
        StreamingSession::new(StreamingPolicy::default())
    }

    fn partial_output(utterance: u64) -> SessionOutput {
        SessionOutput::Partial {
            utterance,
            result: TranscriptResult::empty(),
        }
    }

    fn final_output(utterance: u64) -> SessionOutput {
        SessionOutput::Final {
            utterance,
            result: Ok(TranscriptResult::empty()),
        }
    }

    #[test]
    fn test_partial_fires_at_threshold() {
        let mut session = session();

        assert!(session.on_audio_chunk(&[0u8; 5000]).is_none());
        assert_eq!(session.bytes_since_partial(), 5000);

        let request = session.on_audio_chunk(&[0u8; 5000]).expect("partial due at 10000 bytes");
        assert!(request.is_partial());
        assert_eq!(session.bytes_since_partial(), 0);

        match request {
            DecodeRequest::Partial { utterance, audio } => {
                assert_eq!(utterance, 0);
                assert_eq!(audio.len(), 10000);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_partial_uses_trailing_window() {
        let mut session = StreamingSession::new(StreamingPolicy {
            partial_threshold_bytes: 8,
            partial_window_bytes: 4,
        });

        let request = session.on_audio_chunk(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
        assert_eq!(request, DecodeRequest::Partial { utterance: 0, audio: vec![7, 8, 9, 10] });
        assert_eq!(session.buffered_bytes(), 10);
    }

    #[test]
    fn test_oversized_chunk_yields_single_partial() {
        let mut session = session();
        assert!(session.on_audio_chunk(&vec![0u8; 40000]).is_some());
        assert_eq!(session.bytes_since_partial(), 0);
        assert!(session.on_audio_chunk(&[0u8; 2]).is_none());
    }

    #[test]
    fn test_end_of_utterance_takes_whole_buffer() {
        let mut session = session();
        for _ in 0..40 {
            session.on_audio_chunk(&[1u8; 5000]);
        }

        match session.on_end_of_utterance() {
            Some(DecodeRequest::Final { utterance, audio }) => {
                assert_eq!(utterance, 0);
                assert_eq!(audio.len(), 200000);
            }
            other => panic!("expected a final, got {:?}", other),
        }
        assert_eq!(session.buffered_bytes(), 0);
        assert_eq!(session.current_utterance(), 1);
    }

    #[test]
    fn test_empty_end_of_utterance_is_silent() {
        let mut session = session();
        assert!(session.on_end_of_utterance().is_none());
        assert_eq!(session.current_utterance(), 0);
    }

    #[test]
    fn test_counter_restarts_after_final() {
        let mut session = session();
        session.on_audio_chunk(&[0u8; 6000]);
        assert!(session.on_end_of_utterance().is_some());

        // A fresh utterance needs a full threshold of new audio
        assert!(session.on_audio_chunk(&[0u8; 6000]).is_none());
        assert!(session.on_audio_chunk(&[0u8; 1999]).is_none());
        assert!(session.on_audio_chunk(&[0u8; 1]).is_some());
    }

    #[test]
    fn test_finals_match_non_empty_end_signals() {
        let mut session = session();
        let script: &[Option<usize>] = &[
            None,
            Some(3000),
            None,
            None,
            Some(9000),
            Some(1),
            None,
            None,
            Some(16000),
            None,
        ];

        let mut expected = 0;
        let mut finals = 0;
        for step in script {
            match step {
                Some(len) => {
                    session.on_audio_chunk(&vec![0u8; *len]);
                }
                None => {
                    if session.buffered_bytes() > 0 {
                        expected += 1;
                    }
                    if let Some(DecodeRequest::Final { .. }) = session.on_end_of_utterance() {
                        finals += 1;
                    }
                }
            }
        }

        assert_eq!(finals, expected);
        assert_eq!(finals, 3);
    }

    #[test]
    fn test_admit_drops_partial_after_final() {
        let mut session = session();

        assert!(session.admit(&partial_output(0)));
        assert!(session.admit(&final_output(0)));
        assert!(!session.admit(&partial_output(0)));
        assert!(!session.admit(&final_output(0)));

        // Next utterance is unaffected
        assert!(session.admit(&partial_output(1)));
    }

    #[test]
    fn test_admit_allows_failed_final() {
        let mut session = session();
        let failed = SessionOutput::Final {
            utterance: 0,
            result: Err(AppError::TranscriptionFailed("both engines failed".into())),
        };
        assert!(session.admit(&failed));
        assert!(!session.admit(&partial_output(0)));
    }

    #[test]
    fn test_closed_session_accepts_and_delivers_nothing() {
        let mut session = session();
        session.on_audio_chunk(&[0u8; 100]);
        session.on_disconnect();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.on_audio_chunk(&[0u8; 10000]).is_none());
        assert!(session.on_end_of_utterance().is_none());
        assert!(!session.admit(&partial_output(0)));
        assert!(!session.admit(&final_output(0)));
    }
}
