//! # Fallback Orchestrator
//!
//! Wraps one transcription attempt with primary-then-secondary engine selection.
//!
//! ## Algorithm:
//! 1. Decode the audio; malformed input stops here, no engine is touched
//! 2. Resolve the primary engine; if it is unavailable go to step 4
//! 3. Run the primary on the inference pool; success → tagged `primary`
//! 4. Resolve the secondary engine; if unavailable too, the attempt failed
//! 5. Run the secondary; success → tagged `secondary`, failure → the attempt failed
//!
//! One attempt per engine per call, no retries. The next partial is the natural
//! retry for interim results; finals surface the failure once.
//!
//! ## Caller-specific failure:
//! - Partials never fail: they get an empty transcript tagged `none`
//! - Finals and single-shot get `TranscriptionFailed` (or `MalformedInput`)

use crate::audio::processor::decode_pcm16le;
use crate::error::AppError;
use crate::transcription::engine::{EngineKind, TranscriptResult};
use crate::transcription::pool::InferencePool;
use crate::transcription::registry::ModelRegistry;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub struct FallbackOrchestrator {
    registry: Arc<ModelRegistry>,
    pool: InferencePool,
}

impl FallbackOrchestrator {
    pub fn new(registry: Arc<ModelRegistry>, pool: InferencePool) -> Self {
        Self { registry, pool }
    }

    pub fn pool(&self) -> &InferencePool {
        &self.pool
    }

    /// Interim transcript of a PCM16LE window. Failures degrade to the empty sentinel.
    pub async fn transcribe_partial(&self, audio: &[u8]) -> TranscriptResult {
        let outcome = match decode_pcm16le(audio) {
            Ok(samples) => self.transcribe_samples(samples).await,
            Err(e) => Err(e),
        };

        outcome.unwrap_or_else(|e| {
            debug!("Partial decode suppressed: {}", e);
            TranscriptResult::empty()
        })
    }

    /// Transcript of a whole PCM16LE utterance.
    pub async fn transcribe_final(&self, audio: &[u8]) -> Result<TranscriptResult, AppError> {
        let samples = decode_pcm16le(audio)?;
        self.transcribe_samples(samples).await
    }

    /// Run the fallback chain over already-decoded samples.
    pub async fn transcribe_samples(&self, samples: Vec<i16>) -> Result<TranscriptResult, AppError> {
        if samples.is_empty() {
            return Err(AppError::MalformedInput("no audio samples to transcribe".to_string()));
        }

        let samples: Arc<[i16]> = samples.into();
        let mut failures = Vec::with_capacity(EngineKind::ALL.len());

        for kind in EngineKind::ALL {
            let engine = match self.registry.get(kind).await {
                Ok(engine) => engine,
                Err(e) => {
                    debug!("Skipping {} engine: {}", kind, e);
                    failures.push(format!("{}: {}", kind, e.detail()));
                    continue;
                }
            };

            let start_time = Instant::now();
            let audio = samples.clone();
            let job_engine = engine.clone();
            match self.pool.run(move || job_engine.transcribe(&audio)).await {
                Ok(transcript) => {
                    debug!(
                        "{} engine '{}' transcribed {:.2}s of audio in {}ms",
                        kind,
                        engine.name(),
                        samples.len() as f64 / 16000.0,
                        start_time.elapsed().as_millis()
                    );
                    if kind == EngineKind::Secondary {
                        warn!("Primary engine failed, transcript produced by secondary engine");
                    }
                    return Ok(TranscriptResult::from_engine(
                        transcript,
                        kind,
                        self.registry.identifier(kind),
                    ));
                }
                Err(e) => {
                    warn!("{} engine '{}' failed: {:#}", kind, engine.name(), e);
                    failures.push(format!("{}: {:#}", kind, e));
                }
            }
        }

        Err(AppError::TranscriptionFailed(failures.join("; ")))
    }
}
