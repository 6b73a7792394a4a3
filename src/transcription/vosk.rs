//! # Vosk Engine (secondary)
//!
//! Offline Kaldi recognizer used when Whisper is unavailable or fails. Needs the
//! `vosk` cargo feature (and libvosk at link time). Builds without the feature
//! still register the secondary slot; it simply becomes unavailable on first use.
//!
//! ## Recognition:
//! - A fresh recognizer per call, so concurrent sessions never share decoder state
//! - Audio is fed in 4000-sample blocks
//! - Word timings are folded into a single segment spanning the utterance

use crate::config::ModelsConfig;
use crate::transcription::registry::{EngineFuture, EngineSpec};
#[cfg(feature = "vosk")]
use crate::transcription::engine::RecognitionEngine;
use std::path::PathBuf;
#[cfg(feature = "vosk")]
use std::sync::Arc;

/// Samples handed to the recognizer per `accept_waveform` call.
pub const FEED_BLOCK_SAMPLES: usize = 4000;

/// Registry entry for the secondary engine.
pub fn engine_spec(models: &ModelsConfig) -> EngineSpec {
    let model_path = PathBuf::from(&models.vosk_model_path);
    let language = models.language.clone();

    EngineSpec::new(models.vosk_model_path.clone(), move || {
        let model_path = model_path.clone();
        let language = language.clone();
        Box::pin(async move { load(model_path, language).await }) as EngineFuture
    })
}

#[cfg(feature = "vosk")]
async fn load(model_path: PathBuf, language: String) -> anyhow::Result<Arc<dyn RecognitionEngine>> {
    if !model_path.is_dir() {
        anyhow::bail!("Vosk model directory {} does not exist", model_path.display());
    }

    let engine = tokio::task::spawn_blocking(move || engine::VoskEngine::load(&model_path, language))
        .await
        .map_err(|e| anyhow::anyhow!("Vosk loader crashed: {}", e))??;

    Ok(Arc::new(engine) as Arc<dyn RecognitionEngine>)
}

#[cfg(not(feature = "vosk"))]
async fn load(
    model_path: PathBuf,
    _language: String,
) -> anyhow::Result<std::sync::Arc<dyn crate::transcription::engine::RecognitionEngine>> {
    anyhow::bail!(
        "built without the `vosk` feature; cannot load {}",
        model_path.display()
    )
}

#[cfg(feature = "vosk")]
mod engine {
    use super::FEED_BLOCK_SAMPLES;
    use crate::audio::processor::SAMPLE_RATE;
    use crate::transcription::engine::{EngineTranscript, RecognitionEngine, Segment};
    use anyhow::{anyhow, Result};
    use std::path::Path;
    use vosk::{Model, Recognizer};

    pub struct VoskEngine {
        model: Model,
        language: String,
    }

    impl VoskEngine {
        pub fn load(path: &Path, language: String) -> Result<Self> {
            let model = Model::new(path.to_string_lossy())
                .ok_or_else(|| anyhow!("Vosk could not load model at {}", path.display()))?;
            tracing::info!("Vosk model loaded from {}", path.display());
            Ok(Self { model, language })
        }
    }

    impl RecognitionEngine for VoskEngine {
        fn name(&self) -> &str {
            "vosk"
        }

        fn transcribe(&self, samples: &[i16]) -> Result<EngineTranscript> {
            let mut recognizer = Recognizer::new(&self.model, SAMPLE_RATE as f32)
                .ok_or_else(|| anyhow!("Vosk recognizer could not be created"))?;
            recognizer.set_words(true);

            for block in samples.chunks(FEED_BLOCK_SAMPLES) {
                recognizer
                    .accept_waveform(block)
                    .map_err(|e| anyhow!("Vosk rejected audio: {:?}", e))?;
            }

            let result = recognizer
                .final_result()
                .single()
                .ok_or_else(|| anyhow!("Vosk returned alternatives instead of a single result"))?;

            let text = result.text.trim().to_string();
            let segments = match (result.result.first(), result.result.last()) {
                (Some(first), Some(last)) if !text.is_empty() => {
                    vec![Segment::new(first.start as f64, last.end as f64, text.clone())]
                }
                _ => Vec::new(),
            };

            Ok(EngineTranscript {
                text,
                language: self.language.clone(),
                segments,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_engine_spec_uses_model_path() {
        let mut models = AppConfig::default().models;
        models.vosk_model_path = "/models/vosk-small".to_string();
        assert_eq!(engine_spec(&models).identifier, "/models/vosk-small");
    }

    #[tokio::test]
    async fn test_missing_model_directory_is_an_error() {
        let mut models = AppConfig::default().models;
        models.vosk_model_path = "/nonexistent/vosk-model".to_string();

        let spec = engine_spec(&models);
        let result = (spec.factory)().await;
        assert!(result.is_err());
    }
}
