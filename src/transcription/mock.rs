//! Scripted in-memory engines for tests.

use crate::transcription::engine::{EngineTranscript, RecognitionEngine, Segment};
use crate::transcription::registry::{EngineFuture, EngineSpec, ModelRegistry};
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Engine that answers with a fixed transcript or a fixed failure.
///
/// ## Usage Example:
/// ```rust
/// let engine = ScriptedEngine::new("whisper").with_response("hello");
/// let broken = ScriptedEngine::new("vosk").with_failure("model missing");
/// ```
pub struct ScriptedEngine {
    name: String,
    response: Result<String, String>,
    language: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            response: Ok(String::new()),
            language: "en".to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_response(mut self, text: &str) -> Self {
        self.response = Ok(text.to_string());
        self
    }

    pub fn with_failure(mut self, message: &str) -> Self {
        self.response = Err(message.to_string());
        self
    }

    /// Block the worker thread this long per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn transcribe(&self, samples: &[i16]) -> Result<EngineTranscript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        match &self.response {
            Ok(text) => Ok(EngineTranscript {
                text: text.clone(),
                language: self.language.clone(),
                segments: vec![Segment::new(0.0, samples.len() as f64 / 16000.0, text.clone())],
            }),
            Err(message) => Err(anyhow!("{}", message)),
        }
    }
}

fn spec_for(identifier: &str, engine: Option<Arc<ScriptedEngine>>) -> EngineSpec {
    EngineSpec::new(identifier, move || {
        let engine = engine.clone();
        Box::pin(async move {
            match engine {
                Some(engine) => Ok(engine as Arc<dyn RecognitionEngine>),
                None => Err(anyhow!("model not installed")),
            }
        }) as EngineFuture
    })
}

/// Registry backed by scripted engines; `None` makes that kind unavailable.
pub fn registry_with(
    primary: Option<Arc<ScriptedEngine>>,
    secondary: Option<Arc<ScriptedEngine>>,
) -> ModelRegistry {
    ModelRegistry::new(
        spec_for("primary-model", primary),
        spec_for("secondary-model", secondary),
    )
}
