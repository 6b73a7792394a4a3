//! # Recognition Engine Interface
//!
//! The uniform capability both recognizers implement, plus the result types that
//! flow from the engines back to clients.
//!
//! ## Key Types:
//! - **RecognitionEngine**: `transcribe(samples) -> EngineTranscript`, blocking, thread-safe
//! - **EngineTranscript**: what an engine knows (text, language, segments)
//! - **TranscriptResult**: an engine transcript stamped with the engine that produced it
//! - **EngineKind / EngineTag**: which engine slot was asked, and which one answered
//!
//! ## Threading Model:
//! `transcribe` is a plain blocking call. Engines are shared as
//! `Arc<dyn RecognitionEngine>` across sessions and are always invoked on the
//! inference pool, never on the actix event loop.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The two engine slots of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Higher-accuracy batch model (Whisper)
    Primary,
    /// Lightweight offline fallback (Vosk)
    Secondary,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Primary, EngineKind::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Primary => "primary",
            EngineKind::Secondary => "secondary",
        }
    }

    /// The tag a result carries when this engine produced it.
    pub fn tag(&self) -> EngineTag {
        match self {
            EngineKind::Primary => EngineTag::Primary,
            EngineKind::Secondary => EngineTag::Secondary,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(EngineKind::Primary),
            "secondary" => Ok(EngineKind::Secondary),
            _ => Err(anyhow::anyhow!("Unknown engine kind: {}", s)),
        }
    }
}

/// Which engine produced a transcript; `None` marks the empty partial sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineTag {
    Primary,
    Secondary,
    None,
}

/// A timed piece of transcript, in seconds from the start of the decoded audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    /// Build a segment, clamping times so that `0 <= start <= end` always holds.
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        let start = if start.is_finite() { start.max(0.0) } else { 0.0 };
        let end = if end.is_finite() { end.max(start) } else { start };
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Output of a single engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTranscript {
    pub text: String,
    pub language: String,
    pub segments: Vec<Segment>,
}

/// Immutable transcript handed to the protocol adapter and the single-shot handler.
///
/// ## Fields:
/// - `engine`: `primary`, `secondary`, or `none` for the empty partial sentinel
/// - `model`: identifier of the model that produced it ("tiny", a Vosk model dir, or empty)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptResult {
    pub text: String,
    pub language: String,
    pub segments: Vec<Segment>,
    pub engine: EngineTag,
    #[serde(skip)]
    pub model: String,
}

impl TranscriptResult {
    /// Stamp an engine transcript with its producer. Segment times are re-validated.
    pub fn from_engine(transcript: EngineTranscript, kind: EngineKind, model: &str) -> Self {
        let segments = transcript
            .segments
            .into_iter()
            .map(|segment| Segment::new(segment.start, segment.end, segment.text))
            .collect();

        let language = if transcript.language.trim().is_empty() {
            "unknown".to_string()
        } else {
            transcript.language
        };

        Self {
            text: transcript.text.trim().to_string(),
            language,
            segments,
            engine: kind.tag(),
            model: model.to_string(),
        }
    }

    /// Sentinel used when a partial decode could not be produced.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            language: "unknown".to_string(),
            segments: Vec::new(),
            engine: EngineTag::None,
            model: String::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.engine == EngineTag::Secondary
    }
}

/// Uniform recognition capability.
///
/// ## Contract:
/// - Input is 16 kHz mono `i16` samples, never empty
/// - The call blocks for the whole inference and may be made from several
///   threads at once
/// - Errors are plain `anyhow` errors; classification happens in the orchestrator
pub trait RecognitionEngine: Send + Sync {
    /// Short engine name for logs ("whisper", "vosk").
    fn name(&self) -> &str;

    fn transcribe(&self, samples: &[i16]) -> Result<EngineTranscript>;
}

impl<T: RecognitionEngine + ?Sized> RecognitionEngine for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn transcribe(&self, samples: &[i16]) -> Result<EngineTranscript> {
        (**self).transcribe(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_times_are_ordered() {
        let segment = Segment::new(-1.0, -5.0, "hi");
        assert_eq!(segment.start, 0.0);
        assert_eq!(segment.end, 0.0);

        let segment = Segment::new(2.0, 1.0, "hi");
        assert!(segment.start <= segment.end);

        let segment = Segment::new(f64::NAN, 3.0, "hi");
        assert_eq!((segment.start, segment.end), (0.0, 3.0));
    }

    #[test]
    fn test_result_from_engine() {
        let transcript = EngineTranscript {
            text: "  hello there ".to_string(),
            language: "en".to_string(),
            segments: vec![Segment::new(0.0, 1.5, "hello there")],
        };
        let result = TranscriptResult::from_engine(transcript, EngineKind::Secondary, "vosk-small");

        assert_eq!(result.text, "hello there");
        assert_eq!(result.engine, EngineTag::Secondary);
        assert_eq!(result.model, "vosk-small");
        assert!(result.is_fallback());
    }

    #[test]
    fn test_empty_sentinel() {
        let result = TranscriptResult::empty();
        assert_eq!(result.text, "");
        assert_eq!(result.language, "unknown");
        assert_eq!(result.engine, EngineTag::None);
    }

    #[test]
    fn test_engine_tag_serialization() {
        assert_eq!(serde_json::to_string(&EngineTag::Primary).unwrap(), "\"primary\"");
        assert_eq!(serde_json::to_string(&EngineTag::None).unwrap(), "\"none\"");
        assert_eq!("SECONDARY".parse::<EngineKind>().unwrap(), EngineKind::Secondary);
        assert!("tertiary".parse::<EngineKind>().is_err());
    }
}
