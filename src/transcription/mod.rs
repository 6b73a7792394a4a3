//! # Transcription Module
//!
//! Speech-to-text engines and the machinery that shares and sequences them.
//!
//! ## Key Components:
//! - **Engine interface**: one `transcribe(samples)` capability for every recognizer
//! - **Model Registry**: lazy, exactly-once construction per engine kind
//! - **Inference Pool**: bounded blocking workers that run model inference
//! - **Fallback Orchestrator**: primary first, secondary on failure
//!
//! ## Engines:
//! - **Primary**: Whisper via Candle-rs (`tiny` by default, ~39MB)
//! - **Secondary**: Vosk offline recognizer (cargo feature `vosk`)

pub mod engine;      // Engine trait and transcript types
pub mod registry;    // Per-kind lazy engine construction
pub mod pool;        // Bounded inference workers
pub mod fallback;    // Primary/secondary orchestration
pub mod model;       // Whisper engine
pub mod vosk;        // Vosk engine

#[cfg(test)]
pub mod mock;

pub use engine::EngineKind;
