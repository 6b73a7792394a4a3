//! # Audio Processing Module
//!
//! This module owns everything that happens to learner audio before and after it
//! reaches a recognition engine.
//!
//! ## Key Components:
//! - **Session Buffer**: Append-only byte buffer for the current utterance
//! - **Windowing Policy**: Bounded trailing slice used for partial decodes
//! - **Audio Processor**: PCM16LE and WAV decoding, format validation
//! - **Session State Machine**: Decides when partials and finals are produced
//! - **Decode Pipeline**: Per-session ordered queue that runs decodes off the actor
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod buffer;       // Per-utterance byte buffer
pub mod window;       // Partial window selection
pub mod processor;    // PCM/WAV decoding and validation
pub mod session;      // Streaming session state machine
pub mod pipeline;     // Ordered decode queue per session
