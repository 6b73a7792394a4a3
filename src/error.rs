//! # Error Handling
//!
//! This module defines the application error type and how it is converted to HTTP responses.
//!
//! ## Error Taxonomy:
//! The transcription core only ever produces three kinds of failure:
//! - **EngineUnavailable**: a recognition engine failed to initialize or is not installed.
//!   Recoverable by trying the other engine.
//! - **TranscriptionFailed**: every available engine failed for a given audio slice.
//!   Recoverable at the session level; only the current utterance is affected.
//! - **MalformedInput**: the audio cannot be decoded as 16-bit PCM. No engine is attempted.
//!
//! The remaining variants belong to the HTTP surface (bad requests, capacity, config).
//!
//! ## Key Rust Concepts:
//! - **enum with data**: each variant carries a human-readable detail message
//! - **Display trait**: how the error is formatted for logs and wire messages
//! - **ResponseError trait**: how actix-web turns the error into an HTTP response
//! - **From trait**: lets `?` convert library errors into `AppError` automatically

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application error type shared by the transcription core and the HTTP handlers.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::MalformedInput("odd number of PCM bytes".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// A recognition engine could not be constructed or is not configured
    EngineUnavailable(String),

    /// Both engines failed (or the only available one failed) for an audio slice
    TranscriptionFailed(String),

    /// Input audio is not in the expected format
    MalformedInput(String),

    /// Client sent an invalid request that is not about the audio itself
    BadRequest(String),

    /// The server is at its session capacity
    ServiceBusy(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Anything else that went wrong on the server side
    Internal(String),
}

impl AppError {
    /// Machine-readable error type used in JSON bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::EngineUnavailable(_) => "engine_unavailable",
            AppError::TranscriptionFailed(_) => "transcription_failed",
            AppError::MalformedInput(_) => "malformed_input",
            AppError::BadRequest(_) => "bad_request",
            AppError::ServiceBusy(_) => "service_busy",
            AppError::ConfigError(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// The detail message without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            AppError::EngineUnavailable(msg)
            | AppError::TranscriptionFailed(msg)
            | AppError::MalformedInput(msg)
            | AppError::BadRequest(msg)
            | AppError::ServiceBusy(msg)
            | AppError::ConfigError(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::EngineUnavailable(msg) => write!(f, "Engine unavailable: {}", msg),
            AppError::TranscriptionFailed(msg) => write!(f, "Transcription failed: {}", msg),
            AppError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ServiceBusy(msg) => write!(f, "Service busy: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Implementation of the ResponseError trait for AppError.
///
/// ## HTTP Status Code Mapping:
/// - MalformedInput/BadRequest → 400 (the client sent something we cannot use)
/// - EngineUnavailable/ServiceBusy → 503 (try again later)
/// - TranscriptionFailed/ConfigError/Internal → 500
///
/// ## JSON Response Format:
/// ```json
/// {
///   "success": false,
///   "error": {
///     "type": "malformed_input",
///     "message": "payload is not a RIFF/WAVE file",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
/// The explicit `success: false` keeps a failed single-shot transcription
/// distinguishable from a successful transcription of silence (empty text).
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MalformedInput(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::EngineUnavailable(_) | AppError::ServiceBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::TranscriptionFailed(_)
            | AppError::ConfigError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": {
                "type": self.kind(),               // Machine-readable error type
                "message": self.detail(),          // Human-readable detail
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Engine adapters and model loading work with `anyhow`; anything that escapes
/// to the HTTP layer unclassified is an internal error.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// JSON parsing errors are almost always the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}
