//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - Plain deployment variables (HOST, PORT, WHISPER_MODEL, VOSK_MODEL_PATH)
//! - Environment variables with the APP_ prefix (`__` separates nested keys)
//! - An optional `config.toml` file
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization between Rust structs and TOML/env/JSON
//! - **derive macros**: Debug, Clone, Serialize, Deserialize generated automatically
//! - **impl blocks**: Derived values (window size in bytes) live next to the data
//!
//! ## Configuration Priority (highest to lowest):
//! 1. HOST / PORT / WHISPER_MODEL / VOSK_MODEL_PATH
//! 2. Environment variables (APP_SERVER__PORT, APP_STREAMING__PARTIAL_THRESHOLD_BYTES, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::audio::processor::SAMPLE_RATE;
use crate::audio::session::StreamingPolicy;
use crate::transcription::model::ModelSize;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub streaming: StreamingConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind ("127.0.0.1" for development, "0.0.0.0" in containers)
/// - `port`: TCP port number to listen on
/// - `workers`: number of actix event loops. The default of 1 keeps the whole
///   process inside a small memory budget; the model registry is shared either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

/// Recognition engine configuration.
///
/// ## Fields:
/// - `whisper_model`: primary engine model size ("tiny", "base", "small", "medium", "large")
/// - `vosk_model_path`: directory of the secondary (offline) recognizer model
/// - `language`: ISO code forced on the primary engine and reported by the secondary
/// - `device`: compute device for the primary engine ("auto", "cpu", "cuda", "metal")
/// - `preload`: construct the primary engine at startup instead of on first use
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub vosk_model_path: String,
    pub language: String,
    pub device: String,
    pub preload: bool,
}

/// Streaming session tuning.
///
/// ## Fields:
/// - `sample_rate`: PCM sample rate (16-bit, mono); both engines only accept 16000
/// - `partial_threshold_bytes`: new bytes needed before a partial is emitted
///   (8000 bytes ≈ 0.5 s at 16 kHz/16-bit mono)
/// - `partial_window_ms`: trailing audio handed to the engine for a partial
/// - `heartbeat_interval_secs` / `client_timeout_secs`: WebSocket liveness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub sample_rate: u32,
    pub partial_threshold_bytes: usize,
    pub partial_window_ms: u32,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_sessions`: WebSocket sessions admitted at the same time
/// - `inference_workers`: size of the bounded pool that runs model inference
///   off the event loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub inference_workers: usize,
}

impl StreamingConfig {
    /// Bytes per second of 16-bit mono PCM at the configured rate.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * 2
    }

    /// Size `W` of the partial window in bytes.
    ///
    /// ## Example:
    /// 2000 ms at 16 kHz → 32,000 samples → 64,000 bytes.
    /// The result is rounded down to a whole sample so a window never starts mid-sample.
    pub fn partial_window_bytes(&self) -> usize {
        let bytes = self.bytes_per_second() * self.partial_window_ms as usize / 1000;
        bytes - bytes % 2
    }

    /// Convert to the policy consumed by the session state machine.
    pub fn to_policy(&self) -> StreamingPolicy {
        StreamingPolicy {
            partial_threshold_bytes: self.partial_threshold_bytes,
            partial_window_bytes: self.partial_window_bytes(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
                workers: 1,                     // One event loop fits a ~512 MB box
            },
            models: ModelsConfig {
                whisper_model: "tiny".to_string(),   // ~39 MB, CPU-friendly
                vosk_model_path: "vosk-model-small-en-us-0.15".to_string(),
                language: "en".to_string(),
                device: "cpu".to_string(),
                preload: false,
            },
            streaming: StreamingConfig {
                sample_rate: SAMPLE_RATE,
                partial_threshold_bytes: 8000,
                partial_window_ms: 2000,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
                inference_workers: 2,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_PERFORMANCE__INFERENCE_WORKERS=4`: Grow the inference pool
    /// - `WHISPER_MODEL=base`: Primary model size
    /// - `VOSK_MODEL_PATH=/models/vosk`: Secondary model directory
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Variables that deployment platforms set directly
        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("WHISPER_MODEL", "models.whisper_model"),
            ("VOSK_MODEL_PATH", "models.vosk_model_path"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// A zero threshold would emit a partial for every frame and a zero-sized
    /// pool would deadlock every session, so both are rejected at startup.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.workers == 0 {
            return Err(anyhow::anyhow!("Server workers must be greater than 0"));
        }

        self.models.whisper_model.parse::<ModelSize>()?;

        if self.models.language.trim().is_empty() {
            return Err(anyhow::anyhow!("Recognition language cannot be empty"));
        }

        if self.streaming.sample_rate != SAMPLE_RATE {
            return Err(anyhow::anyhow!(
                "Sample rate must be {} Hz, got {}",
                SAMPLE_RATE,
                self.streaming.sample_rate
            ));
        }

        if self.streaming.partial_threshold_bytes == 0 {
            return Err(anyhow::anyhow!("Partial threshold must be greater than 0"));
        }

        if self.streaming.partial_window_bytes() == 0 {
            return Err(anyhow::anyhow!("Partial window must cover at least one sample"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.inference_workers == 0 {
            return Err(anyhow::anyhow!("Inference workers must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.models.whisper_model, "tiny");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_window_is_two_seconds() {
        let config = AppConfig::default();
        assert_eq!(config.streaming.partial_window_bytes(), 64000);

        let policy = config.streaming.to_policy();
        assert_eq!(policy.partial_threshold_bytes, 8000);
        assert_eq!(policy.partial_window_bytes, 64000);
    }

    #[test]
    fn test_window_rounds_to_whole_samples() {
        let mut config = AppConfig::default();
        config.streaming.partial_window_ms = 333;
        assert_eq!(config.streaming.partial_window_bytes() % 2, 0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.streaming.partial_threshold_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.inference_workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.whisper_model = "gigantic".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_only_16khz_audio_is_accepted() {
        let mut config = AppConfig::default();
        config.streaming.sample_rate = 44100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("16000"));

        config.streaming.sample_rate = 0;
        assert!(config.validate().is_err());

        config.streaming.sample_rate = 16000;
        assert!(config.validate().is_ok());
    }
}
