//! # Whisper Engine (primary)
//!
//! Loads a Whisper checkpoint with Candle-rs and runs greedy decoding over
//! 16 kHz mono audio.
//!
//! ## Model Loading Process:
//! 1. Download config, tokenizer and safetensors weights from HuggingFace (cached locally)
//! 2. Build the log-mel filter bank for the model's mel bin count
//! 3. Memory-map the weights onto the selected device (on a blocking thread)
//! 4. Resolve special token ids (start, language, task, no-timestamps, end)
//!
//! ## Decoding:
//! - Audio is cut into 30 s windows of mel frames; each window becomes one segment
//! - Temperature 0, one beam, language forced, no timestamps
//! - Windows the model scores as silence are dropped

use crate::config::ModelsConfig;
use crate::device::{device_label, select_device, DevicePreference};
use crate::transcription::engine::{EngineTranscript, RecognitionEngine, Segment};
use crate::transcription::registry::{EngineFuture, EngineSpec};
use crate::audio::processor::samples_to_f32;
use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokenizers::Tokenizer;

/// Available Whisper model sizes with their characteristics.
///
/// ## Trade-offs:
/// - **Size vs Accuracy**: Larger models are more accurate but slower
/// - **Memory vs Speed**: "tiny" is the only size that fits the default memory budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Get the HuggingFace model repository name.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Settings captured from configuration when the registry is built.
#[derive(Debug, Clone)]
pub struct WhisperSettings {
    pub model: String,
    pub language: String,
    pub device: String,
}

impl WhisperSettings {
    pub fn from_config(models: &ModelsConfig) -> Self {
        Self {
            model: models.whisper_model.clone(),
            language: models.language.clone(),
            device: models.device.clone(),
        }
    }
}

/// Registry entry for the primary engine. Nothing is loaded until the factory runs.
pub fn engine_spec(models: &ModelsConfig) -> EngineSpec {
    let settings = WhisperSettings::from_config(models);
    EngineSpec::new(models.whisper_model.clone(), move || {
        let settings = settings.clone();
        Box::pin(async move {
            let engine = WhisperEngine::load(settings).await?;
            Ok(Arc::new(engine) as Arc<dyn RecognitionEngine>)
        }) as EngineFuture
    })
}

/// Files making up one checkpoint.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

/// Fetch checkpoint files through hf-hub.
///
/// ## Environment Variables:
/// - `HF_TOKEN`: access token for gated or rate-limited downloads
/// - `HF_HUB_CACHE` / `HF_HOME`: cache location
async fn fetch_model_files(size: ModelSize) -> Result<ModelFiles> {
    use hf_hub::api::tokio::ApiBuilder;

    let mut builder = ApiBuilder::new().with_progress(false);

    if let Ok(token) = std::env::var("HF_TOKEN") {
        tracing::debug!("Using HF token (length: {})", token.len());
        builder = builder.with_token(Some(token));
    }

    if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
        builder = builder.with_cache_dir(cache_dir.into());
    } else if let Ok(hf_home) = std::env::var("HF_HOME") {
        builder = builder.with_cache_dir(PathBuf::from(hf_home).join("hub"));
    }

    let api = builder.build().context("Failed to create HuggingFace API client")?;
    let repo = api.model(size.repo_name().to_string());

    tracing::info!("Fetching Whisper {} files from {}", size, size.repo_name());
    let config = repo
        .get("config.json")
        .await
        .map_err(|e| anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e))?;
    let tokenizer = repo
        .get("tokenizer.json")
        .await
        .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e))?;
    let weights = repo
        .get("model.safetensors")
        .await
        .map_err(|e| anyhow!("Failed to download model.safetensors from {}: {}", size.repo_name(), e))?;

    Ok(ModelFiles { config, tokenizer, weights })
}

/// Whisper behind the uniform engine interface.
///
/// ## Thread Safety:
/// Candle's decoder keeps a key/value cache and needs `&mut self`, so the model
/// sits behind a `Mutex`. Concurrent sessions queue on it; the inference pool
/// bounds how many threads wait.
pub struct WhisperEngine {
    decoder: Mutex<WhisperDecoder>,
}

impl WhisperEngine {
    /// Download (if needed) and load the configured checkpoint.
    pub async fn load(settings: WhisperSettings) -> Result<Self> {
        let size: ModelSize = settings.model.parse()?;
        let preference: DevicePreference = settings.device.parse()?;
        let start_time = Instant::now();

        let files = fetch_model_files(size).await?;

        let language = settings.language.clone();
        let decoder = tokio::task::spawn_blocking(move || {
            let device = select_device(preference);
            WhisperDecoder::build(&files, &language, device)
        })
        .await
        .map_err(|e| anyhow!("Whisper loader crashed: {}", e))??;

        tracing::info!(
            "Whisper {} model loaded on {} in {:.2}s",
            size,
            device_label(&decoder.device),
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            decoder: Mutex::new(decoder),
        })
    }
}

impl RecognitionEngine for WhisperEngine {
    fn name(&self) -> &str {
        "whisper"
    }

    fn transcribe(&self, samples: &[i16]) -> Result<EngineTranscript> {
        let pcm = samples_to_f32(samples);
        let mut decoder = self
            .decoder
            .lock()
            .map_err(|_| anyhow!("Whisper decoder state is poisoned"))?;
        decoder.transcribe(&pcm)
    }
}

/// Loaded model plus everything needed to run one decode.
struct WhisperDecoder {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    suppress_tokens: Tensor,
    prompt: Vec<u32>,
    eot_token: u32,
    no_speech_token: Option<u32>,
    language: String,
}

impl WhisperDecoder {
    fn build(files: &ModelFiles, language: &str, device: Device) -> Result<Self> {
        let config: Config = serde_json::from_reader(std::fs::File::open(&files.config)?)
            .context("Invalid Whisper config.json")?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let mel_filters = mel_filter_bank(m::SAMPLE_RATE, m::N_FFT, config.num_mel_bins);

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let token = |name: &str| -> Result<u32> {
            tokenizer
                .token_to_id(name)
                .ok_or_else(|| anyhow!("Tokenizer has no '{}' token", name))
        };

        let sot_token = token(m::SOT_TOKEN)?;
        let transcribe_token = token(m::TRANSCRIBE_TOKEN)?;
        let no_timestamps_token = token(m::NO_TIMESTAMPS_TOKEN)?;
        let eot_token = token(m::EOT_TOKEN)?;
        let language_token = token(&format!("<|{}|>", language))
            .with_context(|| format!("Language '{}' is not supported by this checkpoint", language))?;
        let no_speech_token = m::NO_SPEECH_TOKENS
            .iter()
            .find_map(|name| tokenizer.token_to_id(name));

        let suppress: Vec<f32> = (0..config.vocab_size as u32)
            .map(|i| {
                if config.suppress_tokens.contains(&i) {
                    f32::NEG_INFINITY
                } else {
                    0f32
                }
            })
            .collect();
        let suppress_tokens = Tensor::new(suppress.as_slice(), &device)?;

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            mel_filters,
            suppress_tokens,
            prompt: vec![sot_token, language_token, transcribe_token, no_timestamps_token],
            eot_token,
            no_speech_token,
            language: language.to_string(),
        })
    }

    /// Transcribe a whole clip, one segment per 30 s window.
    fn transcribe(&mut self, pcm: &[f32]) -> Result<EngineTranscript> {
        if pcm.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }

        let mel = m::audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let mel_frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_frames), &self.device)?;

        // Frames that carry real audio; the rest is padding from pcm_to_mel
        let content_frames = (pcm.len() / m::HOP_LENGTH).max(1).min(mel_frames);

        let mut segments = Vec::new();
        let mut seek = 0;
        while seek < content_frames {
            let start = (seek * m::HOP_LENGTH) as f64 / m::SAMPLE_RATE as f64;
            let window = usize::min(mel_frames - seek, m::N_FRAMES);
            let content = usize::min(content_frames - seek, m::N_FRAMES);
            let end = start + (content * m::HOP_LENGTH) as f64 / m::SAMPLE_RATE as f64;

            let mel_window = mel.narrow(2, seek, window)?;
            if let Some(text) = self.decode_window(&mel_window)? {
                segments.push(Segment::new(start, end, text));
            }
            seek += window;
        }

        let text = segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(EngineTranscript {
            text,
            language: self.language.clone(),
            segments,
        })
    }

    /// Greedy decode of one mel window. `None` when the window is silence.
    fn decode_window(&mut self, mel: &Tensor) -> Result<Option<String>> {
        let audio_features = self.model.encoder.forward(mel, true)?;
        let sample_len = self.config.max_target_positions / 2;

        let mut tokens = self.prompt.clone();
        let mut sum_logprob = 0f64;
        let mut no_speech_prob = 0f64;

        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            if i == 0 {
                if let Some(no_speech_token) = self.no_speech_token {
                    let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
                    no_speech_prob = candle_nn::ops::softmax(&logits, D::Minus1)?
                        .i(no_speech_token as usize)?
                        .to_scalar::<f32>()? as f64;
                }
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?
                .broadcast_add(&self.suppress_tokens)?;

            let next_token = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;
            if next_token == self.eot_token || tokens.len() >= self.config.max_target_positions {
                break;
            }

            let prob = candle_nn::ops::softmax(&logits, D::Minus1)?
                .i(next_token as usize)?
                .to_scalar::<f32>()? as f64;
            sum_logprob += prob.ln();
            tokens.push(next_token);
        }

        let generated = &tokens[self.prompt.len()..];
        let avg_logprob = sum_logprob / generated.len().max(1) as f64;
        if no_speech_prob > m::NO_SPEECH_THRESHOLD && avg_logprob < m::LOGPROB_THRESHOLD {
            tracing::debug!("Skipping silent window (no_speech_prob {:.2})", no_speech_prob);
            return Ok(None);
        }

        let text = self
            .tokenizer
            .decode(generated, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;
        let text = text.trim();

        Ok(if text.is_empty() { None } else { Some(text.to_string()) })
    }
}

/// Slaney-style mel filter bank laid out as `[n_mels][n_fft / 2 + 1]`.
///
/// Matches librosa's `filters.mel(sr, n_fft, n_mels, htk=False, norm="slaney")`,
/// which is what Whisper was trained with.
pub fn mel_filter_bank(sample_rate: usize, n_fft: usize, n_mels: usize) -> Vec<f32> {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;
    let log_step = 6.4f64.ln() / 27.0;

    let hz_to_mel = |hz: f64| {
        if hz >= MIN_LOG_HZ {
            MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step
        } else {
            hz / F_SP
        }
    };
    let mel_to_hz = |mel: f64| {
        if mel >= MIN_LOG_MEL {
            MIN_LOG_HZ * (log_step * (mel - MIN_LOG_MEL)).exp()
        } else {
            F_SP * mel
        }
    };

    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0f32; n_mels * n_bins];
    for bin in 0..n_mels {
        let (lower, center, upper) = (mel_points[bin], mel_points[bin + 1], mel_points[bin + 2]);
        let norm = 2.0 / (upper - lower);
        for (k, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            let weight = rising.min(falling).max(0.0);
            filters[bin * n_bins + k] = (weight * norm) as f32;
        }
    }

    filters
}
