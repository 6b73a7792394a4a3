//! # Single-shot Transcription Handler
//!
//! `POST /asr/transcribe` transcribes one complete clip: the whole payload goes
//! through the fallback orchestrator with no windowing and no partials.
//!
//! ## Request:
//! A WAV file (RIFF/WAVE, PCM 16-bit, mono, 16 kHz), either as the raw request
//! body or as the `audio` field of a `multipart/form-data` upload.
//!
//! ## Response:
//! ```json
//! {
//!   "success": true,
//!   "text": "good morning",
//!   "language": "en",
//!   "segments": [{"start": 0.0, "end": 1.4, "text": "good morning"}],
//!   "engine": "secondary",
//!   "fallback": "vosk-model-small-en-us-0.15"
//! }
//! ```
//! `fallback` is present only when the secondary engine produced the result.
//! Failures use the standard error body with `"success": false`.

use crate::audio::processor::{decode_wav, SAMPLE_RATE};
use crate::transcription::engine::{EngineTag, Segment, TranscriptResult};
use crate::{error::AppError, state::AppState};
use actix_multipart::{Field, Multipart};
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Serialize;
use std::time::Instant;
use tracing::info;

/// Upper bound on an uploaded clip.
const MAX_CLIP_BYTES: usize = 50 * 1024 * 1024;

/// Success body of the single-shot endpoint.
#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub success: bool,
    pub text: String,
    pub language: String,
    pub segments: Vec<Segment>,
    pub engine: EngineTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl From<TranscriptResult> for TranscribeResponse {
    fn from(result: TranscriptResult) -> Self {
        let fallback = result.is_fallback().then(|| result.model.clone());
        Self {
            success: true,
            text: result.text,
            language: result.language,
            segments: result.segments,
            engine: result.engine,
            fallback,
        }
    }
}

/// Transcribe one uploaded clip.
///
/// ## Endpoint: `POST /asr/transcribe`
///
/// ## Errors:
/// - 400 `malformed_input`: empty body, not WAV, or not 16-bit mono 16 kHz
/// - 500 `transcription_failed`: both engines failed
pub async fn transcribe_clip(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let audio = if is_multipart(&req) {
        read_multipart_audio(Multipart::new(req.headers(), payload)).await?
    } else {
        read_body(payload).await?
    };

    let samples = decode_wav(&audio)?;
    let duration_seconds = samples.len() as f64 / SAMPLE_RATE as f64;

    let start_time = Instant::now();
    let result = state.orchestrator.transcribe_samples(samples).await?;
    if result.is_fallback() {
        state.record_fallback();
    }

    info!(
        "Transcribed {:.2}s clip with {:?} engine in {}ms",
        duration_seconds,
        result.engine,
        start_time.elapsed().as_millis()
    );

    Ok(HttpResponse::Ok().json(TranscribeResponse::from(result)))
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

async fn read_body(mut payload: web::Payload) -> Result<Vec<u8>, AppError> {
    let mut body = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Failed to read body: {}", e)))?;
        append_limited(&mut body, &chunk)?;
    }
    Ok(body)
}

/// Pull the `audio` field out of a multipart form; other fields are skipped.
async fn read_multipart_audio(mut payload: Multipart) -> Result<Vec<u8>, AppError> {
    while let Some(item) = payload.next().await {
        let mut field: Field = item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let is_audio = field
            .content_disposition()
            .and_then(|disposition| disposition.get_name())
            .is_some_and(|name| name == "audio");

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
            if is_audio {
                append_limited(&mut bytes, &chunk)?;
            }
        }

        if is_audio {
            return Ok(bytes);
        }
    }

    Err(AppError::BadRequest("No audio field provided".to_string()))
}

fn append_limited(buffer: &mut Vec<u8>, chunk: &[u8]) -> Result<(), AppError> {
    if buffer.len() + chunk.len() > MAX_CLIP_BYTES {
        return Err(AppError::BadRequest(format!(
            "Clip too large (max: {} bytes)",
            MAX_CLIP_BYTES
        )));
    }
    buffer.extend_from_slice(chunk);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::processor::encode_wav;
    use crate::config::AppConfig;
    use crate::transcription::mock::{registry_with, ScriptedEngine};
    use actix_web::test as actix_test;
    use actix_web::{http::StatusCode, App};
    use std::sync::Arc;

    fn app_state(
        primary: Option<Arc<ScriptedEngine>>,
        secondary: Option<Arc<ScriptedEngine>>,
    ) -> web::Data<AppState> {
        web::Data::new(AppState::with_registry(
            AppConfig::default(),
            Arc::new(registry_with(primary, secondary)),
        ))
    }

    fn one_second_clip() -> Vec<u8> {
        encode_wav(&vec![0i16; 16000])
    }

    macro_rules! service {
        ($state:expr) => {
            actix_test::init_service(
                App::new()
                    .app_data($state)
                    .route("/asr/transcribe", web::post().to(transcribe_clip)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_raw_wav_body_is_transcribed_by_primary() {
        let primary = Arc::new(ScriptedEngine::new("whisper").with_response("good morning"));
        let app = service!(app_state(Some(primary), None));

        let req = actix_test::TestRequest::post()
            .uri("/asr/transcribe")
            .insert_header((header::CONTENT_TYPE, "audio/wav"))
            .set_payload(one_second_clip())
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["text"], "good morning");
        assert_eq!(body["language"], "en");
        assert_eq!(body["engine"], "primary");
        assert_eq!(body["segments"][0]["end"], 1.0);
        assert!(body.get("fallback").is_none());
    }

    #[actix_web::test]
    async fn test_fallback_names_secondary_model() {
        let primary = Arc::new(ScriptedEngine::new("whisper").with_failure("out of memory"));
        let secondary = Arc::new(ScriptedEngine::new("vosk").with_response("good morning"));
        let state = app_state(Some(primary), Some(secondary));
        let app = service!(state.clone());

        let req = actix_test::TestRequest::post()
            .uri("/asr/transcribe")
            .set_payload(one_second_clip())
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["engine"], "secondary");
        assert_eq!(body["fallback"], "secondary-model");
        assert_eq!(state.get_metrics_snapshot().fallbacks, 1);
    }

    #[actix_web::test]
    async fn test_multipart_upload() {
        let primary = Arc::new(ScriptedEngine::new("whisper").with_response("from a form"));
        let app = service!(app_state(Some(primary), None));

        let boundary = "clipboundary";
        let mut payload = Vec::new();
        payload.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nignored\r\n\
                 --{b}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"clip.wav\"\r\n\
                 Content-Type: audio/wav\r\n\r\n",
                b = boundary
            )
            .as_bytes(),
        );
        payload.extend_from_slice(&one_second_clip());
        payload.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        let req = actix_test::TestRequest::post()
            .uri("/asr/transcribe")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(payload)
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["text"], "from a form");
    }

    #[actix_web::test]
    async fn test_malformed_payload_is_distinguishable_failure() {
        let primary = Arc::new(ScriptedEngine::new("whisper").with_response(""));
        let app = service!(app_state(Some(primary.clone()), None));

        let req = actix_test::TestRequest::post()
            .uri("/asr/transcribe")
            .set_payload(b"definitely not audio".to_vec())
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["type"], "malformed_input");
        assert_eq!(primary.calls(), 0);
    }

    #[actix_web::test]
    async fn test_silence_is_a_successful_empty_transcript() {
        let primary = Arc::new(ScriptedEngine::new("whisper").with_response(""));
        let app = service!(app_state(Some(primary), None));

        let req = actix_test::TestRequest::post()
            .uri("/asr/transcribe")
            .set_payload(one_second_clip())
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["text"], "");
    }

    #[actix_web::test]
    async fn test_both_engines_failing_is_500() {
        let app = service!(app_state(None, None));

        let req = actix_test::TestRequest::post()
            .uri("/asr/transcribe")
            .set_payload(one_second_clip())
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["type"], "transcription_failed");
    }

    #[actix_web::test]
    async fn test_empty_body_is_malformed() {
        let app = service!(app_state(None, None));

        let req = actix_test::TestRequest::post().uri("/asr/transcribe").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
