//! # Engine Management REST API Handlers
//!
//! Visibility into the model registry and a warm-up hook.
//!
//! ## Available Endpoints:
//! - `GET /api/v1/engines` - status of both engine kinds and the inference pool
//! - `POST /api/v1/engines/{kind}/load` - construct an engine now instead of on first use

use crate::transcription::engine::EngineKind;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use tracing::info;

/// Response structure for a warm-up request.
#[derive(Debug, Serialize)]
pub struct EngineLoadResponse {
    pub success: bool,
    pub kind: EngineKind,
    pub engine: String,
    pub model: String,
    pub load_time_ms: u64,
}

/// List both engine kinds with their registry status.
///
/// ## Endpoint: `GET /api/v1/engines`
///
/// ## Response:
/// ```json
/// {
///   "engines": [
///     {"kind": "primary", "model": "tiny", "status": "ready", "description": "Ready for inference"},
///     {"kind": "secondary", "model": "vosk-model-small-en-us-0.15", "status": "not_loaded", "description": "Loads on first use"}
///   ],
///   "inference": {"workers": 2, "idle_workers": 2}
/// }
/// ```
pub async fn engine_status(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let pool = state.orchestrator.pool();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "engines": state.registry.reports(),
        "inference": {
            "workers": pool.workers(),
            "idle_workers": pool.idle_workers()
        }
    })))
}

/// Construct one engine kind now.
///
/// ## Endpoint: `POST /api/v1/engines/{kind}/load`
///
/// Construction happens at most once per kind. Loading an engine that is
/// already ready returns immediately; one that already failed answers 503
/// without retrying.
pub async fn load_engine(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let kind: EngineKind = path
        .parse()
        .map_err(|e: anyhow::Error| AppError::BadRequest(e.to_string()))?;

    let start_time = Instant::now();
    let engine = state.registry.get(kind).await?;
    let load_time_ms = start_time.elapsed().as_millis() as u64;

    info!("{} engine '{}' ready after {}ms", kind, engine.name(), load_time_ms);

    Ok(HttpResponse::Ok().json(EngineLoadResponse {
        success: true,
        kind,
        engine: engine.name().to_string(),
        model: state.registry.identifier(kind).to_string(),
        load_time_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::transcription::mock::{registry_with, ScriptedEngine};
    use actix_web::test as actix_test;
    use actix_web::{http::StatusCode, App};
    use std::sync::Arc;

    fn app_state() -> web::Data<AppState> {
        let primary = Arc::new(ScriptedEngine::new("whisper"));
        web::Data::new(AppState::with_registry(
            AppConfig::default(),
            Arc::new(registry_with(Some(primary), None)),
        ))
    }

    #[actix_web::test]
    async fn test_load_then_status() {
        let app = actix_test::init_service(
            App::new()
                .app_data(app_state())
                .route("/engines", web::get().to(engine_status))
                .route("/engines/{kind}/load", web::post().to(load_engine)),
        )
        .await;

        let req = actix_test::TestRequest::post().uri("/engines/primary/load").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["engine"], "whisper");
        assert_eq!(body["model"], "primary-model");

        let req = actix_test::TestRequest::get().uri("/engines").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["engines"][0]["status"], "ready");
        assert_eq!(body["engines"][1]["status"], "not_loaded");
        assert_eq!(body["inference"]["workers"], 2);
    }

    #[actix_web::test]
    async fn test_load_unavailable_engine_is_503() {
        let app = actix_test::init_service(
            App::new()
                .app_data(app_state())
                .route("/engines/{kind}/load", web::post().to(load_engine)),
        )
        .await;

        let req = actix_test::TestRequest::post().uri("/engines/secondary/load").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "engine_unavailable");
    }

    #[actix_web::test]
    async fn test_unknown_kind_is_400() {
        let app = actix_test::init_service(
            App::new()
                .app_data(app_state())
                .route("/engines/{kind}/load", web::post().to(load_engine)),
        )
        .await;

        let req = actix_test::TestRequest::post().uri("/engines/tertiary/load").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
