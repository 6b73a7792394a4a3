use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration after all layers were applied. Read-only.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": config.server,
            "models": config.models,
            "streaming": {
                "sample_rate": config.streaming.sample_rate,
                "partial_threshold_bytes": config.streaming.partial_threshold_bytes,
                "partial_window_ms": config.streaming.partial_window_ms,
                "partial_window_bytes": config.streaming.partial_window_bytes(),
                "heartbeat_interval_secs": config.streaming.heartbeat_interval_secs,
                "client_timeout_secs": config.streaming.client_timeout_secs
            },
            "performance": config.performance
        }
    })))
}
