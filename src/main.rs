//! # Spoken Coach ASR - Main Application Entry Point
//!
//! Streaming speech-to-text service for a language-learning coach. Learners
//! stream microphone audio over a WebSocket and get interim ("partial") and
//! final transcripts back; whole clips can also be posted in one request.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the server, sessions and engine calls are all asynchronous
//! - **actors**: each WebSocket connection is an actix actor owning its session
//! - **spawn_blocking**: model inference runs on blocking threads, never on the event loop
//! - **Arc**: one model registry shared by every worker and session
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, config.toml, environment)
//! - **state**: shared registry, orchestrator and metrics
//! - **audio**: session buffer, windowing, PCM/WAV decoding, decode pipeline
//! - **transcription**: engines (Whisper, Vosk), registry, inference pool, fallback
//! - **websocket**: the streaming protocol endpoint
//! - **handlers**: single-shot transcription, engine management, config
//! - **health**: health and metrics endpoints
//! - **middleware**: request logging and metrics
//! - **error**: error types and HTTP error responses

mod audio;         // Session buffer, windowing, decoding, pipeline (audio/ directory)
mod config;        // Configuration management (config.rs)
mod device;        // Compute device selection (device.rs)
mod error;         // Error handling types (error.rs)
mod handlers;      // HTTP request handlers (handlers/ directory)
mod health;        // Health check endpoints (health.rs)
mod middleware;    // Custom middleware (middleware/ directory)
mod state;         // Application state management (state.rs)
mod transcription; // Recognition engines and orchestration (transcription/ directory)
mod websocket;     // Streaming WebSocket endpoint (websocket.rs)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::EngineKind;

/// Global shutdown signal, set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from `.env`, config.toml and environment variables
/// 2. **Sets up logging**
/// 3. **Creates shared state**: the model registry registers both engines without loading them
/// 4. **Optionally preloads** the primary engine
/// 5. **Runs the HTTP server** until a shutdown signal arrives
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting spoken-coach-asr v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Engines: primary whisper '{}', secondary vosk '{}'",
        config.models.whisper_model, config.models.vosk_model_path
    );
    info!(
        "Streaming: partial every {} bytes over a {} ms window, {} inference workers",
        config.streaming.partial_threshold_bytes,
        config.streaming.partial_window_ms,
        config.performance.inference_workers
    );

    let app_state = web::Data::new(AppState::new(config.clone()));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    if config.models.preload {
        preload_primary(&app_state).await;
    }

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(server_state.clone())
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/asr", web::get().to(websocket::asr_websocket))
            .route("/asr/transcribe", web::post().to(handlers::transcribe_clip))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/engines", web::get().to(handlers::engine_status))
                    .route("/engines/{kind}/load", web::post().to(handlers::load_engine)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .workers(config.server.workers)
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: filter directives (e.g. "debug", "spoken_coach_asr=trace")
/// - If not set, defaults to "spoken_coach_asr=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spoken_coach_asr=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Construct the primary engine before accepting traffic.
///
/// A failure is logged, not fatal: the secondary engine still serves requests
/// and the primary slot reports `unavailable`.
async fn preload_primary(app_state: &AppState) {
    info!("Preloading primary engine '{}'", app_state.registry.identifier(EngineKind::Primary));
    match app_state.registry.get(EngineKind::Primary).await {
        Ok(engine) => info!("Primary engine '{}' ready", engine.name()),
        Err(e) => warn!("Primary engine preload failed: {}", e),
    }
}

/// Set up signal handlers for graceful shutdown.
///
/// ## What this does:
/// - Listens for SIGTERM (termination signal from the system)
/// - Listens for SIGINT (Ctrl+C)
/// - When either arrives, sets the global shutdown flag
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set.
///
/// Polls every 100ms with an async sleep, so no thread is blocked.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
