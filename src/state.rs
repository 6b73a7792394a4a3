//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor through
//! `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Several owners of one value, freed when the last owner drops it
//! - **Why needed**: every actix worker and every session holds the same registry
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: many readers OR one writer
//! - **Why needed**: each request and each delivered transcript bumps a counter
//!
//! ## What is shared:
//! - **Configuration**: immutable after startup, so a plain `Arc`
//! - **Model Registry**: the only resource sessions share; engines are built once
//! - **Fallback Orchestrator**: stateless wrapper around registry and inference pool
//! - **Metrics**: counters behind `Arc<RwLock<_>>`
//!
//! A poisoned metrics lock is recovered rather than propagated: counters stay
//! usable even if a thread panicked while holding the lock.

use crate::audio::session::SessionOutput;
use crate::config::AppConfig;
use crate::transcription::fallback::FallbackOrchestrator;
use crate::transcription::pool::InferencePool;
use crate::transcription::registry::ModelRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: cloning copies the `Arc` pointers, not the data
/// - **Instant**: Copy type, needs no lock because it never changes
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration, fixed for the process lifetime
    pub config: Arc<AppConfig>,

    /// Request and streaming counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Process-wide engine handles
    pub registry: Arc<ModelRegistry>,

    /// Primary-then-secondary transcription over the registry
    pub orchestrator: Arc<FallbackOrchestrator>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all requests and sessions.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: HTTP load and reliability
/// - **active_sessions**: open WebSocket sessions, checked against the admission limit
/// - **partials_sent / finals_sent**: streaming output volume
/// - **final_errors**: utterances where both engines failed
/// - **fallbacks**: results the secondary engine had to produce
/// - **endpoint_metrics**: per-route statistics keyed by "METHOD /pattern"
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_sessions: u32,
    pub sessions_opened: u64,
    pub partials_sent: u64,
    pub finals_sent: u64,
    pub final_errors: u64,
    pub fallbacks: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the state for a validated configuration.
    ///
    /// ## What this does:
    /// 1. Registers both engine kinds without constructing them (lazy)
    /// 2. Sizes the inference pool from `performance.inference_workers`
    /// 3. Starts empty metrics and the uptime clock
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(ModelRegistry::from_config(&config));
        Self::with_registry(config, registry)
    }

    /// Same as `new` but with a caller-supplied registry (tests use scripted engines).
    pub fn with_registry(config: AppConfig, registry: Arc<ModelRegistry>) -> Self {
        let pool = InferencePool::new(config.performance.inference_workers);
        let orchestrator = Arc::new(FallbackOrchestrator::new(registry.clone(), pool));

        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry,
            orchestrator,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.as_ref().clone()
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Rust Concepts:
    /// - **.entry()**: Gets or creates a HashMap entry
    /// - **.or_default()**: Creates default value if the key doesn't exist
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Admit a new streaming session unless `limit` sessions are already open.
    ///
    /// Check and increment happen under one write lock, so two upgrades racing
    /// for the last slot cannot both succeed.
    pub fn try_open_session(&self, limit: usize) -> bool {
        let mut metrics = self.write_metrics();
        if metrics.active_sessions as usize >= limit {
            return false;
        }
        metrics.active_sessions += 1;
        metrics.sessions_opened += 1;
        true
    }

    /// Release a session slot. Never goes below zero.
    pub fn close_session(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Count a transcript that was actually sent to a client.
    pub fn record_output(&self, output: &SessionOutput) {
        let mut metrics = self.write_metrics();
        match output {
            SessionOutput::Partial { .. } => metrics.partials_sent += 1,
            SessionOutput::Final { result, .. } => {
                metrics.finals_sent += 1;
                if result.is_err() {
                    metrics.final_errors += 1;
                }
            }
        }
        if output.used_fallback() {
            metrics.fallbacks += 1;
        }
    }

    /// Count a single-shot transcript produced by the secondary engine.
    pub fn record_fallback(&self) {
        self.write_metrics().fallbacks += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Cloning releases the lock before the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Calculate the average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Calculate the error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
