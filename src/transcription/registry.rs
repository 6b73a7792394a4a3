//! # Model Registry
//!
//! Process-wide owner of the two recognition engines. Each engine kind is built
//! lazily on first use, exactly once, and then shared by every session.
//!
//! ## Key Features:
//! - **Single construction**: concurrent first callers wait for the one in-flight
//!   construction instead of building their own copy
//! - **Terminal unavailability**: a failed construction is remembered; later calls
//!   fail fast with `EngineUnavailable` instead of retrying the expensive load
//! - **Status reporting**: not loaded / ready / unavailable, per kind
//!
//! ## State Transitions (per kind):
//! NotLoaded → Ready
//! NotLoaded → Unavailable
//! Both end states are final for the lifetime of the process.

use crate::config::AppConfig;
use crate::error::AppError;
use crate::transcription::engine::{EngineKind, RecognitionEngine};
use crate::transcription::{model, vosk};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Future returned by an engine factory.
pub type EngineFuture = BoxFuture<'static, anyhow::Result<Arc<dyn RecognitionEngine>>>;

/// Builds an engine. Called at most once per registry slot, outside of cancellation.
pub type EngineFactory = Box<dyn Fn() -> EngineFuture + Send + Sync>;

/// How to build one engine kind.
pub struct EngineSpec {
    /// Model identifier reported by health and single-shot responses
    pub identifier: String,
    pub factory: EngineFactory,
}

impl EngineSpec {
    pub fn new<F>(identifier: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> EngineFuture + Send + Sync + 'static,
    {
        Self {
            identifier: identifier.into(),
            factory: Box::new(factory),
        }
    }
}

/// Current status of an engine kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineStatus {
    /// Not requested yet
    NotLoaded,
    /// Constructed and serving requests
    Ready,
    /// Construction failed; will not be retried
    Unavailable { message: String },
}

impl EngineStatus {
    pub fn description(&self) -> String {
        match self {
            EngineStatus::NotLoaded => "Loads on first use".to_string(),
            EngineStatus::Ready => "Ready for inference".to_string(),
            EngineStatus::Unavailable { message } => format!("Unavailable: {}", message),
        }
    }
}

/// Status line for one engine kind.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub kind: EngineKind,
    pub model: String,
    #[serde(flatten)]
    pub status: EngineStatus,
    pub description: String,
}

type SlotOutcome = Result<Arc<dyn RecognitionEngine>, String>;

struct EngineSlot {
    identifier: String,
    factory: EngineFactory,
    cell: OnceCell<SlotOutcome>,
}

impl EngineSlot {
    fn new(spec: EngineSpec) -> Self {
        Self {
            identifier: spec.identifier,
            factory: spec.factory,
            cell: OnceCell::new(),
        }
    }

    fn status(&self) -> EngineStatus {
        match self.cell.get() {
            None => EngineStatus::NotLoaded,
            Some(Ok(_)) => EngineStatus::Ready,
            Some(Err(message)) => EngineStatus::Unavailable {
                message: message.clone(),
            },
        }
    }
}

/// Central registry of recognition engines.
///
/// ## Thread Safety:
/// `tokio::sync::OnceCell` serializes only the one-time construction; after
/// that, `get` is a lock-free read returning a cloned `Arc`.
pub struct ModelRegistry {
    primary: EngineSlot,
    secondary: EngineSlot,
}

impl ModelRegistry {
    pub fn new(primary: EngineSpec, secondary: EngineSpec) -> Self {
        Self {
            primary: EngineSlot::new(primary),
            secondary: EngineSlot::new(secondary),
        }
    }

    /// Registry wired to Whisper (primary) and Vosk (secondary) from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(model::engine_spec(&config.models), vosk::engine_spec(&config.models))
    }

    fn slot(&self, kind: EngineKind) -> &EngineSlot {
        match kind {
            EngineKind::Primary => &self.primary,
            EngineKind::Secondary => &self.secondary,
        }
    }

    /// Get the engine for `kind`, constructing it on first use.
    ///
    /// ## Returns:
    /// - **Ok(engine)**: the shared handle
    /// - **Err(EngineUnavailable)**: construction failed now or earlier
    pub async fn get(&self, kind: EngineKind) -> Result<Arc<dyn RecognitionEngine>, AppError> {
        let slot = self.slot(kind);

        let outcome = slot
            .cell
            .get_or_init(|| async {
                info!("Constructing {} engine ({})", kind, slot.identifier);
                let start_time = Instant::now();

                match (slot.factory)().await {
                    Ok(engine) => {
                        info!(
                            "{} engine '{}' ready in {:.2}s",
                            kind,
                            engine.name(),
                            start_time.elapsed().as_secs_f64()
                        );
                        Ok(engine)
                    }
                    Err(e) => {
                        warn!("{} engine ({}) is unavailable: {:#}", kind, slot.identifier, e);
                        Err(format!("{:#}", e))
                    }
                }
            })
            .await;

        match outcome {
            Ok(engine) => Ok(engine.clone()),
            Err(message) => Err(AppError::EngineUnavailable(format!(
                "{} engine ({}): {}",
                kind, slot.identifier, message
            ))),
        }
    }

    pub fn status(&self, kind: EngineKind) -> EngineStatus {
        self.slot(kind).status()
    }

    pub fn identifier(&self, kind: EngineKind) -> &str {
        &self.slot(kind).identifier
    }

    /// Status of both kinds, primary first.
    pub fn reports(&self) -> Vec<EngineReport> {
        EngineKind::ALL
            .iter()
            .map(|&kind| {
                let status = self.status(kind);
                EngineReport {
                    kind,
                    model: self.identifier(kind).to_string(),
                    description: status.description(),
                    status,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::mock::ScriptedEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_spec(counter: Arc<AtomicUsize>, fail: bool) -> EngineSpec {
        EngineSpec::new("scripted", move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Long enough for every concurrent caller to pile up on the cell
                tokio::time::sleep(Duration::from_millis(50)).await;
                if fail {
                    anyhow::bail!("model artifact missing");
                }
                let engine: Arc<dyn RecognitionEngine> = Arc::new(ScriptedEngine::new("scripted"));
                Ok(engine)
            }) as EngineFuture
        })
    }

    #[tokio::test]
    async fn test_concurrent_first_use_constructs_once() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ModelRegistry::new(
            counting_spec(constructions.clone(), false),
            counting_spec(Arc::new(AtomicUsize::new(0)), false),
        ));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.get(EngineKind::Primary).await.is_ok() }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert_eq!(registry.status(EngineKind::Primary), EngineStatus::Ready);
        assert_eq!(registry.status(EngineKind::Secondary), EngineStatus::NotLoaded);
    }

    #[tokio::test]
    async fn test_failed_construction_is_terminal() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let registry = ModelRegistry::new(
            counting_spec(Arc::new(AtomicUsize::new(0)), false),
            counting_spec(constructions.clone(), true),
        );

        for _ in 0..3 {
            let err = registry.get(EngineKind::Secondary).await.err().unwrap();
            assert_eq!(err.kind(), "engine_unavailable");
            assert!(err.detail().contains("model artifact missing"));
        }

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert!(matches!(
            registry.status(EngineKind::Secondary),
            EngineStatus::Unavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_reports_serialize_status() {
        let registry = ModelRegistry::new(
            counting_spec(Arc::new(AtomicUsize::new(0)), false),
            counting_spec(Arc::new(AtomicUsize::new(0)), true),
        );
        let _ = registry.get(EngineKind::Secondary).await;

        let json = serde_json::to_value(registry.reports()).unwrap();
        assert_eq!(json[0]["kind"], "primary");
        assert_eq!(json[0]["status"], "not_loaded");
        assert_eq!(json[1]["status"], "unavailable");
        assert!(json[1]["message"].as_str().unwrap().contains("missing"));
    }
}
