// Analysis Orchestrator
// Owns the active backend selection and runs preprocess -> detect -> persist

use super::normalizer;
use crate::models::{AnalysisMode, AnalysisResult, HealthStatus, PersistedId, PreprocessOptions};
use crate::services::config_store::AppConfig;
use crate::services::image_preprocessor::{ImagePreprocessor, PreprocessError};
use crate::services::providers::{
    BackendError, CallOptions, CommercialApiClient, DetectionBackend, RemoteInferenceClient,
};
use crate::services::result_store::{ResultSink, ResultStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Image preprocessing failed: {0}")]
    Preprocessing(#[from] PreprocessError),
    #[error("{mode} analysis failed: {source}")]
    Backend {
        mode: AnalysisMode,
        #[source]
        source: BackendError,
    },
}

impl AnalysisError {
    /// Transport failures (network, timeout, non-2xx) as opposed to contract or input errors.
    pub fn is_transport(&self) -> bool {
        matches!(self, AnalysisError::Backend { source, .. } if source.is_transport())
    }
}

/// What happened to the best-effort save after an analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved(PersistedId),
    Skipped,
    Failed(String),
}

pub struct AnalysisOrchestrator {
    preprocessor: ImagePreprocessor,
    preprocess_options: PreprocessOptions,
    commercial: Arc<dyn DetectionBackend>,
    remote_inference: Arc<dyn DetectionBackend>,
    store: Option<Arc<dyn ResultSink>>,
    mode: RwLock<AnalysisMode>,
    remote_base_url: RwLock<Option<String>>,
    auto_save: AtomicBool,
}

impl AnalysisOrchestrator {
    pub fn new(
        commercial: Arc<dyn DetectionBackend>,
        remote_inference: Arc<dyn DetectionBackend>,
        preprocess_options: PreprocessOptions,
    ) -> Self {
        Self {
            preprocessor: ImagePreprocessor::new(),
            preprocess_options,
            commercial,
            remote_inference,
            store: None,
            mode: RwLock::new(AnalysisMode::default()),
            remote_base_url: RwLock::new(None),
            auto_save: AtomicBool::new(true),
        }
    }

    /// Wire real backends and the history store from an effective config.
    ///
    /// The store is omitted when no API key is configured; analyses still run.
    pub fn from_config(config: &AppConfig, user_id: &str) -> Self {
        let commercial = Arc::new(CommercialApiClient::new(config.commercial.clone()));
        let remote = Arc::new(RemoteInferenceClient::new(config.remote_inference.clone()));

        let mut orchestrator = Self::new(commercial, remote, config.image.preprocess_options())
            .with_mode(config.analysis_mode)
            .with_auto_save(config.auto_save_results);
        orchestrator.set_remote_inference_base_url(config.remote_inference_url.clone());

        match ResultStore::new(&config.result_store, user_id) {
            Ok(store) => orchestrator = orchestrator.with_store(Arc::new(store)),
            Err(e) => warn!("[ORCHESTRATOR] Result store disabled: {}", e),
        }
        orchestrator
    }

    pub fn with_store(mut self, store: Arc<dyn ResultSink>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_mode(self, mode: AnalysisMode) -> Self {
        self.set_analysis_mode(mode);
        self
    }

    pub fn with_auto_save(self, enabled: bool) -> Self {
        self.set_auto_save(enabled);
        self
    }

    pub fn current_mode(&self) -> AnalysisMode {
        *self.mode.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch backends by name. Unknown names are rejected and leave the mode unchanged.
    pub fn set_mode(&self, mode: &str) -> bool {
        match AnalysisMode::parse(mode) {
            Some(mode) => {
                self.set_analysis_mode(mode);
                true
            }
            None => {
                warn!("[ORCHESTRATOR] Rejected unknown analysis mode: {:?}", mode);
                false
            }
        }
    }

    /// Applies to calls started after this returns; in-flight calls keep their backend.
    pub fn set_analysis_mode(&self, mode: AnalysisMode) {
        let mut current = self.mode.write().unwrap_or_else(|e| e.into_inner());
        if *current != mode {
            info!("[ORCHESTRATOR] Analysis mode {} -> {}", *current, mode);
        }
        *current = mode;
    }

    pub fn remote_inference_base_url(&self) -> Option<String> {
        self.remote_base_url
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Override the inference server address; `None` or blank restores the configured default.
    pub fn set_remote_inference_base_url(&self, url: Option<String>) {
        let url = url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        info!("[ORCHESTRATOR] Remote inference URL override: {:?}", url);
        *self.remote_base_url.write().unwrap_or_else(|e| e.into_inner()) = url;
    }

    pub fn auto_save_enabled(&self) -> bool {
        self.auto_save.load(Ordering::SeqCst)
    }

    pub fn set_auto_save(&self, enabled: bool) {
        self.auto_save.store(enabled, Ordering::SeqCst);
    }

    fn backend_for(&self, mode: AnalysisMode) -> &Arc<dyn DetectionBackend> {
        match mode {
            AnalysisMode::Commercial => &self.commercial,
            AnalysisMode::RemoteInference => &self.remote_inference,
        }
    }

    fn call_options(&self) -> CallOptions {
        CallOptions {
            base_url_override: self.remote_inference_base_url(),
        }
    }

    /// Analyze one image with the active backend.
    ///
    /// Persistence is best effort and never turns a computed result into an error.
    pub async fn analyze_image(&self, image_ref: &str) -> Result<AnalysisResult, AnalysisError> {
        let (result, _) = self.analyze_image_detailed(image_ref).await?;
        Ok(result)
    }

    /// Like [`analyze_image`](Self::analyze_image), also reporting what happened to the save.
    pub async fn analyze_image_detailed(
        &self,
        image_ref: &str,
    ) -> Result<(AnalysisResult, PersistOutcome), AnalysisError> {
        // Snapshot so a concurrent mode switch cannot change this call's backend.
        let mode = self.current_mode();
        let backend = self.backend_for(mode).clone();
        let options = self.call_options();
        let start = Instant::now();
        info!("[ORCHESTRATOR] Analysis started: mode={} image={}", mode, image_ref);

        let encoded = self
            .preprocessor
            .preprocess(image_ref, &self.preprocess_options)
            .await
            .map_err(|e| {
                error!("[ORCHESTRATOR] Preprocessing failed: {}", e);
                AnalysisError::Preprocessing(e)
            })?;

        let detection = backend.analyze(&encoded, &options).await.map_err(|source| {
            error!("[ORCHESTRATOR] {} backend failed: {}", mode, source);
            AnalysisError::Backend { mode, source }
        })?;

        let invariants = normalizer::check_invariants(&detection);
        if let Err(violation) = &invariants {
            error!("[ORCHESTRATOR] Normalized result violates invariants: {}", violation);
        }
        debug_assert!(invariants.is_ok(), "normalized result violates invariants");

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let mut result =
            AnalysisResult::from_detection(detection, backend.mode(), image_ref.to_string(), elapsed_ms);
        info!(
            "[ORCHESTRATOR] Analysis done in {}ms: prediction={} confidence={} mode={}",
            elapsed_ms, result.prediction, result.confidence, result.analysis_mode
        );

        let outcome = self.persist(&result).await;
        if let PersistOutcome::Saved(id) = &outcome {
            result.id = Some(id.0.clone());
        }
        Ok((result, outcome))
    }

    async fn persist(&self, result: &AnalysisResult) -> PersistOutcome {
        if !self.auto_save_enabled() {
            return PersistOutcome::Skipped;
        }
        let Some(store) = &self.store else {
            return PersistOutcome::Skipped;
        };

        match store.save(result).await {
            Ok(id) => {
                info!("[ORCHESTRATOR] Result persisted: id={}", id);
                PersistOutcome::Saved(id)
            }
            Err(e) => {
                warn!("[ORCHESTRATOR] Result not persisted: {}", e);
                PersistOutcome::Failed(e.to_string())
            }
        }
    }

    /// Health of the active backend.
    pub async fn check_health(&self) -> HealthStatus {
        let mode = self.current_mode();
        let status = self.backend_for(mode).check_health(&self.call_options()).await;
        info!("[ORCHESTRATOR] Health check: mode={} healthy={}", mode, status.is_healthy());
        status
    }
}
