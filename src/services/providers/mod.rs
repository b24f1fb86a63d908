// Detection Providers
// Backend adapters for the two detection services:
// - commercial: paid image-analysis API (multipart upload, credential fields, retries)
// - remote_inference: custom HTTP inference server (JSON POST, /health)

pub mod commercial;
pub mod remote_inference;

pub use commercial::CommercialApiClient;
pub use remote_inference::RemoteInferenceClient;

use crate::models::{AnalysisMode, Detection, EncodedImage, HealthStatus};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("API error: {status} - {body}")]
    Status { status: u16, body: String },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Backend credentials not configured")]
    NotConfigured,
    #[error("Temporary file error: {0}")]
    TempFile(#[source] std::io::Error),
    #[error("Invalid image payload: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout(e.to_string())
        } else {
            BackendError::Transport(e)
        }
    }
}

impl BackendError {
    /// Network, timeout or non-2xx: the request never produced a usable body.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BackendError::Transport(_) | BackendError::Timeout(_) | BackendError::Status { .. }
        )
    }

    /// Transport failures worth another attempt: network errors, timeouts and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport(_) | BackendError::Timeout(_) => true,
            BackendError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Per-call settings the orchestrator owns rather than the adapter.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub base_url_override: Option<String>,
}

#[async_trait]
pub trait DetectionBackend: Send + Sync {
    fn mode(&self) -> AnalysisMode;

    /// Submit an encoded image and return a normalized detection.
    async fn analyze(
        &self,
        image: &EncodedImage,
        options: &CallOptions,
    ) -> Result<Detection, BackendError>;

    /// Never fails; problems are reported as `HealthStatus::Error`.
    async fn check_health(&self, options: &CallOptions) -> HealthStatus;
}

/// Run `op` up to `retries + 1` times, retrying only retryable transport errors.
pub(crate) async fn with_retries<T, F, Fut>(
    label: &str,
    retries: u32,
    backoff_ms: u64,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = retries + 1;
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(
                    "[{}] attempt={}/{} failed, retrying: {}",
                    label, attempt, max_attempts, e
                );
                if backoff_ms > 0 {
                    let delay = backoff_ms * attempt as u64;
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
