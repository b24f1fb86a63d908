// Commercial Detection API
// Multipart upload client for the paid AI-image detection service

use super::{with_retries, BackendError, CallOptions, DetectionBackend};
use crate::models::{AnalysisMode, Detection, EncodedImage, HealthStatus, UsageInfo};
use crate::services::config_store::CommercialConfig;
use crate::services::detection::normalizer;
use crate::services::image_preprocessor::strip_data_uri_prefix;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

const MODEL_USED: &str = "Sightengine AI Detection";
const MODEL_AUTHOR: &str = "Sightengine";
const DOCUMENTATION_URL: &str = "https://sightengine.com/docs/ai-generated-image-detection";

#[derive(Debug, Deserialize)]
struct CheckResponse {
    status: Option<String>,
    #[serde(default)]
    request: Option<RequestMeta>,
    #[serde(rename = "type", default)]
    scores: Option<TypeScores>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RequestMeta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    operations: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TypeScores {
    #[serde(default)]
    ai_generated: Option<f64>,
}

/// A validated `success` answer.
#[derive(Debug, Clone)]
struct CheckOutcome {
    score: f64,
    request_id: Option<String>,
    operations: Option<u64>,
}

fn describe_error(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(|m| m.to_string())
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

fn parse_check_response(body: &str) -> Result<CheckOutcome, BackendError> {
    let data: CheckResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let status = data.status.as_deref().unwrap_or("undefined");
    if status != "success" {
        let detail = data
            .error
            .as_ref()
            .map(describe_error)
            .unwrap_or_default();
        return Err(BackendError::MalformedResponse(format!(
            "status {} {}",
            status, detail
        )));
    }

    let score = data
        .scores
        .as_ref()
        .and_then(|s| s.ai_generated)
        .ok_or_else(|| BackendError::MalformedResponse("type.ai_generated missing".to_string()))?;
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(BackendError::MalformedResponse(format!(
            "type.ai_generated out of range: {}",
            score
        )));
    }

    Ok(CheckOutcome {
        score,
        request_id: data.request.as_ref().and_then(|r| r.id.clone()),
        operations: data.request.as_ref().and_then(|r| r.operations),
    })
}

pub struct CommercialApiClient {
    client: Client,
    config: CommercialConfig,
    temp_dir: Option<PathBuf>,
}

impl CommercialApiClient {
    pub fn new(config: CommercialConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();

        Self {
            client,
            config,
            temp_dir: None,
        }
    }

    /// Directory for upload temp files; defaults to the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &CommercialConfig {
        &self.config
    }

    pub fn usage_info(&self) -> UsageInfo {
        UsageInfo {
            provider: MODEL_AUTHOR.to_string(),
            model: self.config.model.clone(),
            endpoint: self.config.check_url(),
            configured: self.config.is_configured(),
            documentation: DOCUMENTATION_URL.to_string(),
        }
    }

    /// Analyze an image the service can fetch itself.
    pub async fn analyze_by_url(&self, image_url: &str) -> Result<Detection, BackendError> {
        let outcome = self.check_by_url(image_url).await?;
        Ok(self.to_detection(outcome))
    }

    /// Upload an encoded image: temp-file multipart first, inline data URI second.
    pub async fn analyze_encoded(&self, image: &EncodedImage) -> Result<Detection, BackendError> {
        let (user, secret) = self.config.credentials().ok_or(BackendError::NotConfigured)?;
        let clean = strip_data_uri_prefix(&image.base64);
        let bytes = BASE64
            .decode(clean)
            .map_err(|e| BackendError::InvalidPayload(e.to_string()))?;

        let start = Instant::now();
        info!(
            "[COMMERCIAL] Analyzing upload: endpoint={} model={} bytes={}",
            self.config.check_url(),
            self.config.model,
            bytes.len()
        );

        let body = match self.send_file_upload(&bytes, user, secret).await {
            Ok(body) => body,
            Err(e) if e.is_transport() || matches!(e, BackendError::TempFile(_)) => {
                warn!("[COMMERCIAL] File upload failed, trying inline data URI: {}", e);
                self.send_data_uri(clean, user, secret).await?
            }
            Err(e) => return Err(e),
        };

        let outcome = parse_check_response(&body)?;
        info!(
            "[COMMERCIAL] Completed in {}ms: score={:.4} request_id={:?}",
            start.elapsed().as_millis(),
            outcome.score,
            outcome.request_id
        );
        Ok(self.to_detection(outcome))
    }

    async fn check_by_url(&self, image_url: &str) -> Result<CheckOutcome, BackendError> {
        let (user, secret) = self.config.credentials().ok_or(BackendError::NotConfigured)?;
        let url = self.config.check_url();
        let model = self.config.model.as_str();
        debug!("[COMMERCIAL] Analyzing by URL: {}", image_url);

        let body = with_retries(
            "COMMERCIAL",
            self.config.retries,
            self.config.retry_backoff_ms,
            |_| {
                let request = self.client.get(&url).query(&[
                    ("url", image_url),
                    ("models", model),
                    ("api_user", user),
                    ("api_secret", secret),
                ]);
                self.send_check(request)
            },
        )
        .await?;

        parse_check_response(&body)
    }

    async fn send_file_upload(
        &self,
        bytes: &[u8],
        user: &str,
        secret: &str,
    ) -> Result<String, BackendError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("temp_image_").suffix(".jpg");
        let temp = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(BackendError::TempFile)?;

        let result = self.upload_temp_file(temp.path(), bytes, user, secret).await;

        let path = temp.path().to_path_buf();
        match temp.close() {
            Ok(()) => debug!("[COMMERCIAL] Temp file removed: {}", path.display()),
            Err(e) => warn!("[COMMERCIAL] Failed to remove temp file {}: {}", path.display(), e),
        }
        result
    }

    async fn upload_temp_file(
        &self,
        path: &Path,
        bytes: &[u8],
        user: &str,
        secret: &str,
    ) -> Result<String, BackendError> {
        tokio::fs::write(path, bytes)
            .await
            .map_err(BackendError::TempFile)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "temp_image.jpg".to_string());
        let url = self.config.check_url();
        let model = self.config.model.as_str();

        with_retries(
            "COMMERCIAL",
            self.config.retries,
            self.config.retry_backoff_ms,
            |attempt| {
                let url = url.as_str();
                let file_name = file_name.clone();
                async move {
                    debug!("[COMMERCIAL] File upload attempt {}", attempt);
                    let data = tokio::fs::read(path).await.map_err(BackendError::TempFile)?;
                    let media = Part::bytes(data)
                        .file_name(file_name)
                        .mime_str("image/jpeg")?;
                    let form = Form::new()
                        .part("media", media)
                        .text("models", model.to_string())
                        .text("api_user", user.to_string())
                        .text("api_secret", secret.to_string());
                    self.send_check(self.client.post(url).multipart(form)).await
                }
            },
        )
        .await
    }

    async fn send_data_uri(
        &self,
        clean_base64: &str,
        user: &str,
        secret: &str,
    ) -> Result<String, BackendError> {
        let data_uri = format!("data:image/jpeg;base64,{}", clean_base64);
        let url = self.config.check_url();
        let model = self.config.model.as_str();

        with_retries(
            "COMMERCIAL",
            self.config.retries,
            self.config.retry_backoff_ms,
            |_| {
                let form = Form::new()
                    .text("media", data_uri.clone())
                    .text("models", model.to_string())
                    .text("api_user", user.to_string())
                    .text("api_secret", secret.to_string());
                self.send_check(self.client.post(&url).multipart(form))
            },
        )
        .await
    }

    /// Send one request and return the raw body of a 2xx answer.
    async fn send_check(&self, request: RequestBuilder) -> Result<String, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").map(describe_error))
                .unwrap_or(body);
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: message,
            });
        }

        Ok(body)
    }

    fn to_detection(&self, outcome: CheckOutcome) -> Detection {
        let mut detection =
            normalizer::classify_score(outcome.score, &self.config.thresholds, MODEL_USED, MODEL_AUTHOR);
        detection.request_id = outcome.request_id;
        detection
    }
}

#[async_trait]
impl DetectionBackend for CommercialApiClient {
    fn mode(&self) -> AnalysisMode {
        AnalysisMode::Commercial
    }

    async fn analyze(
        &self,
        image: &EncodedImage,
        _options: &CallOptions,
    ) -> Result<Detection, BackendError> {
        self.analyze_encoded(image).await
    }

    async fn check_health(&self, _options: &CallOptions) -> HealthStatus {
        if !self.config.is_configured() {
            return HealthStatus::Error {
                mode: AnalysisMode::Commercial,
                error: BackendError::NotConfigured.to_string(),
            };
        }

        match self.check_by_url(&self.config.health_image_url).await {
            Ok(outcome) => HealthStatus::Healthy {
                mode: AnalysisMode::Commercial,
                model: Some(self.config.model.clone()),
                model_loaded: None,
                operations: Some(outcome.operations.unwrap_or(0)),
            },
            Err(e) => {
                warn!("[COMMERCIAL] Health check failed: {}", e);
                HealthStatus::Error {
                    mode: AnalysisMode::Commercial,
                    error: e.to_string(),
                }
            }
        }
    }
}
