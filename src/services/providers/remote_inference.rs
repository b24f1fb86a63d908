// Remote Inference Server
// JSON client for the self-hosted image classification server

use super::{BackendError, CallOptions, DetectionBackend};
use crate::models::{AnalysisMode, Detection, EncodedImage, HealthStatus, ModelInfo};
use crate::services::config_store::RemoteInferenceConfig;
use crate::services::detection::normalizer::{self, InferenceOutput};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    prediction: Option<String>,
    #[serde(default)]
    confidence: Option<serde_json::Value>,
    #[serde(default)]
    probabilities: Option<RawProbabilities>,
    #[serde(default)]
    model_used: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProbabilities {
    real: serde_json::Value,
    fake: serde_json::Value,
}

impl RawProbabilities {
    fn pair(&self) -> Result<(f64, f64), BackendError> {
        match (number_like(&self.real), number_like(&self.fake)) {
            (Some(real), Some(fake)) => Ok((real, fake)),
            _ => Err(BackendError::MalformedResponse(format!(
                "non-numeric probabilities: real={} fake={}",
                self.real, self.fake
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    model_loaded: Option<bool>,
}

fn number_like(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn non_empty(url: Option<&str>) -> Option<&str> {
    url.map(str::trim).filter(|u| !u.is_empty())
}

pub struct RemoteInferenceClient {
    client: Client,
    config: RemoteInferenceConfig,
}

impl RemoteInferenceClient {
    pub fn new(config: RemoteInferenceConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();

        Self { client, config }
    }

    pub fn config(&self) -> &RemoteInferenceConfig {
        &self.config
    }

    /// Orchestrator override first, configured default second.
    fn resolve_base_url(&self, options: &CallOptions) -> Result<String, BackendError> {
        non_empty(options.base_url_override.as_deref())
            .or_else(|| non_empty(self.config.default_base_url.as_deref()))
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                BackendError::Unavailable("no inference server URL configured".to_string())
            })
    }

    pub async fn analyze_encoded(
        &self,
        image: &EncodedImage,
        options: &CallOptions,
    ) -> Result<Detection, BackendError> {
        let base_url = self.resolve_base_url(options)?;
        let url = format!("{}/analyze", base_url);
        let start = Instant::now();
        info!(
            "[REMOTE_INFERENCE] Analyzing: url={} payload_len={}",
            url,
            image.base64.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&AnalyzeRequest {
                image: &image.base64,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(
                "[REMOTE_INFERENCE] Server returned {}: {}",
                status.as_u16(),
                body
            );
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: AnalyzeResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::MalformedResponse(format!("invalid JSON: {}", e)))?;
        if let Some(error) = data.error.as_deref().filter(|_| data.prediction.is_none()) {
            return Err(BackendError::MalformedResponse(format!("server error: {}", error)));
        }
        let label = data
            .prediction
            .as_deref()
            .ok_or_else(|| BackendError::MalformedResponse("prediction missing".to_string()))?;

        let output = InferenceOutput {
            label,
            confidence: data.confidence.as_ref().and_then(number_like),
            probabilities: data.probabilities.as_ref().map(RawProbabilities::pair).transpose()?,
        };
        let model_used = data
            .model_used
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(self.config.model_name.as_str());

        let detection = normalizer::normalize_inference(&output, model_used, &self.config.model_author)
            .map_err(BackendError::MalformedResponse)?;

        info!(
            "[REMOTE_INFERENCE] Completed in {}ms: prediction={} confidence={}",
            start.elapsed().as_millis(),
            detection.prediction,
            detection.confidence
        );
        Ok(detection)
    }

    /// Descriptive model card from `/model-info`.
    pub async fn model_info(&self, options: &CallOptions) -> Result<ModelInfo, BackendError> {
        let url = format!("{}/model-info", self.resolve_base_url(options)?);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| BackendError::MalformedResponse(format!("invalid model info: {}", e)))
    }

    async fn probe_health(&self, options: &CallOptions) -> Result<HealthStatus, BackendError> {
        let url = format!("{}/health", self.resolve_base_url(options)?);
        debug!("[REMOTE_INFERENCE] Health probe: {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: HealthResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::MalformedResponse(format!("invalid health body: {}", e)))?;
        let model = data
            .model
            .ok_or_else(|| BackendError::MalformedResponse("health body has no model".to_string()))?;

        Ok(HealthStatus::Healthy {
            mode: AnalysisMode::RemoteInference,
            model: Some(model),
            model_loaded: data.model_loaded,
            operations: None,
        })
    }
}

#[async_trait]
impl DetectionBackend for RemoteInferenceClient {
    fn mode(&self) -> AnalysisMode {
        AnalysisMode::RemoteInference
    }

    async fn analyze(
        &self,
        image: &EncodedImage,
        options: &CallOptions,
    ) -> Result<Detection, BackendError> {
        self.analyze_encoded(image, options).await
    }

    async fn check_health(&self, options: &CallOptions) -> HealthStatus {
        match self.probe_health(options).await {
            Ok(status) => status,
            Err(e) => {
                warn!("[REMOTE_INFERENCE] Health check failed: {}", e);
                HealthStatus::Error {
                    mode: AnalysisMode::RemoteInference,
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Prediction, Probabilities};
    use crate::services::test_support::{sample_image, spawn_stub};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn config_without_default() -> RemoteInferenceConfig {
        RemoteInferenceConfig {
            default_base_url: None,
            timeout_secs: 5,
            ..RemoteInferenceConfig::default()
        }
    }

    fn override_for(base: &str) -> CallOptions {
        CallOptions {
            base_url_override: Some(base.to_string()),
        }
    }

    async fn spawn_analyze_stub(status: StatusCode, body: Value) -> (String, Arc<Mutex<Vec<Value>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        let router = Router::new().route(
            "/analyze",
            post(move |Json(payload): Json<Value>| {
                let seen = seen.clone();
                let body = body.clone();
                async move {
                    seen.lock().unwrap().push(payload);
                    (status, Json(body))
                }
            }),
        );
        (spawn_stub(router).await, requests)
    }

    #[tokio::test]
    async fn test_analyze_with_probabilities() {
        let (base, requests) = spawn_analyze_stub(
            StatusCode::OK,
            json!({
                "prediction": "Sahte",
                "confidence": 91.3,
                "probabilities": {"real": 8.7, "fake": 91.3},
                "model_used": "haywoodsloan/ai-image-detector-deploy",
                "model_info": "SwinV2-based AI vs Real detection"
            }),
        )
        .await;
        let client = RemoteInferenceClient::new(config_without_default());
        let image = sample_image();

        let detection = client
            .analyze_encoded(&image, &override_for(&base))
            .await
            .unwrap();

        assert_eq!(detection.prediction, Prediction::Fake);
        assert_eq!(detection.confidence, 91);
        assert_eq!(detection.probabilities, Probabilities { real: 9, fake: 91 });
        assert_eq!(detection.model_used, "haywoodsloan/ai-image-detector-deploy");
        assert_eq!(detection.model_author, "haywoodsloan");

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["image"], json!(image.base64));
    }

    #[tokio::test]
    async fn test_analyze_confidence_only() {
        let (base, _) =
            spawn_analyze_stub(StatusCode::OK, json!({"prediction": "Real", "confidence": 70})).await;
        let client = RemoteInferenceClient::new(config_without_default());

        let detection = client
            .analyze_encoded(&sample_image(), &override_for(&base))
            .await
            .unwrap();

        assert_eq!(detection.prediction, Prediction::Real);
        assert_eq!(detection.confidence, 70);
        assert_eq!(detection.probabilities, Probabilities { real: 70, fake: 30 });
        assert_eq!(detection.model_used, client.config().model_name);
    }

    #[tokio::test]
    async fn test_analyze_uses_configured_default_url() {
        let (base, requests) =
            spawn_analyze_stub(StatusCode::OK, json!({"prediction": "Gerçek", "confidence": "64.5"})).await;
        let client = RemoteInferenceClient::new(RemoteInferenceConfig {
            default_base_url: Some(format!("{}/", base)),
            timeout_secs: 5,
            ..RemoteInferenceConfig::default()
        });

        let detection = client
            .analyze_encoded(&sample_image(), &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(detection.prediction, Prediction::Real);
        assert_eq!(detection.confidence, 65);
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_string_probabilities_accepted() {
        let (base, _) = spawn_analyze_stub(
            StatusCode::OK,
            json!({"prediction": "Real", "probabilities": {"real": "70", "fake": "30"}}),
        )
        .await;
        let client = RemoteInferenceClient::new(config_without_default());

        let detection = client
            .analyze_encoded(&sample_image(), &override_for(&base))
            .await
            .unwrap();
        assert_eq!(detection.prediction, Prediction::Real);
        assert_eq!(detection.probabilities, Probabilities { real: 70, fake: 30 });

        let (base, _) = spawn_analyze_stub(
            StatusCode::OK,
            json!({"prediction": "Real", "probabilities": {"real": "high", "fake": null}}),
        )
        .await;
        let err = client
            .analyze_encoded(&sample_image(), &override_for(&base))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_slow_server_times_out_as_transport_error() {
        let router = Router::new().route(
            "/analyze",
            post(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                Json(json!({"prediction": "Real", "confidence": 90}))
            }),
        );
        let base = spawn_stub(router).await;
        let client = RemoteInferenceClient::new(RemoteInferenceConfig {
            timeout_secs: 1,
            ..config_without_default()
        });

        let err = client
            .analyze_encoded(&sample_image(), &override_for(&base))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)), "unexpected error: {:?}", err);
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_non_success_status_carries_body() {
        let (base, _) = spawn_analyze_stub(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "model failed to load"}),
        )
        .await;
        let client = RemoteInferenceClient::new(config_without_default());

        match client.analyze_encoded(&sample_image(), &override_for(&base)).await {
            Err(BackendError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("model failed to load"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_prediction_is_malformed() {
        let (base, _) = spawn_analyze_stub(StatusCode::OK, json!({"confidence": 50})).await;
        let client = RemoteInferenceClient::new(config_without_default());

        let err = client
            .analyze_encoded(&sample_image(), &override_for(&base))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse(_)));

        let (base, _) =
            spawn_analyze_stub(StatusCode::OK, json!({"prediction": "unclear", "confidence": 50})).await;
        let err = client
            .analyze_encoded(&sample_image(), &override_for(&base))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_unavailable_without_url() {
        let client = RemoteInferenceClient::new(config_without_default());

        let err = client
            .analyze_encoded(&sample_image(), &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));

        let health = client.check_health(&CallOptions::default()).await;
        assert!(!health.is_healthy());
    }

    #[tokio::test]
    async fn test_health_and_model_info() {
        let router = Router::new()
            .route(
                "/health",
                get(|| async {
                    Json(json!({
                        "status": "healthy",
                        "model": "haywoodsloan/ai-image-detector-deploy",
                        "model_loaded": false,
                        "timestamp": 1717000000.5
                    }))
                }),
            )
            .route(
                "/model-info",
                get(|| async {
                    Json(json!({
                        "model_name": "haywoodsloan/ai-image-detector-deploy",
                        "model_type": "SwinV2 (Swin Transformer V2)",
                        "author": "haywoodsloan",
                        "size": "781 MB"
                    }))
                }),
            );
        let base = spawn_stub(router).await;
        let client = RemoteInferenceClient::new(config_without_default());
        let options = override_for(&base);

        let health = client.check_health(&options).await;
        assert_eq!(
            health,
            HealthStatus::Healthy {
                mode: AnalysisMode::RemoteInference,
                model: Some("haywoodsloan/ai-image-detector-deploy".to_string()),
                model_loaded: Some(false),
                operations: None,
            }
        );

        let info = client.model_info(&options).await.unwrap();
        assert_eq!(info.author.as_deref(), Some("haywoodsloan"));
        assert!(info.url.is_none());
    }

    #[tokio::test]
    async fn test_health_without_model_is_error() {
        let router = Router::new().route("/health", get(|| async { Json(json!({"status": "ok"})) }));
        let base = spawn_stub(router).await;
        let client = RemoteInferenceClient::new(config_without_default());

        let health = client.check_health(&override_for(&base)).await;
        assert!(matches!(
            health,
            HealthStatus::Error {
                mode: AnalysisMode::RemoteInference,
                ..
            }
        ));
    }
}
