// Result Store Client
// REST client for the remote analysis history service

use crate::models::{
    AnalysisMode, AnalysisResult, ConnectionState, ConnectionStatus, DeviceInfo, Feedback,
    HistoryRecord, HistoryStatistics, PersistedId, Prediction,
};
use crate::services::config_store::ResultStoreConfig;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

const ANALYSIS_RESULTS_ENDPOINT: &str = "/analysis-results";
const FEEDBACK_ENDPOINT: &str = "/feedback";
const STATISTICS_ENDPOINT: &str = "/statistics";
const HEALTH_ENDPOINT: &str = "/health";

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Result store not configured: {0}")]
    NotConfigured(String),
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Result store error: {status} - {message}")]
    Status { status: u16, message: String },
    #[error("Failed to decode store response: {0}")]
    Decode(String),
}

/// Destination for finished analyses.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn save(&self, result: &AnalysisResult) -> Result<PersistedId, PersistenceError>;
}

#[derive(Debug, Serialize)]
struct SavePayload<'a> {
    image_hash: String,
    image_data: &'a str,
    prediction: Prediction,
    confidence: u32,
    analysis_mode: AnalysisMode,
    processing_time: u64,
    model_used: &'a str,
    model_author: &'a str,
    /// The service stores this column as text.
    probabilities: String,
    raw_score: f64,
    timestamp: String,
    device_info: DeviceInfo,
    app_version: String,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct FeedbackPayload<'a> {
    analysis_id: serde_json::Value,
    feedback: Feedback,
    timestamp: String,
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryPayload {
    Page { results: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

/// Short content key for a stored image reference.
pub fn image_hash(image_ref: &str) -> String {
    let digest = hex::encode(Sha256::digest(image_ref.as_bytes()));
    digest[..16].to_string()
}

/// Numeric ids go out as numbers; the service keys feedback by integer id.
fn analysis_id_value(id: &str) -> serde_json::Value {
    match id.trim().parse::<i64>() {
        Ok(n) => serde_json::Value::from(n),
        Err(_) => serde_json::Value::from(id),
    }
}

pub struct ResultStore {
    client: Client,
    base_url: String,
    api_key: String,
    user_id: String,
    sent_feedback: Mutex<HashMap<String, Feedback>>,
}

impl ResultStore {
    pub fn new(config: &ResultStoreConfig, user_id: impl Into<String>) -> Result<Self, PersistenceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PersistenceError::NotConfigured("API key missing".to_string()))?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();

        let store = Self {
            client,
            base_url: config.base_url(),
            api_key,
            user_id: user_id.into(),
            sent_feedback: Mutex::new(HashMap::new()),
        };
        info!(
            "[RESULT_STORE] Initialized: base_url={} user_id={}",
            store.base_url, store.user_id
        );
        Ok(store)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("User-ID", &self.user_id)
    }

    fn feedback_cache(&self) -> MutexGuard<'_, HashMap<String, Feedback>> {
        self.sent_feedback.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn read_success(response: Response) -> Result<String, PersistenceError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PersistenceError::Status {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }

    /// Persist one analysis and return the server-assigned id.
    pub async fn save(&self, result: &AnalysisResult) -> Result<PersistedId, PersistenceError> {
        let probabilities = serde_json::to_string(&result.probabilities)
            .map_err(|e| PersistenceError::Decode(e.to_string()))?;
        let device_info = DeviceInfo::current();
        let payload = SavePayload {
            image_hash: image_hash(&result.image_ref),
            image_data: &result.image_ref,
            prediction: result.prediction,
            confidence: result.confidence,
            analysis_mode: result.analysis_mode,
            processing_time: result.total_processing_time,
            model_used: &result.model_used,
            model_author: &result.model_author,
            probabilities,
            raw_score: result.raw_score,
            timestamp: result.timestamp.to_rfc3339(),
            app_version: device_info.app_version.clone(),
            device_info,
            user_id: &self.user_id,
        };

        let request = self
            .client
            .post(self.url(ANALYSIS_RESULTS_ENDPOINT))
            .json(&payload);
        let response = self.authorized(request).send().await?;
        let body = Self::read_success(response).await?;

        let data: SaveResponse = serde_json::from_str(&body)
            .map_err(|e| PersistenceError::Decode(e.to_string()))?;
        let id = match data.id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(PersistenceError::Decode("response has no id".to_string())),
        };

        info!("[RESULT_STORE] Saved analysis id={}", id);
        Ok(PersistedId(id))
    }

    /// One page of history in server order (newest first).
    pub async fn fetch_history(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<HistoryRecord>, PersistenceError> {
        let request = self
            .client
            .get(self.url(ANALYSIS_RESULTS_ENDPOINT))
            .query(&[("limit", limit), ("offset", offset)]);
        let response = self.authorized(request).send().await?;
        let body = Self::read_success(response).await?;

        let rows = match serde_json::from_str::<HistoryPayload>(&body)
            .map_err(|e| PersistenceError::Decode(e.to_string()))?
        {
            HistoryPayload::Page { results } => results,
            HistoryPayload::Bare(results) => results,
        };
        // One unreadable row must not hide the rest of the page.
        let records: Vec<HistoryRecord> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<HistoryRecord>(row.clone()) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("[RESULT_STORE] Skipping unreadable history row {}: {}", row, e);
                    None
                }
            })
            .collect();
        debug!(
            "[RESULT_STORE] Fetched {} records (limit={}, offset={})",
            records.len(),
            limit,
            offset
        );
        Ok(records)
    }

    /// Record user feedback. Repeating the last feedback sent for an id is a no-op.
    pub async fn save_feedback(&self, id: &str, feedback: Feedback) -> Result<(), PersistenceError> {
        if self.feedback_cache().get(id) == Some(&feedback) {
            debug!("[RESULT_STORE] Feedback {} for id={} already sent", feedback.as_str(), id);
            return Ok(());
        }

        let payload = FeedbackPayload {
            analysis_id: analysis_id_value(id),
            feedback,
            timestamp: Utc::now().to_rfc3339(),
            user_id: &self.user_id,
        };
        let request = self.client.post(self.url(FEEDBACK_ENDPOINT)).json(&payload);
        let response = self.authorized(request).send().await?;
        Self::read_success(response).await?;

        self.feedback_cache().insert(id.to_string(), feedback);
        info!("[RESULT_STORE] Feedback saved: id={} feedback={}", id, feedback.as_str());
        Ok(())
    }

    pub async fn fetch_statistics(&self) -> Result<HistoryStatistics, PersistenceError> {
        let request = self.client.get(self.url(STATISTICS_ENDPOINT));
        let response = self.authorized(request).send().await?;
        let body = Self::read_success(response).await?;
        serde_json::from_str(&body).map_err(|e| PersistenceError::Decode(e.to_string()))
    }

    /// Delete this client's entire history. Irreversible.
    pub async fn clear_history(&self) -> Result<(), PersistenceError> {
        warn!("[RESULT_STORE] Clearing history for user_id={}", self.user_id);
        let request = self.client.delete(self.url(ANALYSIS_RESULTS_ENDPOINT));
        let response = self.authorized(request).send().await?;
        Self::read_success(response).await?;

        self.feedback_cache().clear();
        info!("[RESULT_STORE] History cleared");
        Ok(())
    }

    /// Probe `/health`. Never fails; problems are reported in the status.
    pub async fn check_connection(&self) -> ConnectionStatus {
        let request = self.client.get(self.url(HEALTH_ENDPOINT));
        match self.authorized(request).send().await {
            Ok(response) => {
                let status = response.status();
                ConnectionStatus {
                    status: if status.is_success() {
                        ConnectionState::Connected
                    } else {
                        ConnectionState::Error
                    },
                    status_code: Some(status.as_u16()),
                    error: None,
                    timestamp: Utc::now(),
                }
            }
            Err(e) => {
                warn!("[RESULT_STORE] Connection check failed: {}", e);
                ConnectionStatus {
                    status: ConnectionState::Error,
                    status_code: None,
                    error: Some(e.to_string()),
                    timestamp: Utc::now(),
                }
            }
        }
    }
}

#[async_trait]
impl ResultSink for ResultStore {
    async fn save(&self, result: &AnalysisResult) -> Result<PersistedId, PersistenceError> {
        ResultStore::save(self, result).await
    }
}
