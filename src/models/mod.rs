// FakeDetector Data Models
// Canonical analysis types shared by every backend and the history store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

// ============ Prediction & Mode ============

/// The two logical verdicts. Localized labels from older clients and the
/// inference server ("Gerçek", "Sahte", "AI-Generated", ...) map onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prediction {
    Real,
    Fake,
}

impl Prediction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "Real",
            Self::Fake => "Fake",
        }
    }

    /// Map any known label (canonical, English or Turkish) to a prediction.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "real" | "gerçek" | "gercek" | "human" | "human created" => Some(Self::Real),
            "fake" | "sahte" | "ai-generated" | "ai generated" | "ai_generated" | "artificial" => {
                Some(Self::Fake)
            }
            _ => None,
        }
    }

    pub fn is_fake(&self) -> bool {
        matches!(self, Self::Fake)
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Prediction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Prediction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Prediction::from_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown prediction label: {}", label)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    #[default]
    Commercial,
    RemoteInference,
}

impl AnalysisMode {
    pub const ALL: [AnalysisMode; 2] = [AnalysisMode::Commercial, AnalysisMode::RemoteInference];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commercial => "commercial",
            Self::RemoteInference => "remote_inference",
        }
    }

    /// Strict parse: only the two canonical mode names are accepted.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "commercial" => Some(Self::Commercial),
            "remote_inference" => Some(Self::RemoteInference),
            _ => None,
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Correct,
    Incorrect,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "correct" => Some(Self::Correct),
            "incorrect" => Some(Self::Incorrect),
            _ => None,
        }
    }
}

// ============ Probabilities ============

/// Percentages for both classes. `real + fake` is 100 give or take one
/// point of rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probabilities {
    pub real: u32,
    pub fake: u32,
}

impl Probabilities {
    /// Split a probability-of-fake score in [0, 1] into rounded percentages.
    pub fn from_fake_score(score: f64) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            real: ((1.0 - score) * 100.0).round() as u32,
            fake: (score * 100.0).round() as u32,
        }
    }

    /// Build from the confidence of a stated prediction; the other side is the complement.
    pub fn from_stated(prediction: Prediction, confidence: u32) -> Self {
        let confidence = confidence.min(100);
        match prediction {
            Prediction::Real => Self {
                real: confidence,
                fake: 100 - confidence,
            },
            Prediction::Fake => Self {
                real: 100 - confidence,
                fake: confidence,
            },
        }
    }

    pub fn of(&self, prediction: Prediction) -> u32 {
        match prediction {
            Prediction::Real => self.real,
            Prediction::Fake => self.fake,
        }
    }

    pub fn total(&self) -> u32 {
        self.real + self.fake
    }
}

// ============ Image Payloads ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessOptions {
    /// JPEG quality in [0.0, 1.0].
    pub quality: f32,
    /// Exact output size; `None` keeps the source dimensions.
    pub resize: Option<ImageSize>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            quality: 1.0,
            resize: None,
        }
    }
}

/// A complete JPEG encoding, base64 (standard alphabet, no `data:` prefix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn data_uri(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.base64)
    }
}

// ============ Detection Output ============

/// Normalized output of a single backend call, before the orchestrator
/// attaches timing and session metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub prediction: Prediction,
    pub confidence: u32,
    pub probabilities: Probabilities,
    pub raw_score: f64,
    pub model_used: String,
    pub model_author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<ConfidenceLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_used: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Server-assigned once the result has been persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub prediction: Prediction,
    pub confidence: u32,
    pub probabilities: Probabilities,
    pub raw_score: f64,
    pub model_used: String,
    pub model_author: String,
    pub analysis_mode: AnalysisMode,
    /// Milliseconds from preprocessing start to normalized result.
    pub total_processing_time: u64,
    pub timestamp: DateTime<Utc>,
    pub image_ref: String,
    #[serde(default)]
    pub user_feedback: Option<Feedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<ConfidenceLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_used: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AnalysisResult {
    pub fn from_detection(
        detection: Detection,
        analysis_mode: AnalysisMode,
        image_ref: String,
        total_processing_time: u64,
    ) -> Self {
        Self {
            id: None,
            prediction: detection.prediction,
            confidence: detection.confidence,
            probabilities: detection.probabilities,
            raw_score: detection.raw_score,
            model_used: detection.model_used,
            model_author: detection.model_author,
            analysis_mode,
            total_processing_time,
            timestamp: Utc::now(),
            image_ref,
            user_feedback: None,
            confidence_level: detection.confidence_level,
            threshold_used: detection.threshold_used,
            request_id: detection.request_id,
        }
    }
}

// ============ Health ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthStatus {
    #[serde(rename_all = "camelCase")]
    Healthy {
        mode: AnalysisMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_loaded: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operations: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Error { mode: AnalysisMode, error: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }

    pub fn mode(&self) -> AnalysisMode {
        match self {
            Self::Healthy { mode, .. } | Self::Error { mode, .. } => *mode,
        }
    }
}

/// Descriptive model card served by the inference server at `/model-info`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelInfo {
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfo {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub configured: bool,
    pub documentation: String,
}

// ============ History ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub status: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistedId(pub String);

impl fmt::Display for PersistedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub platform: String,
    /// Operating system release, `unknown` where it cannot be read.
    pub version: String,
    #[serde(default)]
    pub arch: String,
    pub device_name: String,
    pub app_version: String,
}

fn os_version() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(release) = std::fs::read_to_string("/proc/sys/kernel/osrelease") {
            let release = release.trim();
            if !release.is_empty() {
                return release.to_string();
            }
        }
    }
    "unknown".to_string()
}

impl DeviceInfo {
    pub fn current() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            version: os_version(),
            arch: std::env::consts::ARCH.to_string(),
            device_name: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("COMPUTERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A persisted analysis as returned by the history service. Field names
/// follow the service's snake_case schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(deserialize_with = "de_id_string")]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub image_hash: Option<String>,
    #[serde(default)]
    pub image_data: Option<String>,
    pub prediction: Prediction,
    #[serde(deserialize_with = "de_lenient_f64")]
    pub confidence: f64,
    #[serde(default)]
    pub analysis_mode: Option<String>,
    #[serde(default, deserialize_with = "de_opt_lenient_f64")]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub model_author: Option<String>,
    #[serde(default, deserialize_with = "de_opt_probabilities")]
    pub probabilities: Option<Probabilities>,
    #[serde(default, deserialize_with = "de_opt_lenient_f64")]
    pub raw_score: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub device_info: Option<serde_json::Value>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default, alias = "userFeedback", alias = "feedback")]
    pub user_feedback: Option<Feedback>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoryStatistics {
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

// ============ Lenient decoding helpers ============

fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn de_lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    value_as_f64(&value).ok_or_else(|| serde::de::Error::custom(format!("expected number, got {}", value)))
}

fn de_opt_lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_f64))
}

fn de_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected id, got {}", other))),
    }
}

fn de_opt_probabilities<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Probabilities>, D::Error> {
    #[derive(Deserialize)]
    struct RawProbabilities {
        #[serde(deserialize_with = "de_lenient_f64")]
        real: f64,
        #[serde(deserialize_with = "de_lenient_f64")]
        fake: f64,
    }

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let value = match value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        // Older rows stored the object JSON-encoded.
        Some(serde_json::Value::String(s)) => {
            serde_json::from_str::<serde_json::Value>(&s).map_err(serde::de::Error::custom)?
        }
        Some(v) => v,
    };
    let raw: RawProbabilities = serde_json::from_value(value).map_err(serde::de::Error::custom)?;
    Ok(Some(Probabilities {
        real: raw.real.round().max(0.0) as u32,
        fake: raw.fake.round().max(0.0) as u32,
    }))
}
