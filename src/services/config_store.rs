// Configuration Storage Service
// Handles config file read/write, version backup and the stable client id

use crate::models::{AnalysisMode, ImageSize, PreprocessOptions};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const COMMERCIAL_DEFAULT_URL: &str = "https://api.sightengine.com/1.0";
pub const COMMERCIAL_CHECK_ENDPOINT: &str = "/check.json";
pub const COMMERCIAL_DEFAULT_MODEL: &str = "genai";
pub const COMMERCIAL_HEALTH_IMAGE_URL: &str =
    "https://sightengine.com/assets/img/examples/example-prop-c1.jpg";
pub const REMOTE_INFERENCE_DEFAULT_URL: &str = "http://localhost:5000";
pub const REMOTE_INFERENCE_DEFAULT_MODEL: &str = "haywoodsloan/ai-image-detector-deploy";
pub const REMOTE_INFERENCE_DEFAULT_AUTHOR: &str = "haywoodsloan";
const RESULT_STORE_REMOTE_URL: &str = "https://fakedetector-server-api.onrender.com/api";
const RESULT_STORE_LOCAL_URL: &str = "http://localhost:3000/api";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O failed ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub version: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_true")]
    pub auto_save_results: bool,
    #[serde(default)]
    pub analysis_mode: AnalysisMode,
    #[serde(default)]
    pub remote_inference_url: Option<String>,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub commercial: CommercialConfig,
    #[serde(default)]
    pub remote_inference: RemoteInferenceConfig,
    #[serde(default)]
    pub result_store: ResultStoreConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            user_id: None,
            auto_save_results: true,
            analysis_mode: AnalysisMode::default(),
            remote_inference_url: None,
            image: ImageConfig::default(),
            commercial: CommercialConfig::default(),
            remote_inference: RemoteInferenceConfig::default(),
            result_store: ResultStoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Apply process environment overrides (credentials, endpoints, store environment).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("SIGHTENGINE_API_USER") {
            self.commercial.api_user = Some(v);
        }
        if let Some(v) = get("SIGHTENGINE_API_SECRET") {
            self.commercial.api_secret = Some(v);
        }
        if let Some(v) = get("SIGHTENGINE_API_URL") {
            self.commercial.base_url = v;
        }
        if let Some(v) = get("REMOTE_INFERENCE_URL") {
            self.remote_inference.default_base_url = Some(v);
        }
        if let Some(v) = get("FAKEDETECTOR_DB_URL") {
            self.result_store.base_url = Some(v);
        }
        if let Some(v) = get("FAKEDETECTOR_DB_API_KEY") {
            self.result_store.api_key = Some(v);
        }
        if let Some(v) = get("FAKEDETECTOR_ENV") {
            match StoreEnvironment::parse(&v) {
                Some(environment) => self.result_store.environment = environment,
                None => warn!("[CONFIG] Ignoring unknown FAKEDETECTOR_ENV value: {}", v),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    /// Send the original image untouched (quality 1.0, no resize).
    #[serde(default = "default_true")]
    pub preserve_quality: bool,
    #[serde(default = "default_compress_quality")]
    pub compress_quality: f32,
    #[serde(default = "default_resize_edge")]
    pub resize_width: Option<u32>,
    #[serde(default = "default_resize_edge")]
    pub resize_height: Option<u32>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            preserve_quality: true,
            compress_quality: 0.8,
            resize_width: Some(224),
            resize_height: Some(224),
        }
    }
}

impl ImageConfig {
    pub fn preprocess_options(&self) -> PreprocessOptions {
        if self.preserve_quality {
            return PreprocessOptions::default();
        }

        let resize = match (self.resize_width, self.resize_height) {
            (Some(width), Some(height)) => Some(ImageSize { width, height }),
            _ => None,
        };

        PreprocessOptions {
            quality: self.compress_quality.clamp(0.0, 1.0),
            resize,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommercialThresholds {
    /// Scores at or above this are classified as AI-generated.
    pub ai_generated: f64,
    pub high_confidence: f64,
    pub low_confidence: f64,
}

impl Default for CommercialThresholds {
    fn default() -> Self {
        Self {
            ai_generated: 0.5,
            high_confidence: 0.8,
            low_confidence: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommercialConfig {
    #[serde(default = "default_commercial_url")]
    pub base_url: String,
    #[serde(default = "default_commercial_endpoint")]
    pub check_endpoint: String,
    #[serde(default = "default_commercial_model")]
    pub model: String,
    #[serde(default)]
    pub api_user: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub thresholds: CommercialThresholds,
    #[serde(default = "default_health_image_url")]
    pub health_image_url: String,
}

impl Default for CommercialConfig {
    fn default() -> Self {
        Self {
            base_url: default_commercial_url(),
            check_endpoint: default_commercial_endpoint(),
            model: default_commercial_model(),
            api_user: None,
            api_secret: None,
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            thresholds: CommercialThresholds::default(),
            health_image_url: default_health_image_url(),
        }
    }
}

impl CommercialConfig {
    pub fn check_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.check_endpoint
        )
    }

    pub fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.api_user.as_deref(), self.api_secret.as_deref()) {
            (Some(user), Some(secret)) if !user.is_empty() && !secret.is_empty() => {
                Some((user, secret))
            }
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInferenceConfig {
    #[serde(default = "default_remote_url")]
    pub default_base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_remote_model")]
    pub model_name: String,
    #[serde(default = "default_remote_author")]
    pub model_author: String,
}

impl Default for RemoteInferenceConfig {
    fn default() -> Self {
        Self {
            default_base_url: default_remote_url(),
            timeout_secs: default_timeout_secs(),
            model_name: default_remote_model(),
            model_author: default_remote_author(),
        }
    }
}

impl RemoteInferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreEnvironment {
    Production,
    #[default]
    Development,
    Local,
}

impl StoreEnvironment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Some(Self::Production),
            "development" | "dev" => Some(Self::Development),
            "local" => Some(Self::Local),
            _ => None,
        }
    }

    fn base_url(&self) -> &'static str {
        match self {
            Self::Production | Self::Development => RESULT_STORE_REMOTE_URL,
            Self::Local => RESULT_STORE_LOCAL_URL,
        }
    }

    fn timeout(&self) -> Duration {
        match self {
            Self::Production | Self::Development => Duration::from_secs(30),
            Self::Local => Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResultStoreConfig {
    #[serde(default)]
    pub environment: StoreEnvironment,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ResultStoreConfig {
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.environment.base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.environment.timeout())
    }
}

fn default_true() -> bool { true }
fn default_compress_quality() -> f32 { 0.8 }
fn default_resize_edge() -> Option<u32> { Some(224) }
fn default_commercial_url() -> String { COMMERCIAL_DEFAULT_URL.to_string() }
fn default_commercial_endpoint() -> String { COMMERCIAL_CHECK_ENDPOINT.to_string() }
fn default_commercial_model() -> String { COMMERCIAL_DEFAULT_MODEL.to_string() }
fn default_timeout_secs() -> u64 { 30 }
fn default_retries() -> u32 { 2 }
fn default_retry_backoff_ms() -> u64 { 400 }
fn default_health_image_url() -> String { COMMERCIAL_HEALTH_IMAGE_URL.to_string() }
fn default_remote_url() -> Option<String> { Some(REMOTE_INFERENCE_DEFAULT_URL.to_string()) }
fn default_remote_model() -> String { REMOTE_INFERENCE_DEFAULT_MODEL.to_string() }
fn default_remote_author() -> String { REMOTE_INFERENCE_DEFAULT_AUTHOR.to_string() }

/// `user_<unix millis>_<9 lowercase alphanumerics>`
pub fn generate_user_id() -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("user_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}

pub struct ConfigStore {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_file = config_dir.join("config.json");
        Self { config_dir, config_file }
    }

    /// Get default config directory
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("fakeDetector"))
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Ensure config directory exists
    pub fn ensure_dir(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.config_dir).map_err(|source| ConfigError::Io {
            path: self.config_dir.clone(),
            source,
        })
    }

    /// Load configuration from file
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        if !self.config_file.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_file).map_err(|source| ConfigError::Io {
            path: self.config_file.clone(),
            source,
        })?;

        Ok(serde_json::from_str(&content)?)
    }

    /// Load configuration and layer process environment overrides on top
    pub fn load_effective(&self) -> Result<AppConfig, ConfigError> {
        let mut config = self.load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        self.ensure_dir()?;

        // Create backup if file exists
        if self.config_file.exists() {
            self.create_backup()?;
        }

        let content = serde_json::to_string_pretty(config)?;

        fs::write(&self.config_file, content).map_err(|source| ConfigError::Io {
            path: self.config_file.clone(),
            source,
        })
    }

    /// Create a backup of current config
    fn create_backup(&self) -> Result<(), ConfigError> {
        let backup_dir = self.config_dir.join("backups");
        fs::create_dir_all(&backup_dir).map_err(|source| ConfigError::Io {
            path: backup_dir.clone(),
            source,
        })?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_file = backup_dir.join(format!("config_{}.json", timestamp));

        fs::copy(&self.config_file, &backup_file).map_err(|source| ConfigError::Io {
            path: backup_file.clone(),
            source,
        })?;

        // Keep only last 10 backups
        self.cleanup_old_backups(&backup_dir, 10)
    }

    /// Remove old backups, keeping only the most recent N
    fn cleanup_old_backups(&self, backup_dir: &Path, keep: usize) -> Result<(), ConfigError> {
        let mut entries: Vec<_> = fs::read_dir(backup_dir)
            .map_err(|source| ConfigError::Io {
                path: backup_dir.to_path_buf(),
                source,
            })?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
            .collect();

        if entries.len() <= keep {
            return Ok(());
        }

        // Sort by modification time (oldest first)
        entries.sort_by_key(|e| {
            e.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        });

        let remove_count = entries.len() - keep;
        for entry in entries.iter().take(remove_count) {
            let _ = fs::remove_file(entry.path());
        }

        Ok(())
    }

    /// Return the persisted client id, creating and storing one on first use.
    ///
    /// An unreadable config yields a fresh ephemeral id and leaves the file alone;
    /// a failed write still returns the new id.
    pub fn load_or_create_user_id(&self) -> String {
        let mut config = match self.load() {
            Ok(config) => config,
            Err(e) => {
                warn!("[CONFIG] Config unreadable, using ephemeral user id: {}", e);
                return generate_user_id();
            }
        };

        if let Some(existing) = config.user_id.as_ref().filter(|id| !id.trim().is_empty()) {
            return existing.clone();
        }

        let user_id = generate_user_id();
        config.user_id = Some(user_id.clone());
        match self.save(&config) {
            Ok(()) => info!("[CONFIG] Created user id {}", user_id),
            Err(e) => warn!("[CONFIG] Failed to persist new user id: {}", e),
        }
        user_id
    }

    pub fn get_auto_save(&self) -> Result<bool, ConfigError> {
        Ok(self.load()?.auto_save_results)
    }

    pub fn set_auto_save(&self, enabled: bool) -> Result<(), ConfigError> {
        let mut config = self.load()?;
        config.auto_save_results = enabled;
        self.save(&config)
    }

    pub fn set_analysis_mode(&self, mode: AnalysisMode) -> Result<(), ConfigError> {
        let mut config = self.load()?;
        config.analysis_mode = mode;
        self.save(&config)
    }

    pub fn set_remote_inference_url(&self, url: Option<&str>) -> Result<(), ConfigError> {
        let mut config = self.load()?;
        config.remote_inference_url = url.map(|u| u.to_string());
        self.save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.auto_save_results);
        assert_eq!(config.analysis_mode, AnalysisMode::Commercial);
        assert_eq!(config.commercial.retries, 2);
        assert_eq!(config.commercial.thresholds.ai_generated, 0.5);
        assert_eq!(
            config.commercial.check_url(),
            "https://api.sightengine.com/1.0/check.json"
        );
        assert!(!config.commercial.is_configured());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = AppConfig::default();
        config.user_id = Some("user_1_abc".to_string());
        config.analysis_mode = AnalysisMode::RemoteInference;

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"analysisMode\":\"remote_inference\""));
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.user_id.as_deref(), Some("user_1_abc"));
        assert_eq!(parsed.analysis_mode, AnalysisMode::RemoteInference);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = serde_json::from_str(r#"{"version":"0.0.1"}"#).unwrap();
        assert!(parsed.auto_save_results);
        assert_eq!(parsed.commercial.timeout_secs, 30);
        assert_eq!(
            parsed.remote_inference.default_base_url.as_deref(),
            Some(REMOTE_INFERENCE_DEFAULT_URL)
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SIGHTENGINE_API_USER", "u1"),
            ("SIGHTENGINE_API_SECRET", " s1 "),
            ("REMOTE_INFERENCE_URL", "http://infer:5000"),
            ("FAKEDETECTOR_ENV", "local"),
            ("FAKEDETECTOR_DB_API_KEY", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.commercial.credentials(), Some(("u1", "s1")));
        assert_eq!(
            config.remote_inference.default_base_url.as_deref(),
            Some("http://infer:5000")
        );
        assert_eq!(config.result_store.environment, StoreEnvironment::Local);
        assert_eq!(config.result_store.base_url(), "http://localhost:3000/api");
        assert_eq!(config.result_store.timeout(), Duration::from_secs(10));
        assert!(config.result_store.api_key.is_none());
    }

    #[test]
    fn test_image_options() {
        let mut image = ImageConfig::default();
        let options = image.preprocess_options();
        assert_eq!(options.quality, 1.0);
        assert!(options.resize.is_none());

        image.preserve_quality = false;
        let options = image.preprocess_options();
        assert_eq!(options.quality, 0.8);
        assert_eq!(options.resize, Some(ImageSize { width: 224, height: 224 }));
    }

    #[test]
    fn test_user_id_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());

        let first = store.load_or_create_user_id();
        let second = store.load_or_create_user_id();
        assert_eq!(first, second);
        assert!(first.starts_with("user_"));
        assert_eq!(first.rsplit('_').next().map(|s| s.len()), Some(9));
    }

    #[test]
    fn test_user_id_unreadable_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());
        fs::write(store.config_file(), "{ not json").unwrap();

        let a = store.load_or_create_user_id();
        let b = store.load_or_create_user_id();
        assert_ne!(a, b);
        // The unreadable file is left untouched.
        assert_eq!(fs::read_to_string(store.config_file()).unwrap(), "{ not json");
    }

    #[test]
    fn test_save_creates_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());

        store.set_auto_save(false).unwrap();
        store.set_analysis_mode(AnalysisMode::RemoteInference).unwrap();

        let config = store.load().unwrap();
        assert!(!config.auto_save_results);
        assert_eq!(config.analysis_mode, AnalysisMode::RemoteInference);
        assert!(dir.path().join("backups").read_dir().unwrap().count() >= 1);
    }
}
