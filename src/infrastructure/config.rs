//! Configuration infrastructure
//!
//! Settings are a JSON document shared with the desktop front end:
//! pricing percentages, the output base directory and the export column
//! defaults (`csvHeaders`, kept in file order). Tuning knobs for the
//! acquisition pipeline live in the same file with sensible defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::domain::batch::{BATCH_CAPACITY, DEFAULT_BATCH_PREFIX, DEFAULT_RECORD_PREFIX};
use crate::domain::pricing::PricingConfig;

pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

/// Keys that must be present for a settings file to be used as-is.
const REQUIRED_KEYS: [&str; 2] = ["baseDir", "csvHeaders"];
const PRICING_KEYS: [&str; 3] = ["facebookFee", "salesTax", "additionalProfit"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access settings file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Complete settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Output directory for batch folders. Empty means the working directory.
    pub base_dir: String,

    #[serde(flatten)]
    pub pricing: PricingConfig,

    /// Export column name -> default cell value, in column order.
    pub csv_headers: Map<String, Value>,

    #[serde(default = "defaults::database_path")]
    pub database_path: String,

    #[serde(default = "defaults::batch_prefix")]
    pub batch_prefix: String,

    #[serde(default = "defaults::record_prefix")]
    pub record_prefix: String,

    #[serde(default = "defaults::batch_capacity")]
    pub batch_capacity: usize,

    #[serde(default = "defaults::max_listings")]
    pub max_listings: usize,

    #[serde(default = "defaults::fetch_concurrency")]
    pub fetch_concurrency: usize,

    #[serde(default = "defaults::image_concurrency")]
    pub image_concurrency: usize,

    #[serde(default = "defaults::request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    #[serde(default = "defaults::backoff_factor_seconds")]
    pub backoff_factor_seconds: f64,

    /// Optional courtesy limit shared by every request of a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_per_second: Option<u32>,

    /// Reject listings that are not marked as well stocked.
    #[serde(default)]
    pub require_availability: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: String::new(),
            pricing: PricingConfig::default(),
            csv_headers: defaults::csv_headers(),
            database_path: defaults::database_path(),
            batch_prefix: defaults::batch_prefix(),
            record_prefix: defaults::record_prefix(),
            batch_capacity: defaults::batch_capacity(),
            max_listings: defaults::max_listings(),
            fetch_concurrency: defaults::fetch_concurrency(),
            image_concurrency: defaults::image_concurrency(),
            request_timeout_seconds: defaults::request_timeout_seconds(),
            max_retries: defaults::max_retries(),
            backoff_factor_seconds: defaults::backoff_factor_seconds(),
            max_requests_per_second: None,
            require_availability: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Parse a settings document.
    ///
    /// Pricing values written as strings or integers are coerced to floats.
    /// Returns `None` when the document is not valid JSON or lacks a required
    /// key, so the caller can fall back to defaults.
    pub fn from_json_str(content: &str) -> Option<Self> {
        Self::parse_document(content)
            .map_err(|reason| warn!("{}", reason))
            .ok()
    }

    /// Same as `from_json_str`, but reports why the document was unusable.
    pub fn parse_document(content: &str) -> Result<Self, String> {
        let mut value: Value = serde_json::from_str(content)
            .map_err(|e| format!("Settings file contains invalid JSON: {e}"))?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| "Settings file is not a JSON object".to_string())?;

        if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !object.contains_key(**key)) {
            return Err(format!("Settings file is missing required key '{missing}'"));
        }

        for key in PRICING_KEYS {
            if let Some(raw) = object.get(key) {
                let number =
                    coerce_f64(raw).ok_or_else(|| format!("Setting '{key}' is not numeric: {raw}"))?;
                object.insert(key.to_string(), Value::from(number));
            }
        }

        serde_json::from_value(value).map_err(|e| format!("Settings file has an unexpected shape: {e}"))
    }

    /// Startup validation. Any error here is fatal before the first fetch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(field) = self.pricing.invalid_fields().first() {
            return Err(ConfigError::invalid(field, "must be a non-negative number"));
        }
        if self.batch_capacity == 0 {
            return Err(ConfigError::invalid("batchCapacity", "must be greater than 0"));
        }
        if self.max_listings == 0 {
            return Err(ConfigError::invalid("maxListings", "must be greater than 0"));
        }
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::invalid("fetchConcurrency", "must be greater than 0"));
        }
        if self.image_concurrency == 0 {
            return Err(ConfigError::invalid("imageConcurrency", "must be greater than 0"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "requestTimeoutSeconds",
                "must be greater than 0",
            ));
        }
        if !self.backoff_factor_seconds.is_finite() || self.backoff_factor_seconds < 0.0 {
            return Err(ConfigError::invalid(
                "backoffFactorSeconds",
                "must be a non-negative number",
            ));
        }
        if self.max_requests_per_second == Some(0) {
            return Err(ConfigError::invalid(
                "maxRequestsPerSecond",
                "must be greater than 0 when set",
            ));
        }
        if self.batch_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("batchPrefix", "must not be empty"));
        }
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::invalid("databasePath", "must not be empty"));
        }
        Ok(())
    }

    pub fn base_dir(&self) -> PathBuf {
        if self.base_dir.trim().is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.base_dir)
        }
    }

    /// Export column order: `TITLE`, `PRICE`, then the configured headers.
    pub fn record_columns(&self) -> Vec<String> {
        let mut columns = vec!["TITLE".to_string(), "PRICE".to_string()];
        columns.extend(
            self.csv_headers
                .keys()
                .filter(|key| !columns.contains(*key))
                .cloned()
                .collect::<Vec<_>>(),
        );
        columns
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Log directory. Defaults to `logs/` next to the executable.
    pub directory: Option<String>,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            directory: None,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
        }
    }
}

/// Loads, persists and edits the settings file.
#[derive(Debug, Clone)]
pub struct SettingsManager {
    settings_path: PathBuf,
    settings: Settings,
    /// Why defaults replaced an existing file, if they did
    fallback_reason: Option<String>,
}

impl SettingsManager {
    /// Load settings from `settings_path`, falling back to defaults when the
    /// file is missing or unusable. Defaults are written out only when no
    /// file exists yet.
    pub async fn load(settings_path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let settings_path = settings_path.into();

        let mut fallback_reason = None;
        let settings = match fs::read_to_string(&settings_path).await {
            Ok(content) => match Settings::parse_document(&content) {
                Ok(settings) => {
                    info!("Loaded settings from: {:?}", settings_path);
                    settings
                }
                Err(reason) => {
                    warn!("⚠️ Using default settings; {:?} was not usable: {}", settings_path, reason);
                    fallback_reason = Some(reason);
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Settings file not found, creating default: {:?}", settings_path);
                let defaults = Settings::default();
                write_settings(&settings_path, &defaults).await?;
                defaults
            }
            Err(source) => {
                warn!("⚠️ Failed to read {:?}: {}; using defaults", settings_path, source);
                fallback_reason = Some(format!("Failed to read settings file: {source}"));
                Settings::default()
            }
        };

        Ok(Self {
            settings_path,
            settings,
            fallback_reason,
        })
    }

    pub fn with_settings(settings_path: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            settings_path: settings_path.into(),
            settings,
            fallback_reason: None,
        }
    }

    /// Set when `load` found a settings file it could not use. `load` usually
    /// runs before logging is configured, so callers re-report this later.
    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    /// Persist settings, keeping a `.bak` copy of the previous file and
    /// restoring it if the write fails.
    pub async fn save(&self) -> Result<(), ConfigError> {
        let backup_path = backup_path(&self.settings_path);
        let had_previous = fs::try_exists(&self.settings_path).await.unwrap_or(false);

        if had_previous {
            fs::copy(&self.settings_path, &backup_path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: backup_path.clone(),
                    source,
                })?;
        }

        if let Err(e) = write_settings(&self.settings_path, &self.settings).await {
            if had_previous {
                if let Err(restore) = fs::rename(&backup_path, &self.settings_path).await {
                    warn!("Failed to restore settings backup {:?}: {}", backup_path, restore);
                }
            }
            return Err(e);
        }

        Ok(())
    }

    /// Change the default value of an existing export column. Unknown keys are
    /// ignored and reported as `false`.
    pub async fn update_csv_header(&mut self, key: &str, value: Value) -> Result<bool, ConfigError> {
        match self.settings.csv_headers.get_mut(key) {
            Some(slot) => {
                *slot = value;
                self.save().await?;
                Ok(true)
            }
            None => {
                warn!("Ignoring update for unknown CSV header '{}'", key);
                Ok(false)
            }
        }
    }

    pub async fn update_base_dir(&mut self, base_dir: impl Into<String>) -> Result<(), ConfigError> {
        self.settings.base_dir = base_dir.into();
        self.save().await
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

async fn write_settings(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    fs::write(path, content).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Built-in defaults
pub mod defaults {
    use super::{BATCH_CAPACITY, DEFAULT_BATCH_PREFIX, DEFAULT_RECORD_PREFIX};
    use serde_json::{Map, Value};

    pub const DATABASE_PATH: &str = "products.db";

    /// Store pages beyond this many item links are not followed
    pub const MAX_LISTINGS: usize = 100;

    pub const FETCH_CONCURRENCY: usize = 10;

    pub const IMAGE_CONCURRENCY: usize = 10;

    pub const REQUEST_TIMEOUT_SECONDS: u64 = 10;

    /// Retries after the first attempt
    pub const MAX_RETRIES: u32 = 5;

    pub const BACKOFF_FACTOR_SECONDS: f64 = 1.0;

    /// Upper bound on a single backoff sleep
    pub const BACKOFF_MAX_SECONDS: f64 = 120.0;

    pub const LOG_LEVEL: &str = "info";

    pub const LOG_MAX_FILES: u32 = 10;

    pub fn database_path() -> String {
        DATABASE_PATH.to_string()
    }

    pub fn batch_prefix() -> String {
        DEFAULT_BATCH_PREFIX.to_string()
    }

    pub fn record_prefix() -> String {
        DEFAULT_RECORD_PREFIX.to_string()
    }

    pub fn batch_capacity() -> usize {
        BATCH_CAPACITY
    }

    pub fn max_listings() -> usize {
        MAX_LISTINGS
    }

    pub fn fetch_concurrency() -> usize {
        FETCH_CONCURRENCY
    }

    pub fn image_concurrency() -> usize {
        IMAGE_CONCURRENCY
    }

    pub fn request_timeout_seconds() -> u64 {
        REQUEST_TIMEOUT_SECONDS
    }

    pub fn max_retries() -> u32 {
        MAX_RETRIES
    }

    pub fn backoff_factor_seconds() -> f64 {
        BACKOFF_FACTOR_SECONDS
    }

    pub fn csv_headers() -> Map<String, Value> {
        let mut headers = Map::new();
        headers.insert("CONDITION".into(), Value::from("Used - Like New"));
        headers.insert(
            "DESCRIPTION".into(),
            Value::from("Good Condition, ships for free with Economy Shipping"),
        );
        headers.insert("AVAILABLE INVENTORY".into(), Value::from(3));
        headers.insert("AVAILABLE FOR LOCAL PICKUP".into(), Value::from("No"));
        headers.insert("SHIPPING PRICE".into(), Value::from(0));
        headers.insert("OFFER FREE SHIPPING".into(), Value::from("Yes"));
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn default_columns_follow_header_order() {
        let settings = Settings::default();
        assert_eq!(
            settings.record_columns(),
            vec![
                "TITLE",
                "PRICE",
                "CONDITION",
                "DESCRIPTION",
                "AVAILABLE INVENTORY",
                "AVAILABLE FOR LOCAL PICKUP",
                "SHIPPING PRICE",
                "OFFER FREE SHIPPING",
            ]
        );
    }

    #[test]
    fn columns_do_not_repeat_base_fields() {
        let mut settings = Settings::default();
        settings.csv_headers.insert("PRICE".into(), json!("1"));
        let columns = settings.record_columns();
        assert_eq!(columns.iter().filter(|c| *c == "PRICE").count(), 1);
    }

    #[test]
    fn pricing_strings_are_coerced() {
        let content = json!({
            "baseDir": "/tmp/out",
            "facebookFee": "6",
            "salesTax": 8,
            "csvHeaders": {"CONDITION": "New"}
        })
        .to_string();

        let settings = Settings::from_json_str(&content).unwrap();
        assert_eq!(settings.pricing.facebook_fee, 6.0);
        assert_eq!(settings.pricing.sales_tax, 8.0);
        assert_eq!(settings.pricing.additional_profit, 10.0);
        assert_eq!(settings.batch_capacity, BATCH_CAPACITY);
        assert_eq!(settings.record_columns(), vec!["TITLE", "PRICE", "CONDITION"]);
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let content = json!({"facebookFee": 5}).to_string();
        assert!(Settings::from_json_str(&content).is_none());
        assert!(Settings::from_json_str("{not json").is_none());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.pricing.sales_tax = -2.0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "salesTax"
        ));

        let settings = Settings {
            fetch_concurrency: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_base_dir_means_working_directory() {
        assert_eq!(Settings::default().base_dir(), PathBuf::from("."));
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let manager = SettingsManager::load(&path).await.unwrap();
        assert_eq!(manager.settings(), &Settings::default());
        assert!(manager.fallback_reason().is_none());
        assert!(path.exists());

        let reloaded = SettingsManager::load(&path).await.unwrap();
        assert_eq!(reloaded.settings(), &Settings::default());
    }

    #[tokio::test]
    async fn corrupted_file_falls_back_without_overwriting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{broken").unwrap();

        let manager = SettingsManager::load(&path).await.unwrap();
        assert_eq!(manager.settings(), &Settings::default());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{broken");
        assert!(manager.fallback_reason().unwrap().contains("invalid JSON"));
    }

    #[tokio::test]
    async fn fallback_reason_names_missing_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, json!({"baseDir": "/tmp/out"}).to_string()).unwrap();

        let manager = SettingsManager::load(&path).await.unwrap();

        assert_eq!(
            manager.fallback_reason(),
            Some("Settings file is missing required key 'csvHeaders'")
        );
    }

    #[tokio::test]
    async fn header_updates_persist_with_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut manager = SettingsManager::load(&path).await.unwrap();

        assert!(manager.update_csv_header("CONDITION", json!("New")).await.unwrap());
        assert!(!manager.update_csv_header("COLOR", json!("Red")).await.unwrap());
        manager.update_base_dir("/srv/exports").await.unwrap();

        let reloaded = SettingsManager::load(&path).await.unwrap();
        assert_eq!(reloaded.settings().csv_headers["CONDITION"], json!("New"));
        assert!(!reloaded.settings().csv_headers.contains_key("COLOR"));
        assert_eq!(reloaded.settings().base_dir, "/srv/exports");
        assert!(dir.path().join("settings.json.bak").exists());
    }
}
