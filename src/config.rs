//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

const KEYRING_SERVICE: &str = "inventory-intake";

/// Catalog snapshot location and language selection.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CatalogConfig {
    /// Bulk catalog snapshot (JSON array of marketplace items).
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
    /// i18n key whose `name` becomes the canonical display name.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            language: default_language(),
        }
    }
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("data/items.json")
}

fn default_language() -> String {
    "ru".into()
}

/// Marketplace API connectivity and rate-limit settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MarketConfig {
    /// Base URL of the marketplace REST API.
    #[serde(default = "default_market_api")]
    pub api_base: String,
    /// Base URL for human-facing item pages.
    #[serde(default = "default_item_page_base")]
    pub item_page_base: String,
    /// Value of the `Platform` request header.
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Value of the `Language` request header.
    #[serde(default = "default_language")]
    pub language: String,
    /// Global cap on simultaneous outstanding marketplace requests.
    #[serde(default = "default_market_concurrency")]
    pub max_concurrent_requests: usize,
    /// Attempts per request, including the first one.
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on every further retry.
    #[serde(default = "default_market_backoff_ms")]
    pub base_backoff_ms: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            api_base: default_market_api(),
            item_page_base: default_item_page_base(),
            platform: default_platform(),
            language: default_language(),
            max_concurrent_requests: default_market_concurrency(),
            max_attempts: default_attempts(),
            base_backoff_ms: default_market_backoff_ms(),
        }
    }
}

fn default_market_api() -> String {
    "https://api.warframe.market/v2".into()
}

fn default_item_page_base() -> String {
    "https://warframe.market/ru/items".into()
}

fn default_platform() -> String {
    "pc".into()
}

fn default_market_concurrency() -> usize {
    2
}

fn default_attempts() -> u32 {
    3
}

fn default_market_backoff_ms() -> u64 {
    2000
}

/// Image-understanding service settings.
///
/// The API key is loaded at runtime via OS keychain or environment variable,
/// never from the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RecognitionConfig {
    /// Base endpoint of the generative API.
    #[serde(default = "default_recognition_endpoint")]
    pub endpoint: String,
    /// Model identifier used for `generateContent`.
    #[serde(default = "default_model")]
    pub model: String,
    /// Cap on simultaneous recognition calls.
    #[serde(default = "default_recognition_concurrency")]
    pub max_concurrent_requests: usize,
    /// Attempts per request, including the first one.
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_recognition_backoff_ms")]
    pub base_backoff_ms: u64,
    /// API key (populated at runtime).
    #[serde(skip)]
    pub api_key: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_recognition_endpoint(),
            model: default_model(),
            max_concurrent_requests: default_recognition_concurrency(),
            max_attempts: default_attempts(),
            base_backoff_ms: default_recognition_backoff_ms(),
            api_key: String::new(),
        }
    }
}

fn default_recognition_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}

fn default_recognition_concurrency() -> usize {
    3
}

fn default_recognition_backoff_ms() -> u64 {
    1000
}

/// Batch intake behaviour.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IntakeConfig {
    /// Quiet period after the last screenshot before a batch starts.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Re-validate the session every N processed screenshots.
    #[serde(default = "default_session_check_interval")]
    pub session_check_interval: u32,
    /// Screenshots allowed per multi-shot session.
    #[serde(default = "default_screenshot_limit")]
    pub screenshot_limit: u32,
    /// Absolute session lifetime.
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: u32,
    /// Maximum unrecognized names listed in a batch report.
    #[serde(default = "default_report_preview_limit")]
    pub report_preview_limit: usize,
    /// Finalize the session once its queue drains.
    #[serde(default = "default_true")]
    pub finalize_on_drain: bool,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            session_check_interval: default_session_check_interval(),
            screenshot_limit: default_screenshot_limit(),
            session_ttl_minutes: default_session_ttl_minutes(),
            report_preview_limit: default_report_preview_limit(),
            finalize_on_drain: true,
        }
    }
}

impl IntakeConfig {
    /// Debounce quiet period as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    1500
}

fn default_session_check_interval() -> u32 {
    3
}

fn default_screenshot_limit() -> u32 {
    16
}

fn default_session_ttl_minutes() -> u32 {
    60
}

fn default_report_preview_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/inventory.db")
}

/// Optional Slack delivery of batch reports.
///
/// The bot token is loaded at runtime via OS keychain or environment variable.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// Channel where batch reports are posted.
    pub channel_id: String,
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Days after session completion before data is purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Catalog snapshot settings.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Marketplace settings.
    #[serde(default)]
    pub market: MarketConfig,
    /// Recognition service settings.
    #[serde(default)]
    pub recognition: RecognitionConfig,
    /// Batch intake behaviour.
    #[serde(default)]
    pub intake: IntakeConfig,
    /// Slack report delivery; absent means reports are only printed.
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the recognition API key and, when Slack is configured, the bot
    /// token, from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required credential is missing.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.recognition.api_key = load_credential("google_api_key", "GOOGLE_API_KEY").await?;
        if let Some(slack) = self.slack.as_mut() {
            slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN").await?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.market.max_concurrent_requests == 0 {
            return Err(AppError::Config(
                "market.max_concurrent_requests must be greater than zero".into(),
            ));
        }

        if self.recognition.max_concurrent_requests == 0 {
            return Err(AppError::Config(
                "recognition.max_concurrent_requests must be greater than zero".into(),
            ));
        }

        if self.market.max_attempts == 0 || self.recognition.max_attempts == 0 {
            return Err(AppError::Config("max_attempts must be at least 1".into()));
        }

        if self.intake.session_check_interval == 0 {
            return Err(AppError::Config(
                "intake.session_check_interval must be greater than zero".into(),
            ));
        }

        if self.intake.screenshot_limit == 0 {
            return Err(AppError::Config(
                "intake.screenshot_limit must be greater than zero".into(),
            ));
        }

        if let Some(slack) = &self.slack {
            if slack.channel_id.trim().is_empty() {
                return Err(AppError::Config("slack.channel_id must not be empty".into()));
            }
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
