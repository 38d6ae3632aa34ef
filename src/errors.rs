//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Catalog snapshot could not be loaded or is empty.
    Catalog(String),
    /// Marketplace request failed with a non-retryable error.
    Market(String),
    /// Image-understanding request failed or returned garbage.
    Recognition(String),
    /// Screenshot bytes could not be fetched.
    Screenshot(String),
    /// Slack API failure.
    Slack(String),
    /// Upstream answered with HTTP 429.
    RateLimited(String),
    /// Upstream answered with a server error (HTTP 5xx).
    Unavailable(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// A batch run already holds the user's run lock.
    Busy(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the failure is worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Unavailable(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Catalog(msg) => write!(f, "catalog: {msg}"),
            Self::Market(msg) => write!(f, "market: {msg}"),
            Self::Recognition(msg) => write!(f, "recognition: {msg}"),
            Self::Screenshot(msg) => write!(f, "screenshot: {msg}"),
            Self::Slack(msg) => write!(f, "slack: {msg}"),
            Self::RateLimited(msg) => write!(f, "rate limited: {msg}"),
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Db(format!("json column: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Map a non-success HTTP status into the matching error class.
///
/// 429 and 5xx become the transient variants; everything else is wrapped with
/// `fallback` (e.g. `AppError::Market`).
#[must_use]
pub fn from_status(
    status: reqwest::StatusCode,
    detail: &str,
    fallback: fn(String) -> AppError,
) -> AppError {
    let msg = format!("HTTP {}: {detail}", status.as_u16());
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        AppError::RateLimited(msg)
    } else if status.is_server_error() {
        AppError::Unavailable(msg)
    } else {
        fallback(msg)
    }
}
