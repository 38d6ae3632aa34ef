//! Screenshot byte sources.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::errors::from_status;
use crate::models::screenshot::PendingScreenshot;
use crate::{AppError, Result};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves a [`PendingScreenshot`] handle to image bytes.
pub trait ScreenshotSource: Send + Sync {
    /// Fetch the bytes behind a screenshot reference.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Screenshot` (or a transient variant) on failure.
    fn fetch_bytes<'a>(&'a self, screenshot: &'a PendingScreenshot) -> BoxFuture<'a, Result<Bytes>>;
}

/// Handles are file paths, optionally relative to a root directory.
#[derive(Debug, Clone, Default)]
pub struct FileScreenshotSource {
    root: Option<PathBuf>,
}

impl FileScreenshotSource {
    /// Resolve relative handles against `root`.
    #[must_use]
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

impl ScreenshotSource for FileScreenshotSource {
    fn fetch_bytes<'a>(&'a self, screenshot: &'a PendingScreenshot) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            let path = match &self.root {
                Some(root) => root.join(&screenshot.handle),
                None => PathBuf::from(&screenshot.handle),
            };
            let raw = tokio::fs::read(&path).await.map_err(|err| {
                AppError::Screenshot(format!("cannot read {}: {err}", path.display()))
            })?;
            Ok(Bytes::from(raw))
        })
    }
}

/// Handles are download URLs (e.g. messenger file links).
#[derive(Debug, Clone)]
pub struct HttpScreenshotSource {
    http: reqwest::Client,
}

impl HttpScreenshotSource {
    /// Build a source with a download timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self { http })
    }
}

impl ScreenshotSource for HttpScreenshotSource {
    fn fetch_bytes<'a>(&'a self, screenshot: &'a PendingScreenshot) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            let response = self
                .http
                .get(&screenshot.handle)
                .send()
                .await
                .map_err(|err| AppError::Screenshot(format!("download failed: {err}")))?;
            let status = response.status();
            if !status.is_success() {
                return Err(from_status(status, "screenshot download", AppError::Screenshot));
            }
            response
                .bytes()
                .await
                .map_err(|err| AppError::Screenshot(format!("download body failed: {err}")))
        })
    }
}

/// Sends `http(s)://` handles to an [`HttpScreenshotSource`] and everything
/// else to a [`FileScreenshotSource`].
#[derive(Debug, Clone)]
pub struct RoutedScreenshotSource {
    file: FileScreenshotSource,
    http: HttpScreenshotSource,
}

impl RoutedScreenshotSource {
    /// Combine both sources.
    #[must_use]
    pub fn new(file: FileScreenshotSource, http: HttpScreenshotSource) -> Self {
        Self { file, http }
    }
}

/// Whether a handle is a download URL.
#[must_use]
pub fn is_url(handle: &str) -> bool {
    handle.starts_with("https://") || handle.starts_with("http://")
}

impl ScreenshotSource for RoutedScreenshotSource {
    fn fetch_bytes<'a>(&'a self, screenshot: &'a PendingScreenshot) -> BoxFuture<'a, Result<Bytes>> {
        if is_url(&screenshot.handle) {
            self.http.fetch_bytes(screenshot)
        } else {
            self.file.fetch_bytes(screenshot)
        }
    }
}
