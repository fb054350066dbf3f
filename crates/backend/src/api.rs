//! REST API client for render backends.
//!
//! Wraps the img2img / txt2img HTTP endpoints using [`reqwest`]. The
//! client only moves bytes: envelope validation and image decoding live
//! in [`crate::decode`].

use std::time::Duration;

use async_trait::async_trait;
use renderpool_core::BackendSlot;

/// Render path used when the job carries an init image (img2img / inpaint).
pub const IMG2IMG_PATH: &str = "/sdapi/v1/img2img";

/// Render path used for text-only jobs.
pub const TXT2IMG_PATH: &str = "/sdapi/v1/txt2img";

/// Default per-request timeout. Large inpaint jobs on slow GPUs can take
/// several minutes.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors from the backend REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum BackendApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Outbound transport seam. The engine talks to backends only through
/// this trait so tests can substitute scripted responses.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// POST `body` to `url` and return the raw response body.
    async fn render(&self, url: &str, body: &serde_json::Value)
        -> Result<String, BackendApiError>;
}

/// Full render URL for a slot: its `render_path` override if set,
/// otherwise the default path for the job kind.
pub fn render_url(slot: &BackendSlot, has_init_image: bool) -> String {
    let path = match slot.render_path.as_deref() {
        Some(p) if !p.is_empty() => p,
        _ if has_init_image => IMG2IMG_PATH,
        _ => TXT2IMG_PATH,
    };
    if path.starts_with('/') {
        format!("{}{}", slot.endpoint, path)
    } else {
        format!("{}/{}", slot.endpoint, path)
    }
}

/// HTTP client shared by every slot.
pub struct BackendApi {
    client: reqwest::Client,
}

impl BackendApi {
    /// Create a client with the default request timeout.
    pub fn new() -> Result<Self, BackendApiError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client whose requests fail after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, BackendApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling with
    /// other subsystems).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise turn it
    /// into [`BackendApiError::ApiError`] carrying the body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl RenderBackend for BackendApi {
    async fn render(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<String, BackendApiError> {
        let response = self.client.post(url).json(body).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.text().await?)
    }
}
