//! Page acquisition.
//!
//! The `Fetcher` trait is the seam between the check pipeline and the
//! outside network. `HttpFetcher` covers static HTTP fetching; browser
//! rendering is a separate backend behind the same trait, so deployments
//! without one still run every static target.

use crate::types::RenderMode;
use async_trait::async_trait;
use std::time::Duration;

/// What to fetch and how
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub render_mode: RenderMode,
    /// CSS selector a rendering backend should wait for before capture
    pub wait_selector: Option<String>,
    pub timeout: Duration,
}

/// A fetched page: HTML always, a screenshot only from rendering backends
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub html: String,
    pub screenshot: Option<Vec<u8>>,
    pub status: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("render backend unavailable: {0}")]
    Render(String),
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Static HTTP fetcher backed by a shared reqwest client
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(8))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        if request.render_mode == RenderMode::Browser {
            return Err(FetchError::Render(
                "no browser rendering backend is configured".to_string(),
            ));
        }

        let response = self
            .client
            .get(&request.url)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(request.timeout)
                } else {
                    FetchError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(FetchResponse {
            html,
            screenshot: None,
            status: status.as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_browser_mode_without_backend_is_render_error() {
        let fetcher = HttpFetcher::new("pagewatch-test", Duration::from_secs(5)).unwrap();
        let request = FetchRequest {
            url: "https://example.com".to_string(),
            render_mode: RenderMode::Browser,
            wait_selector: None,
            timeout: Duration::from_secs(5),
        };
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, FetchError::Render(_)));
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_network_error() {
        let fetcher = HttpFetcher::new("pagewatch-test", Duration::from_secs(2)).unwrap();
        let request = FetchRequest {
            url: "http://pagewatch-test.invalid/".to_string(),
            render_mode: RenderMode::Static,
            wait_selector: None,
            timeout: Duration::from_secs(2),
        };
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_) | FetchError::Timeout(_)));
    }
}
