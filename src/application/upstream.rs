//! Client for the rendering backend.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("upstream address `{0}` cannot carry query parameters")]
    InvalidBase(Url),
    #[error("upstream request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("upstream responded with status {0}")]
    Status(StatusCode),
}

/// Produces the rendered artifact for a `(text, font)` pair.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    async fn fetch(&self, text: &str, font: &str) -> Result<Bytes, UpstreamError>;
}

/// Fetches artifacts from the backend over HTTP.
///
/// Requests are `GET <base>/?text=…&font=…`. Only a success status yields a
/// cacheable body; anything else is reported as [`UpstreamError::Status`].
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, UpstreamError> {
        if base.cannot_be_a_base() {
            return Err(UpstreamError::InvalidBase(base));
        }

        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::Client)?;

        Ok(Self {
            client,
            base: normalize_base(base),
            timeout,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("meshx-proxy/", env!("CARGO_PKG_VERSION"))
    }

    pub fn request_url(&self, text: &str, font: &str) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("text", text)
            .append_pair("font", font);
        url
    }

    fn classify(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Transport(err)
        }
    }
}

#[async_trait]
impl UpstreamFetcher for HttpUpstream {
    async fn fetch(&self, text: &str, font: &str) -> Result<Bytes, UpstreamError> {
        let url = self.request_url(text, font);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status));
        }

        resp.bytes().await.map_err(|err| self.classify(err))
    }
}

/// The backend serves from its root path, so the base always ends in `/` and
/// never carries a query or fragment of its own.
fn normalize_base(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.set_query(None);
    base.set_fragment(None);
    base
}
