//! HTTP page sources for web-attached instruments.
//!
//! The TR-71W thermometer exposes its current readings as a small text page rather than
//! a command protocol. A [`PageSource`] fetches that page; drivers parse it.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::{Endpoint, DEFAULT_TIMEOUT};
use crate::error::{AppResult, BridgeError};

/// Source of one fixed text page.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Endpoint the page is fetched from.
    fn endpoint(&self) -> &Endpoint;

    /// Fetches the page body as text.
    async fn fetch(&self) -> AppResult<String>;
}

#[async_trait]
impl<P: PageSource + ?Sized> PageSource for Box<P> {
    fn endpoint(&self) -> &Endpoint {
        (**self).endpoint()
    }

    async fn fetch(&self) -> AppResult<String> {
        (**self).fetch().await
    }
}

/// Fetches `http://{host}{path}` with a reqwest client.
pub struct HttpPageSource {
    endpoint: Endpoint,
    url: String,
    client: reqwest::Client,
}

impl HttpPageSource {
    /// Creates a page source for `path` on the endpoint host. The endpoint channel is the
    /// HTTP port.
    ///
    /// # Errors
    /// [`BridgeError::Http`] if the HTTP client cannot be built.
    pub fn new(endpoint: Endpoint, path: &str, timeout: Duration) -> AppResult<Self> {
        let url = match endpoint.channel() {
            0 | 80 => format!("http://{}{}", endpoint.host(), path),
            port => format!("http://{}:{}{}", endpoint.host(), port, path),
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(DEFAULT_TIMEOUT))
            .build()?;
        Ok(Self {
            endpoint,
            url,
            client,
        })
    }

    /// Full URL of the page.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn fetch(&self) -> AppResult<String> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        // Labels on the page may be Shift_JIS; the key=value readings are ASCII.
        let body = String::from_utf8_lossy(&bytes).into_owned();
        debug!(url = %self.url, bytes = bytes.len(), "Fetched page");
        Ok(body)
    }
}

/// Canned page for tests and simulation.
///
/// Clones share the body, so a test can change what the next fetch returns.
#[derive(Clone)]
pub struct StaticPage {
    endpoint: Endpoint,
    body: Arc<Mutex<Option<String>>>,
}

impl StaticPage {
    /// Page that always returns `body`.
    pub fn new(endpoint: Endpoint, body: impl Into<String>) -> Self {
        Self {
            endpoint,
            body: Arc::new(Mutex::new(Some(body.into()))),
        }
    }

    /// Page whose host never answers.
    pub fn unreachable(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            body: Arc::new(Mutex::new(None)),
        }
    }

    /// Replaces the body returned by later fetches.
    pub fn set_body(&self, body: impl Into<String>) {
        *self.body.lock().unwrap_or_else(PoisonError::into_inner) = Some(body.into());
    }
}

#[async_trait]
impl PageSource for StaticPage {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn fetch(&self) -> AppResult<String> {
        self.body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BridgeError::Connection {
                endpoint: self.endpoint.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            })
    }
}
