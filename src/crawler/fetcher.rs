//! Fetch layer
//!
//! This module provides:
//! - The `Fetcher` trait the worker pool fetches through
//! - Fetch error classification (timeout, connection, other)
//! - Building the shared HTTP client with a proper user agent string
//! - `HttpFetcher`, the reqwest-backed implementation

use crate::config::UserAgentConfig;
use crate::url::host_and_port;
use crate::work::{Payload, RequestMethod, WorkItem};
use reqwest::{header, Client, Method};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Retrieves the content behind a work item
///
/// Implementations must tell timeouts and connection failures apart from
/// everything else; the worker pool retries the first two and drops the rest.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, item: &WorkItem) -> impl Future<Output = Result<Payload, FetchError>> + Send;

    /// Checks whether the host behind `target` still resolves
    fn host_reachable(&self, target: &str) -> impl Future<Output = bool> + Send;
}

/// Class of a fetch failure, which decides the worker's reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    /// Requeue
    Timeout,
    /// Resolve the host; requeue if it resolves, drop otherwise
    Connection,
    /// Drop
    Other,
}

/// Fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {target} timed out")]
    Timeout { target: String },

    #[error("Connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    #[error("{target} returned HTTP {status}")]
    Status { target: String, status: u16 },

    #[error("Fetching {target} failed: {message}")]
    Other { target: String, message: String },
}

impl FetchError {
    pub fn failure(&self) -> FetchFailure {
        match self {
            Self::Timeout { .. } => FetchFailure::Timeout,
            Self::Connection { .. } => FetchFailure::Connection,
            Self::Status { .. } | Self::Other { .. } => FetchFailure::Other,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Timeout { target }
            | Self::Connection { target, .. }
            | Self::Status { target, .. }
            | Self::Other { target, .. } => target,
        }
    }

    /// Classifies a reqwest error for `target`
    pub fn from_reqwest(target: &str, error: reqwest::Error) -> Self {
        let target = target.to_string();
        if error.is_timeout() {
            Self::Timeout { target }
        } else if error.is_connect() {
            Self::Connection {
                target,
                message: error.to_string(),
            }
        } else if let Some(status) = error.status() {
            Self::Status {
                target,
                status: status.as_u16(),
            }
        } else {
            Self::Other {
                target,
                message: error.to_string(),
            }
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// The client is shared read-only by every worker of a phase.
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `request_timeout` - Whole-request timeout
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use sumi_tide::config::UserAgentConfig;
/// use sumi_tide::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiTide".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    request_timeout: Duration,
) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL; ContactEmail)
    let user_agent = format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(request_timeout)
        .connect_timeout(request_timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetcher over a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn request(&self, item: &WorkItem) -> reqwest::RequestBuilder {
        let mut request = self.client.request(to_reqwest(item.method), &item.target);

        if !item.params.is_empty() {
            request = request.query(&item.params);
        }
        for (name, value) in &item.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(encoding) = item.compression.accept_encoding() {
            request = request.header(header::ACCEPT_ENCODING, encoding);
        }
        if let Some(body) = &item.body {
            request = request.body(body.clone());
        }
        request
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, item: &WorkItem) -> Result<Payload, FetchError> {
        let response = self
            .request(item)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&item.target, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                target: item.target.clone(),
                status: status.as_u16(),
            });
        }

        let url = response.url().to_string();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&item.target, e))?;

        Ok(Payload {
            url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }

    async fn host_reachable(&self, target: &str) -> bool {
        let Some((host, port)) = host_and_port(target) else {
            return false;
        };
        let resolved = tokio::net::lookup_host((host.as_str(), port)).await;
        match resolved {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                tracing::debug!("Host {} did not resolve: {}", host, e);
                false
            }
        }
    }
}

fn to_reqwest(method: RequestMethod) -> Method {
    match method {
        RequestMethod::Get => Method::GET,
        RequestMethod::Post => Method::POST,
        RequestMethod::Put => Method::PUT,
        RequestMethod::Head => Method::HEAD,
    }
}
