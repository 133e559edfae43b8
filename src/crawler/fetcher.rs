//! Cursor fetcher boundary
//!
//! This module defines what the collection session needs from a source:
//! - The `CursorFetcher` trait: fetch one page for `(target, cursor)`
//! - `Page`: the items, the forward cursor, and whether more pages exist
//! - `FetchError`: the three failure kinds the rate controller understands
//! - HTTP client construction and response classification for web backends

use crate::config::SourceConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE};
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// In-band texts the source uses to signal throttling on otherwise normal responses
const THROTTLE_MARKERS: &[&str] = &["Please wait a few minutes", "try again later"];

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct Page<R> {
    /// Items on this page, possibly overlapping earlier pages
    pub items: Vec<R>,

    /// Cursor for the next page; None when the source gave none
    pub cursor: Option<String>,

    /// Whether the source reports further pages
    pub has_more: bool,

    /// Total the source claims is available; informational only
    pub total_available: Option<u64>,
}

impl<R> Page<R> {
    /// Creates a page with no advisory total
    pub fn new(items: Vec<R>, cursor: Option<String>, has_more: bool) -> Self {
        Self {
            items,
            cursor,
            has_more,
            total_available: None,
        }
    }

    /// Creates the last page of a listing
    pub fn last(items: Vec<R>) -> Self {
        Self::new(items, None, false)
    }

    /// Attaches the source's advisory total
    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.total_available = total;
        self
    }
}

/// Why a fetch did not produce a page
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The source signalled throttling by status or in-band text
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Timeout, dropped connection, server error, or an unreadable single item
    ///
    /// `recoverable` means recreating the execution context may help.
    #[error("Transient failure: {reason}")]
    Transient { reason: String, recoverable: bool },

    /// The target is invalid, missing, or forbidden
    #[error("Fatal failure: {0}")]
    Fatal(String),
}

impl FetchError {
    /// A transient failure worth recreating the context for
    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            recoverable: true,
        }
    }

    /// A transient failure that a fresh context will not fix
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            recoverable: false,
        }
    }

    /// Classifies an HTTP response by status and body
    ///
    /// # Returns
    ///
    /// * `None` - The response is usable
    /// * `Some(FetchError)` - The response is a failure of the returned kind
    ///
    /// | Condition | Kind |
    /// |-----------|------|
    /// | 429, or throttling text in the body | RateLimited |
    /// | 400, 401, 403, 404, 410 | Fatal |
    /// | 408, 5xx | Transient (not recoverable) |
    /// | Any other non-2xx | Transient (not recoverable) |
    pub fn from_response(status: StatusCode, body: &str) -> Option<Self> {
        if status == StatusCode::TOO_MANY_REQUESTS || is_throttled(body) {
            return Some(Self::RateLimited(format!("HTTP {}", status.as_u16())));
        }

        if status.is_success() {
            return None;
        }

        match status {
            StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND
            | StatusCode::GONE => Some(Self::Fatal(format!("HTTP {}", status.as_u16()))),
            _ => Some(Self::transient(format!("HTTP {}", status.as_u16()))),
        }
    }

    /// Classifies a transport-level error
    ///
    /// Timeouts, connection failures and truncated bodies are recoverable.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::recoverable("Request timeout")
        } else if error.is_connect() {
            Self::recoverable(format!("Connection failed: {}", error))
        } else if error.is_body() || error.is_decode() || error.is_request() {
            Self::recoverable(error.to_string())
        } else {
            Self::transient(error.to_string())
        }
    }

    /// Short label for logs and summaries
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::Fatal(_) => "fatal",
        }
    }
}

/// Returns true if the body carries the source's throttling text
pub fn is_throttled(body: &str) -> bool {
    THROTTLE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// A source that can be walked one cursor page at a time
///
/// Implementations are driven by a single session task and never called
/// concurrently. A fetch must return an error rather than an empty page
/// when it could not read the source.
#[async_trait]
pub trait CursorFetcher: Send {
    /// The record type this fetcher produces
    type Item: Send;

    /// Fetches the page for `cursor` (empty for the first page)
    async fn fetch(&mut self, target: &str, cursor: &str) -> Result<Page<Self::Item>, FetchError>;

    /// Recreates the underlying execution context after a recoverable failure
    async fn recover(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Cursor past a page that failed permanently, if the source has one
    ///
    /// Returning None ends the session early with partial results.
    fn resume_cursor(&self, _target: &str, _cursor: &str) -> Option<String> {
        None
    }

    /// Hint with the identities already collected for this target
    ///
    /// Fetchers that can skip known items may do so. Others ignore it.
    fn narrow(&mut self, _known: &HashSet<String>) {}
}

/// Builds the HTTP client shared by every web backend
///
/// The credential is sent as the `Cookie` header on every request.
///
/// # Arguments
///
/// * `config` - Source connection settings
/// * `credential` - Opaque cookie header value
/// * `timeout` - Upper bound on a single request
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(FetchError::Fatal)` - The credential or app id is not a valid header value,
///   or the client could not be built
pub fn build_http_client(
    config: &SourceConfig,
    credential: &str,
    timeout: Duration,
) -> Result<Client, FetchError> {
    let mut headers = HeaderMap::new();

    let cookie = HeaderValue::from_str(credential)
        .map_err(|_| FetchError::Fatal("Credential is not a valid header value".to_string()))?;
    headers.insert(COOKIE, cookie);

    let app_id = HeaderValue::from_str(&config.app_id)
        .map_err(|_| FetchError::Fatal("app_id is not a valid header value".to_string()))?;
    headers.insert("X-IG-App-ID", app_id);

    headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(|e| FetchError::Fatal(format!("Failed to build HTTP client: {}", e)))
}
