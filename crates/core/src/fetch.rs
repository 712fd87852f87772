//! Content fetching from URLs, files, and stdin.
//!
//! The [`Dispatcher`] issues one browser-shaped GET per visit and enforces the
//! domain allow-list before anything is sent. Local files and standard input
//! bypass the network entirely.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::Client;
use url::Url;

use crate::config::{FetchConfig, HeaderSet};
use crate::{GleanerError, Result};

/// Set of hostnames permitted as fetch targets.
///
/// Hosts compare case-insensitively and ignore a trailing dot. An empty list
/// permits every host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    hosts: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|h| normalize_host(h.as_ref()))
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    /// Returns `true` if requests to `host` may be sent.
    pub fn permits(&self, host: &str) -> bool {
        self.hosts.is_empty() || self.hosts.contains(&normalize_host(host))
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// A request that passed every policy check and is ready to send.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// URL after redirects.
    pub url: Url,
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

/// Issues browser-shaped requests within an allow-list.
///
/// # Example
///
/// ```rust
/// use gleaner_core::{Dispatcher, FetchConfig, GleanerError};
///
/// let config = FetchConfig { allowed_domains: vec!["example.com".to_string()], ..Default::default() };
/// let dispatcher = Dispatcher::new(config).unwrap();
/// let blocked = dispatcher.prepare("https://other.com/page");
/// assert!(matches!(blocked, Err(GleanerError::DomainBlocked { .. })));
/// ```
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: Client,
    headers: HeaderMap,
    allow_list: AllowList,
    timeout: u64,
}

impl Dispatcher {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`GleanerError::ConfigError`] if a recognized header is missing
    /// or a header name/value is not valid HTTP.
    pub fn new(config: FetchConfig) -> Result<Self> {
        config.headers.validate()?;
        let headers = to_header_map(&config.headers)?;
        let allow_list = AllowList::new(&config.allowed_domains);
        if allow_list.is_empty() {
            tracing::debug!("no allow-list configured, every host is permitted");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .redirect(redirect_policy(allow_list.clone(), config.max_redirects))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(GleanerError::Network)?;

        Ok(Self { client, headers, allow_list, timeout: config.timeout })
    }

    /// Validates `url` against the allow-list and attaches the header profile.
    ///
    /// Nothing is sent; a blocked host never reaches the network.
    pub fn prepare(&self, url: &str) -> Result<FetchRequest> {
        let parsed = Url::parse(url).map_err(|e| GleanerError::InvalidUrl(format!("{}: {}", url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GleanerError::InvalidUrl(format!(
                "{}: URL must use http:// or https://",
                url
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| GleanerError::InvalidUrl(format!("{}: URL has no host", url)))?;

        if !self.allow_list.permits(host) {
            tracing::debug!(url, host, "host not on allow-list");
            return Err(GleanerError::DomainBlocked { host: host.to_string() });
        }

        Ok(FetchRequest { url: parsed, headers: self.headers.clone() })
    }

    /// Sends a prepared request once and reads the whole body.
    pub async fn send(&self, request: FetchRequest) -> Result<FetchResponse> {
        let requested = request.url.to_string();
        let response = self
            .client
            .get(request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GleanerError::HttpStatus { status: status.as_u16(), url: requested });
        }

        let url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.bytes().await.map_err(|e| classify(e, self.timeout))?;

        tracing::debug!(url = %url, status = status.as_u16(), bytes = body.len(), "response received");

        Ok(FetchResponse { url, status: status.as_u16(), body: body.to_vec(), content_type })
    }

    /// Checks policy, then performs a single fetch.
    pub async fn visit(&self, url: &str) -> Result<FetchResponse> {
        let request = self.prepare(url)?;
        self.send(request).await
    }
}

/// Converts a header set to a `HeaderMap`, keeping insertion order.
fn to_header_map(headers: &HeaderSet) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| GleanerError::ConfigError(format!("invalid header name `{}`: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| GleanerError::ConfigError(format!("invalid value for header `{}`: {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Raised inside the redirect policy when a redirect leaves the allow-list.
#[derive(Debug)]
struct RedirectBlocked {
    host: String,
}

impl fmt::Display for RedirectBlocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "redirect to disallowed host {}", self.host)
    }
}

impl StdError for RedirectBlocked {}

fn redirect_policy(allow_list: AllowList, max_redirects: usize) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            return attempt.error(format!("stopped after {} redirects", max_redirects));
        }
        let blocked = attempt
            .url()
            .host_str()
            .filter(|host| !allow_list.permits(host))
            .map(str::to_string);
        match blocked {
            Some(host) => attempt.error(RedirectBlocked { host }),
            None => attempt.follow(),
        }
    })
}

/// Maps a reqwest error to the matching [`GleanerError`] variant.
fn classify(err: reqwest::Error, timeout: u64) -> GleanerError {
    if err.is_timeout() {
        return GleanerError::Timeout { timeout };
    }

    let mut source = StdError::source(&err);
    while let Some(inner) = source {
        if let Some(blocked) = inner.downcast_ref::<RedirectBlocked>() {
            return GleanerError::DomainBlocked { host: blocked.host.clone() };
        }
        source = inner.source();
    }

    GleanerError::Network(err)
}

/// Reads raw markup from a local file.
///
/// Callers should validate and sanitize the path when accepting user input.
pub fn fetch_file(path: &str) -> Result<Vec<u8>> {
    let path_buf = PathBuf::from(path);

    if !path_buf.exists() {
        Err(GleanerError::FileNotFound(path_buf))
    } else {
        fs::read(&path_buf).map_err(|e| GleanerError::ReadError(format!("{}: {}", path, e)))
    }
}

/// Reads raw markup from standard input until EOF.
pub fn fetch_stdin() -> Result<Vec<u8>> {
    use std::io::{self, Read};

    let mut buffer = Vec::new();
    io::stdin()
        .read_to_end(&mut buffer)
        .map_err(|e| GleanerError::ReadError(format!("stdin: {}", e)))?;

    Ok(buffer)
}
