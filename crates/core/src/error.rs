//! Error types for Gleaner operations.
//!
//! This module defines the main error type [`GleanerError`] which represents
//! every failure a visit can hit: policy rejection, transport failure, parse
//! failure, and sink failure, plus the configuration errors reported before
//! any request is made.
//!
//! # Example
//!
//! ```rust
//! use gleaner_core::{GleanerError, Result};
//!
//! fn require_host(host: Option<&str>) -> Result<&str> {
//!     host.ok_or_else(|| GleanerError::InvalidUrl("URL has no host".to_string()))
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for fetch, extraction, and persistence.
///
/// Variants fall into four classes: network failures ([`GleanerError::Network`],
/// [`GleanerError::Timeout`], [`GleanerError::HttpStatus`], [`GleanerError::InvalidUrl`]),
/// policy rejections ([`GleanerError::DomainBlocked`]), parse failures
/// ([`GleanerError::ParseError`]), and sink failures ([`GleanerError::SinkError`]).
///
/// # Example
///
/// ```rust
/// use gleaner_core::GleanerError;
///
/// let err = GleanerError::DomainBlocked { host: "other.com".to_string() };
/// assert!(!err.is_network());
/// assert!(err.to_string().contains("other.com"));
/// ```
#[derive(Error, Debug)]
pub enum GleanerError {
    /// HTTP transport errors from reqwest.
    ///
    /// DNS failures, refused connections, TLS errors, and broken bodies.
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Request timeout.
    ///
    /// Returned when an HTTP request exceeds the configured timeout duration.
    #[error("Request timed out after {timeout} seconds")]
    Timeout { timeout: u64 },

    /// The server answered with a non-success status code.
    #[error("Server responded with status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Invalid URL provided.
    ///
    /// Returned when a URL cannot be parsed, has no host, or uses a scheme
    /// other than http/https.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The target host is not on the allow-list; the request was never sent.
    #[error("Domain not allowed: {host}")]
    DomainBlocked { host: String },

    /// The response body cannot be turned into a document tree.
    #[error("Failed to parse document: {0}")]
    ParseError(String),

    /// A configured selector does not compile.
    #[error("Invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// Configuration errors.
    ///
    /// Returned when a configuration file is unreadable or invalid, or when a
    /// required header is missing from the header set.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// File not found.
    ///
    /// Returned when attempting to read a local input that doesn't exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// A local input (file or stdin) could not be read.
    #[error("Failed to read input: {0}")]
    ReadError(String),

    /// Output destination errors.
    ///
    /// Wraps I/O errors from opening or appending to the sink.
    #[error("Failed to write to output: {0}")]
    SinkError(#[from] std::io::Error),

    /// The visit was cancelled before it completed.
    #[error("Visit cancelled")]
    Cancelled,

    /// The task running a visit panicked or was aborted.
    #[error("Visit task failed: {0}")]
    TaskFailed(String),
}

impl GleanerError {
    /// Returns `true` for failures that happened on the way to or from the server.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            GleanerError::Network(_)
                | GleanerError::Timeout { .. }
                | GleanerError::HttpStatus { .. }
                | GleanerError::InvalidUrl(_)
        )
    }

    /// Returns `true` when trying the same request again could succeed.
    ///
    /// Policy rejections, parse failures, client errors (4xx), and malformed
    /// URLs are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            GleanerError::Network(_) | GleanerError::Timeout { .. } => true,
            GleanerError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for GleanerError.
///
/// This is a convenience alias for `std::result::Result<T, GleanerError>`.
pub type Result<T> = std::result::Result<T, GleanerError>;
