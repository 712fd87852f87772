//! The per-visit pipeline: request, parse, extract, persist.
//!
//! Each stage takes the previous stage's output and returns an explicit
//! result. A failure moves the visit to [`Stage::Reporting`] and nothing is
//! written.
//!
//! # Example
//!
//! ```rust
//! use gleaner_core::{GleanerConfig, Pipeline, WriterSink};
//!
//! let pipeline = Pipeline::from_config(&GleanerConfig::default()).unwrap();
//! let mut sink = WriterSink::new(Vec::new());
//! let html = b"<head><title>Hello</title></head><body><main><nav>skip</nav><p>World</p></main></body>";
//!
//! pipeline.visit_local("page.html", html, &mut sink).unwrap();
//! assert_eq!(sink.into_inner(), b"Hello\n\nWorld");
//! ```

use std::fmt;

use thiserror::Error;

use crate::config::{FetchConfig, GleanerConfig, RulesConfig};
use crate::extract::{self, ExtractedDocument};
use crate::fetch::{Dispatcher, FetchRequest, FetchResponse};
use crate::parse::Document;
use crate::rules::ExtractionRules;
use crate::sink::Sink;
use crate::{GleanerError, Result};

/// Where a visit is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    Requesting,
    Parsing,
    Extracting,
    Sinking,
    Reporting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Requesting => "requesting",
            Stage::Parsing => "parsing",
            Stage::Extracting => "extracting",
            Stage::Sinking => "sinking",
            Stage::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// A failed visit: which URL, which stage, and why.
#[derive(Debug, Error)]
#[error("{url}: {stage} failed: {source}")]
pub struct VisitError {
    pub url: String,
    pub stage: Stage,
    #[source]
    pub source: GleanerError,
}

impl VisitError {
    pub fn new(url: impl Into<String>, stage: Stage, source: GleanerError) -> Self {
        Self { url: url.into(), stage, source }
    }
}

/// Outcome of one visit.
pub type VisitResult<T> = std::result::Result<T, VisitError>;

/// Summary of a persisted visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitReport {
    pub url: String,
    pub title: Option<String>,
    pub body_chars: usize,
    pub bytes_written: usize,
}

/// Dispatcher plus compiled rules; shareable across concurrent visits.
#[derive(Debug, Clone)]
pub struct Pipeline {
    dispatcher: Dispatcher,
    rules: ExtractionRules,
}

impl Pipeline {
    /// Builds a pipeline, validating headers and compiling every selector.
    pub fn new(fetch: FetchConfig, rules: &RulesConfig) -> Result<Self> {
        Ok(Self { dispatcher: Dispatcher::new(fetch)?, rules: ExtractionRules::from_config(rules)? })
    }

    pub fn from_config(config: &GleanerConfig) -> Result<Self> {
        Self::new(config.fetch.clone(), &config.rules)
    }

    /// Policy checks for the requesting stage; nothing is sent.
    pub fn prepare(&self, url: &str) -> VisitResult<FetchRequest> {
        enter(url, Stage::Requesting);
        self.dispatcher.prepare(url).map_err(|e| report(url, Stage::Requesting, e))
    }

    /// Sends a prepared request.
    pub async fn send(&self, url: &str, request: FetchRequest) -> VisitResult<FetchResponse> {
        self.dispatcher.send(request).await.map_err(|e| report(url, Stage::Requesting, e))
    }

    /// Parses a response and runs both extractors over the same tree.
    ///
    /// The parsed tree lives only inside this call.
    pub fn process(
        &self,
        source_url: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> VisitResult<ExtractedDocument> {
        enter(source_url, Stage::Parsing);
        let doc = Document::from_bytes(body, content_type).map_err(|e| report(source_url, Stage::Parsing, e))?;

        enter(source_url, Stage::Extracting);
        let title = extract::extract_title(&doc, &self.rules.title);
        let content = extract::extract_content(&doc, &self.rules.content_root, &self.rules.exclude);
        tracing::debug!(
            url = source_url,
            roots = content.root_count,
            removed = content.removed_count,
            "content extracted"
        );

        Ok(ExtractedDocument::new(title, content.body, source_url))
    }

    /// Parses and extracts a fetched response without touching the network.
    pub fn extract_response(&self, response: &FetchResponse) -> VisitResult<ExtractedDocument> {
        self.process(response.url.as_str(), &response.body, response.content_type.as_deref())
    }

    /// Appends a finished document to `sink`.
    pub fn persist<S: Sink + ?Sized>(&self, doc: &ExtractedDocument, sink: &mut S) -> VisitResult<VisitReport> {
        let url = doc.source_url();
        enter(url, Stage::Sinking);
        let bytes_written = sink.write(doc).map_err(|e| report(url, Stage::Sinking, e))?;

        tracing::info!(url, title = doc.title().unwrap_or_default(), bytes = bytes_written, "document saved");
        enter(url, Stage::Idle);

        Ok(VisitReport {
            url: url.to_string(),
            title: doc.title().map(str::to_string),
            body_chars: doc.body().chars().count(),
            bytes_written,
        })
    }

    /// Runs one complete visit of `url`.
    ///
    /// Exactly one fetch is attempted; there is no retry at this level.
    pub async fn visit<S: Sink + ?Sized>(&self, url: &str, sink: &mut S) -> VisitResult<VisitReport> {
        let request = self.prepare(url)?;
        let response = self.send(url, request).await?;
        let doc = self.process(url, &response.body, response.content_type.as_deref())?;
        self.persist(&doc, sink)
    }

    /// Runs parse, extract, and persist over markup read from a file or stdin.
    pub fn visit_local<S: Sink + ?Sized>(
        &self,
        source: &str,
        body: &[u8],
        sink: &mut S,
    ) -> VisitResult<VisitReport> {
        let doc = self.process(source, body, None)?;
        self.persist(&doc, sink)
    }
}

fn enter(url: &str, stage: Stage) {
    tracing::debug!(url, %stage, "stage");
}

fn report(url: &str, stage: Stage, source: GleanerError) -> VisitError {
    tracing::warn!(url, %stage, error = %source, "visit failed");
    enter(url, Stage::Reporting);
    VisitError::new(url, stage, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::WriterSink;
    use httpmock::prelude::*;

    const PAGE: &str = "<head><title>Hello</title></head><body><main><nav>skip</nav><p>World</p></main></body>";

    fn pipeline_for(allowed: Vec<String>) -> Pipeline {
        let fetch = FetchConfig { allowed_domains: allowed, timeout: 5, ..Default::default() };
        let rules = RulesConfig { exclude: vec!["nav".to_string()], ..Default::default() };
        Pipeline::new(fetch, &rules).unwrap()
    }

    #[test]
    fn test_invalid_selector_rejected_up_front() {
        let rules = RulesConfig { title: ">>".to_string(), ..Default::default() };
        let result = Pipeline::new(FetchConfig::default(), &rules);
        assert!(matches!(result, Err(GleanerError::InvalidSelector { .. })));
    }

    #[test]
    fn test_visit_local_end_to_end() {
        let pipeline = pipeline_for(vec![]);
        let mut sink = WriterSink::new(Vec::new());
        let report = pipeline.visit_local("page.html", PAGE.as_bytes(), &mut sink).unwrap();

        assert_eq!(sink.into_inner(), b"Hello\n\nWorld");
        assert_eq!(report.title.as_deref(), Some("Hello"));
        assert_eq!(report.body_chars, 5);
        assert_eq!(report.bytes_written, "Hello\n\nWorld".len());
    }

    #[test]
    fn test_parse_failure_writes_nothing() {
        let pipeline = pipeline_for(vec![]);
        let mut sink = WriterSink::new(Vec::new());
        let err = pipeline.visit_local("blob.bin", &[0u8, 1, 2, 3], &mut sink).unwrap_err();

        assert_eq!(err.stage, Stage::Parsing);
        assert!(matches!(err.source, GleanerError::ParseError(_)));
        assert!(sink.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_visit_end_to_end() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/post");
                then.status(200).header("content-type", "text/html").body(PAGE);
            })
            .await;

        let pipeline = pipeline_for(vec![server.host()]);
        let mut sink = WriterSink::new(Vec::new());
        let report = pipeline.visit(&server.url("/post"), &mut sink).await.unwrap();

        assert_eq!(report.url, server.url("/post"));
        assert_eq!(sink.into_inner(), b"Hello\n\nWorld");
    }

    #[tokio::test]
    async fn test_blocked_visit_reports_requesting_stage() {
        let pipeline = pipeline_for(vec!["example.com".to_string()]);
        let mut sink = WriterSink::new(Vec::new());
        let err = pipeline.visit("https://other.com/page", &mut sink).await.unwrap_err();

        assert_eq!(err.stage, Stage::Requesting);
        assert!(matches!(err.source, GleanerError::DomainBlocked { .. }));
        assert!(sink.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_writes_nothing() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/boom");
                then.status(500);
            })
            .await;

        let pipeline = pipeline_for(vec![]);
        let mut sink = WriterSink::new(Vec::new());
        let err = pipeline.visit(&server.url("/boom"), &mut sink).await.unwrap_err();

        assert_eq!(err.stage, Stage::Requesting);
        assert!(err.source.is_retryable());
        assert!(sink.into_inner().is_empty());
    }

    #[test]
    fn test_extract_response_uses_final_url() {
        let pipeline = pipeline_for(vec![]);
        let response = FetchResponse {
            url: url::Url::parse("https://example.com/final").unwrap(),
            status: 200,
            body: PAGE.as_bytes().to_vec(),
            content_type: Some("text/html".to_string()),
        };

        let doc = pipeline.extract_response(&response).unwrap();
        assert_eq!(doc.source_url(), "https://example.com/final");
        assert_eq!(doc.title(), Some("Hello"));
        assert_eq!(doc.body(), "World");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Sinking.to_string(), "sinking");
        let err = VisitError::new("u", Stage::Parsing, GleanerError::ParseError("x".to_string()));
        assert!(err.to_string().contains("parsing failed"));
    }
}
