pub mod config;
pub mod crawl;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod parse;
pub mod pipeline;
pub mod rules;
pub mod sanitize;
pub mod sink;
pub mod text;

pub use config::{
    CONFIG_ENV_VAR, CrawlConfig, DEFAULT_OUTPUT, FetchConfig, GleanerConfig, GleanerConfigBuilder, HeaderSet,
    RECOGNIZED_HEADERS, RulesConfig,
};
pub use crawl::{CrawlSummary, Crawler, HostLimiter, VisitedSet};
pub use error::{GleanerError, Result};
pub use extract::{ExtractedContent, ExtractedDocument, extract_body, extract_content, extract_document, extract_title};
pub use fetch::{AllowList, Dispatcher, FetchRequest, FetchResponse, fetch_file, fetch_stdin};
pub use parse::{Document, Element};
pub use pipeline::{Pipeline, Stage, VisitError, VisitReport, VisitResult};
pub use rules::{ExtractionRule, ExtractionRules, Role};
pub use sanitize::{IsolatedContent, sanitize};
pub use sink::{FileSink, SharedSink, Sink, WriterSink};

/// Parses `html` and extracts title and body with the default rules.
///
/// ```rust
/// let doc = gleaner_core::extract_html("<title>T</title><main><p>Body</p></main>", "page.html").unwrap();
/// assert_eq!(doc.title(), Some("T"));
/// assert_eq!(doc.body(), "Body");
/// ```
pub fn extract_html(html: &str, source_url: &str) -> Result<ExtractedDocument> {
    let rules = ExtractionRules::from_config(&RulesConfig::default())?;
    let doc = Document::parse(html)?;
    Ok(extract_document(&doc, &rules, source_url))
}
