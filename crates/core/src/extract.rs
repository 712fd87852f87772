//! Title and main-content extraction.
//!
//! Both extractors read the parsed [`Document`] without modifying it. Body
//! extraction copies each content root before sanitizing, see [`crate::sanitize`].

use serde::Serialize;

use crate::parse::{Document, Element};
use crate::rules::{ExtractionRule, ExtractionRules};
use crate::sanitize;
use crate::text::collapse_whitespace;

/// Separator between the title and the body in a serialized record, and
/// between the bodies of several content roots.
pub const BLANK_LINE: &str = "\n\n";

/// The result of extracting one page.
///
/// Immutable once built; persisted once by a [`crate::sink::Sink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedDocument {
    title: Option<String>,
    body: String,
    source_url: String,
}

impl ExtractedDocument {
    pub fn new(title: Option<String>, body: String, source_url: impl Into<String>) -> Self {
        Self { title, body, source_url: source_url.into() }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// The plain-text record appended to the sink: title line, blank line, body.
    pub fn to_record(&self) -> String {
        format!("{}{}{}", self.title.as_deref().unwrap_or_default(), BLANK_LINE, self.body)
    }
}

/// Body text plus statistics about how it was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    /// Flattened, sanitized body text.
    pub body: String,
    /// Number of content roots copied.
    pub root_count: usize,
    /// Number of elements removed by exclusion rules.
    pub removed_count: usize,
}

/// Returns the trimmed text of the first element matching `rule`.
///
/// Whitespace runs inside the title collapse to single spaces. A missing or
/// blank title is `None`.
pub fn extract_title(doc: &Document, rule: &ExtractionRule) -> Option<String> {
    doc.select_with(rule.selector())
        .first()
        .map(|el| collapse_whitespace(&el.text()))
        .filter(|title| !title.is_empty())
}

/// Extracts the sanitized text of every content root.
pub fn extract_body(doc: &Document, content_rule: &ExtractionRule, exclude: &[ExtractionRule]) -> String {
    extract_content(doc, content_rule, exclude).body
}

/// Extracts the sanitized text of every content root, with statistics.
///
/// Roots are processed in document order; a root nested inside an earlier
/// root is skipped. Roots whose text is empty after sanitizing contribute
/// nothing.
pub fn extract_content(doc: &Document, content_rule: &ExtractionRule, exclude: &[ExtractionRule]) -> ExtractedContent {
    let mut roots: Vec<Element<'_>> = Vec::new();
    for candidate in doc.select_with(content_rule.selector()) {
        if roots.iter().any(|root| candidate.is_inside(root)) {
            continue;
        }
        roots.push(candidate);
    }

    let mut bodies = Vec::with_capacity(roots.len());
    let mut removed_count = 0;
    for root in &roots {
        let (text, removed) = sanitize::sanitize(root, exclude);
        removed_count += removed;
        if !text.is_empty() {
            bodies.push(text);
        }
    }

    ExtractedContent { body: bodies.join(BLANK_LINE), root_count: roots.len(), removed_count }
}

/// Runs both extractors over the same document.
pub fn extract_document(doc: &Document, rules: &ExtractionRules, source_url: &str) -> ExtractedDocument {
    let title = extract_title(doc, &rules.title);
    let body = extract_body(doc, &rules.content_root, &rules.exclude);
    ExtractedDocument::new(title, body, source_url)
}
