//! Response parsing and DOM access.
//!
//! This module turns raw response bytes into a [`Document`] and provides
//! [`Element`] for navigating the tree with CSS selectors. Markup parsing
//! itself is delegated to `scraper`; this layer decides which bytes are
//! parseable at all and how they are decoded.
//!
//! # Example
//!
//! ```rust
//! use gleaner_core::parse::Document;
//!
//! let html = r#"
//!     <html>
//!         <body>
//!             <h1>Title</h1>
//!             <p class="content">Paragraph</p>
//!         </body>
//!     </html>
//! "#;
//!
//! let doc = Document::parse(html).unwrap();
//! let paragraphs = doc.select("p.content").unwrap();
//! assert_eq!(paragraphs.len(), 1);
//! ```

use std::sync::LazyLock;

use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::{GleanerError, Result};

/// Bytes inspected for charset declarations and binary content.
const SNIFF_LEN: usize = 1024;

static META_CHARSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([^"'\s/>;]+)"#).unwrap());

/// Represents a parsed HTML document.
///
/// A Document wraps a parsed page and provides methods for querying elements
/// using CSS selectors. The tree is never mutated after parsing.
///
/// # Example
///
/// ```rust
/// use gleaner_core::parse::Document;
///
/// let doc = Document::from_bytes(b"<title>Test</title><p>Hello</p>", Some("text/html")).unwrap();
/// assert_eq!(doc.select("p").unwrap()[0].text(), "Hello");
/// ```
pub struct Document {
    html: Html,
}

impl Document {
    /// Parses HTML from a string.
    ///
    /// Malformed markup is repaired by the HTML5 tree builder, so this never
    /// fails for text input.
    pub fn parse(html: &str) -> Result<Self> {
        Ok(Self { html: Html::parse_document(html) })
    }

    /// Parses raw response bytes.
    ///
    /// The charset is taken from `content_type`, then from a `<meta>` declaration,
    /// and defaults to UTF-8 with lossy replacement.
    ///
    /// # Errors
    ///
    /// Returns [`GleanerError::ParseError`] when the content type is not a
    /// markup or text type, or when the body is binary.
    pub fn from_bytes(bytes: &[u8], content_type: Option<&str>) -> Result<Self> {
        if let Some(ct) = content_type
            && !is_markup_type(ct)
        {
            return Err(GleanerError::ParseError(format!("unsupported content type: {}", ct)));
        }

        if Encoding::for_bom(bytes).is_none() && bytes[..bytes.len().min(SNIFF_LEN)].contains(&0) {
            return Err(GleanerError::ParseError("body looks like binary data".to_string()));
        }

        let text = decode(bytes, content_type);
        Self::parse(&text)
    }

    /// Gets the underlying `scraper::Html`.
    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Selects elements using a CSS selector string.
    ///
    /// # Errors
    ///
    /// Returns [`GleanerError::InvalidSelector`] if the selector is invalid.
    pub fn select(&'_ self, selector: &str) -> Result<Vec<Element<'_>>> {
        let sel = compile_selector(selector)?;
        Ok(self.select_with(&sel))
    }

    /// Selects elements using a compiled selector, in document order.
    ///
    /// Walks the tree rather than the node arena: nodes the tree builder moved
    /// (foster-parented table content, reconstructed formatting elements) are
    /// returned where they ended up, not where they were created.
    pub fn select_with(&'_ self, selector: &Selector) -> Vec<Element<'_>> {
        self.html.root_element().select(selector).map(|element| Element { element }).collect()
    }
}

/// A wrapper around scraper's ElementRef.
///
/// # Example
///
/// ```rust
/// use gleaner_core::parse::Document;
///
/// let html = r#"<a href="https://example.com">Link text</a>"#;
/// let doc = Document::parse(html).unwrap();
/// let link = &doc.select("a").unwrap()[0];
///
/// assert_eq!(link.text(), "Link text");
/// assert_eq!(link.attr("href"), Some("https://example.com"));
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Element<'a> {
    element: ElementRef<'a>,
}

impl<'a> Element<'a> {
    /// Gets the outer HTML of this element.
    pub fn outer_html(&self) -> String {
        self.element.html()
    }

    /// Gets the concatenated text nodes of this element.
    pub fn text(&self) -> String {
        self.element.text().collect()
    }

    /// Gets the value of an attribute.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.element.value().attr(name)
    }

    /// Gets the lowercase tag name of this element.
    pub fn tag_name(&self) -> String {
        self.element.value().name().to_lowercase()
    }

    /// Returns `true` if `other` is a proper ancestor of this element.
    pub fn is_inside(&self, other: &Element<'_>) -> bool {
        self.element.ancestors().any(|ancestor| ancestor.id() == other.element.id())
    }

    /// Gets the wrapped `scraper` element.
    pub fn as_element_ref(&self) -> ElementRef<'a> {
        self.element
    }
}

/// Compiles a CSS selector, mapping failures to [`GleanerError::InvalidSelector`].
pub fn compile_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| GleanerError::InvalidSelector { selector: selector.to_string(), reason: e.to_string() })
}

/// Returns `true` for content types that carry parseable markup or text.
pub fn is_markup_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    essence.is_empty() || essence.starts_with("text/") || essence.contains("html") || essence.contains("xml")
}

/// Decodes response bytes to UTF-8 text.
pub fn decode(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset_param)
        .or_else(|| meta_charset(bytes))
        .unwrap_or(UTF_8);

    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

fn charset_param(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Encoding::for_label(value.trim().trim_matches('"').as_bytes())
        } else {
            None
        }
    })
}

fn meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(SNIFF_LEN)]);
    let label = META_CHARSET_RE.captures(&head)?.get(1)?.as_str().to_string();
    Encoding::for_label(label.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"
        <!DOCTYPE html>
        <html lang="en">
        <head>
            <meta charset="UTF-8">
            <title>Test Page</title>
        </head>
        <body>
            <h1>Heading</h1>
            <p class="content">Paragraph 1</p>
            <p class="content">Paragraph 2</p>
            <a href="https://example.com">Link</a>
        </body>
        </html>
    "#;

    #[test]
    fn test_select_elements() {
        let doc = Document::parse(SAMPLE_HTML).unwrap();
        let elements = doc.select("p.content").unwrap();

        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].text(), "Paragraph 1");
        assert_eq!(elements[1].text(), "Paragraph 2");
    }

    #[test]
    fn test_element_attributes() {
        let doc = Document::parse(SAMPLE_HTML).unwrap();
        let elements = doc.select("a").unwrap();

        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].attr("href"), Some("https://example.com"));
        assert_eq!(elements[0].tag_name(), "a");
    }

    #[test]
    fn test_invalid_selector() {
        let doc = Document::parse(SAMPLE_HTML).unwrap();
        let result = doc.select("[[invalid");

        assert!(matches!(result, Err(GleanerError::InvalidSelector { .. })));
    }

    #[test]
    fn test_malformed_markup_still_parses() {
        let doc = Document::from_bytes(b"<main><p>Unclosed <b>bold<div>text</main>", None).unwrap();
        let text = doc.select("main").unwrap()[0].text();
        assert!(text.contains("Unclosed"));
        assert!(text.contains("text"));
    }

    #[test]
    fn test_binary_body_rejected() {
        let result = Document::from_bytes(&[0x89, b'P', b'N', b'G', 0, 0, 0, 13], None);
        assert!(matches!(result, Err(GleanerError::ParseError(_))));
    }

    #[test]
    fn test_non_markup_content_type_rejected() {
        let result = Document::from_bytes(b"%PDF-1.7", Some("application/pdf"));
        assert!(matches!(result, Err(GleanerError::ParseError(_))));
    }

    #[test]
    fn test_markup_types() {
        assert!(is_markup_type("text/html; charset=utf-8"));
        assert!(is_markup_type("application/xhtml+xml"));
        assert!(is_markup_type("text/plain"));
        assert!(!is_markup_type("image/png"));
        assert!(!is_markup_type("application/json"));
    }

    #[test]
    fn test_decode_charset_from_content_type() {
        let bytes = b"<p>caf\xe9</p>";
        let text = decode(bytes, Some("text/html; charset=ISO-8859-1"));
        assert!(text.contains("café"));
    }

    #[test]
    fn test_decode_charset_from_meta() {
        let bytes = b"<html><head><meta charset=\"windows-1252\"></head><body>na\xefve</body></html>";
        let text = decode(bytes, None);
        assert!(text.contains("naïve"));
    }

    #[test]
    fn test_decode_defaults_to_utf8() {
        let text = decode("<p>žluťoučký</p>".as_bytes(), Some("text/html"));
        assert!(text.contains("žluťoučký"));
    }

    #[test]
    fn test_select_follows_tree_order_after_foster_parenting() {
        let doc = Document::parse(
            "<table><tr><td><section>B</section></td></tr><section>A</section></table>",
        )
        .unwrap();
        let texts: Vec<String> = doc.select("section").unwrap().iter().map(Element::text).collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    #[test]
    fn test_is_inside() {
        let doc = Document::parse("<main><div><p>x</p></div></main><p>y</p>").unwrap();
        let main = doc.select("main").unwrap()[0];
        let paragraphs = doc.select("p").unwrap();
        assert!(paragraphs[0].is_inside(&main));
        assert!(!paragraphs[1].is_inside(&main));
        assert!(!main.is_inside(&main));
    }
}
