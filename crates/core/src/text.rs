//! Flattening a subtree to plain text.

use scraper::{ElementRef, Node};

/// Elements whose boundaries separate words.
const BLOCK_ELEMENTS: [&str; 31] = [
    "address",
    "article",
    "aside",
    "blockquote",
    "br",
    "dd",
    "div",
    "dl",
    "dt",
    "figcaption",
    "figure",
    "form",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "hr",
    "li",
    "main",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "td",
    "th",
    "tr",
    "ul",
    "caption",
];

/// Elements whose text is never rendered.
const HIDDEN_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Flattens the text of `element` in document order.
///
/// Block boundaries count as whitespace, whitespace runs collapse to one space,
/// and the result is trimmed.
pub fn flatten(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(element, &mut raw);
    collapse_whitespace(&raw)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if HIDDEN_ELEMENTS.contains(&name) {
                    continue;
                }

                let block = BLOCK_ELEMENTS.contains(&name);
                if block {
                    out.push(' ');
                }
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, out);
                }
                if block {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Collapses every whitespace run to a single space and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn flatten_first(html: &str, selector: &str) -> String {
        let doc = Html::parse_document(html);
        let sel = Selector::parse(selector).unwrap();
        flatten(doc.select(&sel).next().unwrap())
    }

    #[test]
    fn test_flatten_strips_tags() {
        let text = flatten_first(
            r#"<div><p>Text with <strong>bold</strong> and <em>italic</em>.</p></div>"#,
            "div",
        );
        assert_eq!(text, "Text with bold and italic.");
    }

    #[test]
    fn test_block_boundaries_separate_words() {
        let text = flatten_first("<main><p>First</p><p>Second</p><ul><li>a</li><li>b</li></ul></main>", "main");
        assert_eq!(text, "First Second a b");
    }

    #[test]
    fn test_inline_boundaries_do_not_split_words() {
        let text = flatten_first("<p>un<b>break</b>able</p>", "p");
        assert_eq!(text, "unbreakable");
    }

    #[test]
    fn test_hidden_elements_skipped() {
        let text = flatten_first(
            "<main><script>var x = 1;</script><style>p{}</style><p>Visible</p></main>",
            "main",
        );
        assert_eq!(text, "Visible");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\n b\t c  "), "a b c");
        assert_eq!(collapse_whitespace(" \n "), "");
    }
}
