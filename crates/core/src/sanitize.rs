//! Noise removal on an isolated copy of a content subtree.
//!
//! The source document is never touched: [`IsolatedContent::copy_of`] builds a
//! new tree owned by the caller, and only that copy is edited. Several
//! extractions can therefore run over the same parsed page.

use scraper::node::Element as ElementData;
use scraper::{ElementRef, Html, Node};

use crate::parse::Element;
use crate::rules::ExtractionRule;
use crate::text;

/// A deep copy of one content subtree, free to mutate.
pub struct IsolatedContent {
    html: Html,
}

impl IsolatedContent {
    /// Deep-copies `root` and everything below it into a standalone fragment.
    pub fn copy_of(root: &Element<'_>) -> Self {
        let source = root.as_element_ref();
        let mut html = Html::new_fragment();
        let copy_root = html
            .tree
            .root_mut()
            .append(Node::Element(ElementData::clone(source.value())))
            .id();

        let mut pending = vec![(*source, copy_root)];
        while let Some((from, into)) = pending.pop() {
            for child in from.children() {
                let Some(mut parent) = html.tree.get_mut(into) else {
                    continue;
                };
                let copied = parent.append(child.value().clone()).id();
                pending.push((child, copied));
            }
        }

        Self { html }
    }

    /// Removes every element matching any of `rules`, with its subtree.
    ///
    /// Returns the number of matched elements.
    pub fn remove_matching(&mut self, rules: &[ExtractionRule]) -> usize {
        let doomed: Vec<_> = rules
            .iter()
            .flat_map(|rule| self.html.select(rule.selector()).map(|el| el.id()))
            .collect();

        for id in &doomed {
            if let Some(mut node) = self.html.tree.get_mut(*id) {
                node.detach();
            }
        }

        doomed.len()
    }

    /// Flattened text of what remains.
    pub fn text(&self) -> String {
        let parts: Vec<String> = self
            .html
            .tree
            .root()
            .children()
            .filter_map(ElementRef::wrap)
            .map(text::flatten)
            .filter(|t| !t.is_empty())
            .collect();
        parts.join(" ")
    }

    /// Serialized markup of what remains.
    pub fn html(&self) -> String {
        self.html
            .tree
            .root()
            .children()
            .filter_map(ElementRef::wrap)
            .map(|el| el.html())
            .collect()
    }
}

/// Copies `root`, strips everything matching `exclude`, and flattens the rest.
///
/// Returns the text and the number of removed elements.
pub fn sanitize(root: &Element<'_>, exclude: &[ExtractionRule]) -> (String, usize) {
    let mut copy = IsolatedContent::copy_of(root);
    let removed = copy.remove_matching(exclude);
    (copy.text(), removed)
}
