//! Compiled selector rules for each extraction role.

use std::fmt;

use scraper::Selector;

use crate::config::RulesConfig;
use crate::parse::compile_selector;
use crate::Result;

/// What a rule's matches are used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The first match supplies the page title.
    Title,
    /// Each match is copied out as main content.
    ContentRoot,
    /// Matches are removed from the content copy.
    Exclude,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Title => f.write_str("title"),
            Role::ContentRoot => f.write_str("content-root"),
            Role::Exclude => f.write_str("exclude"),
        }
    }
}

/// A selector string paired with its role, compiled once.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    source: String,
    selector: Selector,
    role: Role,
}

impl ExtractionRule {
    /// Compiles a rule.
    ///
    /// # Errors
    ///
    /// Returns [`crate::GleanerError::InvalidSelector`] if `selector` is not valid CSS.
    pub fn new(role: Role, selector: &str) -> Result<Self> {
        Ok(Self { source: selector.trim().to_string(), selector: compile_selector(selector)?, role })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// The selector text as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// The full rule set used by the extractors.
#[derive(Debug, Clone)]
pub struct ExtractionRules {
    pub title: ExtractionRule,
    pub content_root: ExtractionRule,
    pub exclude: Vec<ExtractionRule>,
}

impl ExtractionRules {
    /// Compiles every selector in `config`.
    ///
    /// Blank exclusion entries are ignored.
    pub fn from_config(config: &RulesConfig) -> Result<Self> {
        let exclude = config
            .exclude
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| ExtractionRule::new(Role::Exclude, s))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            title: ExtractionRule::new(Role::Title, &config.title)?,
            content_root: ExtractionRule::new(Role::ContentRoot, &config.content_root)?,
            exclude,
        })
    }

    /// Iterates over every rule.
    pub fn iter(&self) -> impl Iterator<Item = &ExtractionRule> {
        [&self.title, &self.content_root].into_iter().chain(self.exclude.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GleanerError;

    #[test]
    fn test_from_default_config() {
        let rules = ExtractionRules::from_config(&RulesConfig::default()).unwrap();
        assert_eq!(rules.title.as_str(), "head > title");
        assert_eq!(rules.content_root.role(), Role::ContentRoot);
        assert_eq!(rules.exclude.len(), 7);
        assert!(rules.exclude.iter().all(|r| r.role() == Role::Exclude));
        assert_eq!(rules.iter().count(), 9);
    }

    #[test]
    fn test_invalid_selector_names_the_rule() {
        let config = RulesConfig { content_root: "main >".to_string(), ..Default::default() };
        match ExtractionRules::from_config(&config) {
            Err(GleanerError::InvalidSelector { selector, .. }) => assert_eq!(selector, "main >"),
            other => panic!("expected invalid selector, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_blank_exclusions_skipped() {
        let config = RulesConfig { exclude: vec!["nav".to_string(), "  ".to_string()], ..Default::default() };
        let rules = ExtractionRules::from_config(&config).unwrap();
        assert_eq!(rules.exclude.len(), 1);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::ContentRoot.to_string(), "content-root");
        assert_eq!(Role::Exclude.to_string(), "exclude");
    }
}
