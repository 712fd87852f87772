//! Run configuration: browser header profile, allow-list, extraction rules,
//! batch settings, and the output destination.
//!
//! Every policy value the pipeline uses lives here and is passed explicitly
//! into the dispatcher, extractor, and batch runner. Configuration can be
//! built in code with [`GleanerConfig::builder`] or loaded from a JSON file.
//!
//! # Example
//!
//! ```rust
//! use gleaner_core::GleanerConfig;
//!
//! let config = GleanerConfig::builder()
//!     .allow_domain("example.com")
//!     .content_root("article")
//!     .timeout(10)
//!     .build();
//! assert_eq!(config.rules.content_root, "article");
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{GleanerError, Result};

/// Headers that must be present on every outbound request.
pub const RECOGNIZED_HEADERS: [&str; 7] = [
    "User-Agent",
    "Accept",
    "Accept-Language",
    "Accept-Encoding",
    "Sec-Ch-Ua",
    "Sec-Fetch-Mode",
    "Referer",
];

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "GLEANER_CONFIG";

/// Default append destination.
pub const DEFAULT_OUTPUT: &str = "extracted.txt";

/// Ordered mapping of header name to value.
///
/// Names compare case-insensitively; setting an existing name replaces its
/// value in place so the original order is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// The desktop Chrome profile sent by default.
    pub fn browser() -> Self {
        let mut headers = Self::new();
        headers.set(
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        headers.set(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
        );
        headers.set("Accept-Language", "en-US,en;q=0.9");
        headers.set("Accept-Encoding", "gzip, deflate, br");
        headers.set(
            "Sec-Ch-Ua",
            "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
        );
        headers.set("Sec-Fetch-Mode", "navigate");
        headers.set("Referer", "https://www.google.com/");
        headers
    }

    /// Sets a header, replacing any existing value with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Gets the value of a header by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Applies every entry of `overrides` on top of this set.
    pub fn merge(&mut self, overrides: &HeaderSet) {
        for (name, value) in overrides.iter() {
            self.set(name, value);
        }
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Recognized headers that are absent or blank.
    pub fn missing(&self) -> Vec<&'static str> {
        RECOGNIZED_HEADERS
            .iter()
            .copied()
            .filter(|name| self.get(name).is_none_or(|v| v.trim().is_empty()))
            .collect()
    }

    /// Checks that every recognized header is present.
    pub fn validate(&self) -> Result<()> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GleanerError::ConfigError(format!(
                "missing required headers: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HeaderSet {
    fn default() -> Self {
        Self::browser()
    }
}

impl Serialize for HeaderSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct HeaderSetVisitor;

impl<'de> Visitor<'de> for HeaderSetVisitor {
    type Value = HeaderSet;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object of header names to string values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<HeaderSet, A::Error> {
        let mut headers = HeaderSet::new();
        while let Some((name, value)) = access.next_entry::<String, String>()? {
            headers.set(name, value);
        }
        Ok(headers)
    }
}

impl<'de> Deserialize<'de> for HeaderSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(HeaderSetVisitor)
    }
}

/// Headers in a config file override the browser profile by name.
fn deserialize_header_overrides<'de, D>(deserializer: D) -> std::result::Result<HeaderSet, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = HeaderSet::deserialize(deserializer)?;
    let mut headers = HeaderSet::browser();
    headers.merge(&overrides);
    Ok(headers)
}

/// HTTP client configuration for the request dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Maximum number of redirects to follow.
    pub max_redirects: usize,
    /// Outbound header profile.
    #[serde(deserialize_with = "deserialize_header_overrides")]
    pub headers: HeaderSet,
    /// Permitted hostnames. Empty permits every host.
    pub allowed_domains: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout: 30, max_redirects: 10, headers: HeaderSet::browser(), allowed_domains: Vec::new() }
    }
}

/// Selector strings for each extraction role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Selector for the page title.
    pub title: String,
    /// Selector for the main content subtree(s).
    pub content_root: String,
    /// Selectors for noise removed from the content copy.
    pub exclude: Vec<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            title: "head > title".to_string(),
            content_root: "main".to_string(),
            exclude: ["nav", "button", "svg", "header", "footer", ".banner", ".ad"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Settings for batch runs over many URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Maximum visits in flight.
    pub concurrency: usize,
    /// Maximum simultaneous requests to one host.
    pub per_host_concurrency: usize,
    /// Minimum gap between request starts to one host, in milliseconds.
    pub per_host_delay_ms: u64,
    /// Extra attempts for retryable failures (0 = single attempt).
    pub max_retries: u32,
    /// Backoff before the first retry, doubled on each further attempt.
    pub retry_base_delay_ms: u64,
    /// Text written between consecutive records.
    pub separator: String,
    /// Stop the whole batch after this many seconds.
    pub deadline_secs: Option<u64>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            per_host_concurrency: 2,
            per_host_delay_ms: 250,
            max_retries: 0,
            retry_base_delay_ms: 500,
            separator: "\n\n---\n\n".to_string(),
            deadline_secs: None,
        }
    }
}

/// Complete configuration for a Gleaner run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GleanerConfig {
    /// URL visited when no input is given.
    pub start_url: Option<String>,
    /// Append destination.
    pub output: PathBuf,
    pub fetch: FetchConfig,
    pub rules: RulesConfig,
    pub crawl: CrawlConfig,
}

impl Default for GleanerConfig {
    fn default() -> Self {
        Self {
            start_url: None,
            output: PathBuf::from(DEFAULT_OUTPUT),
            fetch: FetchConfig::default(),
            rules: RulesConfig::default(),
            crawl: CrawlConfig::default(),
        }
    }
}

impl GleanerConfig {
    /// Creates a new builder starting from the defaults.
    pub fn builder() -> GleanerConfigBuilder {
        GleanerConfigBuilder::new()
    }

    /// Parses configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| GleanerError::ConfigError(e.to_string()))
    }

    /// Reads configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GleanerError::FileNotFound(path.to_path_buf()));
        }
        let json = fs::read_to_string(path)
            .map_err(|e| GleanerError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json).map_err(|e| match e {
            GleanerError::ConfigError(msg) => GleanerError::ConfigError(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Loads configuration from the first source that exists.
    ///
    /// Lookup order: `explicit`, `$GLEANER_CONFIG`, `<config dir>/gleaner/config.json`.
    /// An explicit path that doesn't exist is an error; a missing default file
    /// falls back to the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading default config file");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Platform config location, e.g. `~/.config/gleaner/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gleaner").join("config.json"))
    }

    /// Serializes the configuration as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| GleanerError::ConfigError(e.to_string()))
    }
}

/// Builder for GleanerConfig.
///
/// Provides a fluent API for configuring a run.
///
/// # Example
///
/// ```rust
/// use gleaner_core::GleanerConfig;
///
/// let config = GleanerConfig::builder()
///     .header("Referer", "https://duckduckgo.com/")
///     .exclude(vec!["nav".to_string(), ".cookie".to_string()])
///     .concurrency(8)
///     .build();
/// assert_eq!(config.fetch.headers.get("referer"), Some("https://duckduckgo.com/"));
/// ```
pub struct GleanerConfigBuilder {
    config: GleanerConfig,
}

impl GleanerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self { config: GleanerConfig::default() }
    }

    /// Creates a builder that starts from an existing configuration.
    pub fn from_config(config: GleanerConfig) -> Self {
        Self { config }
    }

    /// Sets the URL visited when no input is given.
    pub fn start_url(mut self, url: impl Into<String>) -> Self {
        self.config.start_url = Some(url.into());
        self
    }

    /// Sets the append destination.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output = path.into();
        self
    }

    /// Sets the request timeout in seconds.
    pub fn timeout(mut self, secs: u64) -> Self {
        self.config.fetch.timeout = secs;
        self
    }

    /// Overrides one outbound header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.fetch.headers.set(name, value);
        self
    }

    /// Adds a permitted hostname.
    pub fn allow_domain(mut self, host: impl Into<String>) -> Self {
        self.config.fetch.allowed_domains.push(host.into());
        self
    }

    /// Sets the title selector.
    pub fn title_selector(mut self, selector: impl Into<String>) -> Self {
        self.config.rules.title = selector.into();
        self
    }

    /// Sets the content-root selector.
    pub fn content_root(mut self, selector: impl Into<String>) -> Self {
        self.config.rules.content_root = selector.into();
        self
    }

    /// Replaces the exclusion selectors.
    pub fn exclude(mut self, selectors: Vec<String>) -> Self {
        self.config.rules.exclude = selectors;
        self
    }

    /// Sets the number of visits in flight for batch runs.
    pub fn concurrency(mut self, value: usize) -> Self {
        self.config.crawl.concurrency = value;
        self
    }

    /// Sets the per-host request limit for batch runs.
    pub fn per_host_concurrency(mut self, value: usize) -> Self {
        self.config.crawl.per_host_concurrency = value;
        self
    }

    /// Sets the minimum gap between requests to one host.
    pub fn per_host_delay_ms(mut self, value: u64) -> Self {
        self.config.crawl.per_host_delay_ms = value;
        self
    }

    /// Sets the number of retries for retryable failures.
    pub fn max_retries(mut self, value: u32) -> Self {
        self.config.crawl.max_retries = value;
        self
    }

    /// Sets the overall batch deadline.
    pub fn deadline_secs(mut self, value: u64) -> Self {
        self.config.crawl.deadline_secs = Some(value);
        self
    }

    /// Builds the config.
    pub fn build(self) -> GleanerConfig {
        self.config
    }
}

impl Default for GleanerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
