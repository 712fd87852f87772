//! Batch runner over a finite list of URLs.
//!
//! Visits run concurrently on a bounded worker pool with per-host politeness.
//! Every URL is visited at most once and records land in the shared sink in
//! completion order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::CrawlConfig;
use crate::fetch::{FetchRequest, FetchResponse};
use crate::pipeline::{Pipeline, Stage, VisitError, VisitReport, VisitResult};
use crate::sink::{SharedSink, Sink};
use crate::GleanerError;

/// URLs already claimed by a visit.
#[derive(Debug, Default)]
pub struct VisitedSet {
    seen: Mutex<HashSet<String>>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `url`, returning false if it was already claimed.
    ///
    /// Check and insert happen under one lock.
    pub fn insert(&self, url: &str) -> bool {
        let key = normalize(url);
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).insert(key)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drops the fragment; unparseable input is kept verbatim so it still fails
/// later with a proper error.
fn normalize(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}

#[derive(Debug)]
struct HostSlot {
    permits: Arc<Semaphore>,
    last_start: tokio::sync::Mutex<Option<Instant>>,
}

/// Per-host concurrency cap and minimum spacing between request starts.
#[derive(Debug)]
pub struct HostLimiter {
    slots: Mutex<HashMap<String, Arc<HostSlot>>>,
    per_host: usize,
    delay: Duration,
}

impl HostLimiter {
    pub fn new(per_host: usize, delay: Duration) -> Self {
        Self { slots: Mutex::new(HashMap::new()), per_host: per_host.max(1), delay }
    }

    fn slot(&self, host: &str) -> Arc<HostSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(host.to_ascii_lowercase())
            .or_insert_with(|| {
                Arc::new(HostSlot {
                    permits: Arc::new(Semaphore::new(self.per_host)),
                    last_start: tokio::sync::Mutex::new(None),
                })
            })
            .clone()
    }

    /// Waits for a free slot on `host` and for the spacing delay to elapse.
    ///
    /// The returned permit must be held for the duration of the request.
    pub async fn acquire(&self, host: &str) -> Option<OwnedSemaphorePermit> {
        let slot = self.slot(host);
        let permit = slot.permits.clone().acquire_owned().await.ok()?;

        let mut last_start = slot.last_start.lock().await;
        if let Some(previous) = *last_start {
            let ready_at = previous + self.delay;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_start = Some(Instant::now());

        Some(permit)
    }
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct CrawlSummary {
    pub succeeded: Vec<VisitReport>,
    pub failed: Vec<VisitError>,
    /// Inputs skipped because the same URL was already claimed.
    pub duplicates: usize,
    /// Visits that were cancelled or never started because of cancellation.
    pub cancelled: usize,
}

impl CrawlSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.cancelled == 0
    }
}

/// Concurrent batch visitor built on a shared [`Pipeline`].
#[derive(Debug, Clone)]
pub struct Crawler {
    pipeline: Arc<Pipeline>,
    config: CrawlConfig,
    cancel: CancellationToken,
}

impl Crawler {
    pub fn new(pipeline: Pipeline, config: CrawlConfig) -> Self {
        Self { pipeline: Arc::new(pipeline), config, cancel: CancellationToken::new() }
    }

    /// Token that stops the run when cancelled.
    ///
    /// In-flight fetches are aborted and queued URLs are never started.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Visits every URL in `urls` and appends each extracted document to `sink`.
    pub async fn run<I, S>(&self, urls: I, sink: SharedSink<S>) -> CrawlSummary
    where
        I: IntoIterator<Item = String>,
        S: Sink + Send + 'static,
    {
        let mut summary = CrawlSummary::default();
        let visited = VisitedSet::new();
        let hosts = Arc::new(HostLimiter::new(
            self.config.per_host_concurrency,
            Duration::from_millis(self.config.per_host_delay_ms),
        ));
        let workers = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let deadline = self
            .config
            .deadline_secs
            .map(|secs| spawn_deadline(self.cancel.clone(), Duration::from_secs(secs)));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();

        for url in urls {
            if !visited.insert(&url) {
                tracing::debug!(url, "duplicate skipped");
                summary.duplicates += 1;
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = workers.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                summary.cancelled += 1;
                continue;
            };

            let visit = Visit {
                pipeline: self.pipeline.clone(),
                hosts: hosts.clone(),
                cancel: self.cancel.clone(),
                max_retries: self.config.max_retries,
                retry_base_delay: Duration::from_millis(self.config.retry_base_delay_ms),
            };
            let mut sink = sink.clone();
            let task_url = url.clone();
            let handle = tasks.spawn(async move {
                let result = visit.run(&task_url, &mut sink).await;
                drop(permit);
                result
            });
            pending.insert(handle.id(), url);

            // Collect finished visits as we go so reports do not pile up.
            while let Some(joined) = tasks.try_join_next_with_id() {
                record(&mut summary, &mut pending, joined);
            }
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            record(&mut summary, &mut pending, joined);
        }

        if let Some(handle) = deadline {
            handle.abort();
        }

        tracing::info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            duplicates = summary.duplicates,
            cancelled = summary.cancelled,
            visited = visited.len(),
            "crawl finished"
        );
        summary
    }
}

fn spawn_deadline(cancel: CancellationToken, after: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(after) => {
                tracing::warn!(secs = after.as_secs(), "deadline reached, cancelling crawl");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    })
}

type Joined = std::result::Result<(Id, VisitResult<VisitReport>), JoinError>;

/// Files a finished task into the summary; `pending` maps live task ids to their URLs.
fn record(summary: &mut CrawlSummary, pending: &mut HashMap<Id, String>, joined: Joined) {
    match joined {
        Ok((id, result)) => {
            pending.remove(&id);
            match result {
                Ok(report) => summary.succeeded.push(report),
                Err(err) if matches!(err.source, GleanerError::Cancelled) => summary.cancelled += 1,
                Err(err) => summary.failed.push(err),
            }
        }
        Err(err) => {
            let url = pending.remove(&err.id()).unwrap_or_default();
            tracing::error!(url, error = %err, "visit task failed");
            summary
                .failed
                .push(VisitError::new(&url, Stage::Reporting, GleanerError::TaskFailed(err.to_string())));
        }
    }
}

/// Everything one spawned visit needs.
struct Visit {
    pipeline: Arc<Pipeline>,
    hosts: Arc<HostLimiter>,
    cancel: CancellationToken,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl Visit {
    async fn run<S: Sink + ?Sized>(&self, url: &str, sink: &mut S) -> VisitResult<VisitReport> {
        let response = self.fetch(url).await?;
        let doc = self.pipeline.process(url, &response.body, response.content_type.as_deref())?;

        if self.cancel.is_cancelled() {
            return Err(cancelled(url, Stage::Sinking));
        }
        self.pipeline.persist(&doc, sink)
    }

    async fn fetch(&self, url: &str) -> VisitResult<FetchResponse> {
        let request = self.pipeline.prepare(url)?;
        let host = request.url.host_str().unwrap_or_default().to_string();
        let mut attempt = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(cancelled(url, Stage::Requesting)),
                result = self.send_polite(url, &host, request.clone()) => result,
            };

            match result {
                Err(err) if err.source.is_retryable() && attempt < self.max_retries => {
                    let backoff = self.retry_base_delay.saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    tracing::debug!(url, attempt, backoff_ms = backoff.as_millis() as u64, "retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(cancelled(url, Stage::Requesting)),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                other => return other,
            }
        }
    }

    async fn send_polite(&self, url: &str, host: &str, request: FetchRequest) -> VisitResult<FetchResponse> {
        let Some(_permit) = self.hosts.acquire(host).await else {
            return Err(cancelled(url, Stage::Requesting));
        };
        self.pipeline.send(url, request).await
    }
}

fn cancelled(url: &str, stage: Stage) -> VisitError {
    tracing::debug!(url, %stage, "visit cancelled");
    VisitError::new(url, stage, GleanerError::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetchConfig, RulesConfig};
    use crate::sink::WriterSink;
    use httpmock::prelude::*;

    fn page(title: &str) -> String {
        format!("<html><head><title>{title}</title></head><body><main><p>{title} body</p></main></body></html>")
    }

    fn crawler(config: CrawlConfig) -> Crawler {
        let fetch = FetchConfig { timeout: 5, ..Default::default() };
        let pipeline = Pipeline::new(fetch, &RulesConfig::default()).unwrap();
        Crawler::new(pipeline, config)
    }

    fn fast() -> CrawlConfig {
        CrawlConfig { per_host_delay_ms: 0, separator: "\n--\n".to_string(), ..Default::default() }
    }

    fn output(sink: SharedSink<WriterSink<Vec<u8>>>) -> String {
        String::from_utf8(sink.try_unwrap().unwrap().into_inner()).unwrap()
    }

    #[test]
    fn test_visited_set_ignores_fragment() {
        let set = VisitedSet::new();
        assert!(set.insert("https://example.com/a#top"));
        assert!(!set.insert("https://example.com/a"));
        assert!(!set.insert("https://example.com/a#bottom"));
        assert!(set.insert("https://example.com/b"));
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicates_visited_once() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.path("/a");
                then.status(200).header("content-type", "text/html").body(page("A"));
            })
            .await;

        let sink = SharedSink::new(WriterSink::new(Vec::new()).with_separator("\n--\n"));
        let urls = vec![server.url("/a"), server.url("/a"), format!("{}#frag", server.url("/a"))];
        let summary = crawler(fast()).run(urls, sink.clone()).await;

        mock.assert_hits_async(1).await;
        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.duplicates, 2);
        assert_eq!(output(sink), "A\n\nA body");
    }

    #[tokio::test]
    async fn test_concurrent_records_do_not_interleave() {
        let server = MockServer::start_async().await;
        for i in 0..6 {
            let body = page(&format!("Page{i}"));
            server
                .mock_async(move |when, then| {
                    when.path(format!("/p{i}"));
                    then.status(200).header("content-type", "text/html").body(body);
                })
                .await;
        }

        let config = CrawlConfig { concurrency: 3, per_host_concurrency: 3, ..fast() };
        let sink = SharedSink::new(WriterSink::new(Vec::new()).with_separator("\n--\n"));
        let urls = (0..6).map(|i| server.url(format!("/p{i}")));
        let summary = crawler(config).run(urls, sink.clone()).await;

        assert!(summary.is_success());
        assert_eq!(summary.succeeded.len(), 6);

        let text = output(sink);
        let mut records: Vec<&str> = text.split("\n--\n").collect();
        records.sort();
        let expected: Vec<String> = (0..6).map(|i| format!("Page{i}\n\nPage{i} body")).collect();
        assert_eq!(records, expected);
    }

    #[tokio::test]
    async fn test_failures_reported_per_url() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/ok");
                then.status(200).header("content-type", "text/html").body(page("Ok"));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.path("/missing");
                then.status(404);
            })
            .await;

        let sink = SharedSink::new(WriterSink::new(Vec::new()));
        let urls = vec![server.url("/ok"), server.url("/missing"), "not a url".to_string()];
        let summary = crawler(fast()).run(urls, sink.clone()).await;

        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.failed.len(), 2);
        assert!(!summary.is_success());
        assert!(summary.failed.iter().all(|e| e.stage == Stage::Requesting));
        assert_eq!(output(sink), "Ok\n\nOk body");
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.path("/a");
                then.status(200).header("content-type", "text/html").body(page("A"));
            })
            .await;

        let crawler = crawler(fast());
        crawler.cancellation_token().cancel();

        let sink = SharedSink::new(WriterSink::new(Vec::new()));
        let summary = crawler.run(vec![server.url("/a")], sink.clone()).await;

        mock.assert_hits_async(0).await;
        assert_eq!(summary.cancelled, 1);
        assert!(output(sink).is_empty());
    }

    #[tokio::test]
    async fn test_deadline_aborts_slow_fetch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/slow");
                then.status(200).header("content-type", "text/html").body(page("Slow")).delay(Duration::from_secs(3));
            })
            .await;

        let config = CrawlConfig { deadline_secs: Some(1), ..fast() };
        let sink = SharedSink::new(WriterSink::new(Vec::new()));
        let started = std::time::Instant::now();
        let summary = crawler(config).run(vec![server.url("/slow")], sink.clone()).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(summary.cancelled, 1);
        assert!(output(sink).is_empty());
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.path("/flaky");
                then.status(503);
            })
            .await;

        let config = CrawlConfig { max_retries: 2, retry_base_delay_ms: 10, ..fast() };
        let sink = SharedSink::new(WriterSink::new(Vec::new()));
        let summary = crawler(config).run(vec![server.url("/flaky")], sink.clone()).await;

        mock.assert_hits_async(3).await;
        assert_eq!(summary.failed.len(), 1);
        assert!(matches!(summary.failed[0].source, GleanerError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.path("/gone");
                then.status(410);
            })
            .await;

        let config = CrawlConfig { max_retries: 3, retry_base_delay_ms: 10, ..fast() };
        let sink = SharedSink::new(WriterSink::new(Vec::new()));
        let summary = crawler(config).run(vec![server.url("/gone")], sink).await;

        mock.assert_hits_async(1).await;
        assert_eq!(summary.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_host_limiter_spaces_request_starts() {
        let limiter = HostLimiter::new(1, Duration::from_millis(50));
        let started = Instant::now();
        drop(limiter.acquire("example.com").await);
        drop(limiter.acquire("EXAMPLE.com").await);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_host_limiter_caps_concurrent_requests() {
        let limiter = HostLimiter::new(1, Duration::ZERO);
        let held = limiter.acquire("example.com").await;
        assert!(held.is_some());

        let waiting = tokio::time::timeout(Duration::from_millis(50), limiter.acquire("example.com")).await;
        assert!(waiting.is_err(), "second request started while the first held the host");

        let other = tokio::time::timeout(Duration::from_millis(50), limiter.acquire("other.com")).await;
        assert!(other.is_ok());

        drop(held);
        let next = tokio::time::timeout(Duration::from_millis(50), limiter.acquire("example.com")).await;
        assert!(matches!(next, Ok(Some(_))));
    }

    fn panicking_visit() -> VisitResult<VisitReport> {
        panic!("extractor bug")
    }

    #[tokio::test]
    async fn test_panicked_visit_keeps_its_url() {
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();
        let handle = tasks.spawn(async { panicking_visit() });
        pending.insert(handle.id(), "https://example.com/a".to_string());

        let mut summary = CrawlSummary::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            record(&mut summary, &mut pending, joined);
        }

        assert!(pending.is_empty());
        assert_eq!(summary.failed.len(), 1);
        let err = &summary.failed[0];
        assert_eq!(err.url, "https://example.com/a");
        assert!(matches!(err.source, GleanerError::TaskFailed(_)));
        assert!(!summary.is_success());
    }
}
