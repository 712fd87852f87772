use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, bail};
use clap::Parser;
use gleaner_core::{
    CrawlSummary, Crawler, FileSink, GleanerConfig, GleanerConfigBuilder, Pipeline, SharedSink, Sink, WriterSink,
    fetch_file, fetch_stdin,
};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use url::Url;

mod echo;

const VERSION: &str = env!("CARGO_PKG_VERSION");

type BoxedSink = Box<dyn Sink + Send>;

/// Extract page titles and body text into an append-only file
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(version)]
#[command(about = "Extract titles and body text from web pages", long_about = None)]
struct Args {
    /// URLs to fetch, local HTML files, or "-" for stdin (default: configured start_url)
    #[arg(value_name = "INPUT")]
    inputs: Vec<String>,

    /// Append destination, "-" for stdout (default: extracted.txt)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Permit requests to this host (repeatable; none permits every host)
    #[arg(long = "allow-domain", value_name = "HOST")]
    allow_domains: Vec<String>,

    /// Selector for the page title
    #[arg(long, value_name = "SELECTOR")]
    title_selector: Option<String>,

    /// Selector for the content root(s)
    #[arg(long, value_name = "SELECTOR")]
    content_root: Option<String>,

    /// Selector removed from the content (repeatable; replaces the defaults)
    #[arg(long, value_name = "SELECTOR")]
    exclude: Vec<String>,

    /// Override an outbound header (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Custom User-Agent for HTTP requests
    #[arg(long, value_name = "UA")]
    user_agent: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Visits in flight for batch runs
    #[arg(long, value_name = "NUM")]
    concurrency: Option<usize>,

    /// Simultaneous requests per host for batch runs
    #[arg(long, value_name = "NUM")]
    per_host: Option<usize>,

    /// Minimum gap between requests to one host
    #[arg(long, value_name = "MS")]
    delay_ms: Option<u64>,

    /// Retries for network failures and 5xx responses
    #[arg(long, value_name = "NUM")]
    retries: Option<u32>,

    /// Cancel a batch run after this many seconds
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    match s.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.trim().to_string())),
        _ => Err(format!("Invalid header: {}. Expected NAME:VALUE", s)),
    }
}

/// Where one input comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Url(String),
    File(PathBuf),
    Stdin,
}

impl Input {
    fn classify(raw: &str) -> Self {
        if raw == "-" {
            Self::Stdin
        } else if Url::parse(raw).is_ok_and(|u| u.has_host()) {
            Self::Url(raw.to_string())
        } else {
            Self::File(PathBuf::from(raw))
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Layers command-line flags over the loaded configuration.
fn resolve_config(args: &Args) -> anyhow::Result<GleanerConfig> {
    let loaded = GleanerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let mut builder = GleanerConfigBuilder::from_config(loaded);

    if let Some(output) = &args.output {
        builder = builder.output(output);
    }
    for host in &args.allow_domains {
        builder = builder.allow_domain(host);
    }
    if let Some(selector) = &args.title_selector {
        builder = builder.title_selector(selector);
    }
    if let Some(selector) = &args.content_root {
        builder = builder.content_root(selector);
    }
    if !args.exclude.is_empty() {
        builder = builder.exclude(args.exclude.clone());
    }
    for (name, value) in &args.headers {
        builder = builder.header(name, value);
    }
    if let Some(ua) = &args.user_agent {
        builder = builder.header("User-Agent", ua);
    }
    if let Some(secs) = args.timeout {
        builder = builder.timeout(secs);
    }
    if let Some(n) = args.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(n) = args.per_host {
        builder = builder.per_host_concurrency(n);
    }
    if let Some(ms) = args.delay_ms {
        builder = builder.per_host_delay_ms(ms);
    }
    if let Some(n) = args.retries {
        builder = builder.max_retries(n);
    }
    if let Some(secs) = args.deadline {
        builder = builder.deadline_secs(secs);
    }

    Ok(builder.build())
}

fn open_sink(output: &Path, separator: &str) -> anyhow::Result<BoxedSink> {
    if output == Path::new("-") {
        return Ok(Box::new(WriterSink::new(std::io::stdout()).with_separator(separator)));
    }
    let sink = FileSink::open(output).with_context(|| format!("Failed to open output file: {}", output.display()))?;
    Ok(Box::new(sink.with_separator(separator)))
}

/// Runs every input; returns whether all of them were persisted.
async fn run(args: Args) -> anyhow::Result<bool> {
    let started = Instant::now();
    let config = resolve_config(&args)?;
    let pipeline = Pipeline::from_config(&config).context("Invalid configuration")?;

    let raw_inputs = if args.inputs.is_empty() {
        match &config.start_url {
            Some(url) => vec![url.clone()],
            None => bail!("No input given and no start_url configured"),
        }
    } else {
        args.inputs.clone()
    };

    let (urls, locals): (Vec<Input>, Vec<Input>) =
        raw_inputs.iter().map(|raw| Input::classify(raw)).partition(|input| matches!(input, Input::Url(_)));

    let sink = SharedSink::new(open_sink(&config.output, &config.crawl.separator)?);
    let mut summary = CrawlSummary::default();
    let total = locals.len() + urls.len();

    for (index, input) in locals.iter().enumerate() {
        let (source, bytes) = match input {
            Input::Stdin => ("-".to_string(), fetch_stdin()),
            Input::File(path) => (path.display().to_string(), fetch_file(&path.to_string_lossy())),
            Input::Url(_) => continue,
        };
        if args.verbose {
            echo::print_step(index + 1, total, &format!("Reading {}", source.bright_white()));
        }

        let result = bytes
            .map_err(|e| gleaner_core::VisitError::new(&source, gleaner_core::Stage::Requesting, e))
            .and_then(|bytes| pipeline.visit_local(&source, &bytes, &mut sink.clone()));
        match result {
            Ok(report) => summary.succeeded.push(report),
            Err(err) => summary.failed.push(err),
        }
    }

    let urls: Vec<String> = urls
        .into_iter()
        .filter_map(|input| match input {
            Input::Url(url) => Some(url),
            _ => None,
        })
        .collect();

    if let [url] = urls.as_slice() {
        if args.verbose {
            echo::print_step(total, total, &format!("Fetching {}", url.bright_white().underline()));
        }
        let mut single = sink.clone();
        let result = tokio::select! {
            result = pipeline.visit(url, &mut single) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        match result {
            Some(Ok(report)) => summary.succeeded.push(report),
            Some(Err(err)) => summary.failed.push(err),
            None => summary.cancelled += 1,
        }
    } else if !urls.is_empty() {
        if args.verbose {
            echo::print_step(
                locals.len() + 1,
                total,
                &format!("Fetching {} URLs (concurrency {})", urls.len(), config.crawl.concurrency),
            );
        }
        let crawler = Crawler::new(pipeline, config.crawl.clone());
        let cancel = crawler.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling in-flight visits");
                cancel.cancel();
            }
        });

        let batch = crawler.run(urls, sink.clone()).await;
        interrupt.abort();

        summary.succeeded.extend(batch.succeeded);
        summary.failed.extend(batch.failed);
        summary.duplicates += batch.duplicates;
        summary.cancelled += batch.cancelled;
    }

    sink.flush().context("Failed to flush output")?;

    for report in &summary.succeeded {
        if args.verbose {
            echo::print_report(report);
        }
    }
    for err in &summary.failed {
        echo::print_error(&err.to_string());
    }
    if summary.cancelled > 0 {
        echo::print_warning(&format!("{} visit(s) cancelled", summary.cancelled));
    }
    if args.verbose {
        echo::print_summary(&summary, started.elapsed());
    }

    Ok(summary.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.verbose {
        echo::print_banner();
        echo::print_info("Debug logging enabled");
        eprintln!();
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            echo::print_error(&format!("{:#}", err));
            ExitCode::FAILURE
        }
    }
}
