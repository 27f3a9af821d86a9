use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use feedmail::config::{Config, DEFAULT_CONFIG_FILE};
use feedmail::email::EmailAssembler;
use feedmail::feed::{load_feed_list, merge_feed_urls};
use feedmail::ledger::DedupLedger;
use feedmail::pipeline::{Pipeline, PipelineOptions, RunSummary};
use feedmail::resource::{ResourceCache, ResourceFetcher};

#[derive(Parser, Debug)]
#[command(
    name = "feedmail",
    version,
    about = "Turn RSS/Atom articles into self-contained .eml files"
)]
struct Args {
    /// Feed URLs, processed before those in the feed list
    #[arg(value_name = "URL")]
    urls: Vec<String>,

    /// Feed list file, one URL per line
    #[arg(long, value_name = "FILE")]
    feeds: Option<PathBuf>,

    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory the .eml files are written to
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// From address of generated messages
    #[arg(long, value_name = "ADDRESS")]
    from: Option<String>,

    /// To address of generated messages
    #[arg(long, value_name = "ADDRESS")]
    to: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(feeds) = &self.feeds {
            config.feeds_file = feeds.clone();
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(from) = &self.from {
            config.from = from.clone();
        }
        if let Some(to) = &self.to {
            config.to = Some(to.clone());
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_summary(summary: &RunSummary) {
    for path in &summary.saved {
        println!("{}", path.display());
    }
    println!(
        "{} saved ({} updated), {} skipped, {} failed",
        summary.saved.len(),
        summary.updated,
        summary.skipped,
        summary.failed
    );
    if !summary.failed_feeds.is_empty() {
        eprintln!("Feeds that could not be fetched:");
        for feed in &summary.failed_feeds {
            eprintln!("  {feed}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    args.apply(&mut config);
    config.validate()?;

    let from_file = load_feed_list(&config.feeds_file).with_context(|| {
        format!(
            "Failed to read feed list '{}'",
            config.feeds_file.display()
        )
    })?;
    let feeds = merge_feed_urls(&args.urls, from_file);
    if feeds.is_empty() {
        eprintln!("No feeds given.");
        eprintln!();
        eprintln!("Pass feed URLs as arguments or list them, one per line, in:");
        eprintln!("  {}", config.feeds_file.display());
        std::process::exit(1);
    }

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory '{}'",
            config.output_dir.display()
        )
    })?;
    let cache = ResourceCache::open(&config.cache_dir).with_context(|| {
        format!(
            "Failed to open cache directory '{}'",
            config.cache_dir.display()
        )
    })?;
    let ledger = DedupLedger::load(&config.records_file, config.record_max)?;

    let client = feedmail::http::build_client().context("Failed to build HTTP client")?;
    let fetcher = ResourceFetcher::with_limits(
        client.clone(),
        config.download_concurrency,
        config.download_timeout(),
        config.head_timeout(),
    );
    let assembler = EmailAssembler::new(
        &config.output_dir,
        &config.from,
        config.to.as_deref(),
    )
    .context("Invalid mail address")?;

    tracing::info!(feeds = feeds.len(), "Starting run");

    let mut pipeline = Pipeline::new(
        client,
        cache,
        ledger,
        fetcher,
        assembler,
        PipelineOptions {
            feed_timeout: config.feed_timeout(),
            cache_retention: config.cache_retention(),
        },
    );
    pipeline.run(&feeds).await;
    let summary = pipeline.finish()?;

    print_summary(&summary);
    Ok(())
}
