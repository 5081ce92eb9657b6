//! Kumo-Crawl main entry point
//!
//! This is the command-line interface for the Kumo-Crawl web crawler.

use anyhow::Context;
use clap::Parser;
use kumo_crawl::config::{load_config_with_hash, Config, DomainScope};
use kumo_crawl::crawler::{
    CrawlController, MemorySessionStore, Scorer, SqliteSinkProvider, StartOptions,
};
use kumo_crawl::output::{generate_markdown_summary, generate_summary, print_statistics};
use kumo_crawl::state::SessionState;
use kumo_crawl::storage::open_storage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Kumo-Crawl: a polite, bounded web crawler
///
/// Kumo-Crawl crawls a site breadth-first within depth and page limits,
/// respecting robots.txt and per-domain delays, and stores every page it
/// visits in a SQLite database.
#[derive(Parser, Debug)]
#[command(name = "kumo-crawl")]
#[command(version)]
#[command(about = "A polite, bounded web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "export_summary"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export_summary"])]
    stats: bool,

    /// Write the markdown summary of the latest session and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    export_summary: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.export_summary {
        handle_export_summary(&config)
    } else {
        handle_crawl(config, config_hash).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("kumo_crawl=info,warn"),
            1 => EnvFilter::new("kumo_crawl=debug,info"),
            2 => EnvFilter::new("kumo_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the validated configuration
fn handle_dry_run(config: &Config) {
    let crawler = &config.crawler;
    println!("=== Kumo-Crawl Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Base URL: {}", crawler.base_url);
    println!("  Max depth: {}", crawler.max_depth);
    println!("  Max pages: {}", crawler.max_pages);
    println!("  Workers: {}", crawler.worker_count);
    println!(
        "  Delay: {}-{}ms per domain",
        crawler.delay_min_ms, crawler.delay_max_ms
    );
    println!(
        "  Timeout: {}ms, {} retries",
        crawler.request_timeout_ms, crawler.retry_count
    );
    println!("  Respect robots.txt: {}", crawler.respect_robots);
    match crawler.domain_scope {
        DomainScope::SameDomain => println!("  Scope: same domain"),
        DomainScope::Allowlist => {
            println!("  Scope: allowlist ({})", crawler.allowlist.len());
            for pattern in &crawler.allowlist {
                println!("    * {}", pattern);
            }
        }
    }

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Summary: {}", config.output.summary_path);

    println!("\nScorer: {:?}", Scorer::from_config(&config.scorer));

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = storage.load_statistics(None)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export-summary mode: summarizes the latest session
fn handle_export_summary(config: &Config) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.output.database_path))?;
    let (session, stats) = generate_summary(&storage, None)?;

    generate_markdown_summary(&session, &stats, Path::new(&config.output.summary_path))?;
    println!("✓ Summary exported to: {}", config.output.summary_path);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: String) -> anyhow::Result<()> {
    let controller = CrawlController::new(
        Arc::new(MemorySessionStore::new()),
        Arc::new(SqliteSinkProvider::new(&config.output.database_path)),
        &config.user_agent,
    )?;

    let id = controller.start_with(
        config.crawler.clone(),
        StartOptions {
            scorer: Scorer::from_config(&config.scorer),
            config_hash: Some(config_hash),
        },
    )?;

    let finished = tokio::select! {
        finished = controller.wait(&id) => finished,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupt received, stopping session {}", id);
            controller.cancel(&id);
            controller.wait(&id).await
        }
    };
    let session = finished.context("session disappeared before finishing")?;

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let (recorded, stats) = generate_summary(&storage, Some(&id))?;
    generate_markdown_summary(&recorded, &stats, Path::new(&config.output.summary_path))?;
    tracing::info!("Summary written to {}", config.output.summary_path);

    match (session.state, session.error) {
        (SessionState::Aborted, Some(error)) => anyhow::bail!("crawl aborted: {}", error),
        (state, _) => {
            tracing::info!("Crawl {}", state);
            Ok(())
        }
    }
}
