//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest account collector.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_harvest::config::{load_config_with_hash, resolve_credential, Config};
use sumi_harvest::crawler::harvest;
use sumi_harvest::extract_username;
use sumi_harvest::output::{
    load_statistics, print_pipeline_report, print_statistics, report_path, write_markdown_report,
};
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a patient, resumable account collector
///
/// Sumi-Harvest walks an account's profile, post list, posts and comments
/// at a human pace, checkpointing after every page so an interrupted run
/// picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A patient, resumable account collector", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Account to collect, as a username or profile URL
    #[arg(value_name = "USERNAME", required_unless_present_any = ["dry_run", "stats"])]
    username: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be collected without fetching anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the checkpoint directory and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Also collect tagged-user relations for each post
    #[arg(long)]
    with_tags: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.with_tags {
        config.pipeline.with_tags = true;
    }

    if cli.dry_run {
        handle_dry_run(&config, cli.username.as_deref())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        let input = cli
            .username
            .as_deref()
            .context("A USERNAME is required to start collecting")?;
        handle_harvest(config, input).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would be collected
fn handle_dry_run(config: &Config, username: Option<&str>) -> Result<()> {
    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Source:");
    println!("  Base URL: {}", config.source.base_url);
    println!("  Page size: {}", config.source.page_size);
    let credential = match resolve_credential(&config.source) {
        Ok(_) => "resolved".to_string(),
        Err(e) => format!("missing ({})", e),
    };
    println!("  Credential: {}", credential);

    println!("\nPacing:");
    println!(
        "  Base delay: {}ms (jitter {:.0}%)",
        config.pacing.base_delay_ms,
        config.pacing.jitter * 100.0
    );
    println!(
        "  Long break: every {}-{} pages, {}-{}ms",
        config.pacing.long_break_every_min,
        config.pacing.long_break_every_max,
        config.pacing.long_break_min_ms,
        config.pacing.long_break_min_ms + config.pacing.long_break_span_ms
    );
    println!(
        "  Backoff tiers: {:?} minutes, {} retries",
        config.pacing.backoff_tiers_minutes, config.pacing.max_rate_limit_retries
    );

    println!("\nPipeline:");
    println!("  Max post URLs: {}", config.pipeline.max_urls);
    println!("  Max comments per post: {}", config.pipeline.max_comments);
    println!("  Post delay: {}ms", config.pipeline.post_delay_ms);
    println!("  Stage delay: {}ms", config.pipeline.stage_delay_ms);
    println!("  Tagged users: {}", config.pipeline.with_tags);

    println!("\nOutput:");
    println!("  Checkpoints: {}", config.output.checkpoint_dir);

    println!("\n✓ Configuration is valid");
    if let Some(input) = username {
        let username = extract_username(input)?;
        println!("✓ Would collect account: {}", username);
    }

    Ok(())
}

/// Handles the --stats mode: shows statistics from the checkpoint directory
fn handle_stats(config: &Config) -> Result<()> {
    println!("Checkpoints: {}\n", config.output.checkpoint_dir);

    let stats = load_statistics(Path::new(&config.output.checkpoint_dir))
        .context("Failed to read checkpoint directory")?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main collection run
async fn handle_harvest(config: Config, input: &str) -> Result<()> {
    let username = extract_username(input)?;
    let credential = resolve_credential(&config.source)?;
    let checkpoint_dir = PathBuf::from(&config.output.checkpoint_dir);

    tracing::info!(
        "Collecting {} into {} (resumes from existing checkpoints)",
        username,
        checkpoint_dir.display()
    );

    let report = harvest(config, &username, &credential)
        .await
        .context("Failed to set up the source client")?;

    print_pipeline_report(&report);

    let path = report_path(&checkpoint_dir, &username);
    match write_markdown_report(&report, &path) {
        Ok(()) => println!("\n✓ Report written to: {}", path.display()),
        Err(e) => tracing::error!("Failed to write report {}: {}", path.display(), e),
    }

    if let Some(stage) = report.failed_stage() {
        bail!("Pipeline for {} failed at stage {}", username, stage.stage);
    }

    Ok(())
}
