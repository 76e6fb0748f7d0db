//! CR3 PDF restore tool
//!
//! Restores the most recent valid version of CR3 crash-report PDFs in a
//! versioned S3 bucket, after they were overwritten by HTML error pages.

// cr3restore/src/main.rs
mod config;
mod errors;
mod metadata;
mod restore;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use config::{AppConfig, load_crash_list};
use regex::Regex;
use restore::key::Environment;
use restore::RestoreRequest;
use restore::report::BatchReport;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Utility to restore the last valid CR3 PDF in S3.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Operate on the production prefix instead of staging
    #[arg(short, long)]
    production: bool,

    /// JSON file of crashes to operate on: { "crashes": [ crash_id_0, crash_id_1, .. ] }
    #[arg(short, long, value_name = "crashes.json")]
    crashes: PathBuf,

    /// Do not ask for acknowledgement that this program changes the state of S3 objects
    #[arg(long)]
    i_understand: bool,

    /// Path to config.json (defaults to ./config.json when present)
    #[arg(long, value_name = "config.json")]
    config: Option<PathBuf>,

    /// Versions at or below this size are treated as placeholders (overrides config)
    #[arg(long)]
    threshold_bytes: Option<u64>,

    /// Number of crashes processed concurrently (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Report what would be restored without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Also write the final report as JSON to this file
    #[arg(long, value_name = "report.json")]
    report: Option<PathBuf>,
}

/// Main entry point for the restore tool
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run_app(cli).await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let (config_path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    let mut app_config = AppConfig::load(&config_path, required)
        .context(format!("Failed to load application configuration from {}", config_path.display()))?;
    app_config
        .restore_options
        .apply_overrides(cli.threshold_bytes, cli.concurrency)?;

    let crashes = load_crash_list(&cli.crashes)?;
    let environment = Environment::from_production_flag(cli.production);

    if !cli.i_understand && !cli.dry_run {
        let stdin = std::io::stdin();
        prompt_acknowledgement(app_config.restore_options.threshold_bytes, &mut stdin.lock())?;
    }

    println!(
        "🔄 Starting restore of {} crash(es) in {}{}...",
        crashes.len(),
        environment,
        if cli.dry_run { " (dry run)" } else { "" }
    );
    let request = RestoreRequest {
        environment,
        crashes,
        dry_run: cli.dry_run,
    };
    let report = restore::run_restore_flow(&app_config, &request)
        .await
        .context("Restore process failed")?;

    report.print();
    if let Some(path) = &cli.report {
        save_report(&report, path);
    }
    Ok(())
}

/// The batch has already run, so a report that cannot be written is only a warning.
fn save_report(report: &BatchReport, path: &Path) -> bool {
    match report.write_json(path) {
        Ok(()) => {
            println!("📝 Report written to {}", path.display());
            true
        }
        Err(e) => {
            eprintln!("⚠️ Could not write report: {:?}", e);
            false
        }
    }
}

/// Warns that S3 objects will change and requires the user to type "I understand".
fn prompt_acknowledgement(threshold_bytes: u64, input: &mut impl BufRead) -> Result<()> {
    println!();
    println!("Warning: This program changes S3 Objects.");
    println!();
    println!(
        "This program will restore previous file versions which are larger than {} bytes for crashes specified in the JSON object you provide.",
        threshold_bytes
    );
    println!("This program does NOT validate the suitability of the file it is replacing nor the contents of the replacement.");
    println!(
        "If you specify a crash ID in the JSON, and there is a previous version larger than {} bytes for that crash, this program will make it the current version.",
        threshold_bytes
    );
    println!("Please type 'I understand' to continue.");
    println!();

    let mut line = String::new();
    input.read_line(&mut line).context("Failed to read user input")?;
    if !is_acknowledged(&line) {
        anyhow::bail!("User acknowledgement failed.");
    }
    Ok(())
}

fn is_acknowledged(line: &str) -> bool {
    Regex::new(r"(?i)^i understand$")
        .map(|re| re.is_match(line.trim_end_matches(['\r', '\n'])))
        .unwrap_or(false)
}
