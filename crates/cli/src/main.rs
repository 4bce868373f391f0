//! Chorus CLI - Main Entry Point
//!
//! Runs E2E scenarios and built-in checks against a deployment of the
//! church-messaging platform.
//!
//! Exit codes: 0 when every step passed, 1 when a step failed or a
//! scenario aborted, 2 for usage and configuration errors.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod commands;
mod output;

use chorus_e2e::config::{RunConfig, DEFAULT_CONFIG_FILE};
use commands::{check, list, report, run};

/// Chorus - E2E runner for the church-messaging platform
#[derive(Parser)]
#[command(name = "chorus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file; chorus.toml is read when present
    #[arg(long, env = "CHORUS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Deployment to test (overrides target.base_url and CHORUS_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run declarative scenarios
    Run(run::RunArgs),

    /// Run built-in checks
    Check(check::CheckArgs),

    /// List available scenarios
    List(list::ListArgs),

    /// Render a saved report
    Report(report::ReportArgs),
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load_required(path)?,
        None => RunConfig::load(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    config.apply_env()?;
    if let Some(url) = &cli.base_url {
        config.target.base_url = url.clone();
        config.validate()?;
    }
    Ok(config)
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli)?;
    let (format, verbose) = (cli.format, cli.verbose);

    match cli.command {
        Commands::Run(args) => run::execute(args, config, format, verbose).await,
        Commands::Check(args) => check::execute(args, config, format, verbose).await,
        Commands::List(args) => list::execute(args, config, format),
        Commands::Report(args) => report::execute(args, format, verbose),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            2
        }
    };

    std::process::exit(code);
}
