//! Run Command

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use chorus_e2e::{RunConfig, TestRunner};

use crate::output::{print_info, print_report, print_success, print_warning, OutputFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run only scenarios with this tag
    #[arg(short, long, conflicts_with = "name")]
    pub tag: Option<String>,

    /// Run only the scenario with this name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Scenario directory (overrides run.scenarios_dir)
    #[arg(long)]
    pub scenarios: Option<PathBuf>,

    /// Report directory (overrides run.output_dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Treat warnings as failures
    #[arg(long)]
    pub strict: bool,

    /// Skip browser steps
    #[arg(long)]
    pub no_browser: bool,
}

/// Returns the process exit code
pub async fn execute(args: RunArgs, mut config: RunConfig, format: OutputFormat, verbose: bool) -> Result<i32> {
    if let Some(dir) = args.scenarios {
        config.run.scenarios_dir = dir;
    }
    if let Some(dir) = args.output {
        config.run.output_dir = dir;
    }
    if args.no_browser {
        config.browser.enabled = false;
    }
    let strict = args.strict || config.run.strict;

    let runner = TestRunner::new(config)?;
    print_info(&format!(
        "Run {} against {}",
        runner.run_id(),
        runner.config().target.base_url
    ));

    let report = if let Some(name) = &args.name {
        runner.run_named(name).await?
    } else if let Some(tag) = &args.tag {
        runner.run_tagged(tag).await?
    } else {
        runner.run_all().await?
    };

    if report.scenarios.is_empty() {
        print_warning("No scenarios matched");
    }

    print_report(&report, format, verbose);
    let path = runner.write_report(&report)?;
    print_success(&format!("Report written to {}", path.display()));

    Ok(report.exit_code(strict))
}
