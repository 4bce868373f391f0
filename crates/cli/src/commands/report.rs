//! Report Command

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use chorus_e2e::RunReport;

use crate::output::{print_report, OutputFormat};

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Report file written by `chorus run` or `chorus check`
    pub path: PathBuf,

    /// Exit non-zero on warnings as well
    #[arg(long)]
    pub strict: bool,
}

/// Re-render a saved report; the exit code matches the original run
pub fn execute(args: ReportArgs, format: OutputFormat, verbose: bool) -> Result<i32> {
    let report = RunReport::read_json(&args.path).with_context(|| format!("reading {}", args.path.display()))?;
    print_report(&report, format, verbose);
    Ok(report.exit_code(args.strict))
}
