//! Check Command

use anyhow::Result;
use clap::{Args, ValueEnum};

use chorus_e2e::{Check, RunConfig, TestRunner};

use crate::output::{print_report, print_success, OutputFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CheckName {
    /// Create, list and delete a member
    MemberLifecycle,
    /// Tenants cannot see each other's members
    TenantIsolation,
    /// Burst limit, Retry-After and per-user buckets
    RateLimit,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Checks to run; all of them when omitted
    #[arg(value_enum)]
    pub checks: Vec<CheckName>,

    /// Requests allowed per window before 429 (overrides rate_limit.burst)
    #[arg(long)]
    pub burst: Option<usize>,

    /// Treat warnings as failures
    #[arg(long)]
    pub strict: bool,
}

impl CheckName {
    fn to_check(self, burst: usize) -> Check {
        match self {
            CheckName::MemberLifecycle => Check::MemberLifecycle,
            CheckName::TenantIsolation => Check::TenantIsolation,
            CheckName::RateLimit => Check::RateLimit { burst },
        }
    }
}

pub async fn execute(args: CheckArgs, mut config: RunConfig, format: OutputFormat, verbose: bool) -> Result<i32> {
    if let Some(burst) = args.burst {
        anyhow::ensure!(burst > 0, "--burst must be positive");
        config.rate_limit.burst = burst;
    }
    let strict = args.strict || config.run.strict;

    let names = if args.checks.is_empty() {
        vec![CheckName::MemberLifecycle, CheckName::TenantIsolation, CheckName::RateLimit]
    } else {
        args.checks
    };
    let checks: Vec<Check> = names.into_iter().map(|n| n.to_check(config.rate_limit.burst)).collect();

    let runner = TestRunner::new(config)?;
    let report = runner.run_checks(&checks).await;

    print_report(&report, format, verbose);
    let path = runner.write_report(&report)?;
    print_success(&format!("Report written to {}", path.display()));

    Ok(report.exit_code(strict))
}
