//! Scenario runner: step recording, failure policy and suite orchestration

use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::checks::{Check, CheckContext};
use crate::config::RunConfig;
use crate::error::{E2eError, E2eResult};
use crate::executor::Executor;
use crate::fixtures::run_token;
use crate::http::HttpClient;
use crate::report::{RunReport, ScenarioReport, StepResult, StepStatus};
use crate::scenario::Scenario;

/// What happens to the rest of a scenario after a failing step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure; later steps are counted as not run
    Abort,
    /// Record the failure and keep going
    #[default]
    Continue,
}

/// Successful result of a step: a value for later steps plus a status
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub status: StepStatus,
    pub detail: String,
}

impl<T> Outcome<T> {
    pub fn pass(value: T, detail: impl Into<String>) -> Self {
        Self {
            value,
            status: StepStatus::Pass,
            detail: detail.into(),
        }
    }

    /// The step ran but its effect could not be confirmed
    pub fn warn(value: T, detail: impl Into<String>) -> Self {
        Self {
            value,
            status: StepStatus::Warn,
            detail: detail.into(),
        }
    }
}

impl Outcome<()> {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self::pass((), detail)
    }
}

/// Records the steps of one scenario.
///
/// Each step is recorded exactly once. Once aborted, further steps are
/// neither executed nor recorded; they only bump `not_run`.
pub struct ScenarioRun {
    name: String,
    policy: FailurePolicy,
    steps: Vec<StepResult>,
    aborted: bool,
    not_run: usize,
    started: Instant,
}

impl ScenarioRun {
    pub fn new(name: impl Into<String>, policy: FailurePolicy) -> Self {
        let name = name.into();
        debug!("Running scenario: {}", name);
        Self {
            name,
            policy,
            steps: Vec::new(),
            aborted: false,
            not_run: 0,
            started: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    /// Run one step. Returns the step's value, or `None` when it failed or was skipped.
    pub async fn step<T, Fut>(&mut self, name: impl Into<String>, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = E2eResult<Outcome<T>>>,
    {
        let name = name.into();
        if self.aborted {
            self.skip(&name);
            return None;
        }

        let start = Instant::now();
        let result = fut.await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                self.record(name, outcome.status, outcome.detail, duration_ms);
                Some(outcome.value)
            }
            Err(e) => {
                self.record(name, StepStatus::Fail, e.to_string(), duration_ms);
                None
            }
        }
    }

    /// Record a result produced elsewhere, e.g. by a browser segment
    pub fn record(&mut self, name: impl Into<String>, status: StepStatus, detail: impl Into<String>, duration_ms: u64) {
        let name = name.into();
        let detail = detail.into();

        match status {
            StepStatus::Pass => info!("  ✓ {} ({} ms)", name, duration_ms),
            StepStatus::Warn => warn!("  ⚠ {} - {}", name, detail),
            StepStatus::Fail => error!("  ✗ {} - {}", name, detail),
        }

        self.steps.push(StepResult {
            name,
            status,
            detail,
            duration_ms,
            timestamp: Utc::now(),
        });

        if status == StepStatus::Fail && self.policy == FailurePolicy::Abort {
            warn!("Aborting scenario '{}' after failed step", self.name);
            self.aborted = true;
        }
    }

    /// Count a step that will not execute
    pub fn skip(&mut self, name: &str) {
        debug!("  - {} (not run)", name);
        self.not_run += 1;
    }

    pub fn finish(self) -> ScenarioReport {
        ScenarioReport {
            name: self.name,
            steps: self.steps,
            aborted: self.aborted,
            not_run: self.not_run,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Main scenario runner
pub struct TestRunner {
    config: RunConfig,
    http: HttpClient,
    run_id: String,
}

impl TestRunner {
    pub fn new(config: RunConfig) -> E2eResult<Self> {
        let http = HttpClient::new(&config.target.base_url, &config.target.api_prefix, config.http.timeout())?;
        Ok(Self {
            config,
            http,
            run_id: run_token(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn new_report(&self) -> RunReport {
        RunReport::new(self.run_id.clone(), self.config.target.base_url.clone())
    }

    pub fn load_scenarios(&self) -> E2eResult<Vec<Scenario>> {
        Scenario::load_all(&self.config.run.scenarios_dir)
    }

    /// Run all scenarios in the scenarios directory
    pub async fn run_all(&self) -> E2eResult<RunReport> {
        let scenarios = self.load_scenarios()?;
        Ok(self.run_scenarios(&scenarios).await)
    }

    /// Run scenarios matching a tag
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<RunReport> {
        let scenarios = self.load_scenarios()?;
        let filtered: Vec<Scenario> = Scenario::filter_by_tag(&scenarios, tag).into_iter().cloned().collect();
        Ok(self.run_scenarios(&filtered).await)
    }

    /// Run a specific scenario by name
    pub async fn run_named(&self, name: &str) -> E2eResult<RunReport> {
        let scenario = self
            .load_scenarios()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::ScenarioNotFound(name.to_string()))?;
        Ok(self.run_scenarios(std::slice::from_ref(&scenario)).await)
    }

    /// Run a list of scenarios, one after another
    pub async fn run_scenarios(&self, scenarios: &[Scenario]) -> RunReport {
        let start = Instant::now();
        let mut report = self.new_report();

        info!("Running {} scenario(s) against {} (run {})", scenarios.len(), self.config.target.base_url, self.run_id);

        for scenario in scenarios {
            let result = self.run_scenario(scenario).await;
            log_scenario(&result);
            report.push(result);
        }

        report.finish();

        let t = report.totals;
        info!("");
        info!(
            "Results: {} passed, {} failed, {} warned of {} step(s) ({} ms)",
            t.passed,
            t.failed,
            t.warned,
            t.total,
            start.elapsed().as_millis()
        );

        report
    }

    /// Run a single scenario
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioReport {
        let mut run = ScenarioRun::new(&scenario.name, scenario.policy);
        let mut executor = Executor::new(&self.config, self.http.clone(), &self.run_id);
        executor.execute(scenario, &mut run).await;
        executor.shutdown().await;
        run.finish()
    }

    pub fn check_context(&self) -> CheckContext<'_> {
        CheckContext {
            http: &self.http,
            run_id: &self.run_id,
            email_domain: &self.config.target.email_domain,
            poll: self.config.poll_config(),
        }
    }

    /// Run built-in checks; a rate-limit check without a burst uses the configured one
    pub async fn run_checks(&self, checks: &[Check]) -> RunReport {
        let mut report = self.new_report();
        let ctx = self.check_context();

        info!("Running {} check(s) against {} (run {})", checks.len(), self.config.target.base_url, self.run_id);

        for check in checks {
            let check = match check {
                Check::RateLimit { burst: 0 } => Check::RateLimit {
                    burst: self.config.rate_limit.burst,
                },
                other => *other,
            };
            let result = check.run(&ctx, &self.config.rate_limit.path).await;
            log_scenario(&result);
            report.push(result);
        }

        report.finish();
        report
    }

    /// Write the run report as JSON to the output directory
    pub fn write_report(&self, report: &RunReport) -> E2eResult<PathBuf> {
        report.write_json(&self.config.run.output_dir)
    }
}

pub(crate) fn log_scenario(result: &ScenarioReport) {
    let t = result.totals();
    if result.success() {
        info!("✓ {} ({} ms)", result.name, result.duration_ms);
    } else if result.aborted {
        error!("✗ {} - aborted, {} step(s) not run", result.name, result.not_run);
    } else {
        error!("✗ {} - {} of {} step(s) failed", result.name, t.failed, t.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn continue_policy_records_every_step() {
        let mut run = ScenarioRun::new("continue", FailurePolicy::Continue);

        let a = run.step("first", async { Ok(Outcome::pass(1, "ok")) }).await;
        let b: Option<()> = run
            .step("second", async { Err(E2eError::AssertionFailed("nope".into())) })
            .await;
        let c = run.step("third", async { Ok(Outcome::warn((), "selector missing")) }).await;

        assert_eq!(a, Some(1));
        assert_eq!(b, None);
        assert_eq!(c, Some(()));

        let report = run.finish();
        let t = report.totals();
        assert_eq!((t.total, t.passed, t.failed, t.warned), (3, 1, 1, 1));
        assert!(!report.aborted);
        assert_eq!(report.not_run, 0);
    }

    #[tokio::test]
    async fn abort_policy_records_failure_once_and_skips_rest() {
        let mut run = ScenarioRun::new("abort", FailurePolicy::Abort);
        let mut executed = 0;

        run.step("ok", async { Ok(Outcome::ok("fine")) }).await;
        run.step::<(), _>("boom", async { Err(E2eError::Timeout("server".into())) })
            .await;
        let after = run
            .step("after", async {
                executed += 1;
                Ok(Outcome::ok("should not run"))
            })
            .await;

        assert!(after.is_none());
        assert_eq!(executed, 0);
        assert!(run.is_aborted());

        let report = run.finish();
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps.iter().filter(|s| s.name == "boom").count(), 1);
        assert_eq!(report.not_run, 1);
        assert!(!report.success());
    }

    #[tokio::test]
    async fn warn_does_not_abort() {
        let mut run = ScenarioRun::new("warn", FailurePolicy::Abort);
        run.step("maybe", async { Ok(Outcome::warn((), "no modal button")) }).await;
        run.step("next", async { Ok(Outcome::ok("ran")) }).await;

        let report = run.finish();
        assert_eq!(report.steps.len(), 2);
        assert!(report.success());
    }

    #[test]
    fn external_failure_aborts() {
        let mut run = ScenarioRun::new("browser", FailurePolicy::Abort);
        run.record("navigate:/login", StepStatus::Fail, "net::ERR_CONNECTION_REFUSED", 3);
        assert!(run.is_aborted());
    }

    #[test]
    fn policy_parses_from_yaml() {
        let p: FailurePolicy = serde_yaml::from_str("abort").unwrap();
        assert_eq!(p, FailurePolicy::Abort);
    }
}
