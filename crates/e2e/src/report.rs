//! Step results and the versioned run report

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{E2eError, E2eResult};

/// Bumped whenever the report layout changes in a way readers must notice.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Pass,
    Fail,
    /// The step ran but its effect could not be confirmed
    Warn,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pass => "PASS",
            StepStatus::Fail => "FAIL",
            StepStatus::Warn => "WARN",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded result of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub detail: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warned: usize,
}

impl Totals {
    pub fn from_steps<'a>(steps: impl IntoIterator<Item = &'a StepResult>) -> Self {
        let mut totals = Totals::default();
        for step in steps {
            totals.record(step.status);
        }
        totals
    }

    fn record(&mut self, status: StepStatus) {
        self.total += 1;
        match status {
            StepStatus::Pass => self.passed += 1,
            StepStatus::Fail => self.failed += 1,
            StepStatus::Warn => self.warned += 1,
        }
    }

    fn add(&mut self, other: Totals) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.warned += other.warned;
    }
}

/// Results of one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub steps: Vec<StepResult>,
    /// Whether the scenario stopped early under the abort policy
    pub aborted: bool,
    /// Steps skipped after an abort. Never part of `totals`.
    pub not_run: usize,
    pub duration_ms: u64,
}

impl ScenarioReport {
    pub fn totals(&self) -> Totals {
        Totals::from_steps(&self.steps)
    }

    pub fn success(&self) -> bool {
        !self.aborted && self.totals().failed == 0
    }
}

/// Everything a single invocation produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub run_id: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub scenarios: Vec<ScenarioReport>,
    pub totals: Totals,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            run_id: run_id.into(),
            target: target.into(),
            started_at: Utc::now(),
            finished_at: None,
            scenarios: Vec::new(),
            totals: Totals::default(),
        }
    }

    pub fn push(&mut self, scenario: ScenarioReport) {
        self.totals.add(scenario.totals());
        self.scenarios.push(scenario);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// 0 when nothing failed. With `strict`, warnings count as failures too.
    pub fn exit_code(&self, strict: bool) -> i32 {
        let aborted = self.scenarios.iter().any(|s| s.aborted);
        if self.totals.failed > 0 || aborted || (strict && self.totals.warned > 0) {
            1
        } else {
            0
        }
    }

    /// Write the report as pretty JSON into `dir`
    pub fn write_json(&self, dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join(format!("chorus-report-{}.json", self.run_id));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Report written to: {}", path.display());
        Ok(path)
    }

    /// Read a report written by `write_json`. Other schema versions are rejected.
    pub fn read_json(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&content)?;

        match value.get("schema_version").and_then(serde_json::Value::as_u64) {
            Some(version) if version == u64::from(REPORT_SCHEMA_VERSION) => Ok(serde_json::from_value(value)?),
            version => Err(E2eError::Config(format!(
                "{} has report schema version {}, expected {}",
                path.display(),
                version.map_or_else(|| "<missing>".to_string(), |v| v.to_string()),
                REPORT_SCHEMA_VERSION
            ))),
        }
    }
}
