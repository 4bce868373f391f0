//! Declarative YAML scenarios

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::BrowserAction;
use crate::error::{E2eError, E2eResult};
use crate::runner::FailurePolicy;

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// What happens after a failing step
    #[serde(default)]
    pub policy: FailurePolicy,

    /// Initial variables, interpolated before the first step
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Steps to execute in order
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Display name; derived from the action when omitted
    #[serde(default)]
    pub name: Option<String>,

    #[serde(flatten)]
    pub action: StepAction,
}

/// A request description shared by `http`, `poll` and `burst`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCall {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Option<Value>,
    /// Bearer token, usually `${tenant.token}`
    #[serde(default)]
    pub token: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A single step in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Register a fresh tenant; exposes `${<as>.token}`, `${<as>.email}`,
    /// `${<as>.password}` and `${<as>.phone}`
    RegisterTenant {
        #[serde(rename = "as")]
        alias: String,
    },

    /// Log in; exposes `${<as>.token}`
    Login {
        email: String,
        password: String,
        #[serde(rename = "as")]
        alias: String,
    },

    /// Generate a member fixture; exposes `${<as>.phone}`, `${<as>.email}`,
    /// `${<as>.first_name}` and `${<as>.last_name}`
    MemberFixture {
        #[serde(rename = "as")]
        alias: String,
    },

    /// Issue one request and check the response
    Http {
        #[serde(flatten)]
        call: HttpCall,
        /// Accepted statuses; any 2xx when omitted
        #[serde(default)]
        expect_status: Vec<u16>,
        /// JSON pointer -> expected value
        #[serde(default)]
        expect_json: BTreeMap<String, Value>,
        /// Header that must be present
        #[serde(default)]
        expect_header: Option<String>,
        /// Variable name -> JSON pointer
        #[serde(default)]
        capture: BTreeMap<String, String>,
        /// Store the array length at this pointer in `capture_count.as`
        #[serde(default)]
        capture_count: Option<CountCapture>,
    },

    /// Repeat a request until a pointer holds the expected value
    Poll {
        request: HttpCall,
        pointer: String,
        equals: Value,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Send `count` identical requests concurrently
    Burst {
        request: HttpCall,
        count: usize,
        /// At least one response must carry this status
        #[serde(default)]
        expect_any_status: Option<u16>,
        /// None of the responses may carry this status
        #[serde(default)]
        forbid_status: Option<u16>,
        /// Responses with `expect_any_status` must carry `Retry-After`
        #[serde(default)]
        expect_retry_after: bool,
    },

    /// Compare two interpolated values, numerically when both parse
    Compare {
        left: String,
        op: CompareOp,
        right: String,
    },

    /// Open a Socket.IO connection kept under `as`
    SocketConnect {
        token: String,
        #[serde(rename = "as")]
        alias: String,
    },

    /// Wait for an event on an open socket; exposes `${<as>.payload}`
    SocketExpect {
        socket: String,
        event: String,
        #[serde(default = "default_socket_timeout")]
        timeout_ms: u64,
        #[serde(default, rename = "as")]
        alias: Option<String>,
    },

    /// Browser: go to a URL relative to the target
    Navigate { url: String },

    /// Browser: fill a field found by data-testid, name, placeholder or type
    Fill { field: String, value: String },

    /// Browser: click a button or link by visible text
    ClickText { text: String },

    /// Browser: close onboarding dialogs
    DismissModals {
        #[serde(default)]
        max_attempts: Option<u32>,
    },

    /// Browser: regex over visible text; first group (or match) stored in `capture`
    AssertText {
        pattern: String,
        #[serde(default)]
        capture: Option<String>,
    },

    /// Browser: count elements into a variable
    CountRows {
        #[serde(default = "default_row_selector")]
        selector: String,
        capture: String,
    },

    /// Browser: wait for an element to become visible
    WaitFor {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Browser: screenshot into the screenshot directory, as `<file>.png`
    Screenshot {
        file: String,
        #[serde(default)]
        full_page: bool,
    },

    /// Browser: attach a file, usually `${<csv>.path}`, to a file input
    Upload { field: String, path: String },

    /// Write `rows` member fixtures to a temporary CSV; exposes
    /// `${<as>.path}` and `${<as>.rows}`
    MemberCsv {
        rows: usize,
        #[serde(rename = "as")]
        alias: String,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep { ms: u64 },

    /// Log a message
    Log { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountCapture {
    pub pointer: String,
    #[serde(rename = "as")]
    pub alias: String,
}

fn default_socket_timeout() -> u64 {
    10_000
}

fn default_row_selector() -> String {
    "table tbody tr".to_string()
}

fn default_wait_timeout() -> u64 {
    5000
}

impl StepAction {
    /// Whether this step runs inside the browser
    pub fn is_browser(&self) -> bool {
        matches!(
            self,
            StepAction::Navigate { .. }
                | StepAction::Fill { .. }
                | StepAction::ClickText { .. }
                | StepAction::DismissModals { .. }
                | StepAction::AssertText { .. }
                | StepAction::CountRows { .. }
                | StepAction::WaitFor { .. }
                | StepAction::Screenshot { .. }
                | StepAction::Upload { .. }
        )
    }

    /// Browser action for this step, without interpolation
    pub fn to_browser_action(&self) -> Option<BrowserAction> {
        Some(match self {
            StepAction::Navigate { url } => BrowserAction::Navigate { url: url.clone() },
            StepAction::Fill { field, value } => BrowserAction::Fill {
                field: field.clone(),
                value: value.clone(),
            },
            StepAction::ClickText { text } => BrowserAction::ClickText { text: text.clone() },
            StepAction::DismissModals { max_attempts } => BrowserAction::DismissModals {
                max_attempts: *max_attempts,
            },
            StepAction::AssertText { pattern, .. } => BrowserAction::AssertText { pattern: pattern.clone() },
            StepAction::CountRows { selector, .. } => BrowserAction::CountRows { selector: selector.clone() },
            StepAction::WaitFor { selector, timeout_ms } => BrowserAction::WaitFor {
                selector: selector.clone(),
                timeout_ms: *timeout_ms,
            },
            StepAction::Screenshot { file, full_page } => BrowserAction::Screenshot {
                name: file.clone(),
                full_page: *full_page,
            },
            StepAction::Upload { field, path } => BrowserAction::Upload {
                field: field.clone(),
                path: path.clone(),
            },
            _ => return None,
        })
    }

    /// Variable the browser step's value is stored under
    pub fn capture_var(&self) -> Option<&str> {
        match self {
            StepAction::AssertText { capture, .. } => capture.as_deref(),
            StepAction::CountRows { capture, .. } => Some(capture),
            _ => None,
        }
    }

    /// Every variable this step sets when it runs
    pub fn produced_vars(&self) -> Vec<String> {
        match self {
            StepAction::Http {
                capture, capture_count, ..
            } => capture
                .keys()
                .cloned()
                .chain(capture_count.iter().map(|c| c.alias.clone()))
                .collect(),
            StepAction::SocketExpect { alias: Some(alias), .. } => vec![format!("{alias}.payload")],
            other => other.capture_var().map(str::to_string).into_iter().collect(),
        }
    }

    pub fn default_name(&self) -> String {
        match self {
            StepAction::RegisterTenant { alias } => format!("register-tenant:{}", alias),
            StepAction::Login { alias, .. } => format!("login:{}", alias),
            StepAction::MemberFixture { alias } => format!("member-fixture:{}", alias),
            StepAction::MemberCsv { rows, alias } => format!("member-csv:{}x{}", alias, rows),
            StepAction::Http { call, .. } => format!("{} {}", call.method.to_uppercase(), call.path),
            StepAction::Poll { request, pointer, .. } => format!("poll:{}{}", request.path, pointer),
            StepAction::Burst { request, count, .. } => format!("burst:{}x{}", count, request.path),
            StepAction::Compare { left, op, right } => format!("compare:{} {:?} {}", left, op, right),
            StepAction::SocketConnect { alias, .. } => format!("socket-connect:{}", alias),
            StepAction::SocketExpect { event, .. } => format!("socket-expect:{}", event),
            StepAction::Sleep { ms } => format!("sleep:{}ms", ms),
            StepAction::Log { message } => format!("log:{}", message.chars().take(30).collect::<String>()),
            other => other
                .to_browser_action()
                .map(|a| a.label())
                .unwrap_or_else(|| "step".to_string()),
        }
    }
}

impl Step {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.action.default_name())
    }
}

impl Scenario {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| E2eError::ScenarioParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory, sorted by name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::Config(format!("scenario directory not found: {}", dir.display())));
        }

        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::ScenarioParse("scenario name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(E2eError::ScenarioParse(format!("scenario '{}' has no steps", self.name)));
        }
        for step in &self.steps {
            match &step.action {
                StepAction::Burst { count: 0, .. } => {
                    return Err(E2eError::ScenarioParse(format!(
                        "{}: burst count must be positive",
                        step.display_name()
                    )));
                }
                StepAction::MemberCsv { rows: 0, .. } => {
                    return Err(E2eError::ScenarioParse(format!(
                        "{}: member_csv needs at least one row",
                        step.display_name()
                    )));
                }
                StepAction::AssertText { pattern, .. } => {
                    // JS and Rust regex syntax overlap for the patterns scenarios use
                    if !pattern.contains("${") {
                        regex::Regex::new(pattern).map_err(|e| {
                            E2eError::ScenarioParse(format!("{}: invalid pattern: {}", step.display_name(), e))
                        })?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member_scenario() {
        let yaml = r#"
name: member-lifecycle
description: Create, list and delete a member over the API
tags:
  - api
  - members
policy: abort
steps:
  - action: register_tenant
    as: church
  - action: member_fixture
    as: m
  - action: http
    method: POST
    path: /api/members
    token: ${church.token}
    body:
      firstName: ${m.first_name}
      phone: ${m.phone}
    expect_status: [201]
    capture:
      member_id: /data/id
  - name: delete it
    action: http
    method: DELETE
    path: /api/members/${member_id}
    token: ${church.token}
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.name, "member-lifecycle");
        assert_eq!(scenario.policy, FailurePolicy::Abort);
        assert_eq!(scenario.steps.len(), 4);

        match &scenario.steps[2].action {
            StepAction::Http { call, expect_status, capture, .. } => {
                assert_eq!(call.method, "POST");
                assert_eq!(expect_status, &vec![201]);
                assert_eq!(capture.get("member_id").map(String::as_str), Some("/data/id"));
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(scenario.steps[2].display_name(), "POST /api/members");
        assert_eq!(scenario.steps[3].display_name(), "delete it");
    }

    #[test]
    fn test_parse_browser_scenario() {
        let yaml = r#"
name: dashboard-members
steps:
  - action: navigate
    url: /login
  - action: fill
    field: email
    value: ${admin.email}
  - action: click_text
    text: Sign in
  - action: dismiss_modals
  - action: count_rows
    capture: before
  - action: screenshot
    file: members
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.policy, FailurePolicy::Continue);
        assert!(scenario.steps.iter().all(|s| s.action.is_browser()));
        assert_eq!(scenario.steps[4].action.capture_var(), Some("before"));
        match &scenario.steps[4].action {
            StepAction::CountRows { selector, .. } => assert_eq!(selector, "table tbody tr"),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_steps() {
        let err = Scenario::from_yaml("name: nothing\nsteps: []\n").unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn rejects_bad_pattern() {
        let yaml = "name: bad\nsteps:\n  - action: assert_text\n    pattern: '(unclosed'\n";
        assert!(Scenario::from_yaml(yaml).is_err());
    }

    #[test]
    fn load_all_sorts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "name: zeta\ntags: [smoke]\nsteps:\n  - action: log\n    message: hi\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested/a.yml"),
            "name: alpha\nsteps:\n  - action: sleep\n    ms: 1\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let all = Scenario::load_all(dir.path()).unwrap();
        let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        let smoke = Scenario::filter_by_tag(&all, "smoke");
        assert_eq!(smoke.len(), 1);
        assert_eq!(smoke[0].name, "zeta");
    }
}
