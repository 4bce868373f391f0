//! Playwright browser automation
//!
//! Consecutive browser steps are compiled into one Node script so a page
//! keeps its state between them. Cookies and the current URL carry over to
//! the next script through a Playwright storage-state file.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::report::StepStatus;
use crate::runner::FailurePolicy;

/// Prefix marking a step report line on the script's stdout
const REPORT_MARKER: &str = "@@chorus ";

/// Button labels that close onboarding tours and promo dialogs
const DISMISS_LABELS: &[&str] = &["Skip", "Skip tour", "Next", "Close", "Got it", "Done", "Dismiss", "Maybe later"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unknown browser: {other}"))),
        }
    }
}

/// One UI action inside a browser segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrowserAction {
    Navigate { url: String },
    /// Fill a form field located by the selector cascade
    Fill { field: String, value: String },
    /// Click a button or link by its visible text
    ClickText { text: String },
    DismissModals { max_attempts: Option<u32> },
    /// Regex over the page's visible text
    AssertText { pattern: String },
    /// Count elements; the count is returned as the step value
    CountRows { selector: String },
    WaitFor { selector: String, timeout_ms: u64 },
    Screenshot { name: String, full_page: bool },
    /// Attach a local file to a file input
    Upload { field: String, path: String },
    Pause { ms: u64 },
}

impl BrowserAction {
    pub fn label(&self) -> String {
        match self {
            BrowserAction::Navigate { url } => format!("navigate:{}", url),
            BrowserAction::Fill { field, .. } => format!("fill:{}", field),
            BrowserAction::ClickText { text } => format!("click:{}", text),
            BrowserAction::DismissModals { .. } => "dismiss-modals".to_string(),
            BrowserAction::AssertText { pattern } => format!("assert-text:{}", pattern),
            BrowserAction::CountRows { selector } => format!("count:{}", selector),
            BrowserAction::WaitFor { selector, .. } => format!("wait:{}", selector),
            BrowserAction::Screenshot { name, .. } => format!("screenshot:{}", name),
            BrowserAction::Upload { field, .. } => format!("upload:{}", field),
            BrowserAction::Pause { ms } => format!("pause:{}ms", ms),
        }
    }
}

/// Candidate selectors for a form field, most stable first.
///
/// `data-testid` is tried first so the UI can pin fields explicitly; the
/// remaining candidates cover forms that only carry `name`, placeholder
/// text or an input type.
pub fn field_candidates(field: &str) -> Vec<String> {
    let attr = field.replace('"', "\\\"");
    let mut candidates = vec![
        format!(r#"[data-testid="{attr}"]"#),
        format!(r#"[name="{attr}"]"#),
        format!(r#"[placeholder*="{attr}" i]"#),
        format!(r#"[aria-label*="{attr}" i]"#),
    ];
    if matches!(field, "email" | "password" | "tel" | "text" | "search" | "number") {
        candidates.push(format!(r#"input[type="{field}"]"#));
    }
    candidates
}

/// Outcome of one action as reported by the generated script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserStepReport {
    pub index: usize,
    pub status: StepStatus,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Reports for a segment. `error` is set when the script died before
/// reporting every action it was asked to run.
#[derive(Debug, Clone)]
pub struct SegmentOutcome {
    pub reports: Vec<BrowserStepReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResumeLine {
    resume_url: String,
}

/// Playwright browser session
pub struct BrowserSession {
    config: BrowserConfig,
    state_dir: TempDir,
    resume_url: Option<String>,
}

impl BrowserSession {
    pub fn new(config: BrowserConfig) -> E2eResult<Self> {
        Self::check_playwright_installed(&config.node_project_dir)?;
        Self::prepare(config)
    }

    /// Build a session without probing for Node/Playwright
    pub fn prepare(config: BrowserConfig) -> E2eResult<Self> {
        let config = config.anchored(&std::env::current_dir()?);
        std::fs::create_dir_all(&config.screenshot_dir)?;
        Ok(Self {
            config,
            state_dir: tempfile::tempdir()?,
            resume_url: None,
        })
    }

    fn check_playwright_installed(project_dir: &Path) -> E2eResult<()> {
        let status = Command::new("npx")
            .args(["playwright", "--version"])
            .current_dir(project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.path().join("storage-state.json")
    }

    pub fn screenshot_path(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.config.screenshot_dir.join(format!("{}.png", safe))
    }

    /// Run a segment of actions in one browser process
    pub async fn run_segment(&mut self, actions: &[BrowserAction], policy: FailurePolicy) -> E2eResult<SegmentOutcome> {
        let script = self.build_script(actions, policy);

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("segment.js");
        std::fs::write(&script_path, &script)?;

        debug!("Running Playwright segment of {} action(s): {}", actions.len(), script_path.display());

        // Scripts live in a temp dir, so module resolution needs NODE_PATH
        let node_modules = self.config.node_project_dir.join("node_modules");
        let output = TokioCommand::new(&self.config.node_binary)
            .arg(&script_path)
            .env("NODE_PATH", &node_modules)
            .current_dir(&self.config.node_project_dir)
            .output()
            .await
            .map_err(|e| E2eError::Browser(format!("failed to launch {}: {}", self.config.node_binary, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (mut reports, resume) = parse_output(&stdout);

        if let Some(url) = resume {
            self.resume_url = Some(url);
        }

        for report in reports.iter_mut() {
            if let Some(BrowserAction::Screenshot { name, .. }) = actions.get(report.index) {
                if report.status == StepStatus::Pass {
                    match sha256_file(&self.screenshot_path(name)) {
                        Ok(digest) => report.detail = format!("{} sha256:{}", report.detail, digest),
                        Err(e) => warn!("Could not hash screenshot {}: {}", name, e),
                    }
                }
            }
        }

        let error = if output.status.success() {
            None
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Some(format!("Playwright script exited with {}: {}", output.status, stderr.trim()))
        };

        if let Some(err) = &error {
            warn!("{}", err);
        }

        Ok(SegmentOutcome { reports, error })
    }

    /// Build the Playwright script for a segment
    pub fn build_script(&self, actions: &[BrowserAction], policy: FailurePolicy) -> String {
        let mut script = String::new();

        script.push_str(&format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');
const fs = require('fs');

const STATE_PATH = {state};
const RESUME_URL = {resume};
const STRICT_SELECTORS = {strict};
const ABORT_ON_FAILURE = {abort};
const DISMISS_LABELS = {labels};

class SelectorMiss extends Error {{}}

const report = (r) => console.log({marker} + JSON.stringify(r));

async function locate(page, candidates) {{
  for (const selector of candidates) {{
    const loc = page.locator(selector).first();
    if (await loc.count() > 0 && await loc.isVisible()) return loc;
  }}
  return null;
}}

async function dialogOpen(page) {{
  const dialog = page.locator('[role="dialog"]:visible, .modal.show, [aria-modal="true"]:visible');
  return (await dialog.count()) > 0;
}}

async function dismissModals(page, attempts) {{
  for (let i = 0; i < attempts; i++) {{
    if (!(await dialogOpen(page))) return {{ detail: `no dialog after ${{i}} attempt(s)` }};
    await page.keyboard.press('Escape');
    for (const label of DISMISS_LABELS) {{
      const button = page.getByRole('button', {{ name: label, exact: true }}).first();
      if (await button.count() > 0 && await button.isVisible()) {{
        await button.click();
        break;
      }}
    }}
    await page.waitForTimeout(300);
  }}
  if (await dialogOpen(page)) {{
    return {{ status: 'WARN', detail: `dialog still open after ${{attempts}} attempt(s)` }};
  }}
  return {{ detail: `closed after ${{attempts}} attempt(s)` }};
}}

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }},
    storageState: fs.existsSync(STATE_PATH) ? STATE_PATH : undefined,
  }});
  const page = await context.newPage();
  page.setDefaultTimeout({timeout});
  const baseUrl = {base_url};
  let aborted = false;

  const step = async (index, fn) => {{
    if (aborted) return;
    const started = Date.now();
    try {{
      const r = (await fn()) || {{}};
      report({{ index, status: r.status || 'PASS', detail: r.detail || '', value: r.value, duration_ms: Date.now() - started }});
    }} catch (e) {{
      const status = e instanceof SelectorMiss && !STRICT_SELECTORS ? 'WARN' : 'FAIL';
      report({{ index, status, detail: e.message, duration_ms: Date.now() - started }});
      if (status === 'FAIL' && ABORT_ON_FAILURE) aborted = true;
    }}
  }};

  try {{
    if (RESUME_URL) await page.goto(RESUME_URL, {{ waitUntil: 'domcontentloaded' }});
"#,
            state = js_str(&self.state_path().to_string_lossy()),
            resume = self.resume_url.as_deref().map(js_str).unwrap_or_else(|| "null".to_string()),
            strict = self.config.strict_selectors,
            abort = policy == FailurePolicy::Abort,
            labels = serde_json::to_string(DISMISS_LABELS).unwrap_or_else(|_| "[]".to_string()),
            marker = js_str(REPORT_MARKER),
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            width = self.config.viewport_width,
            height = self.config.viewport_height,
            timeout = self.config.step_timeout_ms,
            base_url = js_str(&self.config.base_url),
        ));

        for (i, action) in actions.iter().enumerate() {
            script.push_str(&format!("\n    // Step {}: {}\n", i + 1, action.label()));
            script.push_str(&format!("    await step({}, async () => {{\n{}\n    }});\n", i, self.action_to_js(action)));
        }

        script.push_str(
            r#"
  } finally {
    console.log(JSON.stringify({ resume_url: page.url() }));
    await context.storageState({ path: STATE_PATH });
    await browser.close();
  }
})().catch((error) => {
  console.error(error && error.stack ? error.stack : String(error));
  process.exit(1);
});
"#,
        );

        script
    }

    /// Convert an action to the body of a step callback
    fn action_to_js(&self, action: &BrowserAction) -> String {
        match action {
            BrowserAction::Navigate { url } => format!(
                r#"      await page.goto(new URL({}, baseUrl).toString(), {{ waitUntil: 'domcontentloaded' }});
      return {{ detail: page.url() }};"#,
                js_str(url)
            ),
            BrowserAction::Fill { field, value } => {
                let candidates = serde_json::to_string(&field_candidates(field)).unwrap_or_else(|_| "[]".to_string());
                format!(
                    r#"      const loc = await locate(page, {candidates});
      if (!loc) throw new SelectorMiss('no field matched ' + {field});
      await loc.fill({value});
      return {{ detail: 'filled ' + {field} }};"#,
                    candidates = candidates,
                    field = js_str(field),
                    value = js_str(value),
                )
            }
            BrowserAction::ClickText { text } => format!(
                r#"      const text = {text};
      let loc = page.getByRole('button', {{ name: text }}).first();
      if (!(await loc.count())) loc = page.getByRole('link', {{ name: text }}).first();
      if (!(await loc.count())) loc = page.getByText(text, {{ exact: true }}).first();
      if (!(await loc.count())) throw new SelectorMiss('nothing to click with text ' + text);
      await loc.click();
      return {{ detail: 'clicked ' + text }};"#,
                text = js_str(text)
            ),
            BrowserAction::DismissModals { max_attempts } => format!(
                "      return await dismissModals(page, {});",
                max_attempts.unwrap_or(self.config.modal_attempts)
            ),
            BrowserAction::AssertText { pattern } => format!(
                r#"      const re = new RegExp({pattern});
      const body = await page.locator('body').innerText();
      const m = body.match(re);
      if (!m) throw new Error('text not found: ' + re);
      return {{ detail: 'matched ' + JSON.stringify(m[0]), value: m[1] !== undefined ? m[1] : m[0] }};"#,
                pattern = js_str(pattern)
            ),
            BrowserAction::CountRows { selector } => format!(
                r#"      const n = await page.locator({selector}).count();
      return {{ detail: n + ' element(s)', value: String(n) }};"#,
                selector = js_str(selector)
            ),
            BrowserAction::WaitFor { selector, timeout_ms } => format!(
                r#"      try {{
        await page.waitForSelector({selector}, {{ state: 'visible', timeout: {timeout} }});
      }} catch (e) {{
        throw new SelectorMiss('not visible within {timeout} ms: ' + {selector});
      }}"#,
                selector = js_str(selector),
                timeout = timeout_ms
            ),
            BrowserAction::Screenshot { name, full_page } => {
                let path = self.screenshot_path(name);
                format!(
                    r#"      await page.screenshot({{ path: {path}, fullPage: {full_page} }});
      return {{ detail: {path} }};"#,
                    path = js_str(&path.to_string_lossy()),
                    full_page = full_page
                )
            }
            BrowserAction::Upload { field, path } => {
                let mut candidates = field_candidates(field);
                candidates.push("input[type=\"file\"]".to_string());
                format!(
                    r#"      const loc = page.locator({candidates}.join(', ')).first();
      if (!(await loc.count())) throw new SelectorMiss('no file input matched ' + {field});
      await loc.setInputFiles({path});
      return {{ detail: 'uploaded ' + {path} }};"#,
                    candidates = serde_json::to_string(&candidates).unwrap_or_else(|_| "[]".to_string()),
                    field = js_str(field),
                    path = js_str(path),
                )
            }
            BrowserAction::Pause { ms } => format!("      await page.waitForTimeout({});", ms),
        }
    }
}

/// JSON-encode a string so it is a safe JS literal
fn js_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Split script stdout into step reports and the final page URL
pub fn parse_output(stdout: &str) -> (Vec<BrowserStepReport>, Option<String>) {
    let mut reports = Vec::new();
    let mut resume = None;

    for line in stdout.lines() {
        if let Some(json) = line.strip_prefix(REPORT_MARKER) {
            match serde_json::from_str::<BrowserStepReport>(json) {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Unparseable step report '{}': {}", json, e),
            }
        } else if let Ok(line) = serde_json::from_str::<ResumeLine>(line) {
            if line.resume_url != "about:blank" {
                resume = Some(line.resume_url);
            }
        } else if !line.trim().is_empty() {
            info!("[browser] {}", line);
        }
    }

    (reports, resume)
}

fn sha256_file(path: &Path) -> E2eResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub base_url: String,
    pub screenshot_dir: PathBuf,
    pub node_project_dir: PathBuf,
    pub node_binary: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub browser: Browser,
    pub headless: bool,
    pub strict_selectors: bool,
    pub modal_attempts: u32,
    pub step_timeout_ms: u64,
}

impl BrowserConfig {
    /// Resolve relative directories against `base`. Scripts run inside
    /// `node_project_dir`, so every path handed to them must be absolute.
    pub fn anchored(mut self, base: &Path) -> Self {
        self.screenshot_dir = base.join(&self.screenshot_dir);
        self.node_project_dir = base.join(&self.node_project_dir);
        self
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            screenshot_dir: PathBuf::from("screenshots"),
            node_project_dir: PathBuf::from("."),
            node_binary: "node".to_string(),
            viewport_width: 1280,
            viewport_height: 720,
            browser: Browser::Chromium,
            headless: true,
            strict_selectors: false,
            modal_attempts: 5,
            step_timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(dir: &Path) -> BrowserSession {
        BrowserSession::prepare(BrowserConfig {
            screenshot_dir: dir.join("shots"),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn testid_is_tried_first() {
        let candidates = field_candidates("email");
        assert_eq!(candidates[0], r#"[data-testid="email"]"#);
        assert_eq!(candidates[1], r#"[name="email"]"#);
        assert_eq!(candidates.last().unwrap(), r#"input[type="email"]"#);

        let church = field_candidates("churchName");
        assert!(church.iter().all(|c| !c.starts_with("input[type")));
    }

    #[test]
    fn script_escapes_values() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let script = session.build_script(
            &[BrowserAction::Fill {
                field: "churchName".into(),
                value: "St. Mary's \"Main\"".into(),
            }],
            FailurePolicy::Continue,
        );

        assert!(script.contains(r#"await loc.fill("St. Mary's \"Main\"");"#));
        assert!(script.contains("const ABORT_ON_FAILURE = false;"));
        assert!(script.contains("const RESUME_URL = null;"));
    }

    #[test]
    fn abort_policy_is_compiled_in() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let script = session.build_script(&[BrowserAction::Pause { ms: 10 }], FailurePolicy::Abort);
        assert!(script.contains("const ABORT_ON_FAILURE = true;"));
        assert!(script.contains("await step(0, async () => {"));
    }

    #[test]
    fn modal_attempts_default_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let script = session.build_script(&[BrowserAction::DismissModals { max_attempts: None }], FailurePolicy::Continue);
        assert!(script.contains("return await dismissModals(page, 5);"));
    }

    #[test]
    fn upload_falls_back_to_any_file_input() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let script = session.build_script(
            &[BrowserAction::Upload {
                field: "file".into(),
                path: "/tmp/chorus-members-1.csv".into(),
            }],
            FailurePolicy::Continue,
        );
        assert!(script.contains(r#"await loc.setInputFiles("/tmp/chorus-members-1.csv");"#));
        assert!(script.contains(r#"input[type=\"file\"]"#));
    }

    #[test]
    fn parses_reports_and_resume_url() {
        let stdout = concat!(
            "@@chorus {\"index\":0,\"status\":\"PASS\",\"detail\":\"http://x/login\",\"duration_ms\":120}\n",
            "some console noise\n",
            "@@chorus {\"index\":1,\"status\":\"WARN\",\"detail\":\"no field matched email\"}\n",
            "@@chorus {\"index\":2,\"status\":\"PASS\",\"value\":\"12\"}\n",
            "{\"resume_url\":\"http://x/dashboard\"}\n",
        );
        let (reports, resume) = parse_output(stdout);

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[1].status, StepStatus::Warn);
        assert_eq!(reports[2].value.as_deref(), Some("12"));
        assert_eq!(resume.as_deref(), Some("http://x/dashboard"));
    }

    #[test]
    fn screenshot_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let path = session.screenshot_path("members/after import");
        assert!(path.ends_with("members_after_import.png"));
    }

    #[test]
    fn screenshots_resolve_outside_the_node_project() {
        let cwd = tempfile::tempdir().unwrap();
        let config = BrowserConfig {
            screenshot_dir: PathBuf::from("screenshots"),
            node_project_dir: PathBuf::from("e2e-node"),
            ..Default::default()
        }
        .anchored(cwd.path());
        let session = BrowserSession::prepare(config).unwrap();

        let expected = cwd.path().join("screenshots").join("home.png");
        assert_eq!(session.screenshot_path("home"), expected);
        assert!(expected.parent().unwrap().is_dir());

        let script = session.build_script(
            &[BrowserAction::Screenshot {
                name: "home".into(),
                full_page: false,
            }],
            FailurePolicy::Continue,
        );
        assert!(script.contains(&format!("path: {}", js_str(&expected.to_string_lossy()))));
        assert!(session.config.node_project_dir.is_absolute());
    }

    #[test]
    fn browser_names() {
        assert_eq!("Chrome".parse::<Browser>().unwrap(), Browser::Chromium);
        assert!("lynx".parse::<Browser>().is_err());
    }
}
