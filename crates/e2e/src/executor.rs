//! Executes declarative scenario steps against the target

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api;
use crate::browser::{BrowserAction, BrowserSession, SegmentOutcome};
use crate::config::RunConfig;
use crate::error::{E2eError, E2eResult};
use crate::fixtures::{MemberCsv, MemberFixture, TenantFixture};
use crate::http::{parse_method, ApiResponse, HttpClient};
use crate::poll::{poll_until, PollConfig};
use crate::report::StepStatus;
use crate::runner::{Outcome, ScenarioRun};
use crate::scenario::{CompareOp, CountCapture, HttpCall, Scenario, Step, StepAction};
use crate::socket::SocketListener;
use crate::vars::{placeholders, value_to_var, Vars};

/// State shared by the steps of one scenario
pub struct Executor {
    config: RunConfig,
    http: HttpClient,
    run_id: String,
    vars: Vars,
    poll: PollConfig,
    browser: Option<BrowserSession>,
    browser_error: Option<String>,
    sockets: HashMap<String, SocketListener>,
    csv_files: Vec<MemberCsv>,
    /// Variables whose producing step did not run
    unset: HashSet<String>,
}

impl Executor {
    pub fn new(config: &RunConfig, http: HttpClient, run_id: &str) -> Self {
        let mut vars = Vars::new();
        vars.set("run_id", run_id);
        vars.set("base_url", config.target.base_url.as_str());

        Self {
            poll: config.poll_config(),
            config: config.clone(),
            http,
            run_id: run_id.to_string(),
            vars,
            browser: None,
            browser_error: None,
            sockets: HashMap::new(),
            csv_files: Vec::new(),
            unset: HashSet::new(),
        }
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    /// Run every step of `scenario`, recording into `run`
    pub async fn execute(&mut self, scenario: &Scenario, run: &mut ScenarioRun) {
        for (name, raw) in &scenario.vars {
            match self.vars.interpolate(raw) {
                Ok(value) => self.vars.set(name.as_str(), value),
                Err(e) => run.record(format!("vars:{name}"), StepStatus::Fail, e.to_string(), 0),
            }
        }

        let steps = &scenario.steps;
        let mut i = 0;
        while i < steps.len() {
            if steps[i].action.is_browser() {
                let end = segment_end(steps, i);
                i += self.run_browser_segment(&steps[i..end], run).await;
            } else {
                let step = &steps[i];
                if let Some(var) = self.blocked_on(step) {
                    debug!("{} needs ${{{}}}, which was never set", step.display_name(), var);
                    self.skip_step(run, step);
                } else if run.step(step.display_name(), self.execute_step(&step.action)).await.is_none() {
                    self.unset.extend(step.action.produced_vars());
                }
                i += 1;
            }
        }
    }

    /// A variable `step` reads that an earlier, unrun step should have set
    fn blocked_on(&self, step: &Step) -> Option<String> {
        if self.unset.is_empty() {
            return None;
        }
        let text = serde_json::to_string(&step.action).ok()?;
        let blocked = placeholders(&text)
            .find(|name| self.unset.contains(*name) && self.vars.get(name).is_none())
            .map(str::to_string);
        blocked
    }

    fn skip_step(&mut self, run: &mut ScenarioRun, step: &Step) {
        run.skip(&step.display_name());
        self.unset.extend(step.action.produced_vars());
    }

    /// Close any sockets left open by the scenario and remove temp files
    pub async fn shutdown(&mut self) {
        self.csv_files.clear();
        for (alias, listener) in self.sockets.drain() {
            if let Err(e) = listener.close().await {
                warn!("Closing socket '{}' failed: {}", alias, e);
            }
        }
    }

    async fn execute_step(&mut self, action: &StepAction) -> E2eResult<Outcome<()>> {
        match action {
            StepAction::RegisterTenant { alias } => {
                let tenant = TenantFixture::generate(&self.run_id, &self.config.target.email_domain);
                let session = api::register_tenant(&self.http, &tenant).await?;
                self.vars.set(format!("{alias}.token"), session.token);
                self.vars.set(format!("{alias}.email"), tenant.email.as_str());
                self.vars.set(format!("{alias}.password"), tenant.password.as_str());
                self.vars.set(format!("{alias}.phone"), tenant.phone.as_str());
                self.vars.set(format!("{alias}.church_name"), tenant.church_name.as_str());
                if let Some(id) = session.tenant_id {
                    self.vars.set(format!("{alias}.tenant_id"), id);
                }
                Ok(Outcome::ok(format!("registered {}", tenant.email)))
            }

            StepAction::Login { email, password, alias } => {
                let email = self.vars.interpolate(email)?;
                let password = self.vars.interpolate(password)?;
                let session = api::login(&self.http, &email, &password).await?;
                self.vars.set(format!("{alias}.token"), session.token);
                self.vars.set(format!("{alias}.email"), email.as_str());
                Ok(Outcome::ok(format!("logged in as {email}")))
            }

            StepAction::MemberFixture { alias } => {
                let member = MemberFixture::generate(&self.run_id, &self.config.target.email_domain);
                self.vars.set(format!("{alias}.first_name"), member.first_name.as_str());
                self.vars.set(format!("{alias}.last_name"), member.last_name.as_str());
                self.vars.set(format!("{alias}.phone"), member.phone.as_str());
                self.vars.set(format!("{alias}.email"), member.email.as_str());
                Ok(Outcome::ok(format!("member fixture {}", member.phone)))
            }

            StepAction::MemberCsv { rows, alias } => {
                let members: Vec<MemberFixture> = (0..*rows)
                    .map(|_| MemberFixture::generate(&self.run_id, &self.config.target.email_domain))
                    .collect();
                let csv = MemberCsv::write(&members)?;
                let path = csv.path().to_string_lossy().into_owned();
                self.vars.set(format!("{alias}.path"), path.as_str());
                self.vars.set(format!("{alias}.rows"), csv.rows().to_string());
                for (i, member) in csv.members().iter().enumerate() {
                    self.vars.set(format!("{alias}.{i}.phone"), member.phone.as_str());
                }
                let detail = format!("{} row(s) in {path}", csv.rows());
                self.csv_files.push(csv);
                Ok(Outcome::ok(detail))
            }

            StepAction::Http {
                call,
                expect_status,
                expect_json,
                expect_header,
                capture,
                capture_count,
            } => {
                let resp = self.send(call).await?;
                self.check_response(&resp, call, expect_status, expect_json, expect_header.as_deref())?;
                self.capture(&resp, capture, capture_count.as_ref())?;
                Ok(Outcome::ok(format!("{} in {} ms", resp.status, resp.elapsed_ms)))
            }

            StepAction::Poll {
                request,
                pointer,
                equals,
                timeout_ms,
            } => {
                let expected = self.vars.interpolate_json(equals)?;
                let mut config = self.poll.clone();
                if let Some(ms) = timeout_ms {
                    config = config.with_timeout(Duration::from_millis(*ms));
                }
                let what = format!("{}{} == {}", request.path, pointer, expected);

                let this = &*self;
                let expected = &expected;
                let status = poll_until(&config, &what, move || async move {
                    let resp = this.send(request).await?;
                    Ok::<_, E2eError>((resp.pointer(pointer) == Some(expected)).then_some(resp.status))
                })
                .await?;

                Ok(Outcome::ok(format!("{what} ({status})")))
            }

            StepAction::Burst {
                request,
                count,
                expect_any_status,
                forbid_status,
                expect_retry_after,
            } => {
                self.burst(request, *count, *expect_any_status, *forbid_status, *expect_retry_after)
                    .await
            }

            StepAction::Compare { left, op, right } => {
                let left = self.vars.interpolate(left)?;
                let right = self.vars.interpolate(right)?;
                compare(&left, *op, &right)?;
                Ok(Outcome::ok(format!("{left} {} {right}", op_symbol(*op))))
            }

            StepAction::SocketConnect { token, alias } => {
                let token = self.vars.interpolate(token)?;
                let origin = self.config.socket_origin().to_string();
                let listener = SocketListener::connect(&origin, &token, self.config.http.timeout()).await?;
                self.sockets.insert(alias.clone(), listener);
                Ok(Outcome::ok(format!("connected to {origin}")))
            }

            StepAction::SocketExpect {
                socket,
                event,
                timeout_ms,
                alias,
            } => {
                let listener = self
                    .sockets
                    .get_mut(socket)
                    .ok_or_else(|| E2eError::Socket(format!("no open socket named '{socket}'")))?;
                let received = listener.wait_for(event, Duration::from_millis(*timeout_ms)).await?;
                let payload = received.args.first().cloned().unwrap_or(Value::Null);
                if let Some(alias) = alias {
                    self.vars.set(format!("{alias}.payload"), payload.to_string());
                }
                Ok(Outcome::ok(format!("{} {}", event, payload)))
            }

            StepAction::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(Outcome::ok(format!("slept {ms} ms")))
            }

            StepAction::Log { message } => {
                let message = self.vars.interpolate(message)?;
                info!("[SCENARIO LOG] {}", message);
                Ok(Outcome::ok(message))
            }

            other => Err(E2eError::Browser(format!(
                "{} must run inside a browser segment",
                other.default_name()
            ))),
        }
    }

    async fn send(&self, call: &HttpCall) -> E2eResult<ApiResponse> {
        let method = parse_method(&call.method)?;
        let path = self.vars.interpolate(&call.path)?;
        let token = call.token.as_deref().map(|t| self.vars.interpolate(t)).transpose()?;
        let body = call.body.as_ref().map(|b| self.vars.interpolate_json(b)).transpose()?;

        self.http.request(method, &path, token.as_deref(), body.as_ref()).await
    }

    fn check_response(
        &self,
        resp: &ApiResponse,
        call: &HttpCall,
        expect_status: &[u16],
        expect_json: &BTreeMap<String, Value>,
        expect_header: Option<&str>,
    ) -> E2eResult<()> {
        let request = format!("{} {}", call.method.to_uppercase(), call.path);
        let status = resp.status.as_u16();

        let status_ok = if expect_status.is_empty() {
            resp.is_success()
        } else {
            expect_status.contains(&status)
        };
        if !status_ok {
            return Err(E2eError::UnexpectedStatus {
                request: format!("{request} ({})", resp.snippet()),
                expected: if expect_status.is_empty() {
                    "2xx".to_string()
                } else {
                    expect_status.iter().map(u16::to_string).collect::<Vec<_>>().join("|")
                },
                actual: status,
            });
        }

        if let Some(header) = expect_header {
            if !resp.headers.contains_key(header) {
                return Err(E2eError::AssertionFailed(format!("{request}: missing header {header}")));
            }
        }

        for (pointer, expected) in expect_json {
            let expected = self.vars.interpolate_json(expected)?;
            let actual = resp.pointer(pointer);
            if actual != Some(&expected) {
                return Err(E2eError::AssertionFailed(format!(
                    "{request}: {pointer} expected {expected}, got {}",
                    actual.map_or("<missing>".to_string(), Value::to_string)
                )));
            }
        }

        Ok(())
    }

    fn capture(
        &mut self,
        resp: &ApiResponse,
        capture: &BTreeMap<String, String>,
        capture_count: Option<&CountCapture>,
    ) -> E2eResult<()> {
        for (var, pointer) in capture {
            let value = resp.pointer(pointer).ok_or_else(|| {
                E2eError::AssertionFailed(format!("cannot capture {var}: nothing at {pointer} in {}", resp.snippet()))
            })?;
            self.vars.set(var.as_str(), value_to_var(value));
        }

        if let Some(count) = capture_count {
            let len = resp
                .pointer(&count.pointer)
                .and_then(Value::as_array)
                .map(Vec::len)
                .ok_or_else(|| E2eError::AssertionFailed(format!("no array at {} to count", count.pointer)))?;
            self.vars.set(count.alias.as_str(), len.to_string());
        }

        Ok(())
    }

    async fn burst(
        &self,
        request: &HttpCall,
        count: usize,
        expect_any_status: Option<u16>,
        forbid_status: Option<u16>,
        expect_retry_after: bool,
    ) -> E2eResult<Outcome<()>> {
        let results = join_all((0..count).map(|_| self.send(request))).await;

        let mut histogram: BTreeMap<u16, usize> = BTreeMap::new();
        let mut errors = Vec::new();
        let mut missing_retry_after = 0;

        for result in results {
            match result {
                Ok(resp) => {
                    let status = resp.status.as_u16();
                    *histogram.entry(status).or_default() += 1;
                    if expect_retry_after && Some(status) == expect_any_status && !resp.has_retry_after() {
                        missing_retry_after += 1;
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        if histogram.is_empty() && !errors.is_empty() {
            return Err(errors.swap_remove(0));
        }

        let summary = histogram
            .iter()
            .map(|(status, n)| format!("{status}x{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let summary = if errors.is_empty() {
            summary
        } else {
            format!("{summary}, {} transport error(s)", errors.len())
        };

        if let Some(status) = expect_any_status {
            if !histogram.contains_key(&status) {
                return Err(E2eError::AssertionFailed(format!(
                    "no {status} among {count} request(s): {summary}"
                )));
            }
        }
        if let Some(status) = forbid_status {
            if histogram.contains_key(&status) {
                return Err(E2eError::AssertionFailed(format!("unexpected {status}: {summary}")));
            }
        }
        if missing_retry_after > 0 {
            return Err(E2eError::AssertionFailed(format!(
                "{missing_retry_after} response(s) without Retry-After: {summary}"
            )));
        }

        Ok(Outcome::ok(summary))
    }

    /// Run a browser segment. Returns how many steps were consumed.
    async fn run_browser_segment(&mut self, steps: &[Step], run: &mut ScenarioRun) -> usize {
        if run.is_aborted() || !self.config.browser.enabled {
            if !run.is_aborted() {
                warn!("Browser disabled; {} step(s) not run", steps.len());
            }
            for step in steps {
                self.skip_step(run, step);
            }
            return steps.len();
        }

        // Interpolate up to the first broken step; that step fails on its own
        let mut actions = Vec::with_capacity(steps.len());
        for step in steps {
            if self.blocked_on(step).is_some() {
                if actions.is_empty() {
                    self.skip_step(run, step);
                    return 1;
                }
                break;
            }
            match self.to_action(&step.action) {
                Ok(action) => actions.push(action),
                Err(e) => {
                    if actions.is_empty() {
                        run.record(step.display_name(), StepStatus::Fail, e.to_string(), 0);
                        return 1;
                    }
                    break;
                }
            }
        }
        let consumed = actions.len();
        let steps = &steps[..consumed];

        let policy = run.policy();
        let outcome = match self.browser_session() {
            Ok(session) => session.run_segment(&actions, policy).await,
            Err(e) => Err(e),
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                run.record(steps[0].display_name(), StepStatus::Fail, e.to_string(), 0);
                self.unset.extend(steps[0].action.produced_vars());
                for step in &steps[1..] {
                    self.skip_step(run, step);
                }
                return consumed;
            }
        };

        for (step, result) in steps.iter().zip(reconcile(steps.len(), &outcome)) {
            if run.is_aborted() {
                self.skip_step(run, step);
                continue;
            }

            match result {
                SegmentStep::Ran {
                    status,
                    detail,
                    duration_ms,
                    value,
                } => {
                    match (step.action.capture_var(), value) {
                        (Some(var), Some(value)) => self.vars.set(var, value),
                        (Some(var), None) => {
                            self.unset.insert(var.to_string());
                        }
                        _ => {}
                    }
                    run.record(step.display_name(), status, detail, duration_ms);
                }
                SegmentStep::NotRun => self.skip_step(run, step),
            }
        }

        consumed
    }

    fn browser_session(&mut self) -> E2eResult<&mut BrowserSession> {
        if let Some(err) = &self.browser_error {
            return Err(E2eError::Browser(err.clone()));
        }
        if self.browser.is_none() {
            match BrowserSession::new(self.config.browser_config()) {
                Ok(session) => self.browser = Some(session),
                Err(e) => {
                    self.browser_error = Some(e.to_string());
                    return Err(e);
                }
            }
        }
        self.browser
            .as_mut()
            .ok_or_else(|| E2eError::Browser("browser session unavailable".to_string()))
    }

    fn to_action(&self, action: &StepAction) -> E2eResult<BrowserAction> {
        if let StepAction::Sleep { ms } = action {
            return Ok(BrowserAction::Pause { ms: *ms });
        }

        let action = action
            .to_browser_action()
            .ok_or_else(|| E2eError::Browser(format!("{} is not a browser step", action.default_name())))?;

        Ok(match action {
            BrowserAction::Navigate { url } => BrowserAction::Navigate {
                url: self.vars.interpolate(&url)?,
            },
            BrowserAction::Fill { field, value } => BrowserAction::Fill {
                field: self.vars.interpolate(&field)?,
                value: self.vars.interpolate(&value)?,
            },
            BrowserAction::ClickText { text } => BrowserAction::ClickText {
                text: self.vars.interpolate(&text)?,
            },
            BrowserAction::AssertText { pattern } => BrowserAction::AssertText {
                pattern: self.vars.interpolate(&pattern)?,
            },
            BrowserAction::CountRows { selector } => BrowserAction::CountRows {
                selector: self.vars.interpolate(&selector)?,
            },
            BrowserAction::WaitFor { selector, timeout_ms } => BrowserAction::WaitFor {
                selector: self.vars.interpolate(&selector)?,
                timeout_ms,
            },
            BrowserAction::Upload { field, path } => BrowserAction::Upload {
                field: self.vars.interpolate(&field)?,
                path: self.vars.interpolate(&path)?,
            },
            other => other,
        })
    }
}

/// What became of one action of a segment that reached the browser
#[derive(Debug, Clone, PartialEq)]
enum SegmentStep {
    Ran {
        status: StepStatus,
        detail: String,
        duration_ms: u64,
        value: Option<String>,
    },
    NotRun,
}

/// Match a segment's reports to its `len` actions. When the script died,
/// the first unreported action carries the error and the rest did not run.
fn reconcile(len: usize, outcome: &SegmentOutcome) -> Vec<SegmentStep> {
    let mut crash = outcome.error.clone();
    (0..len)
        .map(|index| match outcome.reports.iter().find(|r| r.index == index) {
            Some(report) => SegmentStep::Ran {
                status: report.status,
                detail: report.detail.clone(),
                duration_ms: report.duration_ms,
                value: report.value.clone(),
            },
            None => match crash.take() {
                Some(err) => SegmentStep::Ran {
                    status: StepStatus::Fail,
                    detail: err,
                    duration_ms: 0,
                    value: None,
                },
                None => SegmentStep::NotRun,
            },
        })
        .collect()
}

/// End of the browser segment starting at `start`. A `sleep` between two
/// browser steps stays inside the segment so the page is not reloaded.
fn segment_end(steps: &[Step], start: usize) -> usize {
    let mut end = start;
    while end < steps.len() {
        let action = &steps[end].action;
        let sleep_between = matches!(action, StepAction::Sleep { .. })
            && steps.get(end + 1).map_or(false, |s| s.action.is_browser());
        if action.is_browser() || sleep_between {
            end += 1;
        } else {
            break;
        }
    }
    end
}

fn op_symbol(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "==",
        CompareOp::Ne => "!=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
    }
}

/// Numeric comparison when both sides parse as numbers, string otherwise
pub fn compare(left: &str, op: CompareOp, right: &str) -> E2eResult<()> {
    let holds = match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(l), Ok(r)) => match op {
            CompareOp::Eq => l == r,
            CompareOp::Ne => l != r,
            CompareOp::Gt => l > r,
            CompareOp::Ge => l >= r,
            CompareOp::Lt => l < r,
            CompareOp::Le => l <= r,
        },
        _ => match op {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            _ => {
                return Err(E2eError::AssertionFailed(format!(
                    "cannot order non-numeric values '{left}' and '{right}'"
                )))
            }
        },
    };

    if holds {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(format!("expected {left} {} {right}", op_symbol(op))))
    }
}
