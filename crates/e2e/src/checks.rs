//! Built-in checks for behavior every deployment must keep.
//!
//! Each check is a scenario written in Rust rather than YAML, recorded
//! through the same [`ScenarioRun`] so it lands in the same report.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use futures::future::join_all;
use serde_json::Value;

use crate::api::{self, Session};
use crate::error::{E2eError, E2eResult};
use crate::fixtures::{MemberFixture, TenantFixture};
use crate::http::HttpClient;
use crate::poll::{poll_until, PollConfig};
use crate::report::ScenarioReport;
use crate::runner::{FailurePolicy, Outcome, ScenarioRun};

/// What a check needs from the runner
#[derive(Debug, Clone)]
pub struct CheckContext<'a> {
    pub http: &'a HttpClient,
    pub run_id: &'a str,
    pub email_domain: &'a str,
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    MemberLifecycle,
    TenantIsolation,
    RateLimit { burst: usize },
}

impl Check {
    pub fn name(&self) -> &'static str {
        match self {
            Check::MemberLifecycle => "member-lifecycle",
            Check::TenantIsolation => "tenant-isolation",
            Check::RateLimit { .. } => "rate-limit",
        }
    }

    pub async fn run(&self, ctx: &CheckContext<'_>, rate_limit_path: &str) -> ScenarioReport {
        match self {
            Check::MemberLifecycle => member_lifecycle(ctx).await,
            Check::TenantIsolation => tenant_isolation(ctx).await,
            Check::RateLimit { burst } => rate_limit(ctx, *burst, rate_limit_path).await,
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Check {
    type Err = E2eError;

    /// Parses the check name; `rate-limit` starts with a zero burst that
    /// the caller fills in from configuration.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member-lifecycle" => Ok(Check::MemberLifecycle),
            "tenant-isolation" => Ok(Check::TenantIsolation),
            "rate-limit" => Ok(Check::RateLimit { burst: 0 }),
            other => Err(E2eError::Config(format!(
                "unknown check '{other}' (expected member-lifecycle, tenant-isolation or rate-limit)"
            ))),
        }
    }
}

fn needs<'a, T>(value: &'a Option<T>, what: &str) -> E2eResult<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| E2eError::AssertionFailed(format!("{what} unavailable after an earlier failure")))
}

async fn register(ctx: &CheckContext<'_>) -> E2eResult<Outcome<Session>> {
    let tenant = TenantFixture::generate(ctx.run_id, ctx.email_domain);
    let session = api::register_tenant(ctx.http, &tenant).await?;
    Ok(Outcome::pass(session, format!("registered {}", tenant.email)))
}

async fn count_with_phone(ctx: &CheckContext<'_>, session: &Session, phone: &str) -> E2eResult<usize> {
    let members = api::list_members(ctx.http, session).await?;
    Ok(api::members_with_phone(&members, phone).len())
}

/// Register, create a member, see it listed once, delete it, see it gone
pub async fn member_lifecycle(ctx: &CheckContext<'_>) -> ScenarioReport {
    let mut run = ScenarioRun::new(Check::MemberLifecycle.name(), FailurePolicy::Abort);
    let member = MemberFixture::generate(ctx.run_id, ctx.email_domain);
    let phone = member.phone.as_str();

    let session = run.step("register tenant", register(ctx)).await;

    let member_id = run
        .step("create member", async {
            let session = needs(&session, "session")?;
            let id = api::create_member(ctx.http, session, &member).await?;
            Ok(Outcome::pass(id.clone(), format!("member {} ({})", id, member.phone)))
        })
        .await;

    run.step("member listed once", async {
        let session = needs(&session, "session")?;
        let what = format!("one member with phone {phone}");
        let seen = poll_until(&ctx.poll, &what, move || async move {
            let n = count_with_phone(ctx, session, phone).await?;
            Ok::<_, E2eError>((n >= 1).then_some(n))
        })
        .await?;
        if seen != 1 {
            return Err(E2eError::AssertionFailed(format!(
                "expected exactly one member with phone {phone}, found {seen}"
            )));
        }
        Ok(Outcome::ok(what))
    })
    .await;

    run.step("delete member", async {
        let session = needs(&session, "session")?;
        let id = needs(&member_id, "member id")?;
        api::delete_member(ctx.http, session, id).await?;
        Ok(Outcome::ok(format!("deleted {id}")))
    })
    .await;

    run.step("member gone", async {
        let session = needs(&session, "session")?;
        let what = format!("no member with phone {phone}");
        poll_until(&ctx.poll, &what, move || async move {
            let n = count_with_phone(ctx, session, phone).await?;
            Ok::<_, E2eError>((n == 0).then_some(()))
        })
        .await?;
        Ok(Outcome::ok(what))
    })
    .await;

    run.finish()
}

/// Two tenants each create a member; neither may see the other's
pub async fn tenant_isolation(ctx: &CheckContext<'_>) -> ScenarioReport {
    let mut run = ScenarioRun::new(Check::TenantIsolation.name(), FailurePolicy::Continue);

    let member_a = MemberFixture::generate(ctx.run_id, ctx.email_domain);
    let mut member_b = MemberFixture::generate(ctx.run_id, ctx.email_domain);
    while member_b.phone == member_a.phone {
        member_b = MemberFixture::generate(ctx.run_id, ctx.email_domain);
    }

    let tenant_a = run.step("register tenant A", register(ctx)).await;
    let tenant_b = run.step("register tenant B", register(ctx)).await;

    for (label, tenant, member) in [("A", &tenant_a, &member_a), ("B", &tenant_b, &member_b)] {
        run.step(format!("tenant {label} creates member"), async {
            let session = needs(tenant, "session")?;
            let id = api::create_member(ctx.http, session, member).await?;
            Ok(Outcome::ok(format!("member {} ({})", id, member.phone)))
        })
        .await;
    }

    for (label, tenant, own, other) in [
        ("A", &tenant_a, &member_a, &member_b),
        ("B", &tenant_b, &member_b, &member_a),
    ] {
        run.step(format!("tenant {label} sees only its own member"), async {
            let session = needs(tenant, "session")?;
            let members = api::list_members(ctx.http, session).await?;
            if !api::members_with_phone(&members, &other.phone).is_empty() {
                return Err(E2eError::AssertionFailed(format!(
                    "tenant {label} can see another tenant's member {}",
                    other.phone
                )));
            }
            if api::members_with_phone(&members, &own.phone).is_empty() {
                return Ok(Outcome::warn((), format!("own member {} not listed yet", own.phone)));
            }
            let foreign = foreign_members(&members, &[own.phone.as_str()]);
            if !foreign.is_empty() {
                return Ok(Outcome::warn((), format!("{} member(s) this tenant did not create", foreign.len())));
            }
            Ok(Outcome::ok(format!("{} member(s) listed", members.len())))
        })
        .await;
    }

    run.finish()
}

fn histogram(statuses: &[u16]) -> String {
    let mut counts: BTreeMap<u16, usize> = BTreeMap::new();
    for status in statuses {
        *counts.entry(*status).or_default() += 1;
    }
    counts
        .iter()
        .map(|(status, n)| format!("{status}x{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `burst` requests pass, the next one is limited with `Retry-After`,
/// and a different user in the same window is not limited
pub async fn rate_limit(ctx: &CheckContext<'_>, burst: usize, path: &str) -> ScenarioReport {
    let mut run = ScenarioRun::new(Check::RateLimit { burst }.name(), FailurePolicy::Abort);
    let path = ctx.http.api_path(path);

    let limited = run.step("register tenant", register(ctx)).await;
    let bystander = run.step("register second tenant", register(ctx)).await;

    run.step(format!("burst of {burst} within limit"), async {
        if burst == 0 {
            return Err(E2eError::Config("rate_limit.burst must be positive".to_string()));
        }
        let session = needs(&limited, "session")?;
        let responses = join_all((0..burst).map(|_| ctx.http.get(&path, Some(&session.token)))).await;
        let statuses = responses
            .into_iter()
            .map(|r| r.map(|resp| resp.status.as_u16()))
            .collect::<E2eResult<Vec<_>>>()?;

        if statuses.contains(&429) {
            return Err(E2eError::AssertionFailed(format!(
                "limited before {burst} request(s): {}",
                histogram(&statuses)
            )));
        }
        Ok(Outcome::ok(histogram(&statuses)))
    })
    .await;

    run.step(format!("request {} is limited", burst + 1), async {
        let session = needs(&limited, "session")?;
        let resp = ctx.http.get(&path, Some(&session.token)).await?;
        let request = format!("GET {path}");
        let resp = resp.expect_status(&request, &[429])?;
        match resp.retry_after() {
            Some(secs) => Ok(Outcome::ok(format!("429, Retry-After {secs}s"))),
            None if resp.has_retry_after() => Ok(Outcome::warn((), "429 with unparseable Retry-After")),
            None => Err(E2eError::AssertionFailed("429 without Retry-After".to_string())),
        }
    })
    .await;

    run.step("other user unaffected", async {
        let session = needs(&bystander, "session")?;
        let resp = ctx.http.get(&path, Some(&session.token)).await?;
        if resp.status.as_u16() == 429 {
            return Err(E2eError::AssertionFailed(
                "limit applied across users; second tenant got 429".to_string(),
            ));
        }
        let status = resp.status.as_u16();
        resp.expect_success(&format!("GET {path}"))?;
        Ok(Outcome::ok(status.to_string()))
    })
    .await;

    run.finish()
}

/// Members in a list response that belong to none of `allowed`
pub fn foreign_members<'a>(members: &'a [Value], allowed: &[&str]) -> Vec<&'a Value> {
    members
        .iter()
        .filter(|m| {
            m.get("phone")
                .and_then(Value::as_str)
                .map_or(false, |phone| !allowed.contains(&phone))
        })
        .collect()
}
