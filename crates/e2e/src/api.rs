//! Typed calls against the platform's REST API, shared by checks and scenarios

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::fixtures::{MemberFixture, TenantFixture};
use crate::http::{ApiResponse, HttpClient};

/// Places a bearer token shows up across register/login responses
const TOKEN_POINTERS: &[&str] = &[
    "/data/token",
    "/data/accessToken",
    "/data/tokens/accessToken",
    "/token",
    "/accessToken",
];

const ID_KEYS: &[&str] = &["id", "_id", "memberId"];

/// An authenticated tenant admin
#[derive(Debug, Clone)]
pub struct Session {
    pub email: String,
    pub token: String,
    pub tenant_id: Option<String>,
}

pub fn extract_token(resp: &ApiResponse) -> Option<String> {
    TOKEN_POINTERS
        .iter()
        .find_map(|p| resp.pointer(p).and_then(Value::as_str))
        .map(str::to_string)
}

fn extract_tenant_id(resp: &ApiResponse) -> Option<String> {
    ["/data/church/id", "/data/tenantId", "/data/user/churchId", "/tenantId"]
        .iter()
        .find_map(|p| resp.pointer(p))
        .and_then(value_to_id)
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identifier of a created record
pub fn record_id(value: &Value) -> Option<String> {
    ID_KEYS.iter().find_map(|k| value.get(*k)).and_then(value_to_id)
}

/// Register a new church account and return its session
pub async fn register_tenant(http: &HttpClient, tenant: &TenantFixture) -> E2eResult<Session> {
    let path = http.api_path("/auth/register");
    let resp = http
        .post(&path, None, &tenant.register_body())
        .await?
        .expect_status(&format!("POST {path}"), &[200, 201])?;

    let token = extract_token(&resp)
        .ok_or_else(|| E2eError::AssertionFailed(format!("no token in register response: {}", resp.snippet())))?;

    debug!("Registered tenant {}", tenant.email);
    Ok(Session {
        email: tenant.email.clone(),
        token,
        tenant_id: extract_tenant_id(&resp),
    })
}

pub async fn login(http: &HttpClient, email: &str, password: &str) -> E2eResult<Session> {
    let path = http.api_path("/auth/login");
    let resp = http
        .post(&path, None, &json!({ "email": email, "password": password }))
        .await?
        .expect_status(&format!("POST {path}"), &[200])?;

    let token = extract_token(&resp)
        .ok_or_else(|| E2eError::AssertionFailed(format!("no token in login response: {}", resp.snippet())))?;

    Ok(Session {
        email: email.to_string(),
        token,
        tenant_id: extract_tenant_id(&resp),
    })
}

/// Create a member and return its id
pub async fn create_member(http: &HttpClient, session: &Session, member: &MemberFixture) -> E2eResult<String> {
    let path = http.api_path("/members");
    let resp = http
        .post(&path, Some(&session.token), &member.body())
        .await?
        .expect_status(&format!("POST {path}"), &[200, 201])?;

    resp.data()
        .and_then(|d| record_id(d).or_else(|| d.get("member").and_then(record_id)))
        .ok_or_else(|| E2eError::AssertionFailed(format!("no id in create member response: {}", resp.snippet())))
}

/// All members visible to the session's tenant
pub async fn list_members(http: &HttpClient, session: &Session) -> E2eResult<Vec<Value>> {
    let path = http.api_path("/members");
    let resp = http
        .get(&path, Some(&session.token))
        .await?
        .expect_success(&format!("GET {path}"))?;

    members_from(&resp)
}

pub(crate) fn members_from(resp: &ApiResponse) -> E2eResult<Vec<Value>> {
    let data = resp
        .data()
        .ok_or_else(|| E2eError::AssertionFailed(format!("member list is not JSON: {}", resp.snippet())))?;

    let list = data
        .as_array()
        .or_else(|| data.get("members").and_then(Value::as_array))
        .ok_or_else(|| E2eError::AssertionFailed(format!("no member array in response: {}", resp.snippet())))?;

    Ok(list.clone())
}

pub async fn delete_member(http: &HttpClient, session: &Session, id: &str) -> E2eResult<()> {
    let path = http.api_path(&format!("/members/{id}"));
    http.delete(&path, Some(&session.token))
        .await?
        .expect_status(&format!("DELETE {path}"), &[200, 202, 204])?;
    Ok(())
}

pub fn members_with_phone<'a>(members: &'a [Value], phone: &str) -> Vec<&'a Value> {
    members
        .iter()
        .filter(|m| m.get("phone").and_then(Value::as_str) == Some(phone))
        .collect()
}
