//! In-process fake of the platform's auth and member endpoints

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chorus_e2e::checks::CheckContext;
use chorus_e2e::http::HttpClient;
use chorus_e2e::poll::PollConfig;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub fn bearer(request: &Request) -> Option<String> {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Hands out `tok-1`, `tok-2`, ... one per registration
pub struct Register {
    issued: AtomicUsize,
}

impl Respond for Register {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(201).set_body_json(json!({
            "success": true,
            "data": { "token": format!("tok-{n}"), "church": { "id": n } }
        }))
    }
}

/// Account accepted by the fake login endpoint
pub const LOGIN_EMAIL: &str = "pastor@example.test";
pub const LOGIN_PASSWORD: &str = "hymnal-42";

/// Issues `tok-login` for the one known account, 401 otherwise
pub struct Login;

impl Respond for Login {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        if body["email"] == LOGIN_EMAIL && body["password"] == LOGIN_PASSWORD {
            ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "accessToken": "tok-login", "church": { "id": 42 } }
            }))
        } else {
            ResponseTemplate::new(401).set_body_json(json!({"success": false, "error": "invalid credentials"}))
        }
    }
}

/// Member CRUD keyed by bearer token. With `shared`, every tenant sees one list.
pub struct Members {
    shared: bool,
    next_id: AtomicUsize,
    store: Arc<Mutex<HashMap<String, Vec<Value>>>>,
}

impl Respond for Members {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some(token) = bearer(request) else {
            return ResponseTemplate::new(401).set_body_json(json!({"success": false, "error": "unauthorized"}));
        };
        let key = if self.shared { "all".to_string() } else { token };

        let mut store = self.store.lock().unwrap();
        let members = store.entry(key).or_default();
        let rest = request.url.path().trim_start_matches("/api/members").trim_start_matches('/');

        match (request.method.as_str(), rest) {
            ("GET", "") => ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": members})),
            ("POST", "") => {
                let mut body: Value = serde_json::from_slice(&request.body).unwrap_or_else(|_| json!({}));
                let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                body["id"] = json!(id);
                members.push(body.clone());
                ResponseTemplate::new(201).set_body_json(json!({"success": true, "data": body}))
            }
            ("DELETE", id) => {
                let before = members.len();
                members.retain(|m| m["id"] != json!(id));
                if members.len() < before {
                    ResponseTemplate::new(204)
                } else {
                    ResponseTemplate::new(404).set_body_json(json!({"success": false, "error": "not found"}))
                }
            }
            _ => ResponseTemplate::new(405),
        }
    }
}

pub struct FakePlatform {
    pub server: MockServer,
}

impl FakePlatform {
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    /// A platform whose member list ignores the tenant
    pub async fn leaky() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(shared: bool) -> Self {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/auth/register"))
            .respond_with(Register {
                issued: AtomicUsize::new(0),
            })
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(Login)
            .mount(&server)
            .await;

        Mock::given(path_regex(r"^/api/members(/[^/]+)?$"))
            .respond_with(Members {
                shared,
                next_id: AtomicUsize::new(0),
                store: Arc::default(),
            })
            .mount(&server)
            .await;

        Self { server }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn client(&self) -> HttpClient {
        HttpClient::new(&self.server.uri(), "/api", Duration::from_secs(5)).unwrap()
    }
}

pub fn fast_poll() -> PollConfig {
    PollConfig {
        timeout: Duration::from_millis(300),
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(50),
        multiplier: 2.0,
    }
}

pub fn context<'a>(http: &'a HttpClient, run_id: &'a str) -> CheckContext<'a> {
    CheckContext {
        http,
        run_id,
        email_domain: "example.test",
        poll: fast_poll(),
    }
}
