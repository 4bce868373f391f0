//! HTTP client adapter for the product's REST API

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Thin wrapper over `reqwest` with a fixed timeout and JSON-or-text bodies.
///
/// There is deliberately no retry: a failed request is a failed step.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    api_prefix: String,
}

/// Parsed response body
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Text(String),
    Empty,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    pub elapsed_ms: u64,
}

impl HttpClient {
    pub fn new(base_url: &str, api_prefix: &str, timeout: Duration) -> E2eResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_prefix: api_prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Path of an API endpoint, e.g. `/members` -> `/api/members`
    pub fn api_path(&self, path: &str) -> String {
        format!("{}{}", self.api_prefix, path)
    }

    /// Absolute URL for `path`. Absolute inputs pass through untouched.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> E2eResult<ApiResponse> {
        let url = self.url(path);
        let start = Instant::now();

        let mut builder = self.client.request(method.clone(), &url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.bytes().await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        debug!("{} {} -> {} ({} ms)", method, url, status, elapsed_ms);

        Ok(ApiResponse {
            status,
            headers,
            body: Body::parse(&bytes),
            elapsed_ms,
        })
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> E2eResult<ApiResponse> {
        self.request(Method::GET, path, token, None).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>, body: &Value) -> E2eResult<ApiResponse> {
        self.request(Method::POST, path, token, Some(body)).await
    }

    pub async fn put(&self, path: &str, token: Option<&str>, body: &Value) -> E2eResult<ApiResponse> {
        self.request(Method::PUT, path, token, Some(body)).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> E2eResult<ApiResponse> {
        self.request(Method::DELETE, path, token, None).await
    }
}

impl Body {
    pub fn parse(bytes: &[u8]) -> Self {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Body::Empty;
        }
        match serde_json::from_slice(bytes) {
            Ok(value) => Body::Json(value),
            Err(_) => Body::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

impl ApiResponse {
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            Body::Json(v) => Some(v),
            _ => None,
        }
    }

    /// RFC 6901 pointer into the JSON body
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.json().and_then(|v| v.pointer(pointer))
    }

    /// Payload of a `{success, data}` envelope, or the whole body when unwrapped
    pub fn data(&self) -> Option<&Value> {
        let json = self.json()?;
        Some(json.get("data").unwrap_or(json))
    }

    /// `success: false` in the envelope overrides a 2xx status
    pub fn is_success(&self) -> bool {
        let flagged_failure = self
            .pointer("/success")
            .and_then(Value::as_bool)
            .map_or(false, |ok| !ok);
        self.status.is_success() && !flagged_failure
    }

    /// Seconds from a numeric `Retry-After` header
    pub fn retry_after(&self) -> Option<u64> {
        self.headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn has_retry_after(&self) -> bool {
        self.headers.contains_key(RETRY_AFTER)
    }

    /// Short human-readable body excerpt for step details
    pub fn snippet(&self) -> String {
        let text = match &self.body {
            Body::Json(v) => v.to_string(),
            Body::Text(t) => t.clone(),
            Body::Empty => return "<empty>".to_string(),
        };
        if text.chars().count() > 200 {
            let cut: String = text.chars().take(200).collect();
            format!("{cut}…")
        } else {
            text
        }
    }

    pub fn expect_status(self, request: &str, expected: &[u16]) -> E2eResult<Self> {
        if expected.contains(&self.status.as_u16()) {
            Ok(self)
        } else {
            Err(E2eError::UnexpectedStatus {
                request: format!("{request} ({})", self.snippet()),
                expected: expected
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join("|"),
                actual: self.status.as_u16(),
            })
        }
    }

    pub fn expect_success(self, request: &str) -> E2eResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(E2eError::UnexpectedStatus {
                request: format!("{request} ({})", self.snippet()),
                expected: "2xx".to_string(),
                actual: self.status.as_u16(),
            })
        }
    }
}

/// Parse an HTTP method name as written in scenario files
pub fn parse_method(name: &str) -> E2eResult<Method> {
    Method::from_bytes(name.to_ascii_uppercase().as_bytes())
        .map_err(|_| E2eError::ScenarioParse(format!("invalid HTTP method: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use test_case::test_case;

    fn response(status: u16, body: Body) -> ApiResponse {
        ApiResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body,
            elapsed_ms: 0,
        }
    }

    #[test_case(b"{\"a\":1}", Body::Json(json!({"a": 1})) ; "json object")]
    #[test_case(b"Too Many Requests", Body::Text("Too Many Requests".into()) ; "plain text")]
    #[test_case(b"", Body::Empty ; "empty")]
    #[test_case(b"  \n", Body::Empty ; "whitespace")]
    fn body_falls_back_to_text(raw: &[u8], expected: Body) {
        assert_eq!(Body::parse(raw), expected);
    }

    #[test]
    fn url_joins_relative_paths() {
        let client = HttpClient::new("https://app.example.org/", "/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/api/members"), "https://app.example.org/api/members");
        assert_eq!(client.url("health"), "https://app.example.org/health");
        assert_eq!(client.url("http://other/x"), "http://other/x");
        assert_eq!(client.api_path("/members"), "/api/members");
    }

    #[test]
    fn envelope_data_is_unwrapped() {
        let r = response(200, Body::Json(json!({"success": true, "data": {"id": "m1"}})));
        assert_eq!(r.data(), Some(&json!({"id": "m1"})));

        let bare = response(200, Body::Json(json!([{"id": "m1"}])));
        assert_eq!(bare.data(), Some(&json!([{"id": "m1"}])));
    }

    #[test]
    fn success_flag_overrides_status() {
        let r = response(200, Body::Json(json!({"success": false, "error": "nope"})));
        assert!(!r.is_success());
        assert!(r.expect_success("GET /api/members").is_err());
    }

    #[test]
    fn retry_after_seconds() {
        let mut r = response(429, Body::Text("slow down".into()));
        assert_eq!(r.retry_after(), None);
        r.headers.insert(RETRY_AFTER, HeaderValue::from_static("42"));
        assert_eq!(r.retry_after(), Some(42));
        assert!(r.has_retry_after());
    }

    #[test]
    fn unexpected_status_names_the_request() {
        let err = response(404, Body::Empty)
            .expect_status("DELETE /api/members/1", &[200, 204])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("DELETE /api/members/1"));
        assert!(msg.contains("200|204"));
        assert!(msg.contains("404"));
    }

    #[test]
    fn method_names_are_case_insensitive() {
        assert_eq!(parse_method("delete").unwrap(), Method::DELETE);
        assert!(parse_method("GE T").is_err());
    }
}
