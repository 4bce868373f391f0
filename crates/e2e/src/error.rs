//! Error types for E2E runs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("Unexpected status for {request}: expected {expected}, got {actual}")]
    UnexpectedStatus {
        request: String,
        expected: String,
        actual: u16,
    },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Playwright not found. Install with: npm i -D playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Gave up waiting for {what} after {attempts} attempts ({elapsed_ms} ms)")]
    PollTimeout {
        what: String,
        attempts: u32,
        elapsed_ms: u64,
    },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Unknown variable: ${{{0}}}")]
    UnknownVariable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
