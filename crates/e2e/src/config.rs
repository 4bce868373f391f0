//! Run configuration
//!
//! Loaded from an optional `chorus.toml`, then overridden by `CHORUS_*`
//! environment variables. The CLI applies its own flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browser::{Browser, BrowserConfig};
use crate::error::{E2eError, E2eResult};
use crate::poll::PollConfig;

pub const DEFAULT_CONFIG_FILE: &str = "chorus.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub target: TargetConfig,
    pub http: HttpConfig,
    pub browser: BrowserSection,
    pub poll: PollSection,
    pub run: RunSection,
    pub rate_limit: RateLimitConfig,
}

/// Deployment under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Origin serving both the API and the web UI
    pub base_url: String,

    /// Prefix for REST endpoints
    pub api_prefix: String,

    /// Socket.IO origin, when it differs from `base_url`
    pub socket_url: Option<String>,

    /// Domain used for generated fixture emails
    pub email_domain: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            api_prefix: "/api".to_string(),
            socket_url: None,
            email_domain: "example.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 15 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    /// Browser steps are counted as not run when disabled
    pub enabled: bool,
    pub browser: Browser,
    pub headless: bool,
    /// Report a missing selector as FAIL instead of WARN
    pub strict_selectors: bool,
    pub modal_attempts: u32,
    pub step_timeout_ms: u64,
    pub screenshot_dir: PathBuf,
    /// Directory holding `node_modules/playwright`
    pub node_project_dir: PathBuf,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            enabled: true,
            browser: Browser::Chromium,
            headless: true,
            strict_selectors: false,
            modal_attempts: 5,
            step_timeout_ms: 10_000,
            screenshot_dir: PathBuf::from("screenshots"),
            node_project_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSection {
    pub timeout_ms: u64,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            initial_interval_ms: 250,
            max_interval_ms: 4_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub scenarios_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Treat WARN as failure when computing the exit code
    pub strict: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            scenarios_dir: PathBuf::from("scenarios"),
            output_dir: PathBuf::from("test-results"),
            strict: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed inside one window
    pub burst: usize,
    /// Authenticated endpoint hammered by the rate-limit check
    pub path: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 100,
            path: "/members".to_string(),
        }
    }
}

impl RunConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Load a file the user named explicitly; a missing file is an error
    pub fn load_required(path: &Path) -> E2eResult<Self> {
        if !path.is_file() {
            return Err(E2eError::Config(format!("config file {} not found", path.display())));
        }
        Self::load(path)
    }

    pub fn from_toml(content: &str) -> E2eResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CHORUS_*` overrides from the process environment
    pub fn apply_env(&mut self) -> E2eResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> E2eResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CHORUS_BASE_URL") {
            self.target.base_url = url;
        }
        if let Some(url) = lookup("CHORUS_SOCKET_URL") {
            self.target.socket_url = Some(url);
        }
        if let Some(secs) = lookup("CHORUS_TIMEOUT_SECS") {
            self.http.timeout_secs = secs
                .parse()
                .map_err(|_| E2eError::Config(format!("CHORUS_TIMEOUT_SECS is not a number: {secs}")))?;
        }
        self.validate()
    }

    pub fn validate(&self) -> E2eResult<()> {
        if !self.target.base_url.starts_with("http://") && !self.target.base_url.starts_with("https://") {
            return Err(E2eError::Config(format!(
                "target.base_url must be an http(s) URL, got '{}'",
                self.target.base_url
            )));
        }
        if self.http.timeout_secs == 0 {
            return Err(E2eError::Config("http.timeout_secs must be positive".to_string()));
        }
        if self.poll.multiplier < 1.0 {
            return Err(E2eError::Config("poll.multiplier must be at least 1.0".to_string()));
        }
        Ok(())
    }

    pub fn socket_origin(&self) -> &str {
        self.target.socket_url.as_deref().unwrap_or(&self.target.base_url)
    }

    pub fn browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            base_url: self.target.base_url.clone(),
            screenshot_dir: self.browser.screenshot_dir.clone(),
            node_project_dir: self.browser.node_project_dir.clone(),
            browser: self.browser.browser,
            headless: self.browser.headless,
            strict_selectors: self.browser.strict_selectors,
            modal_attempts: self.browser.modal_attempts,
            step_timeout_ms: self.browser.step_timeout_ms,
            ..Default::default()
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            timeout: Duration::from_millis(self.poll.timeout_ms),
            initial_interval: Duration::from_millis(self.poll.initial_interval_ms),
            max_interval: Duration::from_millis(self.poll.max_interval_ms),
            multiplier: self.poll.multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = RunConfig::from_toml(
            r#"
[target]
base_url = "https://staging.example.org"

[browser]
strict_selectors = true
"#,
        )
        .unwrap();

        assert_eq!(config.target.base_url, "https://staging.example.org");
        assert_eq!(config.target.api_prefix, "/api");
        assert!(config.browser.strict_selectors);
        assert_eq!(config.browser.modal_attempts, 5);
        assert_eq!(config.http.timeout_secs, 15);
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("CHORUS_BASE_URL", "http://localhost:4000"),
            ("CHORUS_TIMEOUT_SECS", "30"),
        ]
        .into_iter()
        .collect();

        let mut config = RunConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.target.base_url, "http://localhost:4000");
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert_eq!(config.socket_origin(), "http://localhost:4000");
    }

    #[test]
    fn rejects_non_http_base_url() {
        let err = RunConfig::from_toml("[target]\nbase_url = \"localhost:3000\"\n").unwrap_err();
        assert!(matches!(err, E2eError::Config(_)));
    }

    #[test]
    fn rejects_bad_timeout_override() {
        let mut config = RunConfig::default();
        let err = config
            .apply_overrides(|k| (k == "CHORUS_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CHORUS_TIMEOUT_SECS"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::load(&dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config.run.output_dir, PathBuf::from("test-results"));
    }

    #[test]
    fn named_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("staging.toml");
        let err = RunConfig::load_required(&missing).unwrap_err();
        assert!(matches!(err, E2eError::Config(_)));
        assert!(err.to_string().contains("staging.toml"));

        std::fs::write(&missing, "[rate_limit]\nburst = 7\n").unwrap();
        assert_eq!(RunConfig::load_required(&missing).unwrap().rate_limit.burst, 7);
    }
}
