//! Chorus E2E runner
//!
//! This crate drives end-to-end scenarios against a deployment of the
//! church-messaging platform:
//! - Runs declarative YAML scenarios and built-in checks
//! - Talks to the REST API through one HTTP adapter
//! - Controls Playwright through generated Node scripts, one per segment
//! - Listens for Socket.IO events
//! - Writes one JSON report per run
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Chorus Runner (Rust)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── run_all / run_tagged / run_named -> RunReport        │
//! │    ├── run_checks([Check]) -> RunReport                     │
//! │    └── write_report(RunReport) -> path                      │
//! │  Executor (one per scenario)                                │
//! │    ├── Vars          ${name} interpolation                  │
//! │    ├── HttpClient    http / poll / burst steps              │
//! │    ├── BrowserSession  consecutive browser steps            │
//! │    └── SocketListener  socket_connect / socket_expect       │
//! │  ScenarioRun                                                │
//! │    └── step(name, future) -> Option<T>, Abort | Continue    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)                                            │
//! │    ├── name, description, tags, policy, vars                │
//! │    └── steps: [Step]                                        │
//! │          ├── register_tenant / login / member_fixture       │
//! │          ├── http / poll / burst / compare                  │
//! │          ├── navigate / fill / click_text / dismiss_modals  │
//! │          └── assert_text / count_rows / screenshot / ...    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod browser;
pub mod checks;
pub mod config;
pub mod error;
pub mod executor;
pub mod fixtures;
pub mod http;
pub mod poll;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod socket;
pub mod vars;

pub use checks::Check;
pub use config::RunConfig;
pub use error::{E2eError, E2eResult};
pub use report::{RunReport, ScenarioReport, StepResult, StepStatus};
pub use runner::{FailurePolicy, Outcome, ScenarioRun, TestRunner};
pub use scenario::{Scenario, Step, StepAction};
