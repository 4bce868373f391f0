//! List Command

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use chorus_e2e::{RunConfig, Scenario};

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only scenarios with this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Scenario directory (overrides run.scenarios_dir)
    #[arg(long)]
    pub scenarios: Option<PathBuf>,
}

/// Scenario display wrapper for serialization
#[derive(Serialize)]
pub struct ScenarioDisplay {
    pub name: String,
    pub tags: Vec<String>,
    pub policy: String,
    pub steps: usize,
    pub browser_steps: usize,
    pub description: String,
}

impl From<&Scenario> for ScenarioDisplay {
    fn from(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.clone(),
            tags: scenario.tags.clone(),
            policy: format!("{:?}", scenario.policy).to_lowercase(),
            steps: scenario.steps.len(),
            browser_steps: scenario.steps.iter().filter(|s| s.action.is_browser()).count(),
            description: scenario.description.clone(),
        }
    }
}

impl TableDisplay for ScenarioDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Tags", "Policy", "Steps", "Browser", "Description"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.tags.join(", "),
            self.policy.clone(),
            self.steps.to_string(),
            self.browser_steps.to_string(),
            self.description.clone(),
        ]
    }
}

pub fn execute(args: ListArgs, config: RunConfig, format: OutputFormat) -> Result<i32> {
    let dir = args.scenarios.unwrap_or(config.run.scenarios_dir);
    let scenarios = Scenario::load_all(&dir)?;

    let selected: Vec<&Scenario> = match &args.tag {
        Some(tag) => Scenario::filter_by_tag(&scenarios, tag),
        None => scenarios.iter().collect(),
    };
    let rows: Vec<ScenarioDisplay> = selected.into_iter().map(ScenarioDisplay::from).collect();

    print_list(&rows, format);
    Ok(0)
}
