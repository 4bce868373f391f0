//! Output formatting for CLI

use chorus_e2e::report::{RunReport, ScenarioReport, StepStatus};
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

impl OutputFormat {
    /// Formats meant for other programs; stdout then carries nothing else
    pub fn is_machine_readable(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Yaml)
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    print!("{}", render_list(items, format));
}

fn render_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) -> String {
    if items.is_empty() && !format.is_machine_readable() {
        return "No items found.\n".to_string();
    }

    match format {
        OutputFormat::Table => {
            let mut table = table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            format!("{table}\n")
        }
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(items).unwrap_or_default()),
        OutputFormat::Yaml => serde_yaml::to_string(items).unwrap_or_default(),
        OutputFormat::Plain => items
            .iter()
            .map(|item| {
                T::headers()
                    .iter()
                    .zip(item.row())
                    .map(|(header, value)| format!("{header}: {value}\n"))
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("---\n"),
    }
}

fn status_cell(status: StepStatus) -> Cell {
    let color = match status {
        StepStatus::Pass => Color::Green,
        StepStatus::Warn => Color::Yellow,
        StepStatus::Fail => Color::Red,
    };
    Cell::new(status.as_str()).fg(color)
}

fn scenario_status(scenario: &ScenarioReport) -> (&'static str, Color) {
    if scenario.aborted {
        ("ABORTED", Color::Red)
    } else if !scenario.success() {
        ("FAIL", Color::Red)
    } else if scenario.totals().warned > 0 {
        ("WARN", Color::Yellow)
    } else {
        ("PASS", Color::Green)
    }
}

/// Print a run report; `verbose` adds one row per step
pub fn print_report(report: &RunReport, format: OutputFormat, verbose: bool) {
    print!("{}", render_report(report, format, verbose));
}

fn render_report(report: &RunReport, format: OutputFormat, verbose: bool) -> String {
    match format {
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(report).unwrap_or_default()),
        OutputFormat::Yaml => serde_yaml::to_string(report).unwrap_or_default(),
        OutputFormat::Table => {
            let mut table = table();
            table.set_header(vec!["Scenario", "Status", "Passed", "Failed", "Warned", "Not run", "Duration"]);
            for scenario in &report.scenarios {
                let t = scenario.totals();
                let (label, color) = scenario_status(scenario);
                table.add_row(vec![
                    Cell::new(&scenario.name),
                    Cell::new(label).fg(color),
                    Cell::new(t.passed),
                    Cell::new(t.failed),
                    Cell::new(t.warned),
                    Cell::new(scenario.not_run),
                    Cell::new(format!("{} ms", scenario.duration_ms)),
                ]);
            }

            let mut out = format!("{table}\n");
            if verbose {
                for scenario in &report.scenarios {
                    out.push_str(&render_steps(scenario));
                }
            }
            out.push_str(&render_summary(report));
            out
        }
        OutputFormat::Plain => {
            let mut out = String::new();
            for scenario in &report.scenarios {
                out.push_str(&format!("{} ({})\n", scenario.name, scenario_status(scenario).0));
                for step in &scenario.steps {
                    out.push_str(&format!("  {} {} {}\n", step.status, step.name, step.detail));
                }
                if scenario.not_run > 0 {
                    out.push_str(&format!("  {} step(s) not run\n", scenario.not_run));
                }
            }
            out.push_str(&render_summary(report));
            out
        }
    }
}

fn render_steps(scenario: &ScenarioReport) -> String {
    let mut table = table();
    table.set_header(vec!["Step", "Status", "Detail", "Duration"]);
    for step in &scenario.steps {
        table.add_row(vec![
            Cell::new(&step.name),
            status_cell(step.status),
            Cell::new(&step.detail),
            Cell::new(format!("{} ms", step.duration_ms)),
        ]);
    }
    format!("\n{}\n{table}\n", scenario.name.bold())
}

fn render_summary(report: &RunReport) -> String {
    let t = report.totals;
    format!(
        "\n{} {}, {} {}, {} {} of {} step(s) (run {})\n",
        t.passed.to_string().green(),
        "passed",
        t.failed.to_string().red(),
        "failed",
        t.warned.to_string().yellow(),
        "warned",
        t.total,
        report.run_id
    )
}

// Status messages go to stderr so stdout holds only the rendered output

/// Print success message
pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message);
}

/// Print info message
pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue(), message);
}
