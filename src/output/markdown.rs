//! Markdown report generation
//!
//! This module renders a pipeline report as a human-readable markdown file,
//! including per-stage outcomes, session terminations, and the error ledger
//! entries added during the run.

use crate::output::summary::{OutputResult, PipelineReport};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sessions listed per stage before the table is cut short
const MAX_LISTED_SESSIONS: usize = 50;

/// Path of the report for `username` under `dir`
pub fn report_path(dir: &Path, username: &str) -> PathBuf {
    dir.join(format!("report_{}.md", username))
}

/// Writes a pipeline report as markdown
///
/// # Arguments
///
/// * `report` - The finished pipeline report
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the report
/// * `Err(OutputError)` - Failed to write the report
pub fn write_markdown_report(report: &PipelineReport, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_report(report);

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a pipeline report as markdown
pub fn format_markdown_report(report: &PipelineReport) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Harvest Report: {}\n\n", report.username));

    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Started**: {}\n", report.started_at.to_rfc3339()));
    if let Some(finished) = &report.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished.to_rfc3339()));
    }
    if let Some(duration) = report.duration_seconds() {
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            duration,
            duration as f64 / 60.0
        ));
    }
    let outcome = match report.failed_stage() {
        Some(stage) => format!("failed at {}", stage.stage),
        None => "succeeded".to_string(),
    };
    md.push_str(&format!("- **Outcome**: {}\n", outcome));
    md.push_str(&format!("- **Total Records**: {}\n", report.total_records()));
    md.push_str(&format!("- **New Errors**: {}\n\n", report.total_errors()));

    md.push_str("## Stages\n\n");
    md.push_str("| Stage | Status | Sessions | Failed | Records | Errors | Note |\n");
    md.push_str("|-------|--------|----------|--------|---------|--------|------|\n");
    for stage in &report.stages {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            stage.stage,
            stage.status,
            stage.sessions.len(),
            stage.failed_sessions,
            stage.total_records(),
            stage.total_errors(),
            stage.message.as_deref().unwrap_or("")
        ));
    }
    md.push('\n');

    for stage in report.stages.iter().filter(|s| !s.sessions.is_empty()) {
        md.push_str(&format!("## Sessions: {}\n\n", stage.stage));
        md.push_str("| Target | Pages | Fetched | New | Updated | Records | Rate Limits | Ended |\n");
        md.push_str("|--------|-------|---------|-----|---------|---------|-------------|-------|\n");

        for session in stage.sessions.iter().take(MAX_LISTED_SESSIONS) {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
                session.target,
                session.pages,
                session.total_fetched,
                session.inserted,
                session.updated,
                session.total_records,
                session.rate_limit_events,
                session.termination
            ));
        }
        if stage.sessions.len() > MAX_LISTED_SESSIONS {
            md.push_str(&format!(
                "\n... and {} more\n",
                stage.sessions.len() - MAX_LISTED_SESSIONS
            ));
        }
        md.push('\n');
    }

    let errors = report.itemised_errors();
    if !errors.is_empty() {
        md.push_str("## Errors\n\n");
        md.push_str("| Stage | Target | Reference | Description |\n");
        md.push_str("|-------|--------|-----------|-------------|\n");
        for error in &errors {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                error.stage,
                error.target,
                error.source_reference,
                error.description.replace('|', "\\|")
            ));
        }
        md.push('\n');
    }

    md
}
