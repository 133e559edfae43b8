//! Output module for run summaries and reports
//!
//! This module handles:
//! - Session, stage and pipeline summary types
//! - Printing pipeline reports to the terminal
//! - Writing markdown reports next to the checkpoints
//! - Statistics over the checkpoint directory

mod markdown;
pub mod stats;
mod summary;

pub use markdown::{format_markdown_report, report_path, write_markdown_report};
pub use stats::{load_statistics, print_statistics, CheckpointInfo, CheckpointStatistics};
pub use summary::{
    OutputError, OutputResult, PipelineReport, ReportedError, SessionSummary, StageReport,
    StageStatus, Termination,
};

/// Prints a pipeline report to stdout
///
/// # Arguments
///
/// * `report` - The finished pipeline report
pub fn print_pipeline_report(report: &PipelineReport) {
    println!("=== Harvest Report: {} ===\n", report.username);

    if let Some(duration) = report.duration_seconds() {
        println!("Duration: {} seconds", duration);
    }
    println!("Total records: {}", report.total_records());
    println!("New errors: {}", report.total_errors());
    println!();

    println!("Stages:");
    for stage in &report.stages {
        match &stage.message {
            Some(message) => println!(
                "  {}: {} ({} records) - {}",
                stage.stage,
                stage.status,
                stage.total_records(),
                message
            ),
            None => println!(
                "  {}: {} ({} records)",
                stage.stage,
                stage.status,
                stage.total_records()
            ),
        }
    }
    println!();

    let errors = report.itemised_errors();
    if !errors.is_empty() {
        println!("Errors ({}):", errors.len());
        for error in &errors {
            println!(
                "  [{}] {}: {}",
                error.stage, error.source_reference, error.description
            );
        }
        println!();
    }

    match report.failed_stage() {
        Some(stage) => println!("Pipeline failed at stage: {}", stage.stage),
        None => println!("Pipeline completed"),
    }
}
