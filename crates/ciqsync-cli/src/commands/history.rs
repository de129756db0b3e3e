use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use ciqsync_engine::resolve::create_state_backend;
use ciqsync_types::state::{PipelineId, RunRecord};

use super::load_pipeline;

/// Execute the `history` command: list recent runs, newest first.
pub fn execute(pipeline_path: &Path, limit: usize) -> Result<ExitCode> {
    let config = load_pipeline(pipeline_path)?;
    let state = create_state_backend(&config)?;
    let pipeline = PipelineId::new(config.pipeline.clone());

    let runs = state
        .recent_runs(&pipeline, limit)
        .context("Failed to read run history")?;
    if runs.is_empty() {
        println!("No runs recorded for '{pipeline}'.");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{:>6}  {:<10}  {:<25}  {:>9}  {:>8}  {:>7}",
        "ID", "STATUS", "SINCE", "EXPECTED", "OBSERVED", "RATE"
    );
    for run in &runs {
        println!("{}", format_row(run));
    }
    Ok(ExitCode::SUCCESS)
}

fn format_row(run: &RunRecord) -> String {
    let rate = run
        .stats
        .success_rate
        .map_or_else(|| "-".to_string(), |r| format!("{:.1}%", r * 100.0));
    let mut row = format!(
        "{:>6}  {:<10}  {:<25}  {:>9}  {:>8}  {:>7}",
        run.id,
        run.status.as_str(),
        run.reference_time.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        run.stats.expected_count,
        run.stats.observed_count,
        rate
    );
    if let Some(message) = &run.stats.error_message {
        row.push_str("  ");
        row.push_str(message);
    }
    row
}
