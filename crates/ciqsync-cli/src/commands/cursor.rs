use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ciqsync_engine::resolve::create_state_backend;
use ciqsync_types::state::PipelineId;

use super::load_pipeline;

/// Print the stored reference cursor, or the lookback fallback if none.
pub fn show(pipeline_path: &Path) -> Result<ExitCode> {
    let config = load_pipeline(pipeline_path)?;
    let state = create_state_backend(&config)?;
    let pipeline = PipelineId::new(config.pipeline.clone());

    match state
        .get_cursor(&pipeline)
        .context("Failed to read reference cursor")?
    {
        Some(cursor) => {
            println!("Pipeline '{pipeline}'");
            println!("  Reference time:  {}", cursor.reference_time.to_rfc3339());
            println!("  Updated at:      {}", cursor.updated_at.to_rfc3339());
        }
        None => {
            println!(
                "Pipeline '{pipeline}' has no cursor; runs look back {}s",
                config.schedule.lookback_seconds
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Advance (or rewind) the reference cursor.
pub fn set(pipeline_path: &Path, reference_time: DateTime<Utc>) -> Result<ExitCode> {
    let config = load_pipeline(pipeline_path)?;
    if reference_time > Utc::now() {
        anyhow::bail!(
            "Refusing to set cursor in the future: {}",
            reference_time.to_rfc3339()
        );
    }
    let state = create_state_backend(&config)?;
    let pipeline = PipelineId::new(config.pipeline.clone());
    state
        .set_cursor(&pipeline, reference_time)
        .context("Failed to store reference cursor")?;

    tracing::info!(pipeline = %pipeline, reference_time = %reference_time, "Cursor updated");
    println!("Cursor for '{pipeline}' set to {}", reference_time.to_rfc3339());
    Ok(ExitCode::SUCCESS)
}
