pub mod check;
pub mod cursor;
pub mod history;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use ciqsync_engine::config::{parse_pipeline, validate_pipeline, PipelineConfig};

/// Parse and validate a pipeline file.
pub(crate) fn load_pipeline(pipeline_path: &Path) -> Result<PipelineConfig> {
    let config = parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;
    validate_pipeline(&config)?;
    Ok(config)
}
