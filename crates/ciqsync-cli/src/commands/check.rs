use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use ciqsync_engine::resolve::check_pipeline;

use super::load_pipeline;

/// Execute the `check` command: validate pipeline config and connectivity.
pub async fn execute(pipeline_path: &Path) -> Result<ExitCode> {
    let config = load_pipeline(pipeline_path)?;
    println!("Pipeline structure: OK");

    let results = check_pipeline(&config).await;
    for result in &results {
        let label = format!("{}:", result.label);
        match &result.outcome {
            Ok(detail) => {
                println!("{label:24} OK");
                println!("  {detail}");
            }
            Err(reason) => {
                println!("{label:24} FAILED");
                println!("  {reason}");
            }
        }
    }

    if results.iter().all(|r| r.passed()) {
        println!("\nAll checks passed.");
        Ok(ExitCode::SUCCESS)
    } else {
        anyhow::bail!("One or more checks failed")
    }
}
