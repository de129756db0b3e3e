//! Semantic validation for parsed pipeline configuration values.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::config::types::{DestinationConfig, PipelineConfig, PostgresConnection};

fn validate_connection(conn: &PostgresConnection, context: &str, errors: &mut Vec<String>) {
    if conn.host.trim().is_empty() {
        errors.push(format!("{context}: host must not be empty"));
    }
    if conn.database.trim().is_empty() {
        errors.push(format!("{context}: database must not be empty"));
    }
    if conn.connect_timeout_seconds == 0 {
        errors.push(format!("{context}: connect_timeout_seconds must be > 0"));
    }
}

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    validate_connection(&config.source.connection, "source", &mut errors);
    if let Some(query) = &config.source.query {
        if query.trim().is_empty() {
            errors.push("source: query override must not be empty".to_string());
        }
    }

    if config.destination.count_query().trim().is_empty() {
        errors.push("destination: count_query must not be empty".to_string());
    }
    match &config.destination {
        DestinationConfig::Clickhouse(ch) => {
            if !(ch.url.starts_with("http://") || ch.url.starts_with("https://")) {
                errors.push(format!(
                    "destination: url '{}' must start with http:// or https://",
                    ch.url
                ));
            }
            if ch.timeout_seconds == 0 {
                errors.push("destination: timeout_seconds must be > 0".to_string());
            }
        }
        DestinationConfig::Postgres(pg) => {
            validate_connection(&pg.connection, "destination", &mut errors);
        }
    }

    let mut seen = HashSet::new();
    for (i, mover) in config.movers.iter().enumerate() {
        if mover.name.trim().is_empty() {
            errors.push(format!("movers[{i}] has an empty name"));
        } else if !seen.insert(mover.name.as_str()) {
            errors.push(format!("Duplicate mover name '{}'", mover.name));
        }
        if mover.command.first().map_or(true, |program| program.trim().is_empty()) {
            errors.push(format!("movers[{i}]: command must name a program"));
        }
        if mover.timeout_seconds == Some(0) {
            errors.push(format!("movers[{i}]: timeout_seconds must be > 0"));
        }
    }

    let threshold = config.quality.threshold;
    if !(0.0..=1.0).contains(&threshold) {
        errors.push(format!(
            "quality.threshold must be within [0, 1], got {threshold}"
        ));
    }

    if config.alerts.title.trim().is_empty() {
        errors.push("alerts.title must not be empty".to_string());
    }
    if let Some(slack) = &config.alerts.slack {
        if slack.timeout_seconds == 0 {
            errors.push("alerts.slack.timeout_seconds must be > 0".to_string());
        }
    }

    if config.schedule.lookback_seconds == 0 {
        errors.push("schedule.lookback_seconds must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}
