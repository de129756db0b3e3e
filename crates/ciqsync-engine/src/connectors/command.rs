//! Bulk mover step that runs an external command.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ciqsync_types::plan::SyncPlan;
use tokio::process::Command;

use crate::config::types::MoverConfig;
use crate::mover::{parse_move_report, BulkMover, MoveReport};

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `command[0]` with the remaining arguments, no shell involved.
///
/// `{since}` (RFC 3339) and `{affected_entity_count}` are expanded inside
/// each argument. A `@@MOVE_REPORT@@` line on stdout reports counts.
#[derive(Debug, Clone)]
pub struct CommandMover {
    name: String,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl CommandMover {
    /// # Errors
    ///
    /// Returns an error if the configured command is empty.
    pub fn from_config(config: &MoverConfig) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .with_context(|| format!("Mover '{}' has an empty command", config.name))?;
        Ok(Self {
            name: config.name.clone(),
            program: program.clone(),
            args: args.to_vec(),
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
            timeout: config.timeout_seconds.map(Duration::from_secs),
        })
    }

    /// Arguments with placeholders expanded for `plan`.
    #[must_use]
    pub fn expand_args(&self, plan: &SyncPlan) -> Vec<String> {
        let since = plan.since.to_rfc3339();
        let affected = plan.affected_entity_count.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{since}", &since)
                    .replace("{affected_entity_count}", &affected)
            })
            .collect()
    }
}

#[async_trait]
impl BulkMover for CommandMover {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, plan: &SyncPlan) -> Result<Option<MoveReport>> {
        let args = self.expand_args(plan);
        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(step = %self.name, program = %self.program, ?args, "Running mover step");
        let output = cmd.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, output)
                .await
                .with_context(|| format!("timed out after {}s", limit.as_secs()))?,
            None => output.await,
        }
        .with_context(|| format!("Failed to spawn '{}'", self.program))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            anyhow::bail!("'{}' exited with {}: {}", self.program, output.status, tail);
        }
        Ok(parse_move_report(&stdout))
    }
}
