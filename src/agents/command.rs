use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::{OptimizationResult, OptimizerAgent, StrategyKind, ValidationResult};
use crate::coordinator::Task;
use crate::workspace::WorkspaceRef;

/// Agent that shells out to external programs.
///
/// The optimizer command runs inside the workspace with the task exposed as
/// `PATCHWORK_TASK_ID`, `PATCHWORK_TASK_DESCRIPTION` and
/// `PATCHWORK_TARGET_FILES` (newline separated). A non-zero exit is an
/// execution failure. The optional validator command decides pass/fail by
/// exit status; each stderr line becomes an error, each stdout line a
/// warning.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    name: String,
    strategy: StrategyKind,
    program: String,
    args: Vec<String>,
    validator: Option<(String, Vec<String>)>,
}

impl CommandAgent {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: StrategyKind::Custom("command".to_string()),
            program: program.into(),
            args: Vec::new(),
            validator: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_validator<I, S>(mut self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validator = Some((program.into(), args.into_iter().map(Into::into).collect()));
        self
    }

    fn command(&self, program: &str, args: &[String], task: &Task, workspace: &WorkspaceRef) -> Command {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&workspace.path)
            .env("PATCHWORK_TASK_ID", &task.id)
            .env("PATCHWORK_TASK_DESCRIPTION", &task.description)
            .env(
                "PATCHWORK_TARGET_FILES",
                task.target_file_set.iter().cloned().collect::<Vec<_>>().join("\n"),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

fn non_empty_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl OptimizerAgent for CommandAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn strategy(&self) -> StrategyKind {
        self.strategy.clone()
    }

    async fn optimize(&self, task: &Task, workspace: &WorkspaceRef) -> Result<OptimizationResult> {
        info!(agent = %self.name, task_id = %task.id, program = %self.program, "Running optimizer command");
        let output = self
            .command(&self.program, &self.args, task, workspace)
            .output()
            .await
            .with_context(|| format!("failed to start '{}'", self.program))?;

        if !output.status.success() {
            let stderr = non_empty_lines(&output.stderr).join("; ");
            bail!("'{}' exited with {}: {}", self.program, output.status, stderr);
        }

        let stdout = non_empty_lines(&output.stdout);
        debug!(agent = %self.name, lines = stdout.len(), "Optimizer command finished");
        Ok(OptimizationResult {
            summary: stdout.join("\n"),
            ..OptimizationResult::default()
        })
    }

    async fn validate(
        &self,
        task: &Task,
        workspace: &WorkspaceRef,
        _result: &OptimizationResult,
    ) -> Result<ValidationResult> {
        let Some((program, args)) = &self.validator else {
            return Ok(ValidationResult::pass());
        };

        let output = self
            .command(program, args, task, workspace)
            .output()
            .await
            .with_context(|| format!("failed to start validator '{program}'"))?;

        let mut errors = non_empty_lines(&output.stderr);
        if !output.status.success() && errors.is_empty() {
            errors.push(format!("'{program}' exited with {}", output.status));
        }
        Ok(ValidationResult {
            passed: output.status.success(),
            errors: if output.status.success() { Vec::new() } else { errors },
            warnings: non_empty_lines(&output.stdout),
        })
    }
}
