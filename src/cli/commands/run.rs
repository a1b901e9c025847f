use anyhow::Result;
use std::sync::Arc;

use super::Command;
use crate::agents::{CommandAgent, StrategyKind};
use crate::config::PatchworkConfig;
use crate::coordinator::{Coordinator, Task, TaskOutcome, TaskReport};

/// Runs a single task through the coordinator with a [`CommandAgent`].
pub struct RunCommand {
    config: PatchworkConfig,
    task: Task,
    program: String,
    args: Vec<String>,
    validator: Option<String>,
    strategy: StrategyKind,
}

impl RunCommand {
    pub fn new(config: PatchworkConfig, task: Task, program: String) -> Self {
        Self {
            config,
            task,
            program,
            args: Vec::new(),
            validator: None,
            strategy: StrategyKind::Custom("command".to_string()),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_validator(mut self, validator: Option<String>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    fn agent(&self) -> CommandAgent {
        let agent = CommandAgent::new(self.program.clone(), self.program.clone())
            .with_args(self.args.clone())
            .with_strategy(self.strategy.clone());
        match &self.validator {
            Some(validator) => agent.with_validator(validator.clone(), Vec::<String>::new()),
            None => agent,
        }
    }
}

impl Command for RunCommand {
    async fn execute(&self) -> Result<()> {
        let coordinator = Coordinator::from_config(&self.config).await?;
        let agent_id = coordinator.register_agent(Arc::new(self.agent())).await?;
        println!("🤖 Registered {} ({})", agent_id, self.strategy);

        coordinator.queue_task(self.task.clone()).await;
        let reports = coordinator.process_queue().await?;

        for report in &reports {
            println!();
            println!(
                "📋 Task {} on {} ({} ms)",
                report.task_id,
                report.agent_id,
                report.duration.as_millis()
            );
            match &report.outcome {
                TaskOutcome::Submitted {
                    change_id,
                    conflicts,
                    escalated,
                    ..
                } => {
                    println!("✅ Patch submitted: {change_id}");
                    if !conflicts.is_empty() {
                        println!("⚠️  {} conflict(s) with work in flight", conflicts.len());
                    }
                    if *escalated {
                        println!("🔍 Manual review required");
                    }
                    println!("   Apply with: patchwork apply {change_id}");
                }
                TaskOutcome::EmptyChange => println!("📭 Agent made no changes"),
                TaskOutcome::AwaitingApproval => println!("⏳ Awaiting approval"),
                TaskOutcome::ValidationFailed { errors } => {
                    println!("❌ Validation failed");
                    for error in errors {
                        println!("   - {error}");
                    }
                }
                TaskOutcome::ExecutionFailed { reason } => println!("❌ Execution failed: {reason}"),
                TaskOutcome::Cancelled { reason } => println!("🛑 Cancelled: {reason}"),
            }
            for warning in &report.warnings {
                println!("   ⚠️  {warning}");
            }
        }

        coordinator.shutdown().await;
        match reports.iter().find_map(TaskReport::failure) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
