use anyhow::{bail, Result};
use std::path::PathBuf;

use super::{open_controller, target_or_repository, Command};
use crate::change::{ApprovalStatus, ChangeController, Decision};
use crate::config::PatchworkConfig;

pub struct HistoryCommand {
    config: PatchworkConfig,
    task: Option<String>,
}

impl HistoryCommand {
    pub fn new(config: PatchworkConfig, task: Option<String>) -> Self {
        Self { config, task }
    }
}

impl Command for HistoryCommand {
    async fn execute(&self) -> Result<()> {
        let controller = open_controller(&self.config).await?;
        let records = match &self.task {
            Some(task_id) => controller.get_patch_history(task_id)?,
            None => controller.history().read_all()?,
        };

        if records.is_empty() {
            println!("📭 No patches recorded");
            return Ok(());
        }
        for record in records {
            println!(
                "{}  {:<8}  task {}  agent {}  files {}  parents {}",
                record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                format!("{:?}", record.kind),
                record.task_id,
                record.creator_agent_id,
                record.target_files.join(","),
                record.parent_patch_ids.len(),
            );
            println!("    {}", record.patch_id);
        }
        Ok(())
    }
}

pub struct ShowCommand {
    config: PatchworkConfig,
    patch_id: String,
}

impl ShowCommand {
    pub fn new(config: PatchworkConfig, patch_id: String) -> Self {
        Self { config, patch_id }
    }
}

impl Command for ShowCommand {
    async fn execute(&self) -> Result<()> {
        let controller = open_controller(&self.config).await?;
        let sidecar = controller.sidecar(&self.patch_id).await?;
        let patch = controller.get_patch(&self.patch_id).await?;

        println!("🧩 Patch {}", patch.patch_id());
        println!("   status:   {}", sidecar.status);
        println!("   task:     {}", patch.task_id());
        println!("   agent:    {}", patch.creator_agent_id());
        println!("   created:  {}", patch.created_at());
        println!("   files:    {}", patch.target_files().join(", "));
        if !patch.parent_patch_ids().is_empty() {
            println!("   parents:  {}", patch.parent_patch_ids().join(", "));
        }
        if let Some(reversal) = &sidecar.rolled_back_by {
            println!("   reverted: {reversal}");
        }
        if let Some(reason) = &sidecar.rejection_reason {
            println!("   rejected: {reason}");
        }
        for (key, value) in &patch.metadata {
            println!("   {key}: {value}");
        }
        println!();
        print!("{}", patch.diff_content());
        Ok(())
    }
}

pub struct ApplyCommand {
    config: PatchworkConfig,
    patch_id: String,
    target: Option<PathBuf>,
}

impl ApplyCommand {
    pub fn new(config: PatchworkConfig, patch_id: String, target: Option<PathBuf>) -> Self {
        Self {
            config,
            patch_id,
            target,
        }
    }
}

impl Command for ApplyCommand {
    async fn execute(&self) -> Result<()> {
        let controller = open_controller(&self.config).await?;
        let target = target_or_repository(self.target.as_deref(), &self.config);

        if controller.check_approval(&self.patch_id).await? == ApprovalStatus::Pending {
            controller.decide(&self.patch_id, Decision::Approve).await?;
            println!("✅ Approved {}", self.patch_id);
        }

        if controller.apply_change(&self.patch_id, &target).await? {
            println!("🚀 Applied {} to {}", self.patch_id, target.display());
            Ok(())
        } else {
            bail!(
                "patch {} does not apply cleanly to {}; nothing was changed",
                self.patch_id,
                target.display()
            )
        }
    }
}

pub struct RollbackCommand {
    config: PatchworkConfig,
    patch_id: String,
    target: Option<PathBuf>,
}

impl RollbackCommand {
    pub fn new(config: PatchworkConfig, patch_id: String, target: Option<PathBuf>) -> Self {
        Self {
            config,
            patch_id,
            target,
        }
    }
}

impl Command for RollbackCommand {
    async fn execute(&self) -> Result<()> {
        let controller = open_controller(&self.config).await?;
        let target = target_or_repository(self.target.as_deref(), &self.config);

        let reversal = controller.rollback_change(&self.patch_id, &target).await?;
        println!("↩️  Rolled back {} on {}", self.patch_id, target.display());
        println!("   reversal patch: {}", reversal.patch_id());
        Ok(())
    }
}
