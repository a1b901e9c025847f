use anyhow::Result;
use std::collections::BTreeMap;

use super::{open_controller, Command};
use crate::change::ApprovalStatus;
use crate::config::PatchworkConfig;

pub struct StatusCommand {
    config: PatchworkConfig,
}

impl StatusCommand {
    pub fn new(config: PatchworkConfig) -> Self {
        Self { config }
    }
}

impl Command for StatusCommand {
    async fn execute(&self) -> Result<()> {
        let controller = open_controller(&self.config).await?;
        let sidecars = controller.list().await?;
        let history = controller.history().read_all()?;

        println!("🧵 PATCHWORK STATUS");
        println!("===================");
        println!("📦 Store:      {}", self.config.store.root.display());
        println!("📂 Repository: {}", self.config.workspace.repository_path.display());
        println!("📜 History:    {} record(s)", history.len());
        println!();

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for sidecar in &sidecars {
            *counts.entry(sidecar.status.to_string()).or_default() += 1;
        }

        println!("📊 PATCHES ({} total):", sidecars.len());
        for status in [
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Applied,
            ApprovalStatus::Rejected,
            ApprovalStatus::RolledBack,
        ] {
            let label = status.to_string();
            println!("   {:<12} {}", label, counts.get(&label).copied().unwrap_or(0));
        }

        let pending: Vec<_> = sidecars
            .iter()
            .filter(|s| s.status == ApprovalStatus::Pending)
            .collect();
        if !pending.is_empty() {
            println!();
            println!("⏳ AWAITING APPROVAL:");
            for sidecar in pending {
                let review = if sidecar.patch.requires_manual_review() {
                    " ⚠️  manual review"
                } else {
                    ""
                };
                println!(
                    "   {} task {} by {}{}",
                    sidecar.patch.short_id(),
                    sidecar.patch.task_id(),
                    sidecar.patch.creator_agent_id(),
                    review
                );
            }
        }
        Ok(())
    }
}
