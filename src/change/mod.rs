//! Change control: where submitted patches wait for approval and how they
//! reach the target tree.

pub mod apply;
pub mod history;
mod patch_backed;
mod ticket;

pub use apply::{apply_patch, check_patch, ApplyCheck};
pub use history::{HistoryKind, HistoryRecord, PatchHistory};
pub use patch_backed::{PatchChangeController, PatchSidecar};
pub use ticket::TicketChangeController;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::patch::Patch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
    RolledBack,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Applied => "applied",
            ApprovalStatus::RolledBack => "rolled_back",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approve,
    Reject { reason: String },
}

/// Contract shared by every change-control backend.
#[async_trait]
pub trait ChangeController: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Record `patch` as a pending change and return the change id.
    async fn create_change(&self, patch: &Patch) -> Result<String>;

    async fn check_approval(&self, change_id: &str) -> Result<ApprovalStatus>;

    async fn decide(&self, change_id: &str, decision: Decision) -> Result<ApprovalStatus>;

    /// Two-phase apply of an approved change. `Ok(false)` means the dry run
    /// failed and `target` was not touched.
    async fn apply_change(&self, change_id: &str, target: &Path) -> Result<bool>;

    /// Apply the reversal of an applied change and return the reversal patch.
    /// Fails with `ApplyCheckFailed` when the reversal does not apply cleanly.
    async fn rollback_change(&self, change_id: &str, target: &Path) -> Result<Patch>;

    async fn get_patch(&self, change_id: &str) -> Result<Patch>;
}
