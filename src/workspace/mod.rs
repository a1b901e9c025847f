//! Isolated per-agent workspaces.

mod worktree;

pub use worktree::GitWorktreeManager;

use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Handle to a live isolated checkout owned by one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub agent_id: String,
    /// Worktree name, unique per `create` call
    pub name: String,
    pub path: PathBuf,
    /// Branch checked out in the workspace
    pub branch: String,
    /// Commit id the workspace was created from
    pub base_revision: String,
    pub created_at: DateTime<Utc>,
}

/// Creates and destroys isolated checkouts of the baseline revision.
#[cfg_attr(test, automock)]
pub trait WorkspaceProvider: Send + Sync {
    /// Allocate a workspace for `agent_id` at `base_revision`.
    ///
    /// Fails with `CapacityExceeded` when no further checkout can be made.
    fn create(&self, agent_id: &str, base_revision: &str) -> Result<WorkspaceRef>;

    /// Release the agent's workspace. Returns false when it held none.
    /// Cleanup is best effort and never fails.
    fn release(&self, agent_id: &str) -> bool;

    fn get(&self, agent_id: &str) -> Option<WorkspaceRef>;

    fn active_count(&self) -> usize;
}
