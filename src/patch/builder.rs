use git2::{DiffFormat, DiffOptions, Repository};
use serde_json::Value;
use tracing::{debug, info};

use super::{Patch, PatchOutcome, REVERSES};
use crate::error::{PatchworkError, Result};
use crate::workspace::WorkspaceRef;

/// Derives patches from the delta between a workspace and its base revision.
#[derive(Debug, Default, Clone)]
pub struct PatchBuilder;

impl PatchBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Textual delta of the workspace against its base commit, untracked
    /// files included and ignored files excluded.
    pub fn workspace_delta(&self, workspace: &WorkspaceRef) -> Result<String> {
        let repo = Repository::open(&workspace.path)?;
        let base_tree = repo
            .revparse_single(&workspace.base_revision)?
            .peel_to_tree()?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true);
        let diff = repo.diff_tree_to_workdir(Some(&base_tree), Some(&mut opts))?;

        let mut text = Vec::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                text.push(line.origin() as u8);
            }
            text.extend_from_slice(line.content());
            true
        })?;

        String::from_utf8(text).map_err(|_| {
            PatchworkError::InvalidDiff(format!(
                "delta of workspace {} is not valid UTF-8",
                workspace.name
            ))
        })
    }

    /// Build a patch from the workspace delta. An unchanged workspace is an
    /// `EmptyPatch` error.
    pub fn build(
        &self,
        workspace: &WorkspaceRef,
        creator_agent_id: &str,
        task_id: &str,
    ) -> Result<Patch> {
        let delta = self.workspace_delta(workspace)?;
        if delta.trim().is_empty() {
            return Err(PatchworkError::EmptyPatch {
                task_id: task_id.to_string(),
            });
        }

        let mut patch = Patch::new(delta, creator_agent_id, task_id, Vec::new())?;
        patch.workspace = Some(workspace.clone());
        info!(
            agent_id = %creator_agent_id,
            task_id = %task_id,
            patch_id = %patch.patch_id(),
            files = patch.target_files().len(),
            "Built patch from workspace"
        );
        Ok(patch)
    }

    /// Like [`PatchBuilder::build`] with the empty case as a value.
    pub fn build_outcome(
        &self,
        workspace: &WorkspaceRef,
        creator_agent_id: &str,
        task_id: &str,
    ) -> Result<PatchOutcome> {
        match self.build(workspace, creator_agent_id, task_id) {
            Ok(patch) => Ok(PatchOutcome::Built(Box::new(patch))),
            Err(PatchworkError::EmptyPatch { .. }) => {
                debug!(task_id = %task_id, "Workspace has no changes");
                Ok(PatchOutcome::EmptyChange)
            }
            Err(e) => Err(e),
        }
    }

    pub fn reverse(&self, patch: &Patch) -> Result<Patch> {
        reverse(patch)
    }
}

/// Patch undoing `patch`: additions and removals swapped, file headers
/// swapped, parented on the original.
pub fn reverse(patch: &Patch) -> Result<Patch> {
    let reversed = patch.diff()?.reverse()?;
    let mut reversal = Patch::new(
        reversed.to_string(),
        patch.creator_agent_id(),
        patch.task_id(),
        vec![patch.patch_id().to_string()],
    )?;
    reversal
        .metadata
        .insert(REVERSES.to_string(), Value::String(patch.patch_id().to_string()));
    Ok(reversal)
}
