use chrono::Utc;
use git2::{BranchType, Repository, WorktreeAddOptions, WorktreePruneOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{WorkspaceProvider, WorkspaceRef};
use crate::config::WorkspaceConfig;
use crate::error::{PatchworkError, Result};

/// Workspace provider backed by `git worktree`.
///
/// Every workspace is a linked worktree on its own branch
/// (`patchwork/<agent>-<suffix>`) under `worktree_root`.
pub struct GitWorktreeManager {
    repository_path: PathBuf,
    worktree_root: PathBuf,
    max_workspaces: usize,
    active: Mutex<HashMap<String, WorkspaceRef>>,
}

impl GitWorktreeManager {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        repository_path: P,
        worktree_root: Q,
        max_workspaces: usize,
    ) -> Result<Self> {
        let repo = Repository::open(repository_path.as_ref())?;
        let repository_path = repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| repository_path.as_ref().to_path_buf());

        // relative roots live inside the repository
        let worktree_root = if worktree_root.as_ref().is_absolute() {
            worktree_root.as_ref().to_path_buf()
        } else {
            repository_path.join(worktree_root.as_ref())
        };

        Ok(Self {
            repository_path,
            worktree_root,
            max_workspaces,
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &WorkspaceConfig) -> Result<Self> {
        Self::new(
            &config.repository_path,
            &config.worktree_root,
            config.max_workspaces,
        )
    }

    pub fn repository_path(&self) -> &Path {
        &self.repository_path
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, WorkspaceRef>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn capacity_error(reason: impl Into<String>) -> PatchworkError {
        PatchworkError::CapacityExceeded {
            resource: "workspace".to_string(),
            reason: reason.into(),
        }
    }

    fn add_worktree(&self, agent_id: &str, base_revision: &str) -> Result<WorkspaceRef> {
        let repo = Repository::open(&self.repository_path)?;
        let commit = repo.revparse_single(base_revision)?.peel_to_commit()?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{agent_id}-{}", &suffix[..8]);
        let branch_name = format!("patchwork/{name}");
        let path = self.worktree_root.join(&name);

        std::fs::create_dir_all(&self.worktree_root).map_err(|e| {
            Self::capacity_error(format!(
                "cannot create {}: {e}",
                self.worktree_root.display()
            ))
        })?;

        let branch = repo.branch(&branch_name, &commit, false)?;
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(branch.get()));

        if let Err(e) = repo.worktree(&name, &path, Some(&opts)) {
            drop(opts);
            let mut branch = branch;
            if let Err(cleanup) = branch.delete() {
                warn!(branch = %branch_name, error = %cleanup, "Failed to delete branch of aborted workspace");
            }
            return Err(Self::capacity_error(format!(
                "git could not add worktree {name}: {}",
                e.message()
            )));
        }

        Ok(WorkspaceRef {
            agent_id: agent_id.to_string(),
            name,
            path,
            branch: branch_name,
            base_revision: commit.id().to_string(),
            created_at: Utc::now(),
        })
    }

    fn remove_worktree(&self, workspace: &WorkspaceRef) {
        let repo = match Repository::open(&self.repository_path) {
            Ok(repo) => Some(repo),
            Err(e) => {
                warn!(error = %e, "Cannot open repository, falling back to forced removal");
                None
            }
        };

        if let Some(repo) = &repo {
            match repo.find_worktree(&workspace.name) {
                Ok(worktree) => {
                    let mut opts = WorktreePruneOptions::new();
                    opts.valid(true).locked(true).working_tree(true);
                    if let Err(e) = worktree.prune(Some(&mut opts)) {
                        warn!(workspace = %workspace.name, error = %e, "git worktree prune failed");
                    }
                }
                Err(e) => {
                    warn!(workspace = %workspace.name, error = %e, "Worktree not registered with git");
                }
            }
        }

        if workspace.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&workspace.path) {
                warn!(path = %workspace.path.display(), error = %e, "Forced workspace removal failed");
            }
        }

        if let Some(repo) = &repo {
            match repo.find_branch(&workspace.branch, BranchType::Local) {
                Ok(mut branch) => {
                    if let Err(e) = branch.delete() {
                        warn!(branch = %workspace.branch, error = %e, "Failed to delete workspace branch");
                    }
                }
                Err(e) => debug!(branch = %workspace.branch, error = %e, "Workspace branch already gone"),
            }
        }
    }
}

impl WorkspaceProvider for GitWorktreeManager {
    fn create(&self, agent_id: &str, base_revision: &str) -> Result<WorkspaceRef> {
        let mut active = self.active();

        if active.contains_key(agent_id) {
            return Err(Self::capacity_error(format!(
                "agent {agent_id} already holds a workspace"
            )));
        }
        if active.len() >= self.max_workspaces {
            return Err(Self::capacity_error(format!(
                "limit of {} live workspaces reached",
                self.max_workspaces
            )));
        }

        let workspace = self.add_worktree(agent_id, base_revision)?;
        info!(
            agent_id = %agent_id,
            workspace = %workspace.name,
            base_revision = %workspace.base_revision,
            "Created isolated workspace"
        );
        active.insert(agent_id.to_string(), workspace.clone());
        Ok(workspace)
    }

    fn release(&self, agent_id: &str) -> bool {
        let Some(workspace) = self.active().remove(agent_id) else {
            return false;
        };

        self.remove_worktree(&workspace);
        info!(agent_id = %agent_id, workspace = %workspace.name, "Released workspace");
        true
    }

    fn get(&self, agent_id: &str) -> Option<WorkspaceRef> {
        self.active().get(agent_id).cloned()
    }

    fn active_count(&self) -> usize {
        self.active().len()
    }
}
