// Shared fixtures for integration tests: throwaway repositories, editing
// agents and coordinator configuration pointing at temp directories.
#![allow(dead_code)]

use async_trait::async_trait;
use git2::{Repository, Signature};
use patchwork::{
    OptimizationResult, OptimizerAgent, PatchworkConfig, StrategyKind, Task, ValidationResult,
    WorkspaceRef,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Repository with one commit holding `files`.
pub fn init_repo(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let mut index = repo.index().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        index.add_path(Path::new(name)).unwrap();
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let signature = Signature::now("Test", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &signature, &signature, "Initial commit", &tree, &[])
        .unwrap();
    dir
}

pub fn read(root: &Path, file: &str) -> String {
    fs::read_to_string(root.join(file)).unwrap()
}

/// Temp directories backing one coordinator.
pub struct Harness {
    pub repo: TempDir,
    pub worktrees: TempDir,
    pub store: TempDir,
}

impl Harness {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            repo: init_repo(files),
            worktrees: TempDir::new().unwrap(),
            store: TempDir::new().unwrap(),
        }
    }

    pub fn config(&self, max_agents: usize) -> PatchworkConfig {
        let mut config = PatchworkConfig::default();
        config.coordinator.max_concurrent_agents = max_agents;
        config.coordinator.execution_timeout_seconds = 30;
        config.workspace.repository_path = self.repo.path().to_path_buf();
        config.workspace.worktree_root = self.worktrees.path().to_path_buf();
        config.store.root = self.store.path().to_path_buf();
        config
    }
}

/// Agent that writes `<task id> by <name>` into every file of its task.
///
/// With a gate it waits for a notification before touching anything, which
/// keeps it WORKING for as long as a test needs.
pub struct EditingAgent {
    name: String,
    gate: Option<Arc<Notify>>,
}

impl EditingAgent {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            gate: None,
        })
    }

    pub fn gated(name: &str, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            gate: Some(gate),
        })
    }
}

#[async_trait]
impl OptimizerAgent for EditingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::TestDriven
    }

    async fn optimize(
        &self,
        task: &Task,
        workspace: &WorkspaceRef,
    ) -> anyhow::Result<OptimizationResult> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        for file in &task.target_file_set {
            fs::write(
                workspace.path.join(file),
                format!("{} by {}\n", task.id, self.name),
            )?;
        }
        Ok(OptimizationResult {
            summary: format!("rewrote {} file(s)", task.target_file_set.len()),
            changed_files: task.target_file_set.iter().cloned().collect(),
            ..OptimizationResult::default()
        })
    }

    async fn validate(
        &self,
        _task: &Task,
        _workspace: &WorkspaceRef,
        _result: &OptimizationResult,
    ) -> anyhow::Result<ValidationResult> {
        Ok(ValidationResult::pass())
    }
}
