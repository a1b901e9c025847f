//! Optimizer agent contract.
//!
//! An agent edits the files of the workspace it is given; the coordinator
//! turns whatever it left behind into a patch. How the agent decides what
//! to change is its own business.

mod command;

pub use command::CommandAgent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::coordinator::Task;
use crate::workspace::WorkspaceRef;

/// Strategy family an agent implementation belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    TestDriven,
    Adversarial,
    ActorCritic,
    ChaosEngineering,
    Custom(String),
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::TestDriven => write!(f, "test-driven"),
            StrategyKind::Adversarial => write!(f, "adversarial"),
            StrategyKind::ActorCritic => write!(f, "actor-critic"),
            StrategyKind::ChaosEngineering => write!(f, "chaos-engineering"),
            StrategyKind::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "test-driven" => StrategyKind::TestDriven,
            "adversarial" => StrategyKind::Adversarial,
            "actor-critic" => StrategyKind::ActorCritic,
            "chaos-engineering" => StrategyKind::ChaosEngineering,
            other => StrategyKind::Custom(other.strip_prefix("custom:").unwrap_or(other).to_string()),
        })
    }
}

/// What an agent reports after working on a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub summary: String,
    /// Files the agent claims to have changed. Informational only, the
    /// patch is always derived from the workspace.
    pub changed_files: Vec<String>,
    pub score: Option<f64>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    pub fn fail(errors: Vec<String>) -> Self {
        Self {
            passed: false,
            errors,
            warnings: Vec::new(),
        }
    }
}

/// The contract every optimizer strategy implements.
///
/// Both calls may take a long time; the coordinator runs them on its worker
/// pool under a timeout and turns errors and panics into failed task reports.
#[async_trait]
pub trait OptimizerAgent: Send + Sync {
    fn name(&self) -> &str;

    fn strategy(&self) -> StrategyKind;

    /// Work on `task` by editing files under `workspace.path`.
    async fn optimize(
        &self,
        task: &Task,
        workspace: &WorkspaceRef,
    ) -> anyhow::Result<OptimizationResult>;

    /// Check the outcome of [`OptimizerAgent::optimize`].
    async fn validate(
        &self,
        task: &Task,
        workspace: &WorkspaceRef,
        result: &OptimizationResult,
    ) -> anyhow::Result<ValidationResult>;
}
