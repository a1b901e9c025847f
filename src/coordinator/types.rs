use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::agents::StrategyKind;
use crate::conflict::ConflictInfo;
use crate::error::{PatchworkError, Result};
use crate::priority::Priority;
use crate::workspace::WorkspaceRef;

/// A unit of work for one agent.
///
/// Immutable once queued except for the assigned agent, which is set once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// Files the task is expected to touch
    pub target_file_set: BTreeSet<String>,
    pub priority: Priority,
    pub constraints: BTreeMap<String, String>,
    assigned_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            target_file_set: BTreeSet::new(),
            priority: Priority::default(),
            constraints: BTreeMap::new(),
            assigned_agent: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_file_set.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    pub fn assigned_agent(&self) -> Option<&str> {
        self.assigned_agent.as_deref()
    }

    /// Record the owning agent. A task can be assigned only once.
    pub fn assign_to(&mut self, agent_id: &str) -> Result<()> {
        if let Some(current) = &self.assigned_agent {
            return Err(PatchworkError::TaskAlreadyAssigned {
                task_id: self.id.clone(),
                agent_id: current.clone(),
            });
        }
        self.assigned_agent = Some(agent_id.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Idle,
    Working,
    Validating,
    WaitingApproval,
    Error,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Idle => "IDLE",
            AgentStatus::Working => "WORKING",
            AgentStatus::Validating => "VALIDATING",
            AgentStatus::WaitingApproval => "WAITING_APPROVAL",
            AgentStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

/// Snapshot of one registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub name: String,
    pub strategy: StrategyKind,
    pub status: AgentStatus,
    pub current_task: Option<Task>,
    pub workspace: Option<WorkspaceRef>,
    pub completed_task_ids: Vec<String>,
    pub failed_task_ids: Vec<String>,
    pub last_error: Option<String>,
    pub last_activity: DateTime<Utc>,
}

/// What happened to a task, as a value rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Optimized and validated, no patch submitted yet
    AwaitingApproval,
    /// Patch stored with change control and pending approval
    Submitted {
        change_id: String,
        patch_id: String,
        conflicts: Vec<ConflictInfo>,
        escalated: bool,
    },
    /// The agent left its workspace unchanged
    EmptyChange,
    ValidationFailed { errors: Vec<String> },
    ExecutionFailed { reason: String },
    Cancelled { reason: String },
}

impl TaskOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskOutcome::ValidationFailed { .. }
                | TaskOutcome::ExecutionFailed { .. }
                | TaskOutcome::Cancelled { .. }
        )
    }
}

/// Result of running one task on one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub agent_id: String,
    pub task_id: String,
    pub outcome: TaskOutcome,
    /// Warnings reported by the validator
    pub warnings: Vec<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

impl TaskReport {
    /// The failure as an `ExecutionFailure` error, for callers that want `?`.
    pub fn failure(&self) -> Option<PatchworkError> {
        let reason = match &self.outcome {
            TaskOutcome::ValidationFailed { errors } => {
                format!("validation failed: {}", errors.join("; "))
            }
            TaskOutcome::ExecutionFailed { reason } | TaskOutcome::Cancelled { reason } => {
                reason.clone()
            }
            _ => return None,
        };
        Some(PatchworkError::ExecutionFailure {
            task_id: self.task_id.clone(),
            reason,
        })
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// A submitted patch waiting for an approve/reject decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub change_id: String,
    pub patch_id: String,
    pub agent_id: String,
    pub task_id: String,
    pub requires_manual_review: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Counters over the coordinator's current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub registered_agents: usize,
    pub idle_agents: usize,
    pub working_agents: usize,
    pub validating_agents: usize,
    pub waiting_approval_agents: usize,
    pub error_agents: usize,
    pub queued_tasks: usize,
    pub pending_approvals: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub conflicts_detected: usize,
    pub escalated_conflicts: usize,
    pub active_workspaces: usize,
}
