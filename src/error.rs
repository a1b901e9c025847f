use thiserror::Error;

/// Errors raised by the coordinator and its collaborators.
///
/// Per-task failures (agent execution, validation) are not errors: they are
/// captured into `TaskReport`s. Only caller mistakes, capacity limits and
/// storage problems reach the immediate caller as `Err`.
#[derive(Debug, Error)]
pub enum PatchworkError {
    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("patch not found: {patch_id}")]
    PatchNotFound { patch_id: String },

    #[error("agent {agent_id} is busy (status: {status})")]
    AgentBusy { agent_id: String, status: String },

    #[error("agent {agent_id} is {actual}, expected {expected}")]
    InvalidAgentState {
        agent_id: String,
        expected: String,
        actual: String,
    },

    #[error("task {task_id} is already assigned to {agent_id}")]
    TaskAlreadyAssigned { task_id: String, agent_id: String },

    #[error("capacity exceeded for {resource}: {reason}")]
    CapacityExceeded { resource: String, reason: String },

    #[error("task {task_id} produced no changes")]
    EmptyPatch { task_id: String },

    #[error("patch {patch_id} does not apply cleanly: {reason}")]
    ApplyCheckFailed { patch_id: String, reason: String },

    #[error("change {change_id} is {actual}, expected {expected}")]
    InvalidChangeState {
        change_id: String,
        expected: String,
        actual: String,
    },

    #[error("execution failed for task {task_id}: {reason}")]
    ExecutionFailure { task_id: String, reason: String },

    #[error("content not found: {address}")]
    NotFound { address: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid diff: {0}")]
    InvalidDiff(String),

    #[error("ticket backend error: {0}")]
    Ticket(String),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl PatchworkError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PatchworkError::CapacityExceeded { .. } | PatchworkError::Storage(_)
        )
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        PatchworkError::Storage(format!("{context}: {err}"))
    }
}

impl From<octocrab::Error> for PatchworkError {
    fn from(err: octocrab::Error) -> Self {
        PatchworkError::Ticket(err.to_string())
    }
}

pub type Result<T, E = PatchworkError> = std::result::Result<T, E>;
