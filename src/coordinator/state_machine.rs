use chrono::{DateTime, Utc};
use statig::prelude::*;
use thiserror::Error;

use super::types::{AgentStatus, Task};
use crate::workspace::WorkspaceRef;

/// How a finished task leaves the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalOutcome {
    /// The patch was applied to the target
    Applied,
    /// The patch was rejected or there was nothing to submit
    Rejected { reason: String },
    /// A failure was acknowledged by the operator or the queue
    Acknowledged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Assign {
        task: Box<Task>,
        workspace: Box<WorkspaceRef>,
    },
    ExecutionSucceeded,
    ExecutionFailed {
        reason: String,
    },
    ValidationPassed,
    ValidationFailed {
        errors: Vec<String>,
    },
    Finalize(FinalOutcome),
    Cancel {
        reason: String,
    },
}

impl AgentEvent {
    fn name(&self) -> &'static str {
        match self {
            AgentEvent::Assign { .. } => "assign",
            AgentEvent::ExecutionSucceeded => "execution_succeeded",
            AgentEvent::ExecutionFailed { .. } => "execution_failed",
            AgentEvent::ValidationPassed => "validation_passed",
            AgentEvent::ValidationFailed { .. } => "validation_failed",
            AgentEvent::Finalize(_) => "finalize",
            AgentEvent::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("event '{event}' is not valid while agent is {status}")]
    InvalidTransition {
        event: &'static str,
        status: AgentStatus,
    },
}

/// Per-agent data owned by the lifecycle machine.
pub struct AgentLifecycle {
    pub agent_id: String,
    pub current_task: Option<Task>,
    pub workspace: Option<WorkspaceRef>,
    pub completed_task_ids: Vec<String>,
    pub failed_task_ids: Vec<String>,
    pub last_error: Option<String>,
    pub last_activity: DateTime<Utc>,
}

impl AgentLifecycle {
    pub fn new(agent_id: String) -> Self {
        Self {
            agent_id,
            current_task: None,
            workspace: None,
            completed_task_ids: Vec::new(),
            failed_task_ids: Vec::new(),
            last_error: None,
            last_activity: Utc::now(),
        }
    }

    fn current_task_id(&self) -> String {
        self.current_task
            .as_ref()
            .map(|t| t.id.clone())
            .unwrap_or_default()
    }

    fn fail(&mut self, reason: String) {
        let task_id = self.current_task_id();
        tracing::warn!(agent_id = %self.agent_id, task_id = %task_id, reason = %reason, "Task failed");
        self.failed_task_ids.push(task_id);
        self.last_error = Some(reason);
        self.touch();
    }

    fn clear(&mut self) {
        self.current_task = None;
        self.workspace = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

#[state_machine(initial = "State::idle()")]
impl AgentLifecycle {
    #[state]
    fn idle(&mut self, event: &AgentEvent) -> Outcome<State> {
        match event {
            AgentEvent::Assign { task, workspace } => {
                tracing::info!(
                    agent_id = %self.agent_id,
                    task_id = %task.id,
                    workspace = %workspace.name,
                    "Agent assigned to task"
                );
                self.current_task = Some(task.as_ref().clone());
                self.workspace = Some(workspace.as_ref().clone());
                self.last_error = None;
                self.touch();
                Transition(State::working())
            }
            _ => Handled,
        }
    }

    #[state]
    fn working(&mut self, event: &AgentEvent) -> Outcome<State> {
        match event {
            AgentEvent::ExecutionSucceeded => {
                self.touch();
                Transition(State::validating())
            }
            AgentEvent::ExecutionFailed { reason } | AgentEvent::Cancel { reason } => {
                self.fail(reason.clone());
                Transition(State::error())
            }
            _ => Handled,
        }
    }

    #[state]
    fn validating(&mut self, event: &AgentEvent) -> Outcome<State> {
        match event {
            AgentEvent::ValidationPassed => {
                self.touch();
                Transition(State::waiting_approval())
            }
            AgentEvent::ValidationFailed { errors } => {
                self.fail(format!("validation failed: {}", errors.join("; ")));
                Transition(State::error())
            }
            AgentEvent::ExecutionFailed { reason } | AgentEvent::Cancel { reason } => {
                self.fail(reason.clone());
                Transition(State::error())
            }
            _ => Handled,
        }
    }

    #[state]
    fn waiting_approval(&mut self, event: &AgentEvent) -> Outcome<State> {
        match event {
            AgentEvent::Finalize(FinalOutcome::Applied) => {
                let task_id = self.current_task_id();
                tracing::info!(agent_id = %self.agent_id, task_id = %task_id, "Task completed");
                self.completed_task_ids.push(task_id);
                self.clear();
                Transition(State::idle())
            }
            AgentEvent::Finalize(FinalOutcome::Rejected { reason }) => {
                let task_id = self.current_task_id();
                tracing::info!(agent_id = %self.agent_id, task_id = %task_id, reason = %reason, "Task closed without applying");
                self.failed_task_ids.push(task_id);
                self.last_error = Some(reason.clone());
                self.clear();
                Transition(State::idle())
            }
            _ => Handled,
        }
    }

    #[state]
    fn error(&mut self, event: &AgentEvent) -> Outcome<State> {
        match event {
            AgentEvent::Finalize(FinalOutcome::Acknowledged) => {
                tracing::info!(agent_id = %self.agent_id, "Agent failure acknowledged");
                self.clear();
                Transition(State::idle())
            }
            _ => Handled,
        }
    }
}

/// Lifecycle machine plus the transition check used by the coordinator.
pub struct Lifecycle {
    machine: StateMachine<AgentLifecycle>,
}

impl Lifecycle {
    pub fn new(agent_id: &str) -> Self {
        Self {
            machine: AgentLifecycle::new(agent_id.to_string()).state_machine(),
        }
    }

    pub fn status(&self) -> AgentStatus {
        match self.machine.state() {
            State::Idle { .. } => AgentStatus::Idle,
            State::Working { .. } => AgentStatus::Working,
            State::Validating { .. } => AgentStatus::Validating,
            State::WaitingApproval { .. } => AgentStatus::WaitingApproval,
            State::Error { .. } => AgentStatus::Error,
        }
    }

    pub fn data(&self) -> &AgentLifecycle {
        self.machine.inner()
    }

    /// Feed `event`, failing when it does not move the agent.
    pub fn fire(&mut self, event: AgentEvent) -> Result<AgentStatus, TransitionError> {
        let before = self.status();
        self.machine.handle(&event);
        let after = self.status();
        if before == after {
            return Err(TransitionError::InvalidTransition {
                event: event.name(),
                status: before,
            });
        }
        Ok(after)
    }
}
