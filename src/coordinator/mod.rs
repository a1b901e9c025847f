//! Agent coordinator.
//!
//! Owns the agent registry, the task queue, the pending-approval set and the
//! conflict log behind a single mutex. Long-running agent calls run on a
//! bounded worker pool outside that lock, and every transition back to IDLE
//! wakes the queue drain loop.
//!
//! Workspaces are released outside the lock, before the agent can be handed
//! a new one. Creating a workspace and appending to the conflict audit file
//! still happen under the lock so assignment and conflict checks stay atomic.

mod state_machine;
mod types;

pub use state_machine::{AgentEvent, FinalOutcome, Lifecycle, TransitionError};
pub use types::{
    AgentState, AgentStatus, CoordinatorStats, PendingApproval, Task, TaskOutcome, TaskReport,
};

use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::agents::{OptimizerAgent, StrategyKind};
use crate::change::{
    ApprovalStatus, ChangeController, Decision, PatchChangeController, TicketChangeController,
};
use crate::config::{CoordinatorConfig, PatchworkConfig};
use crate::conflict::{ConflictInfo, ConflictResolver, Resolution};
use crate::error::{PatchworkError, Result};
use crate::patch::{Patch, PatchBuilder, PatchOutcome};
use crate::telemetry::{create_coordination_span, generate_correlation_id};
use crate::workspace::{GitWorktreeManager, WorkspaceProvider, WorkspaceRef};

struct AgentSlot {
    agent: Arc<dyn OptimizerAgent>,
    name: String,
    strategy: StrategyKind,
    lifecycle: Lifecycle,
    /// An execute or submit call is in progress
    busy: bool,
}

impl AgentSlot {
    fn status(&self) -> AgentStatus {
        self.lifecycle.status()
    }

    fn current_task_id(&self) -> Option<&str> {
        self.lifecycle.data().current_task.as_ref().map(|t| t.id.as_str())
    }

    fn snapshot(&self, agent_id: &str) -> AgentState {
        let data = self.lifecycle.data();
        AgentState {
            agent_id: agent_id.to_string(),
            name: self.name.clone(),
            strategy: self.strategy.clone(),
            status: self.status(),
            current_task: data.current_task.clone(),
            workspace: data.workspace.clone(),
            completed_task_ids: data.completed_task_ids.clone(),
            failed_task_ids: data.failed_task_ids.clone(),
            last_error: data.last_error.clone(),
            last_activity: data.last_activity,
        }
    }

    fn fire(&mut self, agent_id: &str, event: AgentEvent) -> Result<AgentStatus> {
        self.lifecycle.fire(event).map_err(|e| match e {
            TransitionError::InvalidTransition { event, status } => {
                PatchworkError::InvalidAgentState {
                    agent_id: agent_id.to_string(),
                    expected: format!("a state accepting '{event}'"),
                    actual: status.to_string(),
                }
            }
        })
    }
}

struct CoordinatorState {
    agents: BTreeMap<String, AgentSlot>,
    queue: VecDeque<Task>,
    /// Keyed by change id
    pending: BTreeMap<String, PendingApproval>,
    resolver: ConflictResolver,
    next_seq: u32,
    // counters of unregistered agents, kept for stats
    retired_completed: usize,
    retired_failed: usize,
}

impl CoordinatorState {
    fn slot(&self, agent_id: &str) -> Result<&AgentSlot> {
        self.agents.get(agent_id).ok_or_else(|| agent_not_found(agent_id))
    }

    fn slot_mut(&mut self, agent_id: &str) -> Result<&mut AgentSlot> {
        self.agents
            .get_mut(agent_id)
            .ok_or_else(|| agent_not_found(agent_id))
    }

    /// The agent, if it is still registered and still on `task_id`.
    fn slot_on_task(&mut self, agent_id: &str, task_id: &str) -> Option<&mut AgentSlot> {
        self.agents
            .get_mut(agent_id)
            .filter(|slot| slot.current_task_id() == Some(task_id))
    }
}

fn agent_not_found(agent_id: &str) -> PatchworkError {
    PatchworkError::AgentNotFound {
        agent_id: agent_id.to_string(),
    }
}

fn invalid_state(agent_id: &str, expected: AgentStatus, actual: AgentStatus) -> PatchworkError {
    PatchworkError::InvalidAgentState {
        agent_id: agent_id.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Run `call` on the runtime's worker threads, bounded by `timeout`.
///
/// Errors, timeouts and panics all come back as a failure reason.
async fn offload<T, F>(timeout: Option<Duration>, call: F) -> std::result::Result<T, String>
where
    T: Send + 'static,
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(|e| format!("{e:#}")),
                Err(_) => Err(format!("did not complete within {}s", limit.as_secs())),
            },
            None => call.await.map_err(|e| format!("{e:#}")),
        }
    });

    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err("agent panicked".to_string()),
        Err(e) => Err(format!("agent call aborted: {e}")),
    }
}

/// Coordinates optimizer agents working on a shared codebase.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<Mutex<CoordinatorState>>,
    workspaces: Arc<dyn WorkspaceProvider>,
    changes: Arc<dyn ChangeController>,
    builder: PatchBuilder,
    worker_pool: Arc<Semaphore>,
    idle_signal: Arc<Notify>,
    config: CoordinatorConfig,
    base_revision: String,
}

impl Coordinator {
    pub fn new(
        config: &PatchworkConfig,
        workspaces: Arc<dyn WorkspaceProvider>,
        changes: Arc<dyn ChangeController>,
    ) -> Self {
        let resolver = ConflictResolver::from_config(&config.coordinator);
        Self::with_resolver(config, workspaces, changes, resolver)
    }

    pub fn with_resolver(
        config: &PatchworkConfig,
        workspaces: Arc<dyn WorkspaceProvider>,
        changes: Arc<dyn ChangeController>,
        resolver: ConflictResolver,
    ) -> Self {
        let pool_size = config.coordinator.max_concurrent_agents.max(1);
        Self {
            state: Arc::new(Mutex::new(CoordinatorState {
                agents: BTreeMap::new(),
                queue: VecDeque::new(),
                pending: BTreeMap::new(),
                resolver,
                next_seq: 1,
                retired_completed: 0,
                retired_failed: 0,
            })),
            workspaces,
            changes,
            builder: PatchBuilder::new(),
            worker_pool: Arc::new(Semaphore::new(pool_size)),
            idle_signal: Arc::new(Notify::new()),
            config: config.coordinator.clone(),
            base_revision: config.workspace.base_revision.clone(),
        }
    }

    /// Git worktrees for workspaces and a conflict audit file next to the
    /// store. Change control goes through GitHub issues when a repository is
    /// configured, otherwise straight through the patch-backed controller.
    pub async fn from_config(config: &PatchworkConfig) -> Result<Self> {
        let workspaces = Arc::new(GitWorktreeManager::from_config(&config.workspace)?);
        let patches = PatchChangeController::open(&config.store.root).await?;
        let changes: Arc<dyn ChangeController> =
            if config.github.owner.is_empty() || config.github.repo.is_empty() {
                Arc::new(patches)
            } else {
                Arc::new(TicketChangeController::new(&config.github, patches)?)
            };
        info!(backend = changes.backend(), "Change control ready");
        let resolver = ConflictResolver::from_config(&config.coordinator)
            .with_audit_file(config.store.root.join("conflicts.jsonl"));
        Ok(Self::with_resolver(config, workspaces, changes, resolver))
    }

    pub fn change_controller(&self) -> &Arc<dyn ChangeController> {
        &self.changes
    }

    /// Add an agent to the pool. It starts IDLE.
    pub async fn register_agent(&self, agent: Arc<dyn OptimizerAgent>) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.agents.len() >= self.config.max_concurrent_agents {
            return Err(PatchworkError::CapacityExceeded {
                resource: "agent pool".to_string(),
                reason: format!(
                    "limit of {} agents reached",
                    self.config.max_concurrent_agents
                ),
            });
        }

        let agent_id = format!("agent{:03}", state.next_seq);
        state.next_seq += 1;
        let slot = AgentSlot {
            name: agent.name().to_string(),
            strategy: agent.strategy(),
            agent,
            lifecycle: Lifecycle::new(&agent_id),
            busy: false,
        };
        info!(
            agent_id = %agent_id,
            name = %slot.name,
            strategy = %slot.strategy,
            "Agent registered"
        );
        state.agents.insert(agent_id.clone(), slot);
        drop(state);

        self.idle_signal.notify_waiters();
        Ok(agent_id)
    }

    /// Give `task` to an idle agent and allocate its workspace.
    pub async fn assign_task(&self, agent_id: &str, task: Task) -> Result<WorkspaceRef> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span(
            "assign_task",
            Some(agent_id),
            Some(&task.id),
            Some(&correlation_id),
        );
        async move {
            let mut state = self.state.lock().await;
            self.assign_locked(&mut state, agent_id, task)
        }
        .instrument(span)
        .await
    }

    fn assign_locked(
        &self,
        state: &mut CoordinatorState,
        agent_id: &str,
        mut task: Task,
    ) -> Result<WorkspaceRef> {
        let status = state.slot(agent_id)?.status();
        if status != AgentStatus::Idle {
            return Err(PatchworkError::AgentBusy {
                agent_id: agent_id.to_string(),
                status: status.to_string(),
            });
        }
        if let Some((holder, _)) = state
            .agents
            .iter()
            .find(|(_, slot)| slot.current_task_id() == Some(task.id.as_str()))
        {
            return Err(PatchworkError::TaskAlreadyAssigned {
                task_id: task.id.clone(),
                agent_id: holder.clone(),
            });
        }
        task.assign_to(agent_id)?;

        let workspace = self.workspaces.create(agent_id, &self.base_revision)?;
        let event = AgentEvent::Assign {
            task: Box::new(task),
            workspace: Box::new(workspace.clone()),
        };
        if let Err(e) = state.slot_mut(agent_id)?.fire(agent_id, event) {
            self.workspaces.release(agent_id);
            return Err(e);
        }
        Ok(workspace)
    }

    /// Run the agent's optimize and validate calls for its current task.
    ///
    /// Agent failures, timeouts and panics end up in the report, not in the
    /// returned error; only bad identifiers and wrong states are errors.
    pub async fn execute_task(&self, agent_id: &str) -> Result<TaskReport> {
        let correlation_id = generate_correlation_id();
        let span =
            create_coordination_span("execute_task", Some(agent_id), None, Some(&correlation_id));
        async move {
            let started = Instant::now();
            let (agent, task, workspace) = {
                let mut state = self.state.lock().await;
                let slot = state.slot_mut(agent_id)?;
                let status = slot.status();
                if slot.busy {
                    return Err(PatchworkError::AgentBusy {
                        agent_id: agent_id.to_string(),
                        status: format!("{status} (call in progress)"),
                    });
                }
                let data = slot.lifecycle.data();
                let (Some(task), Some(workspace), AgentStatus::Working) =
                    (data.current_task.clone(), data.workspace.clone(), status)
                else {
                    return Err(invalid_state(agent_id, AgentStatus::Working, status));
                };
                slot.busy = true;
                (slot.agent.clone(), task, workspace)
            };

            let (outcome, warnings) = self.drive_agent(agent_id, agent, &task, &workspace).await;

            if let Some(slot) = self.state.lock().await.agents.get_mut(agent_id) {
                slot.busy = false;
            }

            let report = TaskReport {
                agent_id: agent_id.to_string(),
                task_id: task.id.clone(),
                outcome,
                warnings,
                duration: started.elapsed(),
                finished_at: Utc::now(),
            };
            info!(
                agent_id = %agent_id,
                task_id = %task.id,
                outcome = ?report.outcome,
                duration_ms = report.duration.as_millis() as u64,
                "Task execution finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn drive_agent(
        &self,
        agent_id: &str,
        agent: Arc<dyn OptimizerAgent>,
        task: &Task,
        workspace: &WorkspaceRef,
    ) -> (TaskOutcome, Vec<String>) {
        let cancelled = || TaskOutcome::Cancelled {
            reason: "agent was unregistered during execution".to_string(),
        };

        let Ok(_permit) = self.worker_pool.clone().acquire_owned().await else {
            let reason = "worker pool is closed".to_string();
            let mut state = self.state.lock().await;
            if let Some(slot) = state.slot_on_task(agent_id, &task.id) {
                let _ = slot.fire(agent_id, AgentEvent::ExecutionFailed { reason: reason.clone() });
            }
            return (TaskOutcome::ExecutionFailed { reason }, Vec::new());
        };
        let timeout = self.config.execution_timeout();

        debug!(agent_id = %agent_id, task_id = %task.id, "Optimizing");
        let optimized = {
            let (agent, task, workspace) = (agent.clone(), task.clone(), workspace.clone());
            offload(timeout, async move { agent.optimize(&task, &workspace).await }).await
        };

        let result = {
            let mut state = self.state.lock().await;
            let Some(slot) = state.slot_on_task(agent_id, &task.id) else {
                return (cancelled(), Vec::new());
            };
            match optimized {
                Ok(result) => {
                    if let Err(e) = slot.fire(agent_id, AgentEvent::ExecutionSucceeded) {
                        return (TaskOutcome::Cancelled { reason: e.to_string() }, Vec::new());
                    }
                    result
                }
                Err(reason) => {
                    let _ = slot.fire(agent_id, AgentEvent::ExecutionFailed { reason: reason.clone() });
                    return (TaskOutcome::ExecutionFailed { reason }, Vec::new());
                }
            }
        };

        debug!(agent_id = %agent_id, task_id = %task.id, summary = %result.summary, "Validating");
        let validated = {
            let (agent, task, workspace) = (agent.clone(), task.clone(), workspace.clone());
            offload(timeout, async move { agent.validate(&task, &workspace, &result).await })
                .await
        };

        let mut state = self.state.lock().await;
        let Some(slot) = state.slot_on_task(agent_id, &task.id) else {
            return (cancelled(), Vec::new());
        };
        match validated {
            Ok(validation) if validation.passed => {
                if let Err(e) = slot.fire(agent_id, AgentEvent::ValidationPassed) {
                    return (TaskOutcome::Cancelled { reason: e.to_string() }, validation.warnings);
                }
                (TaskOutcome::AwaitingApproval, validation.warnings)
            }
            Ok(validation) => {
                let _ = slot.fire(
                    agent_id,
                    AgentEvent::ValidationFailed {
                        errors: validation.errors.clone(),
                    },
                );
                (
                    TaskOutcome::ValidationFailed {
                        errors: validation.errors,
                    },
                    validation.warnings,
                )
            }
            Err(reason) => {
                let _ = slot.fire(agent_id, AgentEvent::ExecutionFailed { reason: reason.clone() });
                (TaskOutcome::ExecutionFailed { reason }, Vec::new())
            }
        }
    }

    /// Derive a patch from the workspace of an agent waiting for approval.
    pub async fn build_patch(&self, agent_id: &str) -> Result<PatchOutcome> {
        let (workspace, task_id) = {
            let state = self.state.lock().await;
            let slot = state.slot(agent_id)?;
            let status = slot.status();
            let data = slot.lifecycle.data();
            match (&data.workspace, &data.current_task, status) {
                (Some(ws), Some(task), AgentStatus::WaitingApproval) => {
                    (ws.clone(), task.id.clone())
                }
                _ => return Err(invalid_state(agent_id, AgentStatus::WaitingApproval, status)),
            }
        };

        let outcome = self.builder.build_outcome(&workspace, agent_id, &task_id)?;
        Ok(match outcome {
            PatchOutcome::Built(mut patch) => {
                patch.validated = true;
                PatchOutcome::Built(patch)
            }
            PatchOutcome::EmptyChange => PatchOutcome::EmptyChange,
        })
    }

    /// Check `patch` against the other in-flight agents, resolve conflicts
    /// and hand it to change control as a pending change.
    pub async fn submit_patch(&self, agent_id: &str, patch: Patch) -> Result<TaskOutcome> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span(
            "submit_patch",
            Some(agent_id),
            Some(patch.task_id()),
            Some(&correlation_id),
        );
        async move {
            let (patch, conflicts) = {
                let mut state = self.state.lock().await;
                let slot = state.slot(agent_id)?;
                let status = slot.status();
                if status != AgentStatus::WaitingApproval {
                    return Err(invalid_state(agent_id, AgentStatus::WaitingApproval, status));
                }
                if slot.current_task_id() != Some(patch.task_id()) {
                    return Err(PatchworkError::TaskNotFound {
                        task_id: patch.task_id().to_string(),
                    });
                }
                if slot.busy || state.pending.values().any(|p| p.agent_id == agent_id) {
                    return Err(PatchworkError::AgentBusy {
                        agent_id: agent_id.to_string(),
                        status: format!("{status} (patch already submitted)"),
                    });
                }

                let agents: Vec<AgentState> = state
                    .agents
                    .iter()
                    .map(|(id, slot)| slot.snapshot(id))
                    .collect();
                let conflicts = state.resolver.check(&patch, &agents);
                let resolved = state.resolver.resolve(patch, conflicts);
                state.slot_mut(agent_id)?.busy = true;
                resolved
            };

            let created = match self.changes.create_change(&patch).await {
                Ok(change_id) => self
                    .changes
                    .check_approval(&change_id)
                    .await
                    .map(|status| (change_id, status)),
                Err(e) => Err(e),
            };

            let mut state = self.state.lock().await;
            if let Some(slot) = state.agents.get_mut(agent_id) {
                slot.busy = false;
            }
            let (change_id, status) = created?;
            if status != ApprovalStatus::Pending {
                return Err(PatchworkError::InvalidChangeState {
                    change_id,
                    expected: ApprovalStatus::Pending.to_string(),
                    actual: status.to_string(),
                });
            }
            if let Some(holder) = state.pending.get(&change_id) {
                return Err(PatchworkError::InvalidChangeState {
                    expected: "not yet submitted".to_string(),
                    actual: format!("pending for {}", holder.agent_id),
                    change_id,
                });
            }

            let escalated = patch.requires_manual_review();
            state.pending.insert(
                change_id.clone(),
                PendingApproval {
                    change_id: change_id.clone(),
                    patch_id: patch.patch_id().to_string(),
                    agent_id: agent_id.to_string(),
                    task_id: patch.task_id().to_string(),
                    requires_manual_review: escalated,
                    submitted_at: Utc::now(),
                },
            );
            info!(
                agent_id = %agent_id,
                change_id = %change_id,
                patch_id = %patch.patch_id(),
                backend = self.changes.backend(),
                conflicts = conflicts.len(),
                escalated,
                "Patch submitted for approval"
            );

            Ok(TaskOutcome::Submitted {
                change_id,
                patch_id: patch.patch_id().to_string(),
                conflicts,
                escalated,
            })
        }
        .instrument(span)
        .await
    }

    /// Execute, build and submit in one go.
    ///
    /// An empty workspace or a failed build/submit closes the task and frees
    /// the agent; the report says what happened.
    pub async fn run_task(&self, agent_id: &str) -> Result<TaskReport> {
        let started = Instant::now();
        let mut report = self.execute_task(agent_id).await?;
        if report.outcome != TaskOutcome::AwaitingApproval {
            return Ok(report);
        }

        let task_id = report.task_id.clone();
        report.outcome = match self.build_patch(agent_id).await {
            Ok(PatchOutcome::Built(patch)) => match self.submit_patch(agent_id, *patch).await {
                Ok(outcome) => outcome,
                Err(e) => self.abandon(agent_id, &task_id, e).await,
            },
            Ok(PatchOutcome::EmptyChange) => {
                info!(agent_id = %agent_id, task_id = %task_id, "Agent made no changes");
                self.finalize(
                    agent_id,
                    &task_id,
                    FinalOutcome::Rejected {
                        reason: "no changes".to_string(),
                    },
                )
                .await;
                TaskOutcome::EmptyChange
            }
            Err(e) => self.abandon(agent_id, &task_id, e).await,
        };
        report.duration = started.elapsed();
        report.finished_at = Utc::now();
        Ok(report)
    }

    async fn abandon(&self, agent_id: &str, task_id: &str, err: PatchworkError) -> TaskOutcome {
        let reason = err.to_string();
        error!(agent_id = %agent_id, task_id = %task_id, error = %reason, "Could not submit patch");
        self.finalize(
            agent_id,
            task_id,
            FinalOutcome::Rejected {
                reason: reason.clone(),
            },
        )
        .await;
        TaskOutcome::ExecutionFailed { reason }
    }

    /// Free the workspace of an agent waiting on `task_id` and move it back
    /// to IDLE.
    async fn finalize(&self, agent_id: &str, task_id: &str, outcome: FinalOutcome) -> bool {
        {
            let mut state = self.state.lock().await;
            let Some(slot) = state.slot_on_task(agent_id, task_id) else {
                debug!(agent_id = %agent_id, task_id = %task_id, "Agent no longer on task, nothing to finalize");
                return false;
            };
            let status = slot.status();
            if status != AgentStatus::WaitingApproval {
                warn!(agent_id = %agent_id, status = %status, "Could not finalize task");
                return false;
            }
        }

        // still WAITING_APPROVAL; only IDLE agents get a new workspace
        self.workspaces.release(agent_id);

        let mut state = self.state.lock().await;
        let Some(slot) = state.slot_on_task(agent_id, task_id) else {
            return false;
        };
        if let Err(e) = slot.fire(agent_id, AgentEvent::Finalize(outcome)) {
            warn!(agent_id = %agent_id, error = %e, "Could not finalize task");
            return false;
        }
        drop(state);

        self.idle_signal.notify_waiters();
        true
    }

    /// Approve a pending change and apply it to `target`.
    ///
    /// `Ok(false)` means the dry run failed: nothing was applied and the
    /// change stays pending.
    pub async fn approve_patch(&self, change_id: &str, target: &Path) -> Result<bool> {
        let pending = self.pending_change(change_id).await?;
        let span = create_coordination_span(
            "approve_patch",
            Some(&pending.agent_id),
            Some(&pending.task_id),
            Some(&generate_correlation_id()),
        );
        async move {
            self.changes.decide(change_id, Decision::Approve).await?;
            if !self.changes.apply_change(change_id, target).await? {
                warn!(change_id = %change_id, target = %target.display(), "Approved change does not apply, left pending");
                return Ok(false);
            }

            self.state.lock().await.pending.remove(change_id);
            self.finalize(&pending.agent_id, &pending.task_id, FinalOutcome::Applied)
                .await;
            info!(change_id = %change_id, agent_id = %pending.agent_id, "Change approved and applied");
            Ok(true)
        }
        .instrument(span)
        .await
    }

    pub async fn reject_patch(&self, change_id: &str, reason: &str) -> Result<()> {
        let pending = self.pending_change(change_id).await?;
        self.changes
            .decide(
                change_id,
                Decision::Reject {
                    reason: reason.to_string(),
                },
            )
            .await?;

        self.state.lock().await.pending.remove(change_id);
        self.finalize(
            &pending.agent_id,
            &pending.task_id,
            FinalOutcome::Rejected {
                reason: reason.to_string(),
            },
        )
        .await;
        info!(change_id = %change_id, agent_id = %pending.agent_id, reason = %reason, "Change rejected");
        Ok(())
    }

    async fn pending_change(&self, change_id: &str) -> Result<PendingApproval> {
        self.state
            .lock()
            .await
            .pending
            .get(change_id)
            .cloned()
            .ok_or_else(|| PatchworkError::PatchNotFound {
                patch_id: change_id.to_string(),
            })
    }

    /// Return an agent in ERROR to IDLE, releasing its workspace.
    pub async fn acknowledge(&self, agent_id: &str) -> Result<()> {
        {
            let state = self.state.lock().await;
            let status = state.slot(agent_id)?.status();
            if status != AgentStatus::Error {
                return Err(invalid_state(agent_id, AgentStatus::Error, status));
            }
        }

        self.workspaces.release(agent_id);

        let mut state = self.state.lock().await;
        state
            .slot_mut(agent_id)?
            .fire(agent_id, AgentEvent::Finalize(FinalOutcome::Acknowledged))?;
        drop(state);

        self.idle_signal.notify_waiters();
        Ok(())
    }

    /// Undo an applied change on `target` with its reversal patch.
    pub async fn rollback_patch(&self, change_id: &str, target: &Path) -> Result<Patch> {
        let span = create_coordination_span(
            "rollback_patch",
            None,
            None,
            Some(&generate_correlation_id()),
        );
        async move {
            let reversal = self.changes.rollback_change(change_id, target).await?;
            info!(change_id = %change_id, reversal_id = %reversal.patch_id(), "Change rolled back");
            Ok(reversal)
        }
        .instrument(span)
        .await
    }

    /// Remove an agent and release its workspace. A task in flight, or one
    /// waiting for approval that was never submitted, is recorded as failed;
    /// a submitted patch stays pending. Returns false when the agent was not
    /// registered.
    pub async fn unregister_agent(&self, agent_id: &str) -> bool {
        let reason = "agent unregistered".to_string();
        let mut state = self.state.lock().await;
        let submitted = state.pending.values().any(|p| p.agent_id == agent_id);
        let Some(mut slot) = state.agents.remove(agent_id) else {
            return false;
        };

        match slot.status() {
            AgentStatus::Working | AgentStatus::Validating => {
                let _ = slot.fire(agent_id, AgentEvent::Cancel { reason });
            }
            // busy means a submission is on its way to pending
            AgentStatus::WaitingApproval if !submitted && !slot.busy => {
                let _ = slot.fire(
                    agent_id,
                    AgentEvent::Finalize(FinalOutcome::Rejected { reason }),
                );
            }
            _ => {}
        }
        let data = slot.lifecycle.data();
        state.retired_completed += data.completed_task_ids.len();
        state.retired_failed += data.failed_task_ids.len();
        drop(state);

        // agent ids are never reused
        let released = self.workspaces.release(agent_id);
        info!(agent_id = %agent_id, released_workspace = released, "Agent unregistered");

        self.idle_signal.notify_waiters();
        true
    }

    pub async fn queue_task(&self, task: Task) {
        let mut state = self.state.lock().await;
        info!(task_id = %task.id, priority = %task.priority, position = state.queue.len(), "Task queued");
        state.queue.push_back(task);
    }

    /// Drain the queue in FIFO order.
    ///
    /// Each assignment spawns the execute → build → submit pipeline; failed
    /// tasks are acknowledged so their agent becomes available again. When
    /// no agent is idle the loop waits for one to return to IDLE. Returns the
    /// reports once the queue is empty and every spawned pipeline finished.
    pub async fn process_queue(&self) -> Result<Vec<TaskReport>> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("process_queue", None, None, Some(&correlation_id));
        async move {
            let mut pipelines: Vec<JoinHandle<Result<TaskReport>>> = Vec::new();
            let mut reports = Vec::new();

            loop {
                let notified = self.idle_signal.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                {
                    let mut state = self.state.lock().await;
                    if state.queue.is_empty() {
                        break;
                    }
                    if state.agents.is_empty() {
                        warn!(queued = state.queue.len(), "No agents registered, leaving tasks queued");
                        break;
                    }

                    let idle = state
                        .agents
                        .iter()
                        .find(|(_, slot)| slot.status() == AgentStatus::Idle)
                        .map(|(id, _)| id.clone());

                    if let Some(agent_id) = idle {
                        if let Some(task) = state.queue.pop_front() {
                            let task_id = task.id.clone();
                            match self.assign_locked(&mut state, &agent_id, task.clone()) {
                                Ok(_) => {
                                    let this = self.clone();
                                    pipelines.push(tokio::spawn(async move {
                                        this.pipeline(agent_id).await
                                    }));
                                    continue;
                                }
                                Err(e) if e.is_retryable() => {
                                    debug!(task_id = %task_id, error = %e, "Assignment deferred");
                                    state.queue.push_front(task);
                                }
                                Err(e) => {
                                    error!(task_id = %task_id, agent_id = %agent_id, error = %e, "Task could not be assigned");
                                    reports.push(TaskReport {
                                        agent_id,
                                        task_id,
                                        outcome: TaskOutcome::ExecutionFailed {
                                            reason: e.to_string(),
                                        },
                                        warnings: Vec::new(),
                                        duration: Duration::ZERO,
                                        finished_at: Utc::now(),
                                    });
                                    continue;
                                }
                            }
                        }
                    }
                }

                notified.await;
            }

            for pipeline in pipelines {
                match pipeline.await {
                    Ok(Ok(report)) => reports.push(report),
                    Ok(Err(e)) => error!(error = %e, "Task pipeline failed"),
                    Err(e) => error!(error = %e, "Task pipeline panicked"),
                }
            }
            info!(reports = reports.len(), "Queue drained");
            Ok(reports)
        }
        .instrument(span)
        .await
    }

    async fn pipeline(&self, agent_id: String) -> Result<TaskReport> {
        let report = self.run_task(&agent_id).await?;
        if report.outcome.is_failure() {
            match self.acknowledge(&agent_id).await {
                Ok(()) => debug!(agent_id = %agent_id, "Failure acknowledged"),
                Err(e) => debug!(agent_id = %agent_id, error = %e, "Nothing to acknowledge"),
            }
        }
        Ok(report)
    }

    pub async fn agent_state(&self, agent_id: &str) -> Result<AgentState> {
        let state = self.state.lock().await;
        Ok(state.slot(agent_id)?.snapshot(agent_id))
    }

    pub async fn list_agents(&self) -> Vec<AgentState> {
        let state = self.state.lock().await;
        state
            .agents
            .iter()
            .map(|(id, slot)| slot.snapshot(id))
            .collect()
    }

    pub async fn pending_approvals(&self) -> Vec<PendingApproval> {
        self.state.lock().await.pending.values().cloned().collect()
    }

    /// Every conflict resolved so far, oldest first.
    pub async fn conflict_log(&self) -> Vec<ConflictInfo> {
        self.state.lock().await.resolver.log().to_vec()
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let state = self.state.lock().await;
        let mut stats = CoordinatorStats {
            registered_agents: state.agents.len(),
            queued_tasks: state.queue.len(),
            pending_approvals: state.pending.len(),
            completed_tasks: state.retired_completed,
            failed_tasks: state.retired_failed,
            active_workspaces: self.workspaces.active_count(),
            ..CoordinatorStats::default()
        };
        for slot in state.agents.values() {
            match slot.status() {
                AgentStatus::Idle => stats.idle_agents += 1,
                AgentStatus::Working => stats.working_agents += 1,
                AgentStatus::Validating => stats.validating_agents += 1,
                AgentStatus::WaitingApproval => stats.waiting_approval_agents += 1,
                AgentStatus::Error => stats.error_agents += 1,
            }
            let data = slot.lifecycle.data();
            stats.completed_tasks += data.completed_task_ids.len();
            stats.failed_tasks += data.failed_task_ids.len();
        }
        let log = state.resolver.log();
        stats.conflicts_detected = log.len();
        stats.escalated_conflicts = log
            .iter()
            .filter(|c| c.resolution == Some(Resolution::Escalated))
            .count();
        stats
    }

    /// Unregister every agent and close the worker pool. Returns the number
    /// of agents removed.
    pub async fn shutdown(&self) -> usize {
        let agent_ids: Vec<String> = self.state.lock().await.agents.keys().cloned().collect();
        let mut removed = 0;
        for agent_id in &agent_ids {
            if self.unregister_agent(agent_id).await {
                removed += 1;
            }
        }
        self.worker_pool.close();
        self.idle_signal.notify_waiters();
        info!(removed, "Coordinator shut down");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{OptimizationResult, ValidationResult};
    use crate::workspace::MockWorkspaceProvider;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Panic,
        Hang,
        RejectValidation,
    }

    struct ScriptedAgent {
        behavior: Behavior,
    }

    #[async_trait]
    impl OptimizerAgent for ScriptedAgent {
        fn name(&self) -> &str {
            "scripted"
        }

        fn strategy(&self) -> StrategyKind {
            StrategyKind::TestDriven
        }

        async fn optimize(
            &self,
            _task: &Task,
            _workspace: &WorkspaceRef,
        ) -> anyhow::Result<OptimizationResult> {
            match self.behavior {
                Behavior::Fail => anyhow::bail!("model unavailable"),
                Behavior::Panic => panic!("strategy bug"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(OptimizationResult::default())
                }
                Behavior::Succeed | Behavior::RejectValidation => Ok(OptimizationResult {
                    summary: "done".to_string(),
                    ..OptimizationResult::default()
                }),
            }
        }

        async fn validate(
            &self,
            _task: &Task,
            _workspace: &WorkspaceRef,
            _result: &OptimizationResult,
        ) -> anyhow::Result<ValidationResult> {
            Ok(match self.behavior {
                Behavior::RejectValidation => ValidationResult::fail(vec!["tests fail".to_string()]),
                _ => ValidationResult {
                    passed: true,
                    errors: Vec::new(),
                    warnings: vec!["slow".to_string()],
                },
            })
        }
    }

    /// In-memory workspaces under a temp directory.
    #[derive(Default)]
    struct FakeWorkspaces {
        root: PathBuf,
        live: StdMutex<HashMap<String, WorkspaceRef>>,
        released: StdMutex<usize>,
    }

    impl WorkspaceProvider for FakeWorkspaces {
        fn create(&self, agent_id: &str, base_revision: &str) -> Result<WorkspaceRef> {
            let workspace = WorkspaceRef {
                agent_id: agent_id.to_string(),
                name: agent_id.to_string(),
                path: self.root.join(agent_id),
                branch: format!("patchwork/{agent_id}"),
                base_revision: base_revision.to_string(),
                created_at: Utc::now(),
            };
            self.live
                .lock()
                .unwrap()
                .insert(agent_id.to_string(), workspace.clone());
            Ok(workspace)
        }

        fn release(&self, agent_id: &str) -> bool {
            let removed = self.live.lock().unwrap().remove(agent_id).is_some();
            if removed {
                *self.released.lock().unwrap() += 1;
            }
            removed
        }

        fn get(&self, agent_id: &str) -> Option<WorkspaceRef> {
            self.live.lock().unwrap().get(agent_id).cloned()
        }

        fn active_count(&self) -> usize {
            self.live.lock().unwrap().len()
        }
    }

    async fn coordinator(
        max_agents: usize,
        timeout_seconds: u64,
    ) -> (TempDir, Arc<FakeWorkspaces>, Coordinator) {
        let dir = TempDir::new().unwrap();
        let mut config = PatchworkConfig::default();
        config.coordinator.max_concurrent_agents = max_agents;
        config.coordinator.execution_timeout_seconds = timeout_seconds;

        let workspaces = Arc::new(FakeWorkspaces {
            root: dir.path().join("ws"),
            ..FakeWorkspaces::default()
        });
        let changes = Arc::new(PatchChangeController::open(dir.path().join("store")).await.unwrap());
        let coordinator = Coordinator::new(&config, workspaces.clone(), changes);
        (dir, workspaces, coordinator)
    }

    fn agent(behavior: Behavior) -> Arc<dyn OptimizerAgent> {
        Arc::new(ScriptedAgent { behavior })
    }

    #[tokio::test]
    async fn register_respects_pool_limit() {
        let (_dir, _ws, coordinator) = coordinator(2, 0).await;
        assert_eq!(coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap(), "agent001");
        assert_eq!(coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap(), "agent002");

        let err = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap_err();
        assert!(matches!(err, PatchworkError::CapacityExceeded { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn assign_rejects_unknown_and_busy_agents() {
        let (_dir, ws, coordinator) = coordinator(2, 0).await;
        let id = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap();

        assert!(matches!(
            coordinator.assign_task("agent999", Task::new("t1", "x")).await,
            Err(PatchworkError::AgentNotFound { .. })
        ));

        coordinator.assign_task(&id, Task::new("t1", "x")).await.unwrap();
        let state = coordinator.agent_state(&id).await.unwrap();
        assert_eq!(state.status, AgentStatus::Working);
        assert_eq!(state.current_task.unwrap().assigned_agent(), Some(id.as_str()));
        assert_eq!(ws.active_count(), 1);

        assert!(matches!(
            coordinator.assign_task(&id, Task::new("t2", "y")).await,
            Err(PatchworkError::AgentBusy { .. })
        ));
    }

    #[tokio::test]
    async fn the_same_task_is_never_held_by_two_agents() {
        let (_dir, _ws, coordinator) = coordinator(2, 0).await;
        let a = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap();
        let b = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap();

        coordinator.assign_task(&a, Task::new("t1", "x")).await.unwrap();
        assert!(matches!(
            coordinator.assign_task(&b, Task::new("t1", "x")).await,
            Err(PatchworkError::TaskAlreadyAssigned { .. })
        ));
    }

    #[tokio::test]
    async fn successful_execution_waits_for_approval() {
        let (_dir, _ws, coordinator) = coordinator(1, 0).await;
        let id = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap();
        coordinator.assign_task(&id, Task::new("t1", "x")).await.unwrap();

        let report = coordinator.execute_task(&id).await.unwrap();
        assert_eq!(report.outcome, TaskOutcome::AwaitingApproval);
        assert_eq!(report.warnings, vec!["slow".to_string()]);
        assert_eq!(
            coordinator.agent_state(&id).await.unwrap().status,
            AgentStatus::WaitingApproval
        );
    }

    #[tokio::test]
    async fn agent_errors_become_failed_reports() {
        let (_dir, _ws, coordinator) = coordinator(1, 0).await;
        let id = coordinator.register_agent(agent(Behavior::Fail)).await.unwrap();
        coordinator.assign_task(&id, Task::new("t1", "x")).await.unwrap();

        let report = coordinator.execute_task(&id).await.unwrap();
        assert!(matches!(
            report.outcome,
            TaskOutcome::ExecutionFailed { ref reason } if reason.contains("model unavailable")
        ));
        let state = coordinator.agent_state(&id).await.unwrap();
        assert_eq!(state.status, AgentStatus::Error);
        assert_eq!(state.failed_task_ids, vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn panicking_agent_does_not_take_down_the_coordinator() {
        let (_dir, _ws, coordinator) = coordinator(1, 0).await;
        let id = coordinator.register_agent(agent(Behavior::Panic)).await.unwrap();
        coordinator.assign_task(&id, Task::new("t1", "x")).await.unwrap();

        let report = coordinator.execute_task(&id).await.unwrap();
        assert_eq!(
            report.outcome,
            TaskOutcome::ExecutionFailed {
                reason: "agent panicked".to_string()
            }
        );
        assert_eq!(coordinator.stats().await.error_agents, 1);
    }

    #[tokio::test]
    async fn slow_agent_times_out() {
        let (_dir, _ws, coordinator) = coordinator(1, 1).await;
        let id = coordinator.register_agent(agent(Behavior::Hang)).await.unwrap();
        coordinator.assign_task(&id, Task::new("t1", "x")).await.unwrap();

        let report = coordinator.execute_task(&id).await.unwrap();
        assert!(matches!(
            report.outcome,
            TaskOutcome::ExecutionFailed { ref reason } if reason.contains("did not complete")
        ));
    }

    #[tokio::test]
    async fn failed_validation_moves_agent_to_error_until_acknowledged() {
        let (_dir, ws, coordinator) = coordinator(1, 0).await;
        let id = coordinator.register_agent(agent(Behavior::RejectValidation)).await.unwrap();
        coordinator.assign_task(&id, Task::new("t1", "x")).await.unwrap();

        let report = coordinator.execute_task(&id).await.unwrap();
        assert_eq!(
            report.outcome,
            TaskOutcome::ValidationFailed {
                errors: vec!["tests fail".to_string()]
            }
        );
        // the workspace is kept for inspection until acknowledged
        assert_eq!(ws.active_count(), 1);

        coordinator.acknowledge(&id).await.unwrap();
        let state = coordinator.agent_state(&id).await.unwrap();
        assert_eq!(state.status, AgentStatus::Idle);
        assert!(state.current_task.is_none());
        assert_eq!(ws.active_count(), 0);

        assert!(matches!(
            coordinator.acknowledge(&id).await,
            Err(PatchworkError::InvalidAgentState { .. })
        ));
    }

    #[tokio::test]
    async fn execute_requires_a_working_agent() {
        let (_dir, _ws, coordinator) = coordinator(1, 0).await;
        let id = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap();
        assert!(matches!(
            coordinator.execute_task(&id).await,
            Err(PatchworkError::InvalidAgentState { .. })
        ));
    }

    #[tokio::test]
    async fn unregister_releases_workspace_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut workspaces = MockWorkspaceProvider::new();
        workspaces.expect_create().returning(|agent_id, base| {
            Ok(WorkspaceRef {
                agent_id: agent_id.to_string(),
                name: agent_id.to_string(),
                path: PathBuf::from("/nonexistent").join(agent_id),
                branch: format!("patchwork/{agent_id}"),
                base_revision: base.to_string(),
                created_at: Utc::now(),
            })
        });
        workspaces.expect_release().times(1).return_const(true);
        workspaces.expect_active_count().return_const(0usize);

        let changes = Arc::new(PatchChangeController::open(dir.path()).await.unwrap());
        let coordinator = Coordinator::new(&PatchworkConfig::default(), Arc::new(workspaces), changes);
        let id = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap();
        coordinator.assign_task(&id, Task::new("t1", "x")).await.unwrap();

        assert!(coordinator.unregister_agent(&id).await);
        assert!(!coordinator.unregister_agent(&id).await);
        assert!(matches!(
            coordinator.agent_state(&id).await,
            Err(PatchworkError::AgentNotFound { .. })
        ));
        assert_eq!(coordinator.stats().await.failed_tasks, 1);
    }

    #[tokio::test]
    async fn unregistering_an_unsubmitted_waiting_agent_counts_a_failure() {
        let (_dir, ws, coordinator) = coordinator(1, 0).await;
        let id = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap();
        coordinator.assign_task(&id, Task::new("t1", "x")).await.unwrap();
        assert_eq!(
            coordinator.execute_task(&id).await.unwrap().outcome,
            TaskOutcome::AwaitingApproval
        );

        assert!(coordinator.unregister_agent(&id).await);
        let stats = coordinator.stats().await;
        assert_eq!(stats.failed_tasks, 1);
        assert_eq!(stats.completed_tasks, 0);
        assert_eq!(stats.pending_approvals, 0);
        assert_eq!(ws.active_count(), 0);
    }

    #[tokio::test]
    async fn unregistering_the_last_agent_ends_a_waiting_drain() {
        let (_dir, _ws, coordinator) = coordinator(1, 0).await;
        let id = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap();
        coordinator.assign_task(&id, Task::new("t1", "x")).await.unwrap();
        coordinator.queue_task(Task::new("t2", "y")).await;

        let drain = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.process_queue().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(coordinator.unregister_agent(&id).await);

        let reports = tokio::time::timeout(Duration::from_secs(5), drain)
            .await
            .expect("queue drain should stop once no agents remain")
            .unwrap()
            .unwrap();
        assert!(reports.is_empty());
        assert_eq!(coordinator.stats().await.queued_tasks, 1);
    }

    /// Records whether the coordinator lock was free whenever a workspace
    /// was released.
    #[derive(Default)]
    struct LockCheckingWorkspaces {
        inner: FakeWorkspaces,
        coordinator: std::sync::OnceLock<Coordinator>,
        lock_free: StdMutex<Vec<bool>>,
    }

    impl WorkspaceProvider for LockCheckingWorkspaces {
        fn create(&self, agent_id: &str, base_revision: &str) -> Result<WorkspaceRef> {
            self.inner.create(agent_id, base_revision)
        }

        fn release(&self, agent_id: &str) -> bool {
            if let Some(coordinator) = self.coordinator.get() {
                let free = coordinator.state.try_lock().is_ok();
                self.lock_free.lock().unwrap().push(free);
            }
            self.inner.release(agent_id)
        }

        fn get(&self, agent_id: &str) -> Option<WorkspaceRef> {
            self.inner.get(agent_id)
        }

        fn active_count(&self) -> usize {
            self.inner.active_count()
        }
    }

    #[tokio::test]
    async fn workspaces_are_released_outside_the_coordinator_lock() {
        let dir = TempDir::new().unwrap();
        let workspaces = Arc::new(LockCheckingWorkspaces::default());
        let changes = Arc::new(PatchChangeController::open(dir.path()).await.unwrap());
        let mut config = PatchworkConfig::default();
        config.coordinator.max_concurrent_agents = 2;
        let coordinator = Coordinator::new(&config, workspaces.clone(), changes);
        assert!(workspaces.coordinator.set(coordinator.clone()).is_ok());

        let failing = coordinator.register_agent(agent(Behavior::Fail)).await.unwrap();
        coordinator.assign_task(&failing, Task::new("t1", "x")).await.unwrap();
        coordinator.execute_task(&failing).await.unwrap();
        coordinator.acknowledge(&failing).await.unwrap();

        let working = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap();
        coordinator.assign_task(&working, Task::new("t2", "y")).await.unwrap();
        assert!(coordinator.unregister_agent(&working).await);

        assert_eq!(*workspaces.lock_free.lock().unwrap(), vec![true, true]);
        assert_eq!(workspaces.active_count(), 0);
    }

    #[tokio::test]
    async fn queue_with_failing_agent_drains() {
        let (_dir, ws, coordinator) = coordinator(1, 0).await;
        coordinator.register_agent(agent(Behavior::Fail)).await.unwrap();
        for id in ["t1", "t2", "t3"] {
            coordinator.queue_task(Task::new(id, "x")).await;
        }

        let reports = coordinator.process_queue().await.unwrap();
        let order: Vec<_> = reports.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(order, vec!["t1", "t2", "t3"]);
        assert!(reports.iter().all(|r| r.outcome.is_failure()));

        let stats = coordinator.stats().await;
        assert_eq!(stats.queued_tasks, 0);
        assert_eq!(stats.failed_tasks, 3);
        assert_eq!(stats.idle_agents, 1);
        assert_eq!(ws.active_count(), 0);
        assert_eq!(*ws.released.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn queue_without_agents_returns_immediately() {
        let (_dir, _ws, coordinator) = coordinator(1, 0).await;
        coordinator.queue_task(Task::new("t1", "x")).await;
        assert!(coordinator.process_queue().await.unwrap().is_empty());
        assert_eq!(coordinator.stats().await.queued_tasks, 1);
    }

    #[tokio::test]
    async fn shutdown_unregisters_everyone() {
        let (_dir, ws, coordinator) = coordinator(3, 0).await;
        for _ in 0..3 {
            let id = coordinator.register_agent(agent(Behavior::Succeed)).await.unwrap();
            coordinator.assign_task(&id, Task::new(format!("t-{id}"), "x")).await.unwrap();
        }
        assert_eq!(ws.active_count(), 3);

        assert_eq!(coordinator.shutdown().await, 3);
        assert_eq!(ws.active_count(), 0);
        assert!(coordinator.list_agents().await.is_empty());
    }
}
