// Patchwork Library - multi-agent patch coordination
// This exposes the core components for testing and integration

pub mod agents;
pub mod change;
pub mod cli;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod patch;
pub mod priority;
pub mod store;
pub mod telemetry;
pub mod workspace;

// Re-export key types for easy access
pub use agents::{CommandAgent, OptimizationResult, OptimizerAgent, StrategyKind, ValidationResult};
pub use change::{
    apply_patch, check_patch, ApprovalStatus, ChangeController, Decision, PatchChangeController,
    TicketChangeController,
};
pub use config::PatchworkConfig;
pub use conflict::{ConflictInfo, ConflictResolver, Resolution, Severity};
pub use coordinator::{
    AgentState, AgentStatus, Coordinator, CoordinatorStats, PendingApproval, Task, TaskOutcome,
    TaskReport,
};
pub use error::{PatchworkError, Result};
pub use patch::{reverse, Patch, PatchBuilder, PatchOutcome};
pub use priority::Priority;
pub use store::{content_address, ContentStore, LocalContentStore, Replicator};
pub use telemetry::{create_coordination_span, generate_correlation_id, init_telemetry};
pub use workspace::{GitWorktreeManager, WorkspaceProvider, WorkspaceRef};
