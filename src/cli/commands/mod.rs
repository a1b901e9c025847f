use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::change::PatchChangeController;
use crate::config::PatchworkConfig;

pub mod patches;
pub mod run;
pub mod status;
pub mod store;

pub use patches::{ApplyCommand, HistoryCommand, RollbackCommand, ShowCommand};
pub use run::RunCommand;
pub use status::StatusCommand;
pub use store::{GetCommand, PinCommand, PutCommand};

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

pub async fn open_controller(config: &PatchworkConfig) -> Result<PatchChangeController> {
    PatchChangeController::open(&config.store.root)
        .await
        .with_context(|| format!("opening store at {}", config.store.root.display()))
}

/// `target` or the configured repository.
pub fn target_or_repository(target: Option<&Path>, config: &PatchworkConfig) -> PathBuf {
    target
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.workspace.repository_path.clone())
}
