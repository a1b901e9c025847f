use anyhow::Result as AnyResult;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conflict::Severity;
use crate::error::Result;

/// Main configuration structure for patchwork.
///
/// Built once at process start and handed to the coordinator and its
/// collaborators. There is no process-wide instance.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PatchworkConfig {
    /// Agent pool and execution settings
    pub coordinator: CoordinatorConfig,
    /// Isolated workspace settings
    pub workspace: WorkspaceConfig,
    /// Content store settings
    pub store: StoreConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Ticket-based change control settings
    pub github: GitHubConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Agent pool limit, also the worker pool size
    pub max_concurrent_agents: usize,
    /// Upper bound for a single optimize or validate call, 0 disables
    pub execution_timeout_seconds: u64,
    /// Severity assigned to every detected conflict
    pub conflict_severity: Severity,
    /// Conflicts at or above this severity require manual review
    pub escalation_threshold: Severity,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 4,
            execution_timeout_seconds: 1800, // 30 minutes
            conflict_severity: Severity::Medium,
            escalation_threshold: Severity::Medium,
        }
    }
}

impl CoordinatorConfig {
    pub fn execution_timeout(&self) -> Option<Duration> {
        (self.execution_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.execution_timeout_seconds))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Repository the workspaces are checked out from
    pub repository_path: PathBuf,
    /// Directory holding one worktree per agent
    pub worktree_root: PathBuf,
    /// Revision new workspaces start from
    pub base_revision: String,
    /// Maximum number of live workspaces
    pub max_workspaces: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            repository_path: PathBuf::from("."),
            worktree_root: PathBuf::from(".patchwork/workspaces"),
            base_revision: "HEAD".to_string(),
            max_workspaces: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the content store, patch sidecars and history log
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".patchwork/store"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// GitHub API token (can be set via env var)
    pub token: Option<String>,
    /// Repository owner
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Rate limiting settings
    pub rate_limit: RateLimitConfig,
    /// How long approval lookups are cached
    pub cache_ttl_seconds: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            owner: String::new(),
            repo: String::new(),
            rate_limit: RateLimitConfig::default(),
            cache_ttl_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per hour limit
    pub requests_per_hour: u32,
    /// Burst capacity
    pub burst_capacity: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_hour: 5000,
            burst_capacity: 100,
        }
    }
}

impl PatchworkConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. `patchwork.toml` in the working directory, or `explicit` when given
    /// 3. Environment variables (prefixed with `PATCHWORK__`, `__` between keys)
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        builder = match explicit {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("patchwork").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("PATCHWORK")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: PatchworkConfig = builder.build()?.try_deserialize()?;

        if loaded.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                loaded.github.token = Some(token);
            }
        }

        tracing::debug!(
            max_concurrent_agents = loaded.coordinator.max_concurrent_agents,
            store_root = %loaded.store.root.display(),
            "Configuration loaded"
        );
        Ok(loaded)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> AnyResult<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> AnyResult<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
