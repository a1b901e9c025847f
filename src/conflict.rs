//! File-overlap conflict detection between in-flight agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use crate::config::CoordinatorConfig;
use crate::coordinator::{AgentState, AgentStatus};
use crate::patch::Patch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    AutoMerged,
    Escalated,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::AutoMerged => write!(f, "auto-merged"),
            Resolution::Escalated => write!(f, "escalated"),
        }
    }
}

/// Audit record of one overlap between a candidate patch and another
/// agent's in-flight task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// Candidate patch id
    pub patch_a: String,
    pub task_a: String,
    pub agent_a: String,
    /// The other side has no patch yet, so this is its in-flight task id
    pub patch_b: String,
    pub agent_b: String,
    pub overlapping_files: Vec<String>,
    pub severity: Severity,
    /// Written once, by [`ConflictResolver::resolve`]
    pub resolution: Option<Resolution>,
    pub detected_at: DateTime<Utc>,
}

/// Detects overlaps and applies the escalation policy.
///
/// Every resolved conflict lands in an append-only log, kept in memory and
/// optionally mirrored to a JSON-lines file.
#[derive(Debug)]
pub struct ConflictResolver {
    severity: Severity,
    escalation_threshold: Severity,
    log: Vec<ConflictInfo>,
    audit_file: Option<PathBuf>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(Severity::Medium, Severity::Medium)
    }
}

impl ConflictResolver {
    /// `severity` is assigned to every conflict; conflicts at or above
    /// `escalation_threshold` need manual review.
    pub fn new(severity: Severity, escalation_threshold: Severity) -> Self {
        Self {
            severity,
            escalation_threshold,
            log: Vec::new(),
            audit_file: None,
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.conflict_severity, config.escalation_threshold)
    }

    pub fn with_audit_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_file = Some(path.into());
        self
    }

    /// Conflicts between `candidate` and every other agent currently WORKING.
    ///
    /// The candidate's own agent and agents on the same task are skipped.
    /// At most one record per other agent.
    pub fn check<'a, I>(&self, candidate: &Patch, agents: I) -> Vec<ConflictInfo>
    where
        I: IntoIterator<Item = &'a AgentState>,
    {
        let mut conflicts = Vec::new();
        for agent in agents {
            if agent.status != AgentStatus::Working || agent.agent_id == candidate.creator_agent_id() {
                continue;
            }
            let Some(task) = &agent.current_task else {
                continue;
            };
            if task.id == candidate.task_id() {
                continue;
            }

            let overlapping_files: Vec<String> = candidate
                .target_files()
                .iter()
                .filter(|f| task.target_file_set.contains(*f))
                .cloned()
                .collect();
            if overlapping_files.is_empty() {
                continue;
            }

            conflicts.push(ConflictInfo {
                patch_a: candidate.patch_id().to_string(),
                task_a: candidate.task_id().to_string(),
                agent_a: candidate.creator_agent_id().to_string(),
                patch_b: task.id.clone(),
                agent_b: agent.agent_id.clone(),
                overlapping_files,
                severity: self.severity,
                resolution: None,
                detected_at: Utc::now(),
            });
        }
        conflicts
    }

    /// Decide each conflict and annotate the patch.
    ///
    /// Below the threshold a conflict is auto-merged and the patch passes
    /// unchanged. At or above it the patch is flagged for manual review.
    pub fn resolve(&mut self, mut patch: Patch, conflicts: Vec<ConflictInfo>) -> (Patch, Vec<ConflictInfo>) {
        let mut resolved = Vec::with_capacity(conflicts.len());

        for mut conflict in conflicts {
            let resolution = *conflict.resolution.get_or_insert(
                if conflict.severity >= self.escalation_threshold {
                    Resolution::Escalated
                } else {
                    Resolution::AutoMerged
                },
            );
            if resolution == Resolution::Escalated {
                patch.set_requires_manual_review(true);
            }

            warn!(
                patch_id = %conflict.patch_a,
                agent_a = %conflict.agent_a,
                agent_b = %conflict.agent_b,
                files = ?conflict.overlapping_files,
                severity = %conflict.severity,
                resolution = %resolution,
                "Conflict between in-flight changes"
            );
            self.append(&conflict);
            resolved.push(conflict);
        }

        (patch, resolved)
    }

    fn append(&mut self, conflict: &ConflictInfo) {
        self.log.push(conflict.clone());

        let Some(path) = &self.audit_file else {
            return;
        };
        let written = serde_json::to_string(conflict)
            .map_err(std::io::Error::other)
            .and_then(|line| {
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                writeln!(file, "{line}")
            });
        match written {
            Ok(()) => info!(path = %path.display(), "Conflict appended to audit log"),
            Err(e) => warn!(path = %path.display(), error = %e, "Could not append conflict to audit file"),
        }
    }

    /// Every conflict resolved so far, oldest first.
    pub fn log(&self) -> &[ConflictInfo] {
        &self.log
    }

    pub fn escalation_threshold(&self) -> Severity {
        self.escalation_threshold
    }
}
