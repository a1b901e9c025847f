//! Patches: content-addressed units of proposed change.

mod builder;
pub mod diff;

pub use builder::{reverse, PatchBuilder};
pub use diff::UnifiedDiff;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{PatchworkError, Result};
use crate::store::content_address;
use crate::workspace::WorkspaceRef;

/// Metadata key set when a conflict escalated the patch.
pub const REQUIRES_MANUAL_REVIEW: &str = "requires_manual_review";
/// Metadata key naming the patch a reversal undoes.
pub const REVERSES: &str = "reverses";

/// A diff plus the metadata needed to route it through change control.
///
/// The identity fields are fixed at construction: `patch_id` is the content
/// address of [`Patch::canonical_bytes`] and `target_files` is always derived
/// from the diff. Only `validated`, `applied`, `workspace` and `metadata`
/// change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    patch_id: String,
    creator_agent_id: String,
    task_id: String,
    diff_content: String,
    target_files: Vec<String>,
    created_at: DateTime<Utc>,
    parent_patch_ids: Vec<String>,
    pub workspace: Option<WorkspaceRef>,
    pub validated: bool,
    pub applied: bool,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Hashed part of a patch.
#[derive(Serialize, Deserialize)]
struct CanonicalPatch {
    diff: String,
    task_id: String,
    parent_patch_ids: Vec<String>,
}

impl Patch {
    /// Construct a patch from diff text.
    ///
    /// Fails with `EmptyPatch` when the diff has no file sections and with
    /// `InvalidDiff` when it cannot be parsed. Parents are referenced by
    /// address only.
    pub fn new(
        diff_content: impl Into<String>,
        creator_agent_id: impl Into<String>,
        task_id: impl Into<String>,
        parent_patch_ids: Vec<String>,
    ) -> Result<Self> {
        let diff_content = diff_content.into();
        let task_id = task_id.into();

        let parsed = UnifiedDiff::parse(&diff_content)?;
        if parsed.is_empty() {
            return Err(PatchworkError::EmptyPatch { task_id });
        }

        let mut parent_patch_ids = parent_patch_ids;
        parent_patch_ids.sort();
        parent_patch_ids.dedup();

        let mut patch = Self {
            patch_id: String::new(),
            creator_agent_id: creator_agent_id.into(),
            task_id,
            target_files: parsed.touched_paths().into_iter().collect(),
            diff_content,
            created_at: Utc::now(),
            parent_patch_ids,
            workspace: None,
            validated: false,
            applied: false,
            metadata: BTreeMap::new(),
        };
        patch.patch_id = content_address(&patch.canonical_bytes()?);
        Ok(patch)
    }

    /// Rebuild a patch from the bytes stored under its address.
    pub fn from_canonical_bytes(
        bytes: &[u8],
        creator_agent_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let canonical: CanonicalPatch = serde_json::from_slice(bytes)?;
        let mut patch = Self::new(
            canonical.diff,
            creator_agent_id,
            canonical.task_id,
            canonical.parent_patch_ids,
        )?;
        patch.created_at = created_at;
        Ok(patch)
    }

    /// Bytes whose content address is the patch id.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let canonical = CanonicalPatch {
            diff: self.diff_content.clone(),
            task_id: self.task_id.clone(),
            parent_patch_ids: self.parent_patch_ids.clone(),
        };
        Ok(serde_json::to_vec(&canonical)?)
    }

    /// Check that the id and file list still match the diff, e.g. after
    /// loading a sidecar from disk.
    pub fn verify(&self) -> Result<()> {
        let expected = content_address(&self.canonical_bytes()?);
        if expected != self.patch_id {
            return Err(PatchworkError::Storage(format!(
                "patch {} does not match its content (expected {expected})",
                self.patch_id
            )));
        }
        let files: Vec<String> = self.diff()?.touched_paths().into_iter().collect();
        if files != self.target_files {
            return Err(PatchworkError::Storage(format!(
                "patch {} lists files that differ from its diff",
                self.patch_id
            )));
        }
        Ok(())
    }

    pub fn patch_id(&self) -> &str {
        &self.patch_id
    }

    pub fn creator_agent_id(&self) -> &str {
        &self.creator_agent_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn diff_content(&self) -> &str {
        &self.diff_content
    }

    pub fn target_files(&self) -> &[String] {
        &self.target_files
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn parent_patch_ids(&self) -> &[String] {
        &self.parent_patch_ids
    }

    pub fn diff(&self) -> Result<UnifiedDiff> {
        UnifiedDiff::parse(&self.diff_content)
    }

    pub fn requires_manual_review(&self) -> bool {
        self.metadata
            .get(REQUIRES_MANUAL_REVIEW)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_requires_manual_review(&mut self, required: bool) {
        self.metadata
            .insert(REQUIRES_MANUAL_REVIEW.to_string(), serde_json::Value::Bool(required));
    }

    pub fn short_id(&self) -> &str {
        &self.patch_id[..self.patch_id.len().min(12)]
    }
}

/// Result of building a patch from a workspace.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    Built(Box<Patch>),
    /// The workspace has no changes relative to its base.
    EmptyChange,
}
