use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::apply::{apply_patch, apply_patch_strict};
use super::history::{HistoryKind, HistoryRecord, PatchHistory};
use super::{ApprovalStatus, ChangeController, Decision};
use crate::error::{PatchworkError, Result};
use crate::patch::{reverse, Patch, REVERSES};
use crate::store::{is_valid_address, ContentStore, LocalContentStore};

/// Metadata stored next to each patch's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSidecar {
    pub change_id: String,
    pub patch: Patch,
    pub status: ApprovalStatus,
    pub rejection_reason: Option<String>,
    /// Reversal patch that rolled this one back
    pub rolled_back_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Change control backed by the content store.
///
/// Layout under `root`:
/// - content store objects (the canonical patch bytes, address == patch id)
/// - `patches/<patch_id>.json` sidecar with status and metadata
/// - `history.jsonl` with one record per created patch
///
/// The change id is the patch id.
pub struct PatchChangeController {
    store: Arc<dyn ContentStore>,
    patches_dir: PathBuf,
    history: PatchHistory,
    // serializes sidecar read-modify-write cycles
    guard: Mutex<()>,
}

impl PatchChangeController {
    /// Open a controller with a local content store under `root`.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let store = LocalContentStore::open(root.as_ref()).await?;
        Self::new(Arc::new(store), root).await
    }

    pub async fn new<P: AsRef<Path>>(store: Arc<dyn ContentStore>, root: P) -> Result<Self> {
        let root = root.as_ref();
        let patches_dir = root.join("patches");
        tokio::fs::create_dir_all(&patches_dir)
            .await
            .map_err(|e| PatchworkError::storage("creating patches directory", e))?;
        Ok(Self {
            store,
            patches_dir,
            history: PatchHistory::new(root.join("history.jsonl")),
            guard: Mutex::new(()),
        })
    }

    pub fn history(&self) -> &PatchHistory {
        &self.history
    }

    /// History records of every patch created for `task_id`, oldest first.
    pub fn get_patch_history(&self, task_id: &str) -> Result<Vec<HistoryRecord>> {
        self.history.for_task(task_id)
    }

    fn sidecar_path(&self, patch_id: &str) -> PathBuf {
        self.patches_dir.join(format!("{patch_id}.json"))
    }

    pub async fn sidecar(&self, change_id: &str) -> Result<PatchSidecar> {
        let not_found = || PatchworkError::PatchNotFound {
            patch_id: change_id.to_string(),
        };
        if !is_valid_address(change_id) {
            return Err(not_found());
        }
        let bytes = match tokio::fs::read(self.sidecar_path(change_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(PatchworkError::storage("reading sidecar", e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Every recorded patch, oldest first.
    pub async fn list(&self) -> Result<Vec<PatchSidecar>> {
        let mut entries = tokio::fs::read_dir(&self.patches_dir)
            .await
            .map_err(|e| PatchworkError::storage("listing patches", e))?;
        let mut sidecars = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PatchworkError::storage("listing patches", e))?
        {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if is_valid_address(id) {
                sidecars.push(self.sidecar(id).await?);
            }
        }
        sidecars.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sidecars)
    }

    async fn write_sidecar(&self, sidecar: &PatchSidecar) -> Result<()> {
        let path = self.sidecar_path(&sidecar.change_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(sidecar)?;
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| PatchworkError::storage("writing sidecar", e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| PatchworkError::storage("committing sidecar", e))?;
        Ok(())
    }

    /// Sidecar patch, checked against the bytes in the content store.
    async fn verified_patch(&self, sidecar: &PatchSidecar) -> Result<Patch> {
        let bytes = self.store.get(&sidecar.change_id).await?;
        let stored = Patch::from_canonical_bytes(
            &bytes,
            sidecar.patch.creator_agent_id(),
            sidecar.patch.created_at(),
        )?;
        sidecar.patch.verify()?;
        if stored.patch_id() != sidecar.patch.patch_id()
            || stored.diff_content() != sidecar.patch.diff_content()
        {
            return Err(PatchworkError::Storage(format!(
                "sidecar of {} does not match stored content",
                sidecar.change_id
            )));
        }
        Ok(sidecar.patch.clone())
    }

    /// Store `patch` and its sidecar with `status`. A patch seen before only
    /// has its sidecar updated; the history gets one line per patch.
    async fn record(&self, patch: &Patch, status: ApprovalStatus) -> Result<String> {
        let patch_id = patch.patch_id().to_string();

        match self.sidecar(&patch_id).await {
            Ok(mut existing) => {
                debug!(patch_id = %patch_id, status = %existing.status, "Patch already recorded");
                if Self::resubmit(&mut existing, patch, status) {
                    existing.updated_at = Utc::now();
                    self.write_sidecar(&existing).await?;
                }
                return Ok(patch_id);
            }
            Err(PatchworkError::PatchNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let address = self.store.put(&patch.canonical_bytes()?).await?;
        if address != patch_id {
            return Err(PatchworkError::Storage(format!(
                "content address {address} differs from patch id {patch_id}"
            )));
        }

        let now = Utc::now();
        self.write_sidecar(&PatchSidecar {
            change_id: patch_id.clone(),
            patch: patch.clone(),
            status,
            rejection_reason: None,
            rolled_back_by: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

        let kind = if patch.metadata.contains_key(REVERSES) {
            HistoryKind::Reversal
        } else {
            HistoryKind::Created
        };
        self.history.append(&HistoryRecord::for_patch(patch, kind))?;
        self.store.pin(&address).await?;
        Ok(patch_id)
    }

    /// Fold a repeated submission into an existing sidecar. Returns true when
    /// the sidecar changed.
    ///
    /// A rejected or rolled back patch that comes back is pending again, with
    /// the review flag of the new submission. A still pending one keeps the
    /// stricter of the two review flags.
    fn resubmit(existing: &mut PatchSidecar, patch: &Patch, status: ApprovalStatus) -> bool {
        match (existing.status, status) {
            (ApprovalStatus::Rejected | ApprovalStatus::RolledBack, ApprovalStatus::Pending) => {
                info!(
                    patch_id = %existing.change_id,
                    previous = %existing.status,
                    "Resubmitted patch is pending again"
                );
                existing.status = ApprovalStatus::Pending;
                existing.rejection_reason = None;
                existing.rolled_back_by = None;
                existing.patch.applied = false;
                existing
                    .patch
                    .set_requires_manual_review(patch.requires_manual_review());
                true
            }
            (ApprovalStatus::Pending, ApprovalStatus::Pending) => {
                if patch.requires_manual_review() && !existing.patch.requires_manual_review() {
                    existing.patch.set_requires_manual_review(true);
                    true
                } else {
                    false
                }
            }
            (current, ApprovalStatus::Applied) if current != ApprovalStatus::Applied => {
                existing.status = ApprovalStatus::Applied;
                existing.patch.applied = true;
                true
            }
            _ => false,
        }
    }

    fn invalid_state(change_id: &str, expected: &str, actual: ApprovalStatus) -> PatchworkError {
        PatchworkError::InvalidChangeState {
            change_id: change_id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

#[async_trait]
impl ChangeController for PatchChangeController {
    fn backend(&self) -> &'static str {
        "patch"
    }

    async fn create_change(&self, patch: &Patch) -> Result<String> {
        let _guard = self.guard.lock().await;
        let change_id = self.record(patch, ApprovalStatus::Pending).await?;
        info!(
            change_id = %change_id,
            task_id = %patch.task_id(),
            files = ?patch.target_files(),
            manual_review = patch.requires_manual_review(),
            "Change recorded, pending approval"
        );
        Ok(change_id)
    }

    async fn check_approval(&self, change_id: &str) -> Result<ApprovalStatus> {
        Ok(self.sidecar(change_id).await?.status)
    }

    async fn decide(&self, change_id: &str, decision: Decision) -> Result<ApprovalStatus> {
        let _guard = self.guard.lock().await;
        let mut sidecar = self.sidecar(change_id).await?;

        let next = match (sidecar.status, &decision) {
            (ApprovalStatus::Pending, Decision::Approve) => ApprovalStatus::Approved,
            // an approved change that never applied can still be turned down
            (ApprovalStatus::Pending | ApprovalStatus::Approved, Decision::Reject { reason }) => {
                sidecar.rejection_reason = Some(reason.clone());
                ApprovalStatus::Rejected
            }
            (ApprovalStatus::Approved, Decision::Approve)
            | (ApprovalStatus::Rejected, Decision::Reject { .. }) => return Ok(sidecar.status),
            (actual, _) => return Err(Self::invalid_state(change_id, "pending", actual)),
        };

        sidecar.status = next;
        sidecar.updated_at = Utc::now();
        self.write_sidecar(&sidecar).await?;
        info!(change_id = %change_id, status = %next, "Change decided");
        Ok(next)
    }

    async fn apply_change(&self, change_id: &str, target: &Path) -> Result<bool> {
        let _guard = self.guard.lock().await;
        let mut sidecar = self.sidecar(change_id).await?;

        match sidecar.status {
            ApprovalStatus::Approved => {}
            ApprovalStatus::Applied => {
                debug!(change_id = %change_id, "Change already applied");
                return Ok(true);
            }
            actual => return Err(Self::invalid_state(change_id, "approved", actual)),
        }

        let patch = self.verified_patch(&sidecar).await?;
        if !apply_patch(target, patch.diff_content())? {
            return Ok(false);
        }

        sidecar.status = ApprovalStatus::Applied;
        sidecar.patch.applied = true;
        sidecar.updated_at = Utc::now();
        self.write_sidecar(&sidecar).await?;
        info!(change_id = %change_id, target = %target.display(), "Change applied");
        Ok(true)
    }

    async fn rollback_change(&self, change_id: &str, target: &Path) -> Result<Patch> {
        let _guard = self.guard.lock().await;
        let mut sidecar = self.sidecar(change_id).await?;
        if sidecar.status != ApprovalStatus::Applied {
            return Err(Self::invalid_state(change_id, "applied", sidecar.status));
        }

        let patch = self.verified_patch(&sidecar).await?;
        let mut reversal = reverse(&patch)?;
        apply_patch_strict(target, reversal.diff_content(), reversal.patch_id())?;

        reversal.validated = patch.validated;
        reversal.applied = true;
        self.record(&reversal, ApprovalStatus::Applied).await?;

        sidecar.status = ApprovalStatus::RolledBack;
        sidecar.patch.applied = false;
        sidecar.rolled_back_by = Some(reversal.patch_id().to_string());
        sidecar.updated_at = Utc::now();
        self.write_sidecar(&sidecar).await?;
        info!(
            change_id = %change_id,
            reversal_id = %reversal.patch_id(),
            target = %target.display(),
            "Change rolled back"
        );
        Ok(reversal)
    }

    async fn get_patch(&self, change_id: &str) -> Result<Patch> {
        let sidecar = self.sidecar(change_id).await?;
        self.verified_patch(&sidecar).await
    }
}
