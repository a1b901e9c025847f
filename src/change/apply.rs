//! Two-phase patch application onto a git working tree.

use git2::{ApplyLocation, ApplyOptions, Diff, Repository};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{PatchworkError, Result};

/// Outcome of the dry-run phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyCheck {
    Clean,
    Rejected(String),
}

/// Dry run: would `diff_text` apply cleanly to the working tree at `target`?
/// Never touches the target.
pub fn check_patch(target: &Path, diff_text: &str) -> Result<ApplyCheck> {
    let repo = Repository::open(target)?;
    let diff = match Diff::from_buffer(diff_text.as_bytes()) {
        Ok(diff) => diff,
        Err(e) => return Ok(ApplyCheck::Rejected(format!("unparseable diff: {}", e.message()))),
    };

    let mut opts = ApplyOptions::new();
    opts.check(true);
    match repo.apply(&diff, ApplyLocation::WorkDir, Some(&mut opts)) {
        Ok(()) => Ok(ApplyCheck::Clean),
        Err(e) => Ok(ApplyCheck::Rejected(e.message().to_string())),
    }
}

/// Check, then apply. Returns false and leaves the target untouched when the
/// check fails.
pub fn apply_patch(target: &Path, diff_text: &str) -> Result<bool> {
    if let ApplyCheck::Rejected(reason) = check_patch(target, diff_text)? {
        warn!(target = %target.display(), reason = %reason, "Patch does not apply cleanly");
        return Ok(false);
    }
    debug!(target = %target.display(), "Dry run clean, applying");

    let repo = Repository::open(target)?;
    let diff = Diff::from_buffer(diff_text.as_bytes())?;
    repo.apply(&diff, ApplyLocation::WorkDir, None)?;
    info!(target = %target.display(), "Patch applied");
    Ok(true)
}

/// Like [`apply_patch`] but a failed check is an `ApplyCheckFailed` error.
pub fn apply_patch_strict(target: &Path, diff_text: &str, patch_id: &str) -> Result<()> {
    if let ApplyCheck::Rejected(reason) = check_patch(target, diff_text)? {
        return Err(PatchworkError::ApplyCheckFailed {
            patch_id: patch_id.to_string(),
            reason,
        });
    }
    let repo = Repository::open(target)?;
    let diff = Diff::from_buffer(diff_text.as_bytes())?;
    repo.apply(&diff, ApplyLocation::WorkDir, None)?;
    info!(target = %target.display(), patch_id = %patch_id, "Patch applied");
    Ok(())
}
