use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use moka::future::Cache;
use octocrab::models::IssueState;
use octocrab::Octocrab;
use regex::Regex;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

use super::{ApprovalStatus, ChangeController, Decision, PatchChangeController};
use crate::config::{GitHubConfig, RateLimitConfig};
use crate::error::{PatchworkError, Result};
use crate::patch::Patch;

pub const REVIEW_LABEL: &str = "patchwork:review";
pub const MANUAL_REVIEW_LABEL: &str = "patchwork:manual-review";
pub const APPROVED_LABEL: &str = "patchwork:approved";
pub const REJECTED_LABEL: &str = "patchwork:rejected";

const CHANGE_ID_PREFIX: &str = "issue-";

/// Change control through GitHub issues.
///
/// Every change is filed as an issue carrying the diff; reviewers approve or
/// reject it with labels. Patch content and the apply/rollback mechanics stay
/// in the wrapped [`PatchChangeController`]; this type only mirrors decisions
/// and results onto the issue. Change ids have the form `issue-<number>`.
pub struct TicketChangeController {
    octocrab: Octocrab,
    owner: String,
    repo: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    approvals: Cache<u64, ApprovalStatus>,
    patches: PatchChangeController,
}

impl TicketChangeController {
    pub fn new(config: &GitHubConfig, patches: PatchChangeController) -> Result<Self> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| PatchworkError::Ticket("github.token is not configured".to_string()))?;
        if config.owner.is_empty() || config.repo.is_empty() {
            return Err(PatchworkError::Ticket(
                "github.owner and github.repo must be set".to_string(),
            ));
        }

        let octocrab = Octocrab::builder().personal_token(token).build()?;
        let approvals = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(config.cache_ttl_seconds))
            .build();

        Ok(Self {
            octocrab,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            rate_limiter: Arc::new(RateLimiter::direct(quota(&config.rate_limit))),
            approvals,
            patches,
        })
    }

    pub fn patches(&self) -> &PatchChangeController {
        &self.patches
    }

    async fn throttle(&self) {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;
    }

    async fn fetch_issue(&self, number: u64) -> Result<octocrab::models::issues::Issue> {
        self.throttle().await;
        Ok(self.octocrab.issues(&self.owner, &self.repo).get(number).await?)
    }

    /// Patch id recorded in the issue body.
    async fn patch_id_for(&self, number: u64) -> Result<String> {
        let issue = self.fetch_issue(number).await?;
        issue
            .body
            .as_deref()
            .and_then(extract_patch_id)
            .ok_or_else(|| {
                PatchworkError::Ticket(format!("issue #{number} does not reference a patch"))
            })
    }

    async fn comment(&self, number: u64, body: &str) -> Result<()> {
        self.throttle().await;
        self.octocrab
            .issues(&self.owner, &self.repo)
            .create_comment(number, body)
            .await?;
        Ok(())
    }

    async fn close(&self, number: u64) -> Result<()> {
        self.throttle().await;
        self.octocrab
            .issues(&self.owner, &self.repo)
            .update(number)
            .state(IssueState::Closed)
            .send()
            .await?;
        Ok(())
    }

    async fn add_label(&self, number: u64, label: &str) -> Result<()> {
        self.throttle().await;
        self.octocrab
            .issues(&self.owner, &self.repo)
            .add_labels(number, &[label.to_string()])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChangeController for TicketChangeController {
    fn backend(&self) -> &'static str {
        "ticket"
    }

    async fn create_change(&self, patch: &Patch) -> Result<String> {
        self.patches.create_change(patch).await?;

        self.throttle().await;
        let issue = self
            .octocrab
            .issues(&self.owner, &self.repo)
            .create(issue_title(patch))
            .body(issue_body(patch))
            .labels(issue_labels(patch))
            .send()
            .await?;

        info!(
            issue = issue.number,
            patch_id = %patch.patch_id(),
            task_id = %patch.task_id(),
            "Filed review issue"
        );
        Ok(format!("{CHANGE_ID_PREFIX}{}", issue.number))
    }

    async fn check_approval(&self, change_id: &str) -> Result<ApprovalStatus> {
        let number = parse_change_id(change_id)?;
        if let Some(status) = self.approvals.get(&number).await {
            debug!(issue = number, status = %status, "Approval cache hit");
            return Ok(status);
        }

        let issue = self.fetch_issue(number).await?;
        let patch_id = issue
            .body
            .as_deref()
            .and_then(extract_patch_id)
            .ok_or_else(|| {
                PatchworkError::Ticket(format!("issue #{number} does not reference a patch"))
            })?;

        // applied/rolled back are only known locally
        let local = self.patches.check_approval(&patch_id).await?;
        let status = match local {
            ApprovalStatus::Applied | ApprovalStatus::RolledBack => local,
            _ => {
                let labels: Vec<String> = issue.labels.iter().map(|l| l.name.clone()).collect();
                status_from_labels(&labels, matches!(issue.state, IssueState::Closed))
            }
        };

        self.approvals.insert(number, status).await;
        Ok(status)
    }

    async fn decide(&self, change_id: &str, decision: Decision) -> Result<ApprovalStatus> {
        let number = parse_change_id(change_id)?;
        let patch_id = self.patch_id_for(number).await?;
        let status = self.patches.decide(&patch_id, decision.clone()).await?;

        match decision {
            Decision::Approve => self.add_label(number, APPROVED_LABEL).await?,
            Decision::Reject { reason } => {
                self.add_label(number, REJECTED_LABEL).await?;
                self.comment(number, &format!("Rejected: {reason}")).await?;
                self.close(number).await?;
            }
        }
        self.approvals.invalidate(&number).await;
        Ok(status)
    }

    async fn apply_change(&self, change_id: &str, target: &Path) -> Result<bool> {
        let number = parse_change_id(change_id)?;
        let patch_id = self.patch_id_for(number).await?;

        // approval given on the issue is mirrored locally before applying
        if self.check_approval(change_id).await? == ApprovalStatus::Approved
            && self.patches.check_approval(&patch_id).await? == ApprovalStatus::Pending
        {
            self.patches.decide(&patch_id, Decision::Approve).await?;
        }

        let applied = self.patches.apply_change(&patch_id, target).await?;
        self.approvals.invalidate(&number).await;
        if applied {
            self.comment(number, &format!("Applied patch `{patch_id}`.")).await?;
            self.close(number).await?;
        } else {
            self.comment(
                number,
                "Patch no longer applies cleanly to the target; nothing was changed.",
            )
            .await?;
        }
        Ok(applied)
    }

    async fn rollback_change(&self, change_id: &str, target: &Path) -> Result<Patch> {
        let number = parse_change_id(change_id)?;
        let patch_id = self.patch_id_for(number).await?;
        let reversal = self.patches.rollback_change(&patch_id, target).await?;
        self.approvals.invalidate(&number).await;
        self.comment(
            number,
            &format!("Rolled back with reversal patch `{}`.", reversal.patch_id()),
        )
        .await?;
        Ok(reversal)
    }

    async fn get_patch(&self, change_id: &str) -> Result<Patch> {
        let number = parse_change_id(change_id)?;
        let patch_id = self.patch_id_for(number).await?;
        self.patches.get_patch(&patch_id).await
    }
}

fn quota(config: &RateLimitConfig) -> Quota {
    let per_hour = NonZeroU32::new(config.requests_per_hour).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(config.burst_capacity).unwrap_or(NonZeroU32::MIN);
    Quota::per_hour(per_hour).allow_burst(burst)
}

fn parse_change_id(change_id: &str) -> Result<u64> {
    change_id
        .strip_prefix(CHANGE_ID_PREFIX)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| PatchworkError::PatchNotFound {
            patch_id: change_id.to_string(),
        })
}

fn patch_marker_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?m)^patchwork-patch: ([0-9a-f]{64})\s*$").ok())
        .as_ref()
}

fn extract_patch_id(body: &str) -> Option<String> {
    patch_marker_pattern()?
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn issue_title(patch: &Patch) -> String {
    format!("[patchwork] {} ({})", patch.task_id(), patch.short_id())
}

fn issue_body(patch: &Patch) -> String {
    let mut body = format!(
        "Agent `{}` proposes a change for task `{}`.\n\n",
        patch.creator_agent_id(),
        patch.task_id()
    );
    if patch.requires_manual_review() {
        body.push_str("**Overlaps work in flight by other agents; manual review required.**\n\n");
    }
    body.push_str("Files:\n");
    for file in patch.target_files() {
        body.push_str(&format!("- `{file}`\n"));
    }
    body.push_str("\n```diff\n");
    body.push_str(patch.diff_content());
    if !patch.diff_content().ends_with('\n') {
        body.push('\n');
    }
    body.push_str("```\n\n");
    body.push_str(&format!("patchwork-patch: {}\n", patch.patch_id()));
    body
}

fn issue_labels(patch: &Patch) -> Vec<String> {
    let mut labels = vec![REVIEW_LABEL.to_string()];
    if patch.requires_manual_review() {
        labels.push(MANUAL_REVIEW_LABEL.to_string());
    }
    labels
}

fn status_from_labels(labels: &[String], closed: bool) -> ApprovalStatus {
    let has = |name: &str| labels.iter().any(|l| l == name);
    if has(REJECTED_LABEL) {
        ApprovalStatus::Rejected
    } else if has(APPROVED_LABEL) {
        ApprovalStatus::Approved
    } else if closed {
        ApprovalStatus::Rejected
    } else {
        ApprovalStatus::Pending
    }
}
