// Change control against a real working tree: approve, apply, roll back,
// and the all-or-nothing guarantee of apply.

mod common;

use common::{init_repo, read};
use patchwork::change::HistoryKind;
use patchwork::{
    apply_patch, reverse, ApprovalStatus, ChangeController, Decision, GitWorktreeManager,
    PatchBuilder, PatchChangeController, PatchworkError, WorkspaceProvider,
};
use std::fs;
use tempfile::TempDir;

#[tokio::test]
async fn test_apply_then_rollback_restores_the_original_bytes() {
    let repo = init_repo(&[("x.txt", "foo\n")]);
    let worktrees = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();

    let manager = GitWorktreeManager::new(repo.path(), worktrees.path(), 2).unwrap();
    let workspace = manager.create("agent001", "HEAD").unwrap();
    fs::write(workspace.path.join("x.txt"), "bar\n").unwrap();
    let patch = PatchBuilder::new()
        .build(&workspace, "agent001", "task-1")
        .unwrap();
    manager.release("agent001");

    let controller = PatchChangeController::open(store.path()).await.unwrap();
    let change_id = controller.create_change(&patch).await.unwrap();
    assert_eq!(
        controller.check_approval(&change_id).await.unwrap(),
        ApprovalStatus::Pending
    );

    controller.decide(&change_id, Decision::Approve).await.unwrap();
    assert!(controller.apply_change(&change_id, repo.path()).await.unwrap());
    assert_eq!(read(repo.path(), "x.txt"), "bar\n");

    let reversal = controller
        .rollback_change(&change_id, repo.path())
        .await
        .unwrap();
    assert_eq!(read(repo.path(), "x.txt"), "foo\n");
    assert_eq!(reversal.parent_patch_ids(), [patch.patch_id().to_string()]);
    assert_eq!(
        controller.check_approval(&change_id).await.unwrap(),
        ApprovalStatus::RolledBack
    );

    let history = controller.get_patch_history("task-1").unwrap();
    let kinds: Vec<HistoryKind> = history.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, [HistoryKind::Created, HistoryKind::Reversal]);
    assert_eq!(history[0].patch_id, patch.patch_id());
    assert_eq!(history[1].patch_id, reversal.patch_id());

    // rolling back twice is refused
    assert!(controller
        .rollback_change(&change_id, repo.path())
        .await
        .is_err());
}

#[test]
fn test_reverse_of_a_new_file_deletes_it() {
    let repo = init_repo(&[("x.txt", "foo\n")]);
    let worktrees = TempDir::new().unwrap();
    let manager = GitWorktreeManager::new(repo.path(), worktrees.path(), 2).unwrap();
    let workspace = manager.create("agent001", "HEAD").unwrap();
    fs::write(workspace.path.join("notes.txt"), "one\ntwo\n").unwrap();
    let patch = PatchBuilder::new()
        .build(&workspace, "agent001", "task-1")
        .unwrap();
    assert_eq!(patch.target_files(), ["notes.txt".to_string()]);

    assert!(apply_patch(repo.path(), patch.diff_content()).unwrap());
    assert_eq!(read(repo.path(), "notes.txt"), "one\ntwo\n");

    let reversal = reverse(&patch).unwrap();
    assert!(reversal.diff_content().contains("deleted file mode 100644\n"));
    assert!(reversal.diff_content().contains("+++ /dev/null\n"));
    assert!(reversal.diff_content().contains("-one\n-two\n"));
    assert_eq!(reversal.target_files(), ["notes.txt".to_string()]);
}

#[test]
fn test_failed_dry_run_leaves_every_file_untouched() {
    let repo = init_repo(&[("a.txt", "alpha\n"), ("b.txt", "beta\n")]);
    // first hunk would apply, second does not match
    let diff = "diff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-alpha\n+ALPHA\n\
                diff --git a/b.txt b/b.txt\n--- a/b.txt\n+++ b/b.txt\n@@ -1 +1 @@\n-gamma\n+GAMMA\n";

    assert!(!apply_patch(repo.path(), diff).unwrap());
    assert_eq!(read(repo.path(), "a.txt"), "alpha\n");
    assert_eq!(read(repo.path(), "b.txt"), "beta\n");
}

#[tokio::test]
async fn test_rollback_after_a_later_edit_fails_cleanly() {
    let repo = init_repo(&[("x.txt", "foo\n")]);
    let worktrees = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();

    let manager = GitWorktreeManager::new(repo.path(), worktrees.path(), 2).unwrap();
    let workspace = manager.create("agent001", "HEAD").unwrap();
    fs::write(workspace.path.join("x.txt"), "bar\n").unwrap();
    let patch = PatchBuilder::new()
        .build(&workspace, "agent001", "task-1")
        .unwrap();

    let controller = PatchChangeController::open(store.path()).await.unwrap();
    let change_id = controller.create_change(&patch).await.unwrap();
    controller.decide(&change_id, Decision::Approve).await.unwrap();
    assert!(controller.apply_change(&change_id, repo.path()).await.unwrap());

    fs::write(repo.path().join("x.txt"), "baz\n").unwrap();
    let err = controller
        .rollback_change(&change_id, repo.path())
        .await
        .unwrap_err();
    assert!(matches!(err, PatchworkError::ApplyCheckFailed { .. }));
    assert_eq!(read(repo.path(), "x.txt"), "baz\n");
    assert_eq!(
        controller.check_approval(&change_id).await.unwrap(),
        ApprovalStatus::Applied
    );
}

#[tokio::test]
async fn test_changes_survive_reopening_the_store() {
    let repo = init_repo(&[("x.txt", "foo\n")]);
    let worktrees = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();

    let manager = GitWorktreeManager::new(repo.path(), worktrees.path(), 2).unwrap();
    let workspace = manager.create("agent001", "HEAD").unwrap();
    fs::write(workspace.path.join("x.txt"), "bar\n").unwrap();
    let patch = PatchBuilder::new()
        .build(&workspace, "agent001", "task-1")
        .unwrap();

    let change_id = {
        let controller = PatchChangeController::open(store.path()).await.unwrap();
        let change_id = controller.create_change(&patch).await.unwrap();
        controller.decide(&change_id, Decision::Approve).await.unwrap();
        change_id
    };

    let reopened = PatchChangeController::open(store.path()).await.unwrap();
    assert_eq!(
        reopened.check_approval(&change_id).await.unwrap(),
        ApprovalStatus::Approved
    );
    let stored = reopened.get_patch(&change_id).await.unwrap();
    assert_eq!(stored.patch_id(), patch.patch_id());
    assert_eq!(stored.diff_content(), patch.diff_content());
    assert!(reopened.apply_change(&change_id, repo.path()).await.unwrap());
    assert_eq!(read(repo.path(), "x.txt"), "bar\n");
}
