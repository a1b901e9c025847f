// End-to-end coordinator scenarios against real git worktrees and the
// patch-backed change controller.

mod common;

use common::{read, EditingAgent, Harness};
use patchwork::{AgentStatus, Coordinator, PatchOutcome, Resolution, Task, TaskOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn submitted(outcome: &TaskOutcome) -> (String, usize, bool) {
    match outcome {
        TaskOutcome::Submitted {
            change_id,
            conflicts,
            escalated,
            ..
        } => (change_id.clone(), conflicts.len(), *escalated),
        other => panic!("expected a submitted patch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disjoint_tasks_reach_approval_without_conflicts() {
    let harness = Harness::new(&[("x.txt", "x\n"), ("y.txt", "y\n")]);
    let coordinator = Coordinator::from_config(&harness.config(2)).await.unwrap();
    let alpha = coordinator.register_agent(EditingAgent::new("alpha")).await.unwrap();
    let beta = coordinator.register_agent(EditingAgent::new("beta")).await.unwrap();

    coordinator
        .queue_task(Task::new("A", "rewrite x").with_files(["x.txt"]))
        .await;
    coordinator
        .queue_task(Task::new("B", "rewrite y").with_files(["y.txt"]))
        .await;
    let reports = coordinator.process_queue().await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].task_id, "A");
    assert_eq!(reports[0].agent_id, alpha);
    assert_eq!(reports[1].task_id, "B");
    assert_eq!(reports[1].agent_id, beta);
    for report in &reports {
        let (_, conflicts, escalated) = submitted(&report.outcome);
        assert_eq!(conflicts, 0);
        assert!(!escalated);
    }
    for agent_id in [&alpha, &beta] {
        assert_eq!(
            coordinator.agent_state(agent_id).await.unwrap().status,
            AgentStatus::WaitingApproval
        );
    }
    assert!(coordinator.conflict_log().await.is_empty());

    let pending = coordinator.pending_approvals().await;
    assert_eq!(pending.len(), 2);
    for approval in pending {
        assert!(!approval.requires_manual_review);
        assert!(coordinator
            .approve_patch(&approval.change_id, harness.repo.path())
            .await
            .unwrap());
    }

    assert_eq!(read(harness.repo.path(), "x.txt"), "A by alpha\n");
    assert_eq!(read(harness.repo.path(), "y.txt"), "B by beta\n");
    let stats = coordinator.stats().await;
    assert_eq!(stats.idle_agents, 2);
    assert_eq!(stats.completed_tasks, 2);
    assert_eq!(stats.active_workspaces, 0);
}

#[tokio::test]
async fn test_overlap_with_working_agent_is_escalated() {
    let harness = Harness::new(&[("x.txt", "x\n")]);
    let coordinator = Coordinator::from_config(&harness.config(2)).await.unwrap();
    let gate = Arc::new(Notify::new());
    let alpha = coordinator
        .register_agent(EditingAgent::gated("alpha", gate.clone()))
        .await
        .unwrap();
    let beta = coordinator.register_agent(EditingAgent::new("beta")).await.unwrap();

    coordinator
        .assign_task(&alpha, Task::new("A", "rewrite x").with_files(["x.txt"]))
        .await
        .unwrap();
    let blocked = {
        let coordinator = coordinator.clone();
        let alpha = alpha.clone();
        tokio::spawn(async move { coordinator.execute_task(&alpha).await })
    };

    coordinator
        .assign_task(&beta, Task::new("B", "also rewrite x").with_files(["x.txt"]))
        .await
        .unwrap();
    let report = coordinator.run_task(&beta).await.unwrap();

    let TaskOutcome::Submitted {
        change_id: beta_change,
        patch_id,
        conflicts,
        escalated,
    } = report.outcome
    else {
        panic!("expected a submitted patch, got {:?}", report.outcome);
    };
    assert!(escalated);
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.patch_a, patch_id);
    assert_eq!(conflict.agent_a, beta);
    assert_eq!(conflict.task_a, "B");
    assert_eq!(conflict.agent_b, alpha);
    assert_eq!(conflict.patch_b, "A");
    assert_eq!(conflict.overlapping_files, vec!["x.txt".to_string()]);
    assert_eq!(conflict.resolution, Some(Resolution::Escalated));

    // the blocked agent was never disturbed
    assert_eq!(
        coordinator.agent_state(&alpha).await.unwrap().status,
        AgentStatus::Working
    );
    let audit = std::fs::read_to_string(harness.store.path().join("conflicts.jsonl")).unwrap();
    assert_eq!(audit.lines().count(), 1);

    gate.notify_one();
    let alpha_report = blocked.await.unwrap().unwrap();
    assert_eq!(alpha_report.outcome, TaskOutcome::AwaitingApproval);

    let PatchOutcome::Built(alpha_patch) = coordinator.build_patch(&alpha).await.unwrap() else {
        panic!("alpha changed x.txt");
    };
    let outcome = coordinator.submit_patch(&alpha, *alpha_patch).await.unwrap();
    let (alpha_change, alpha_conflicts, _) = submitted(&outcome);
    // beta is waiting for approval, not working
    assert_eq!(alpha_conflicts, 0);

    assert!(coordinator
        .approve_patch(&beta_change, harness.repo.path())
        .await
        .unwrap());
    assert_eq!(read(harness.repo.path(), "x.txt"), "B by beta\n");

    // alpha's patch no longer applies; nothing changes and it stays pending
    assert!(!coordinator
        .approve_patch(&alpha_change, harness.repo.path())
        .await
        .unwrap());
    assert_eq!(read(harness.repo.path(), "x.txt"), "B by beta\n");
    assert_eq!(
        coordinator.agent_state(&alpha).await.unwrap().status,
        AgentStatus::WaitingApproval
    );

    coordinator
        .reject_patch(&alpha_change, "superseded by B")
        .await
        .unwrap();
    let alpha_state = coordinator.agent_state(&alpha).await.unwrap();
    assert_eq!(alpha_state.status, AgentStatus::Idle);
    assert_eq!(alpha_state.failed_task_ids, vec!["A".to_string()]);
    assert!(coordinator.pending_approvals().await.is_empty());
}

#[tokio::test]
async fn test_single_agent_drains_queue_in_order() {
    let harness = Harness::new(&[("a.txt", "a\n"), ("b.txt", "b\n"), ("c.txt", "c\n")]);
    let coordinator = Coordinator::from_config(&harness.config(1)).await.unwrap();
    let agent_id = coordinator.register_agent(EditingAgent::new("solo")).await.unwrap();

    for (task_id, file) in [("T1", "a.txt"), ("T2", "b.txt"), ("T3", "c.txt")] {
        coordinator
            .queue_task(Task::new(task_id, "rewrite").with_files([file]))
            .await;
    }

    let approver = {
        let coordinator = coordinator.clone();
        let target = harness.repo.path().to_path_buf();
        tokio::spawn(async move {
            let mut approved = Vec::new();
            while approved.len() < 3 {
                for pending in coordinator.pending_approvals().await {
                    if coordinator
                        .approve_patch(&pending.change_id, &target)
                        .await
                        .unwrap()
                    {
                        approved.push(pending.task_id);
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            approved
        })
    };

    let reports = coordinator.process_queue().await.unwrap();
    let approved = tokio::time::timeout(Duration::from_secs(30), approver)
        .await
        .unwrap()
        .unwrap();

    let order: Vec<&str> = reports.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(order, ["T1", "T2", "T3"]);
    assert_eq!(approved, ["T1", "T2", "T3"]);
    for report in &reports {
        assert_eq!(report.agent_id, agent_id);
        submitted(&report.outcome);
    }

    let state = coordinator.agent_state(&agent_id).await.unwrap();
    assert_eq!(state.status, AgentStatus::Idle);
    assert_eq!(state.completed_task_ids, ["T1", "T2", "T3"]);
    assert_eq!(read(harness.repo.path(), "a.txt"), "T1 by solo\n");
    assert_eq!(read(harness.repo.path(), "b.txt"), "T2 by solo\n");
    assert_eq!(read(harness.repo.path(), "c.txt"), "T3 by solo\n");
}

#[tokio::test]
async fn test_unregistering_busy_agents_releases_every_workspace() {
    let harness = Harness::new(&[("a.txt", "a\n"), ("b.txt", "b\n"), ("c.txt", "c\n")]);
    let coordinator = Coordinator::from_config(&harness.config(3)).await.unwrap();
    let gate = Arc::new(Notify::new());

    let mut running = Vec::new();
    for (task_id, file) in [("T1", "a.txt"), ("T2", "b.txt"), ("T3", "c.txt")] {
        let agent_id = coordinator
            .register_agent(EditingAgent::gated(task_id, gate.clone()))
            .await
            .unwrap();
        let workspace = coordinator
            .assign_task(&agent_id, Task::new(task_id, "rewrite").with_files([file]))
            .await
            .unwrap();
        assert!(workspace.path.exists());
        let handle = {
            let coordinator = coordinator.clone();
            let agent_id = agent_id.clone();
            tokio::spawn(async move { coordinator.execute_task(&agent_id).await })
        };
        running.push((agent_id, workspace, handle));
    }
    // let every execution reach the gate
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(coordinator.stats().await.active_workspaces, 3);
    assert_eq!(coordinator.stats().await.working_agents, 3);

    for (agent_id, _, _) in &running {
        assert!(coordinator.unregister_agent(agent_id).await);
        assert!(!coordinator.unregister_agent(agent_id).await);
    }
    let stats = coordinator.stats().await;
    assert_eq!(stats.registered_agents, 0);
    assert_eq!(stats.active_workspaces, 0);
    assert_eq!(stats.failed_tasks, 3);

    gate.notify_waiters();
    for (_, workspace, handle) in running {
        assert!(!workspace.path.exists());
        let report = handle.await.unwrap().unwrap();
        assert!(matches!(report.outcome, TaskOutcome::Cancelled { .. }));
    }
}

#[tokio::test]
async fn test_rejected_patch_can_be_resubmitted_and_approved() {
    let harness = Harness::new(&[("x.txt", "x\n")]);
    let coordinator = Coordinator::from_config(&harness.config(1)).await.unwrap();
    let alpha = coordinator.register_agent(EditingAgent::new("alpha")).await.unwrap();

    coordinator
        .assign_task(&alpha, Task::new("A", "rewrite x").with_files(["x.txt"]))
        .await
        .unwrap();
    let (first_change, _, _) = submitted(&coordinator.run_task(&alpha).await.unwrap().outcome);
    coordinator
        .reject_patch(&first_change, "needs another look")
        .await
        .unwrap();
    assert_eq!(
        coordinator.agent_state(&alpha).await.unwrap().status,
        AgentStatus::Idle
    );

    // the same edit comes back with the same content address
    coordinator
        .assign_task(&alpha, Task::new("A", "rewrite x").with_files(["x.txt"]))
        .await
        .unwrap();
    let (second_change, _, _) = submitted(&coordinator.run_task(&alpha).await.unwrap().outcome);
    assert_eq!(second_change, first_change);
    assert_eq!(coordinator.pending_approvals().await.len(), 1);

    assert!(coordinator
        .approve_patch(&second_change, harness.repo.path())
        .await
        .unwrap());
    assert_eq!(read(harness.repo.path(), "x.txt"), "A by alpha\n");

    let state = coordinator.agent_state(&alpha).await.unwrap();
    assert_eq!(state.status, AgentStatus::Idle);
    assert_eq!(state.completed_task_ids, ["A"]);
    assert_eq!(state.failed_task_ids, ["A"]);
    assert!(coordinator.pending_approvals().await.is_empty());
}
