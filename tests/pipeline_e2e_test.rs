//! 端到端：Mock LLM 驱动完整流水线（规划 → 起草 → 调度 → 反思），经 TaskService 暂停与恢复

use std::path::Path;
use std::sync::Arc;

use hive::config::{AppConfig, ToolsSection};
use hive::context::{ApprovalKind, ApprovalStatus, TaskContext};
use hive::core::{AgentError, Decision, TaskStatus};
use hive::llm::{MockLlmClient, ModelSet};
use hive::mcp::McpBridge;
use hive::tools::builtin_registry;
use hive::AgentRuntime;

const HELLO_DRAFT: &str =
    r#"{"tool_calls":[{"name":"write_file","args":{"path":"hello.txt","content":"hi"}}]}"#;

fn runtime_with(dir: &Path, models: ModelSet, pause_before: &[&str]) -> AgentRuntime {
    let mut cfg = AppConfig::default();
    cfg.graph.pause_before = pause_before.iter().map(|s| s.to_string()).collect();
    let registry = builtin_registry(dir, &ToolsSection::default());
    AgentRuntime::from_parts(cfg, dir, models, registry, Arc::new(McpBridge::default()))
}

fn runtime(dir: &Path, mock: MockLlmClient, pause_before: &[&str]) -> AgentRuntime {
    runtime_with(dir, ModelSet::uniform(Arc::new(mock)), pause_before)
}

fn escalation_count(ctx: &TaskContext) -> usize {
    ctx.pending_approvals
        .iter()
        .filter(|p| p.kind == ApprovalKind::Escalation)
        .count()
}

#[tokio::test]
async fn write_hello_produces_artifact_and_advances() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::new()
        .with_plan(["write hello.txt"])
        .with_draft(HELLO_DRAFT);
    let rt = runtime(dir.path(), mock, &[]);

    let id = rt.tasks.create("create hello.txt containing hi").await;
    let record = rt.tasks.run(&id).await.unwrap();

    assert_eq!(record.status, TaskStatus::Completed);
    let ctx = &record.context;
    assert_eq!(ctx.current_step_index, 1);
    assert_eq!(ctx.artifacts.len(), 1);
    assert_eq!(ctx.artifacts[0].title, "hello.txt");
    assert_eq!(ctx.artifacts[0].content, "hi");
    assert_eq!(std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "hi");
    assert!(rt.tasks.get(&id).await.unwrap().next.is_empty());
}

#[tokio::test]
async fn every_step_of_a_plan_is_executed() {
    for n in [1usize, 3, 5] {
        let dir = tempfile::tempdir().unwrap();
        let steps: Vec<String> = (0..n).map(|i| format!("step {}", i)).collect();
        let mock = MockLlmClient::new()
            .with_plan(steps)
            .with_draft(r#"{"tool_calls":[{"name":"list_files","args":{}}]}"#);
        let rt = runtime(dir.path(), mock, &[]);

        let id = rt.tasks.create("walk the plan").await;
        let record = rt.tasks.run(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.context.current_step_index, n);
        assert!(!record.context.error_state);
    }
}

#[tokio::test]
async fn paused_and_resumed_run_matches_unpaused_run() {
    let mock = || {
        MockLlmClient::new()
            .with_plan(["write hello.txt", "list files"])
            .with_draft(HELLO_DRAFT)
            .with_draft(r#"{"tool_calls":[{"name":"list_files"}]}"#)
    };

    let direct_dir = tempfile::tempdir().unwrap();
    let direct = runtime(direct_dir.path(), mock(), &[]);
    let id = direct.tasks.create("two steps").await;
    let unpaused = direct.tasks.run(&id).await.unwrap();

    let paused_dir = tempfile::tempdir().unwrap();
    let gated = runtime(paused_dir.path(), mock(), &["dispatch"]);
    let id = gated.tasks.create("two steps").await;
    let first = gated.tasks.run(&id).await.unwrap();
    assert_eq!(first.status, TaskStatus::AwaitingApproval);
    assert_eq!(first.resume_at.as_deref(), Some("dispatch"));
    assert_eq!(first.context.current_step_index, 0);
    assert_eq!(gated.tasks.get(&id).await.unwrap().next, vec!["dispatch"]);

    let resumed = gated.tasks.approve(&id).await.unwrap();
    assert_eq!(resumed.status, TaskStatus::Completed);

    let (a, b) = (&unpaused.context, &resumed.context);
    assert_eq!(a.messages, b.messages);
    assert_eq!(a.plan, b.plan);
    assert_eq!(a.current_step_index, b.current_step_index);
    assert_eq!(a.retry_count, b.retry_count);
    let titles = |c: &TaskContext| -> Vec<(String, String)> {
        c.artifacts
            .iter()
            .map(|x| (x.title.clone(), x.content.clone()))
            .collect()
    };
    assert_eq!(titles(a), titles(b));
}

#[cfg(unix)]
#[tokio::test]
async fn fourth_failed_approval_escalates_once() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::new()
        .with_plan(["run the build"])
        .with_draft(r#"{"tool_calls":[{"name":"run_command","args":{"command":"exit 1"}}]}"#);
    let rt = runtime(dir.path(), mock, &["dispatch"]);

    let id = rt.tasks.create("build it").await;
    let record = rt.tasks.run(&id).await.unwrap();
    assert_eq!(record.status, TaskStatus::AwaitingApproval);
    assert!(record.context.pending_approvals.is_empty());

    // 放行起草结果：run_command 被登记为待审批，而不是被执行
    let record = rt.tasks.approve(&id).await.unwrap();
    assert_eq!(record.status, TaskStatus::AwaitingApproval);
    assert!(record.context.awaiting_approval());
    assert_eq!(record.context.retry_count, 0);

    for round in 1..=3u32 {
        let record = rt.tasks.approve(&id).await.unwrap();
        assert_eq!(record.context.retry_count, round);
        assert!(!record.context.halted);
        assert_eq!(escalation_count(&record.context), 0);
        assert_eq!(record.status, TaskStatus::AwaitingApproval);
    }

    let record = rt.tasks.approve(&id).await.unwrap();
    assert_eq!(record.context.retry_count, 4);
    assert!(record.context.halted);
    assert_eq!(record.status, TaskStatus::Halted);
    assert_eq!(escalation_count(&record.context), 1);
    assert_eq!(record.context.current_step_index, 0);
    assert!(rt.tasks.get(&id).await.unwrap().next.is_empty());

    let executed = record
        .context
        .pending_approvals
        .iter()
        .filter(|p| p.kind == ApprovalKind::Action && p.status == ApprovalStatus::Executed)
        .count();
    assert_eq!(executed, 4);

    // 驳回升级：保持挂起
    let record = rt.tasks.reject(&id, None).await.unwrap();
    assert_eq!(record.status, TaskStatus::Halted);
    assert!(record.context.escalations().all(|e| e.status == ApprovalStatus::Rejected));
}

#[cfg(unix)]
#[tokio::test]
async fn clearing_escalation_resumes_at_drafter() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::new()
        .with_plan(["run the build"])
        .with_draft(r#"{"tool_calls":[{"name":"run_command","args":{"command":"exit 1"}}]}"#);
    let rt = runtime(dir.path(), mock, &[]);

    let id = rt.tasks.create("build it").await;
    let mut record = rt.tasks.run(&id).await.unwrap();
    while record.status == TaskStatus::AwaitingApproval {
        record = rt.tasks.approve(&id).await.unwrap();
    }
    assert_eq!(record.status, TaskStatus::Halted);

    let record = rt.tasks.approve(&id).await.unwrap();
    assert!(!record.context.halted);
    assert_eq!(record.context.retry_count, 0);
    assert_eq!(record.status, TaskStatus::AwaitingApproval);
    assert_eq!(escalation_count(&record.context), 1);
    assert!(record
        .context
        .escalations()
        .all(|e| e.status == ApprovalStatus::Approved));
}

#[tokio::test]
async fn rejection_redrafts_with_feedback_and_never_runs_command() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::new()
        .with_plan(["clean up"])
        .with_draft(r#"{"tool_calls":[{"name":"run_command","args":{"command":"touch ran.txt"}}]}"#);
    let rt = runtime(dir.path(), mock, &["dispatch"]);

    let id = rt.tasks.create("clean the workspace").await;
    rt.tasks.run(&id).await.unwrap();
    let record = rt.tasks.approve(&id).await.unwrap();
    assert!(record.context.awaiting_approval());

    let resumption = rt
        .tasks
        .decide(
            &id,
            Decision::Reject {
                feedback: Some("Do not run shell commands; delete files with write_file.".into()),
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resumption.stage, "drafter");
    assert_eq!(resumption.pause_before, vec!["dispatch".to_string()]);

    let record = rt.tasks.resume(resumption).await.unwrap();
    assert_eq!(record.status, TaskStatus::AwaitingApproval);
    assert_eq!(record.resume_at.as_deref(), Some("dispatch"));
    assert!(record
        .context
        .messages
        .iter()
        .any(|m| m.content.contains("Do not run shell commands")));
    assert!(record
        .context
        .pending_approvals
        .iter()
        .all(|p| p.status == ApprovalStatus::Rejected));
    assert!(!dir.path().join("ran.txt").exists());
}

#[tokio::test]
async fn decisions_are_validated() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::new()
        .with_plan(["write hello.txt"])
        .with_draft(HELLO_DRAFT);
    let rt = runtime(dir.path(), mock, &["dispatch"]);

    assert!(matches!(
        rt.tasks.approve("missing").await,
        Err(AgentError::TaskNotFound(_))
    ));

    let id = rt.tasks.create("hello").await;
    assert_eq!(rt.tasks.get(&id).await.unwrap().next, vec!["planner"]);

    rt.tasks.run(&id).await.unwrap();
    rt.store
        .with_record(&id, |r| r.status = TaskStatus::Running)
        .await;
    assert!(matches!(
        rt.tasks.decide(&id, Decision::Approve).await,
        Err(AgentError::TaskBusy(_))
    ));
    assert!(matches!(rt.tasks.run(&id).await, Err(AgentError::TaskBusy(_))));

    rt.store
        .with_record(&id, |r| r.status = TaskStatus::AwaitingApproval)
        .await;
    let record = rt.tasks.approve(&id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert!(matches!(
        rt.tasks.approve(&id).await,
        Err(AgentError::NothingToDecide(_))
    ));

    assert_eq!(rt.tasks.reset().await, 1);
    assert!(rt.store.is_empty().await);
}

#[tokio::test]
async fn unreachable_drafting_oracle_escalates() {
    let dir = tempfile::tempdir().unwrap();
    let reasoning = Arc::new(MockLlmClient::new().with_plan(["write hello.txt"]));
    let coding = Arc::new(MockLlmClient::new().failing());
    let rt = runtime_with(dir.path(), ModelSet::new(reasoning, coding), &[]);

    let id = rt.tasks.create("hello").await;
    let record = rt.tasks.run(&id).await.unwrap();

    assert_eq!(record.status, TaskStatus::Halted);
    assert_eq!(record.context.retry_count, 4);
    assert_eq!(escalation_count(&record.context), 1);
    assert!(record.context.artifacts.is_empty());
    assert!(record
        .context
        .messages
        .iter()
        .any(|m| m.content.starts_with("LLM call failed")));
}

#[tokio::test]
async fn malformed_draft_is_never_treated_as_done() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::new().with_plan(["write hello.txt"]).with_draft(
        r#"{"tool_calls":[{"name":"write_file","args":{"path":"hello.txt","content":"hi"}},{"args":{}}]}"#,
    );
    let rt = runtime(dir.path(), mock, &[]);

    let id = rt.tasks.create("create hello.txt containing hi").await;
    let record = rt.tasks.run(&id).await.unwrap();

    assert_eq!(record.status, TaskStatus::Halted);
    let ctx = &record.context;
    assert_eq!(ctx.current_step_index, 0);
    assert_eq!(ctx.retry_count, 4);
    assert_eq!(escalation_count(ctx), 1);
    assert!(ctx.artifacts.is_empty());
    assert!(!dir.path().join("hello.txt").exists());
    assert!(ctx
        .messages
        .iter()
        .any(|m| m.content.starts_with("Draft rejected")));
}
