//! dispatch 阶段
//!
//! 先做对账：执行人工已批准、尚未执行的动作（executed 标记保证至多一次），
//! 再逐个处理本步起草的调用。审批类调用只登记为 PendingApproval；任何失败立即终止本批。
//! 只有本批无错误、无闸门、未挂起且没有未决审批时，current_step_index 才前进一步。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{ApprovalStatus, CallOutcome, Message, PendingApproval, TaskContext};
use crate::dispatch::DispatchPolicy;
use crate::workflow::{Stage, Transition};

pub struct DispatchStage {
    policy: Arc<DispatchPolicy>,
}

impl DispatchStage {
    pub fn new(policy: Arc<DispatchPolicy>) -> Self {
        Self { policy }
    }

    /// 对账：返回是否有失败
    async fn reconcile(&self, ctx: &mut TaskContext) -> bool {
        let runnable: Vec<usize> = ctx
            .pending_approvals
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_runnable())
            .map(|(i, _)| i)
            .collect();
        if runnable.is_empty() {
            return false;
        }

        let mut outcomes = Vec::new();
        let mut failed = false;
        for i in runnable {
            if ctx.halted {
                break;
            }
            let (id, tool, args) = {
                let entry = &mut ctx.pending_approvals[i];
                entry.executed = true;
                entry.status = ApprovalStatus::Executed;
                (entry.id, entry.tool.clone(), entry.args.clone())
            };
            tracing::info!(tool = %tool, approval_id = %id, "Executing approved action");

            match self.policy.invoke(&tool, args.clone()).await {
                Ok(output) => {
                    if let Some(artifact) = self.policy.artifact_for(&tool, &args) {
                        ctx.push_artifact(artifact);
                    }
                    ctx.pending_approvals[i].result = Some(output.clone());
                    outcomes.push(CallOutcome::ok(&tool, output).with_approval(id));
                }
                Err(e) => {
                    ctx.pending_approvals[i].error = Some(e.to_string());
                    outcomes.push(
                        CallOutcome::failed(&tool, e.fault_kind(), e.to_string()).with_approval(id),
                    );
                    self.policy.retry().record(ctx, &tool, &e, &args);
                    failed = true;
                    break;
                }
            }
        }

        if !outcomes.is_empty() {
            push_outcomes(ctx, "Approved actions", &outcomes);
        }
        failed
    }
}

fn push_outcomes(ctx: &mut TaskContext, label: &str, outcomes: &[CallOutcome]) {
    let body = serde_json::to_string(outcomes).unwrap_or_else(|_| "[]".to_string());
    ctx.push_message(Message::tool(format!("{}: {}", label, body)));
}

#[async_trait]
impl Stage for DispatchStage {
    async fn run(&self, ctx: &mut TaskContext) -> Transition {
        if ctx.halted {
            tracing::warn!("Task halted, dispatch skipped");
            return Transition::Advance;
        }
        let carried_error = ctx.error_state;

        let reconcile_failed = self.reconcile(ctx).await;
        let calls = ctx.take_drafted_calls();

        let mut outcomes = Vec::with_capacity(calls.len());
        let mut gated = false;
        let mut failed = reconcile_failed;

        for call in calls {
            if failed || ctx.halted {
                outcomes.push(CallOutcome::skipped(&call.name));
                continue;
            }
            let name = call.name;
            let args = match DispatchPolicy::normalize_args(call.args) {
                Ok(a) => a,
                Err(e) => {
                    outcomes.push(CallOutcome::failed(&name, e.fault_kind(), e.to_string()));
                    self.policy.retry().record(ctx, &name, &e, &Value::Null);
                    failed = true;
                    continue;
                }
            };

            if self.policy.requires_approval(&name) {
                let approval = PendingApproval::action(&name, args);
                tracing::info!(tool = %name, approval_id = %approval.id, "Action requires approval");
                outcomes.push(CallOutcome::gated(&name, approval.id));
                ctx.pending_approvals.push(approval);
                gated = true;
                continue;
            }
            if gated && self.policy.is_write_type(&name) {
                outcomes.push(CallOutcome::skipped(&name));
                continue;
            }

            match self.policy.invoke(&name, args.clone()).await {
                Ok(output) => {
                    if let Some(artifact) = self.policy.artifact_for(&name, &args) {
                        ctx.push_artifact(artifact);
                    }
                    outcomes.push(CallOutcome::ok(&name, output));
                }
                Err(e) => {
                    tracing::warn!(tool = %name, error = %e, "Tool call failed");
                    outcomes.push(CallOutcome::failed(&name, e.fault_kind(), e.to_string()));
                    self.policy.retry().record(ctx, &name, &e, &args);
                    failed = true;
                }
            }
        }

        if !outcomes.is_empty() {
            push_outcomes(ctx, "Tool results", &outcomes);
        }

        if !failed && !gated && !carried_error && !ctx.halted && !ctx.awaiting_approval() {
            ctx.advance_step();
        }
        Transition::Advance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsSection;
    use crate::context::{ApprovalKind, DraftedCall};
    use crate::dispatch::RetryPolicy;
    use crate::mcp::McpBridge;
    use crate::core::AgentError;
    use crate::tools::{builtin_registry, Tool, ToolExecutor};
    use serde_json::json;

    fn stage(dir: &std::path::Path) -> DispatchStage {
        let registry = builtin_registry(dir, &ToolsSection::default());
        DispatchStage::new(Arc::new(DispatchPolicy::new(
            Arc::new(ToolExecutor::new(registry, 5)),
            Arc::new(McpBridge::default()),
            RetryPolicy::default(),
        )))
    }

    fn ctx_with(step_count: usize, calls: Vec<DraftedCall>) -> TaskContext {
        let mut ctx = TaskContext::new("task");
        ctx.set_plan((0..step_count).map(|i| format!("step {}", i)).collect());
        ctx.drafted_calls = calls;
        ctx
    }

    #[tokio::test]
    async fn write_file_creates_artifact_and_advances() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with(
            1,
            vec![DraftedCall::new(
                "write_file",
                json!({"path": "hello.txt", "content": "hi"}),
            )],
        );
        stage(dir.path()).run(&mut ctx).await;
        assert_eq!(ctx.current_step_index, 1);
        assert_eq!(ctx.artifacts.len(), 1);
        assert_eq!(ctx.artifacts[0].title, "hello.txt");
        assert!(ctx.drafted_calls.is_empty());
        assert!(!ctx.error_state);
    }

    #[tokio::test]
    async fn failure_is_fail_fast_and_keeps_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with(
            1,
            vec![
                DraftedCall::new("read_file", json!({"path": "../secret"})),
                DraftedCall::new("write_file", json!({"path": "x.txt", "content": "x"})),
            ],
        );
        stage(dir.path()).run(&mut ctx).await;
        assert!(ctx.error_state);
        assert_eq!(ctx.retry_count, 1);
        assert_eq!(ctx.current_step_index, 0);
        assert!(!dir.path().join("x.txt").exists());
        let last = &ctx.last_message().unwrap().content;
        assert!(last.contains("\"kind\":\"validation\""));
        assert!(last.contains("\"skipped\":true"));
    }

    #[tokio::test]
    async fn run_command_is_gated_and_later_writes_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "A").unwrap();
        let mut ctx = ctx_with(
            1,
            vec![
                DraftedCall::new("run_command", json!({"command": "touch ran.txt"})),
                DraftedCall::new("read_file", json!({"path": "a.txt"})),
                DraftedCall::new("write_file", json!({"path": "b.txt", "content": "B"})),
            ],
        );
        stage(dir.path()).run(&mut ctx).await;

        assert!(!dir.path().join("ran.txt").exists());
        assert!(!dir.path().join("b.txt").exists());
        assert_eq!(ctx.pending_approvals.len(), 1);
        assert_eq!(ctx.pending_approvals[0].status, ApprovalStatus::PendingApproval);
        assert!(ctx.awaiting_approval());
        assert_eq!(ctx.current_step_index, 0);
        let last = &ctx.last_message().unwrap().content;
        assert!(last.contains("\"requires_approval\":true"));
        assert!(last.contains("\"output\":\"A\""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn approved_action_runs_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let s = stage(dir.path());
        let mut ctx = ctx_with(
            1,
            vec![DraftedCall::new(
                "run_command",
                json!({"command": "echo run >> count.txt"}),
            )],
        );
        s.run(&mut ctx).await;
        s.run(&mut ctx).await;
        assert!(!dir.path().join("count.txt").exists());

        ctx.approve_pending_actions();
        s.run(&mut ctx).await;
        s.run(&mut ctx).await;

        let content = std::fs::read_to_string(dir.path().join("count.txt")).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert_eq!(ctx.pending_approvals[0].status, ApprovalStatus::Executed);
        assert!(ctx.pending_approvals[0].executed);
        assert_eq!(ctx.current_step_index, 1);
    }

    #[tokio::test]
    async fn rejected_action_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        let s = stage(dir.path());
        let mut ctx = ctx_with(
            1,
            vec![DraftedCall::new("run_command", json!({"command": "touch ran.txt"}))],
        );
        s.run(&mut ctx).await;
        ctx.reject_pending_actions();
        s.run(&mut ctx).await;
        assert!(!dir.path().join("ran.txt").exists());
        assert_eq!(ctx.pending_approvals[0].status, ApprovalStatus::Rejected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fourth_failure_escalates_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let s = stage(dir.path());
        let mut ctx = ctx_with(1, vec![]);

        for round in 1..=4u32 {
            ctx.error_state = false;
            ctx.drafted_calls = vec![DraftedCall::new("run_command", json!({"command": "exit 1"}))];
            s.run(&mut ctx).await;
            ctx.approve_pending_actions();
            ctx.error_state = false;
            s.run(&mut ctx).await;
            assert_eq!(ctx.retry_count, round);
            assert_eq!(ctx.halted, round > 3);
        }

        let escalations: Vec<_> = ctx
            .pending_approvals
            .iter()
            .filter(|p| p.kind == ApprovalKind::Escalation)
            .collect();
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].status, ApprovalStatus::PendingApproval);
        assert_eq!(ctx.current_step_index, 0);

        ctx.drafted_calls = vec![DraftedCall::new("write_file", json!({"path": "x", "content": "x"}))];
        s.run(&mut ctx).await;
        assert!(!dir.path().join("x").exists());
    }

    #[tokio::test]
    async fn non_object_args_are_validation_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with(1, vec![DraftedCall::new("list_files", json!("oops"))]);
        stage(dir.path()).run(&mut ctx).await;
        assert!(ctx.error_state);
        assert_eq!(ctx.retry_count, 1);

        let mut ctx = ctx_with(1, vec![DraftedCall::new("list_files", Value::Null)]);
        stage(dir.path()).run(&mut ctx).await;
        assert!(!ctx.error_state);
        assert_eq!(ctx.current_step_index, 1);
    }

    struct Exploding;

    #[async_trait]
    impl Tool for Exploding {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        async fn execute(&self, _args: Value) -> Result<Value, AgentError> {
            panic!("tool blew up")
        }
    }

    #[tokio::test]
    async fn panicking_tool_is_a_recorded_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = builtin_registry(dir.path(), &ToolsSection::default());
        registry.register(Exploding);
        let stage = DispatchStage::new(Arc::new(DispatchPolicy::new(
            Arc::new(ToolExecutor::new(registry, 5)),
            Arc::new(McpBridge::default()),
            RetryPolicy::default(),
        )));
        let mut ctx = ctx_with(1, vec![DraftedCall::new("explode", json!({}))]);

        assert_eq!(stage.run(&mut ctx).await, Transition::Advance);
        assert!(ctx.error_state);
        assert_eq!(ctx.retry_count, 1);
        assert_eq!(ctx.current_step_index, 0);
        let last = &ctx.last_message().unwrap().content;
        assert!(last.contains("tool blew up"));
        assert!(last.contains("\"kind\":\"execution\""));
    }
}
