//! TaskContext 本体与工具调用结果记录

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::{
    ApprovalKind, ApprovalStatus, Artifact, DraftedCall, Message, PendingApproval,
};
use crate::core::FaultKind;

/// 贯穿执行图的任务上下文
///
/// 不变量：`current_step_index <= plan.len()`；`halted` 为真时不再推进步骤，直到人工介入。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskContext {
    pub messages: Vec<Message>,
    pub plan: Vec<String>,
    pub current_step_index: usize,
    pub artifacts: Vec<Artifact>,
    pub drafted_calls: Vec<DraftedCall>,
    pub pending_approvals: Vec<PendingApproval>,
    pub error_state: bool,
    pub retry_count: u32,
    pub halted: bool,
    pub thought_trace: Option<String>,
    pub active_model: Option<String>,
}

impl TaskContext {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Default::default()
        }
    }

    pub fn push_message(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// 新的规划替换旧规划，并从第一步开始
    pub fn set_plan(&mut self, steps: Vec<String>) {
        self.plan = steps;
        self.current_step_index = 0;
    }

    pub fn current_step(&self) -> Option<&str> {
        self.plan.get(self.current_step_index).map(String::as_str)
    }

    pub fn has_remaining_steps(&self) -> bool {
        self.current_step_index < self.plan.len()
    }

    /// 前进一步；已到末尾时不动
    pub fn advance_step(&mut self) {
        if self.current_step_index < self.plan.len() {
            self.current_step_index += 1;
        }
    }

    /// 起草结果只被 dispatch 消费一次
    pub fn take_drafted_calls(&mut self) -> Vec<DraftedCall> {
        std::mem::take(&mut self.drafted_calls)
    }

    pub fn push_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    /// 是否有等待人工放行的动作
    pub fn awaiting_approval(&self) -> bool {
        self.pending_approvals
            .iter()
            .any(|p| p.kind == ApprovalKind::Action && p.is_open())
    }

    pub fn has_open_escalation(&self) -> bool {
        self.pending_approvals
            .iter()
            .any(|p| p.kind == ApprovalKind::Escalation && p.is_open())
    }

    pub fn escalations(&self) -> impl Iterator<Item = &PendingApproval> {
        self.pending_approvals
            .iter()
            .filter(|p| p.kind == ApprovalKind::Escalation)
    }

    /// 记录一次已分类的失败：置 error_state、retry_count 加一；
    /// 超过阈值时追加唯一的 Escalation 并置 halted。返回是否在本次升级。
    pub fn record_failure(&mut self, threshold: u32, tool: &str, details: Value) -> bool {
        self.error_state = true;
        self.retry_count = self.retry_count.saturating_add(1);
        if self.retry_count > threshold && !self.halted {
            if !self.has_open_escalation() {
                self.pending_approvals
                    .push(PendingApproval::escalation(tool, details));
            }
            self.halted = true;
            tracing::warn!(
                retry_count = self.retry_count,
                tool = %tool,
                "Retry threshold exceeded, task halted for human review"
            );
            return true;
        }
        false
    }

    /// 人工批准所有待放行动作，返回被批准的数量
    pub fn approve_pending_actions(&mut self) -> usize {
        let mut n = 0;
        for p in self
            .pending_approvals
            .iter_mut()
            .filter(|p| p.kind == ApprovalKind::Action && p.is_open())
        {
            p.status = ApprovalStatus::Approved;
            n += 1;
        }
        n
    }

    /// 人工拒绝所有待放行动作，返回被拒绝的数量
    pub fn reject_pending_actions(&mut self) -> usize {
        let mut n = 0;
        for p in self
            .pending_approvals
            .iter_mut()
            .filter(|p| p.kind == ApprovalKind::Action && p.is_open())
        {
            p.status = ApprovalStatus::Rejected;
            n += 1;
        }
        n
    }

    /// 人工清除升级：升级条目标记为 approved，重置 halted / error_state / retry_count
    pub fn clear_escalation(&mut self) -> bool {
        let mut cleared = false;
        for p in self
            .pending_approvals
            .iter_mut()
            .filter(|p| p.kind == ApprovalKind::Escalation && p.is_open())
        {
            p.status = ApprovalStatus::Approved;
            cleared = true;
        }
        if cleared || self.halted {
            self.halted = false;
            self.error_state = false;
            self.retry_count = 0;
        }
        cleared
    }

    /// 人工驳回升级：条目标记为 rejected，任务保持 halted
    pub fn reject_escalation(&mut self) -> bool {
        let mut rejected = false;
        for p in self
            .pending_approvals
            .iter_mut()
            .filter(|p| p.kind == ApprovalKind::Escalation && p.is_open())
        {
            p.status = ApprovalStatus::Rejected;
            rejected = true;
        }
        rejected
    }
}

/// 单次调用失败的结构化描述
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallError {
    pub kind: FaultKind,
    pub message: String,
}

/// 单次工具调用的结果条目（以 JSON 数组形式写入 Tool 消息）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl CallOutcome {
    pub fn ok(name: impl Into<String>, output: Value) -> Self {
        Self {
            name: name.into(),
            approval_id: None,
            output: Some(output),
            error: None,
            requires_approval: false,
            skipped: false,
        }
    }

    pub fn failed(name: impl Into<String>, kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            approval_id: None,
            output: None,
            error: Some(CallError {
                kind,
                message: message.into(),
            }),
            requires_approval: false,
            skipped: false,
        }
    }

    pub fn gated(name: impl Into<String>, approval_id: Uuid) -> Self {
        Self {
            name: name.into(),
            approval_id: Some(approval_id),
            output: None,
            error: None,
            requires_approval: true,
            skipped: false,
        }
    }

    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            approval_id: None,
            output: None,
            error: None,
            requires_approval: false,
            skipped: true,
        }
    }

    pub fn with_approval(mut self, id: Uuid) -> Self {
        self.approval_id = Some(id);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
