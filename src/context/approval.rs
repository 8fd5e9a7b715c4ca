//! 人工审批条目：待执行动作（HITL）与升级（Escalation）

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// 需人工放行的工具调用（如 run_command）
    Action,
    /// 失败次数超过阈值后的终止态，需人工清除
    Escalation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    PendingApproval,
    Approved,
    Rejected,
    Executed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: Uuid,
    pub kind: ApprovalKind,
    /// 动作对应的工具名；升级条目为触发升级的最后一次失败的工具
    pub tool: String,
    pub args: Value,
    pub status: ApprovalStatus,
    /// 一经置位不再清除，保证同一审批最多执行一次
    #[serde(default)]
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PendingApproval {
    pub fn action(tool: impl Into<String>, args: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: ApprovalKind::Action,
            tool: tool.into(),
            args,
            status: ApprovalStatus::PendingApproval,
            executed: false,
            result: None,
            error: None,
            reason: None,
        }
    }

    /// details 记录最后一次失败（工具、错误），供人工排查
    pub fn escalation(tool: impl Into<String>, details: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: ApprovalKind::Escalation,
            tool: tool.into(),
            args: details,
            status: ApprovalStatus::PendingApproval,
            executed: false,
            result: None,
            error: None,
            reason: Some("retry_limit_exceeded".to_string()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ApprovalStatus::PendingApproval
    }

    /// 已被人工放行、尚未执行的动作
    pub fn is_runnable(&self) -> bool {
        self.kind == ApprovalKind::Action && self.status == ApprovalStatus::Approved && !self.executed
    }
}
