//! 执行图类型定义
//!
//! 阶段（Stage）返回 Transition 决定下一跳；Runner 的结果为 RunOutcome（完成 / 暂停 / 停止）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::TaskContext;

/// 起点标记
pub const START: &str = "__start__";
/// 终点标记
pub const END: &str = "__end__";

/// 阶段执行后的控制流
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// 沿第一条出边前进
    Advance,
    /// 条件跳转：下一步执行指定阶段（仍受暂停闸门约束），可为 END
    Jump(String),
    /// 主动暂停，人工决策后从 resume_at 继续
    Pause { resume_at: String },
}

impl Transition {
    pub fn jump(stage: impl Into<String>) -> Self {
        Transition::Jump(stage.into())
    }

    pub fn pause(resume_at: impl Into<String>) -> Self {
        Transition::Pause {
            resume_at: resume_at.into(),
        }
    }
}

/// 图中的一个命名阶段；不能完成契约时应把失败写进上下文并正常返回
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, ctx: &mut TaskContext) -> Transition;
}

/// 非正常停止的原因（调用方应检查上下文而非返回码）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    NoOutgoingEdge { from: String },
    UnknownStage { name: String },
    StagePanicked { stage: String, message: String },
    TransitionLimit { limit: usize },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::NoOutgoingEdge { from } => write!(f, "no outgoing edge from '{}'", from),
            StopReason::UnknownStage { name } => write!(f, "unknown stage '{}'", name),
            StopReason::StagePanicked { stage, message } => {
                write!(f, "stage '{}' panicked: {}", stage, message)
            }
            StopReason::TransitionLimit { limit } => {
                write!(f, "transition limit {} exhausted", limit)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Completed,
    Paused { resume_at: String },
    Stopped { reason: StopReason },
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub context: TaskContext,
    pub state: RunState,
}

impl RunOutcome {
    pub fn is_paused(&self) -> bool {
        matches!(self.state, RunState::Paused { .. })
    }

    pub fn resume_at(&self) -> Option<&str> {
        match &self.state {
            RunState::Paused { resume_at } => Some(resume_at),
            _ => None,
        }
    }
}

/// 每个阶段执行完后收到通知（用于实时刷新任务快照）
#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn on_stage_complete(&self, stage: &str, ctx: &TaskContext);
}
