//! Agent 错误类型与故障分类
//!
//! 各阶段把 AgentError 折叠进上下文（ErrorState / 调用结果条目），执行图本身从不向外抛错；
//! `fault_kind()` 给出序列化到结果条目里的分类标签。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;

/// JSON-RPC「方法不存在」错误码
pub const METHOD_NOT_FOUND: i64 = -32601;

/// 运行过程中可能出现的错误（连通性、解析、工具、协议、路径逃逸等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Connectivity fault: {0}")]
    Connectivity(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Ambiguous tool '{name}' found on servers: {}", servers.join(", "))]
    AmbiguousTool { name: String, servers: Vec<String> },

    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    /// 子进程响应缺失、格式错误或超时
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// 所有调用形态都失败，携带最后（最有信息量）的底层错误
    #[error("Invocation of '{tool}' on server '{server}' failed: {message}")]
    Invocation {
        server: String,
        tool: String,
        message: String,
    },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Server already connected: {0}")]
    AlreadyConnected(String),

    #[error("Server not connected: {0}")]
    ServerNotConnected(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// 任务正在运行，单写者约束下拒绝并发决策
    #[error("Task is running: {0}")]
    TaskBusy(String),

    #[error("Nothing to decide for task: {0}")]
    NothingToDecide(String),
}

/// 故障分类（写入调用结果条目的 error.kind）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Connectivity,
    ToolResolution,
    Validation,
    Protocol,
    Execution,
    Connection,
    Config,
    Task,
}

impl AgentError {
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            AgentError::Connectivity(_) => FaultKind::Connectivity,
            AgentError::UnknownTool(_) | AgentError::AmbiguousTool { .. } => {
                FaultKind::ToolResolution
            }
            AgentError::Validation(_) | AgentError::PathEscape(_) => FaultKind::Validation,
            AgentError::Protocol(_) | AgentError::Rpc { .. } => FaultKind::Protocol,
            AgentError::Invocation { .. }
            | AgentError::ToolExecutionFailed(_)
            | AgentError::ToolTimeout(_) => FaultKind::Execution,
            AgentError::Connection(_)
            | AgentError::AlreadyConnected(_)
            | AgentError::ServerNotConnected(_) => FaultKind::Connection,
            AgentError::ConfigError(_) => FaultKind::Config,
            AgentError::TaskNotFound(_)
            | AgentError::TaskBusy(_)
            | AgentError::NothingToDecide(_) => FaultKind::Task,
        }
    }

    /// 对端不认识该方法（用于回退链：继续尝试下一种形态）
    pub fn is_method_not_found(&self) -> bool {
        match self {
            AgentError::Rpc { code, message } => {
                *code == METHOD_NOT_FOUND || message.to_lowercase().contains("method not found")
            }
            _ => false,
        }
    }
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        AgentError::Connectivity(e.to_string())
    }
}
