//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, args) 在超时内调用工具，
//! 超时转 ToolTimeout，未注册转 UnknownTool，工具 panic 转 ToolExecutionFailed；
//! 每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定内置工具；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<Value, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::UnknownTool(tool_name.to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let guarded = AssertUnwindSafe(tool.execute(args)).catch_unwind();
        let result = match timeout(self.timeout, guarded).await {
            Ok(Ok(r)) => Ok(r),
            Ok(Err(panic)) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(tool = %tool_name, panic = %message, "Tool panicked");
                Ok(Err(AgentError::ToolExecutionFailed(format!(
                    "{} panicked: {}",
                    tool_name, message
                ))))
            }
            Err(elapsed) => Err(elapsed),
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(r) => r,
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.registry.tool_descriptions()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

pub(crate) fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
