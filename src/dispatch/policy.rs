//! 调度策略：把起草的抽象调用解析到内置工具或协议桥，并判定审批类、写类与产物
//!
//! 审批类 = 工具自身声明 requires_approval（run_command）∪ 配置 policy.approval_required。
//! 桥上的外部工具一律视为写类（审批闸门之后同批次内跳过）。

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::config::PolicySection;
use crate::context::{Artifact, TaskContext};
use crate::core::AgentError;
use crate::mcp::McpBridge;
use crate::tools::{ToolEffect, ToolExecutor};

/// 失败计数与升级阈值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// retry_count 超过该值即升级
    pub threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { threshold: 3 }
    }
}

impl RetryPolicy {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// 记录一次已分类失败，返回是否在本次升级
    pub fn record(&self, ctx: &mut TaskContext, tool: &str, error: &AgentError, args: &Value) -> bool {
        ctx.record_failure(
            self.threshold,
            tool,
            json!({
                "error": error.to_string(),
                "kind": error.fault_kind(),
                "args": args,
            }),
        )
    }
}

pub struct DispatchPolicy {
    executor: Arc<ToolExecutor>,
    bridge: Arc<McpBridge>,
    retry: RetryPolicy,
    approval_required: HashSet<String>,
}

impl DispatchPolicy {
    pub fn new(executor: Arc<ToolExecutor>, bridge: Arc<McpBridge>, retry: RetryPolicy) -> Self {
        Self {
            executor,
            bridge,
            retry,
            approval_required: HashSet::new(),
        }
    }

    pub fn from_config(executor: Arc<ToolExecutor>, bridge: Arc<McpBridge>, cfg: &PolicySection) -> Self {
        Self::new(executor, bridge, RetryPolicy::new(cfg.retry_threshold))
            .with_approval_required(cfg.approval_required.iter().cloned())
    }

    pub fn with_approval_required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approval_required.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    pub fn bridge(&self) -> &Arc<McpBridge> {
        &self.bridge
    }

    pub fn requires_approval(&self, name: &str) -> bool {
        self.approval_required.contains(name)
            || self
                .executor
                .get_tool(name)
                .map(|t| t.requires_approval())
                .unwrap_or(false)
    }

    pub fn is_write_type(&self, name: &str) -> bool {
        match self.executor.get_tool(name) {
            Some(tool) => tool.effect() == ToolEffect::Mutating,
            None => true,
        }
    }

    /// 参数必须是对象或 null（null 视为 {}）
    pub fn normalize_args(args: Value) -> Result<Value, AgentError> {
        match args {
            Value::Null => Ok(Value::Object(Map::new())),
            Value::Object(_) => Ok(args),
            other => Err(AgentError::Validation(format!(
                "tool arguments must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// 执行一次调用：内置工具优先，否则交给协议桥解析
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        if self.executor.contains(name) {
            return self.executor.execute(name, args).await;
        }
        tracing::info!(tool = %name, "Routing call to tool server");
        self.bridge.call_tool(name, args).await
    }

    /// 写类工具成功后的产物
    pub fn artifact_for(&self, name: &str, args: &Value) -> Option<Artifact> {
        self.executor.get_tool(name).and_then(|t| t.artifact(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsSection;
    use crate::tools::builtin_registry;

    fn policy(dir: &std::path::Path) -> DispatchPolicy {
        let registry = builtin_registry(dir, &ToolsSection::default());
        DispatchPolicy::new(
            Arc::new(ToolExecutor::new(registry, 5)),
            Arc::new(McpBridge::default()),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn approval_class_and_write_type() {
        let dir = tempfile::tempdir().unwrap();
        let p = policy(dir.path()).with_approval_required(["docs:delete"]);
        assert!(p.requires_approval("run_command"));
        assert!(p.requires_approval("docs:delete"));
        assert!(!p.requires_approval("write_file"));
        assert!(p.is_write_type("write_file"));
        assert!(!p.is_write_type("read_file"));
        assert!(p.is_write_type("docs:search"));
    }

    #[test]
    fn args_must_be_object_or_null() {
        assert_eq!(DispatchPolicy::normalize_args(Value::Null).unwrap(), json!({}));
        assert!(DispatchPolicy::normalize_args(json!({"a": 1})).is_ok());
        assert!(matches!(
            DispatchPolicy::normalize_args(json!(["x"])),
            Err(AgentError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unknown_tool_without_servers_is_resolution_fault() {
        let dir = tempfile::tempdir().unwrap();
        let err = policy(dir.path()).invoke("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));
    }
}
