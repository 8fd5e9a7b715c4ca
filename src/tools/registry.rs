//! 工具注册表
//!
//! 所有内置工具实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找；
//! 工具自己声明副作用类型、是否需人工审批，以及成功后要生成的产物。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::Artifact;
use crate::core::AgentError;

/// 工具副作用：只读调用在审批闸门之后仍可继续执行，写类调用则推迟
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEffect {
    ReadOnly,
    Mutating,
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON 对象）
///
/// 执行失败返回带分类的 AgentError，而不是靠输出文本判断成败。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（起草文档中的 "name" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    /// 是否属于「必须人工放行」类（任意 shell 执行）
    fn requires_approval(&self) -> bool {
        false
    }

    /// 调用成功后由参数合成的产物（写文件等）
    fn artifact(&self, _args: &Value) -> Option<Artifact> {
        None
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，支持 register / get / tool_names
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回按名称排序的 (name, description)，用于生成 prompt 中的 Available tools 段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_string()))
            .collect();
        out.sort();
        out
    }
}

/// 取必填字符串参数，缺失或类型不符为参数校验错误
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, AgentError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::Validation(format!("missing string argument '{}'", key)))
}

/// 取可选字符串参数；存在但类型不符同样视为校验错误
pub fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, AgentError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(AgentError::Validation(format!(
            "argument '{}' must be a string",
            key
        ))),
    }
}
