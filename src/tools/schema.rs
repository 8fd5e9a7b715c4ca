//! 结构化输出的 JSON Schema（schemars 自动生成）
//!
//! 规划阶段要求 `{"steps": [...]}`，起草阶段要求 `{"tool_calls": [{"name", "args"}]}`；
//! schema 同时注入 prompt 并作为 LlmClient::complete 的 output_schema。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::DraftDocument;

/// 规划结果：有序步骤
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// 每一步是一句可执行的指令
    #[serde(default)]
    pub steps: Vec<String>,
}

pub fn plan_schema() -> Value {
    serde_json::to_value(schema_for!(Plan)).unwrap_or(Value::Null)
}

pub fn draft_schema() -> Value {
    serde_json::to_value(schema_for!(DraftDocument)).unwrap_or(Value::Null)
}

fn has_property(schema: &Value, key: &str) -> bool {
    schema
        .get("properties")
        .and_then(|p| p.get(key))
        .is_some()
}

pub fn is_plan_schema(schema: &Value) -> bool {
    has_property(schema, "steps")
}

pub fn is_draft_schema(schema: &Value) -> bool {
    has_property(schema, "tool_calls")
}
