//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Ollama / DeepSeek / Mock）实现 LlmClient：
//! complete(messages, output_schema?) 返回文本，失败一律视为连通性故障。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::context::Message;

/// LLM 调用失败（端点不可达、请求构造失败、超时等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),
    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
    #[error("LLM unavailable: {0}")]
    Unavailable(String),
}

/// 按能力选择模型：规划 / 反思用推理模型，起草用代码模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Reasoning,
    Coding,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；output_schema 为期望的 JSON 输出结构（可选）
    async fn complete(
        &self,
        messages: &[Message],
        output_schema: Option<&Value>,
    ) -> Result<String, LlmError>;

    /// 模型标识，写入 TaskContext.active_model
    fn model_id(&self) -> String;
}
