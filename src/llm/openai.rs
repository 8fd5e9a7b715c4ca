//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 OpenAI、DeepSeek、Ollama（/v1）等。
//! 指定输出 schema 时，以追加 system 指令的方式约束 JSON 输出。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Message, Role};
use crate::llm::{LlmClient, LlmError};

/// OpenAI 兼容客户端：持有 Client 与 model 名，complete 时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
        output_schema: Option<&Value>,
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let build_err = |e: async_openai::error::OpenAIError| LlmError::Request(e.to_string());
        let mut out = Vec::with_capacity(messages.len() + 1);
        for m in messages {
            let msg = match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(build_err)?,
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(build_err)?,
                ),
                // 工具结果以 user 身份回填（无 tool_call_id 关联）
                Role::Tool => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(format!("Tool results:\n{}", m.content))
                        .build()
                        .map_err(build_err)?,
                ),
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(build_err)?,
                ),
            };
            out.push(msg);
        }
        if let Some(schema) = output_schema {
            let instruction = format!(
                "Respond with a single JSON value that validates against this JSON Schema. \
                 Output JSON only, without markdown fences or commentary.\n{}",
                serde_json::to_string_pretty(schema).unwrap_or_default()
            );
            out.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(instruction)
                    .build()
                    .map_err(build_err)?,
            ));
        }
        Ok(out)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        output_schema: Option<&Value>,
    ) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages, output_schema)?)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}
