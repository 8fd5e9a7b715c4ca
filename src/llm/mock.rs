//! Mock LLM 客户端（用于测试与无 Key 环境）
//!
//! 按输出 schema 路由：规划 schema 返回预设 plan，起草 schema 依次返回预设 draft（最后一条重复），
//! 无 schema 返回反思文本。可设置为始终失败，模拟端点不可达。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Message, Role};
use crate::llm::{LlmClient, LlmError};
use crate::tools::schema::{is_draft_schema, is_plan_schema};

pub struct MockLlmClient {
    model: String,
    plan: Mutex<Vec<String>>,
    drafts: Mutex<Vec<String>>,
    draft_cursor: AtomicUsize,
    reflection: String,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            model: "mock".to_string(),
            plan: Mutex::new(Vec::new()),
            drafts: Mutex::new(Vec::new()),
            draft_cursor: AtomicUsize::new(0),
            reflection: "The previous step failed; retry with corrected arguments.".to_string(),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_plan<S: Into<String>>(self, steps: impl IntoIterator<Item = S>) -> Self {
        if let Ok(mut plan) = self.plan.lock() {
            *plan = steps.into_iter().map(Into::into).collect();
        }
        self
    }

    /// 追加一条起草回复（原样返回，可为 JSON 或带代码块的文本）
    pub fn with_draft(self, raw: impl Into<String>) -> Self {
        if let Ok(mut drafts) = self.drafts.lock() {
            drafts.push(raw.into());
        }
        self
    }

    pub fn with_reflection(mut self, text: impl Into<String>) -> Self {
        self.reflection = text.into();
        self
    }

    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// 已收到的调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_draft(&self) -> String {
        let drafts = match self.drafts.lock() {
            Ok(d) => d,
            Err(_) => return r#"{"tool_calls": []}"#.to_string(),
        };
        if drafts.is_empty() {
            return r#"{"tool_calls": []}"#.to_string();
        }
        let i = self.draft_cursor.fetch_add(1, Ordering::SeqCst);
        drafts[i.min(drafts.len() - 1)].clone()
    }

    fn plan_json(&self) -> String {
        let steps = self.plan.lock().map(|p| p.clone()).unwrap_or_default();
        serde_json::json!({ "steps": steps }).to_string()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        output_schema: Option<&Value>,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LlmError::Unavailable("mock endpoint offline".to_string()));
        }
        match output_schema {
            Some(schema) if is_plan_schema(schema) => Ok(self.plan_json()),
            Some(schema) if is_draft_schema(schema) => Ok(self.next_draft()),
            _ => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                tracing::debug!(input_len = last_user.len(), "mock reflection");
                Ok(self.reflection.clone())
            }
        }
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}
