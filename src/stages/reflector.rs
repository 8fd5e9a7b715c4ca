//! reflector 阶段：分析上一步的错误输出，给出修正指令并清除 error_state

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Message, TaskContext};
use crate::llm::LlmClient;
use crate::workflow::{Stage, Transition};

pub const REFLECTOR_PROMPT: &str = "You are an expert coding assistant.\n\
The previous step failed. Analyze the error output provided below.\n\
Explain why it failed and provide a specific instruction to fix it.\n\
Do not generate code yet, just the reasoning.";

const PLACEHOLDER_ANALYSIS: &str =
    "LLM call failed: unable to analyze error output automatically.";

pub struct ReflectorStage {
    llm: Arc<dyn LlmClient>,
}

impl ReflectorStage {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for ReflectorStage {
    async fn run(&self, ctx: &mut TaskContext) -> Transition {
        let last = ctx
            .last_message()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let messages = vec![
            Message::system(REFLECTOR_PROMPT),
            Message::user(format!("Error output:\n\n{}", last)),
        ];

        let analysis = match self.llm.complete(&messages, None).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Reflector LLM call failed");
                PLACEHOLDER_ANALYSIS.to_string()
            }
        };

        ctx.thought_trace = Some(analysis.clone());
        ctx.active_model = Some(self.llm.model_id());
        ctx.push_message(Message::assistant(analysis));
        ctx.error_state = false;
        Transition::Advance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn records_analysis_and_clears_error() {
        let llm = MockLlmClient::new()
            .with_model("reasoner")
            .with_reflection("Path was outside the sandbox; use a relative path.");
        let stage = ReflectorStage::new(Arc::new(llm));
        let mut ctx = TaskContext::new("t");
        ctx.error_state = true;
        ctx.retry_count = 2;
        ctx.push_message(Message::tool("Tool results: [...]"));

        stage.run(&mut ctx).await;
        assert!(!ctx.error_state);
        assert_eq!(ctx.retry_count, 2);
        assert_eq!(ctx.active_model.as_deref(), Some("reasoner"));
        assert_eq!(
            ctx.thought_trace.as_deref(),
            Some("Path was outside the sandbox; use a relative path.")
        );
    }

    #[tokio::test]
    async fn placeholder_on_failure() {
        let stage = ReflectorStage::new(Arc::new(MockLlmClient::new().failing()));
        let mut ctx = TaskContext::new("t");
        ctx.error_state = true;
        stage.run(&mut ctx).await;
        assert!(!ctx.error_state);
        assert_eq!(ctx.thought_trace.as_deref(), Some(PLACEHOLDER_ANALYSIS));
    }
}
