//! drafter 阶段：为当前步骤起草工具调用文档
//!
//! 可用工具 = 内置工具 + 协议桥上带命名空间的外部工具。
//! 接受 `{"tool_calls": [...]}`、裸数组，或放在代码块中的二者；回复中非 JSON 的代码块记为 code 产物。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::{Artifact, DraftDocument, DraftedCall, Message, TaskContext};
use crate::core::AgentError;
use crate::dispatch::RetryPolicy;
use crate::llm::LlmClient;
use crate::mcp::McpBridge;
use crate::stages::parse::{extract_json, fenced_blocks};
use crate::tools::executor::args_preview;
use crate::tools::{draft_schema, ToolExecutor};
use crate::workflow::{Stage, Transition, ROUTER};

const DRAFTER_PROMPT: &str = "You are a coding agent executing one step of a plan. \
Decide which tool calls accomplish the step. Use only the tools listed below; \
external tools must be called by their full `server:tool` name. \
Return ONLY a JSON object of the form {\"tool_calls\": [{\"name\": \"...\", \"args\": {...}}]}. \
Return an empty list when the step needs no tool.";

pub fn drafter_system_prompt(tools: &[(String, String)]) -> String {
    let mut out = String::from(DRAFTER_PROMPT);
    out.push_str("\n\nAvailable tools:\n");
    for (name, desc) in tools {
        out.push_str(&format!("- {}: {}\n", name, desc));
    }
    out
}

/// 解析起草回复
///
/// 显式的空 `tool_calls`，或不含 JSON 只带代码块的回复，得到空调用列表；
/// JSON 存在但不是合法的调用文档（任一元素缺 name 等），或回复既无 JSON 也无代码，为 Validation 错误。
pub fn parse_draft(raw: &str) -> Result<Vec<DraftedCall>, AgentError> {
    match extract_json(raw) {
        Some(v @ Value::Array(_)) => serde_json::from_value(v).map_err(invalid_draft),
        Some(v @ Value::Object(_)) if v.get("tool_calls").is_some() => {
            serde_json::from_value::<DraftDocument>(v)
                .map(|d| d.tool_calls)
                .map_err(invalid_draft)
        }
        Some(other) => Err(AgentError::Validation(format!(
            "Draft is not a tool-call document: {}",
            args_preview(&other)
        ))),
        None if !code_artifacts(raw).is_empty() => Ok(Vec::new()),
        None => Err(AgentError::Validation(
            "Draft contains neither a tool-call document nor code".to_string(),
        )),
    }
}

fn invalid_draft(e: serde_json::Error) -> AgentError {
    AgentError::Validation(format!("Malformed tool-call document: {}", e))
}

/// 回复中非 JSON 的代码块
fn code_artifacts(raw: &str) -> Vec<Artifact> {
    fenced_blocks(raw)
        .into_iter()
        .filter(|(lang, body)| {
            !body.trim().is_empty()
                && lang != "json"
                && serde_json::from_str::<Value>(body.trim()).is_err()
        })
        .map(|(_, body)| Artifact::generated_code(body))
        .collect()
}

pub struct DrafterStage {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    bridge: Arc<McpBridge>,
    retry: RetryPolicy,
}

impl DrafterStage {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        bridge: Arc<McpBridge>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            executor,
            bridge,
            retry,
        }
    }

    async fn available_tools(&self) -> Vec<(String, String)> {
        let mut tools = self.executor.tool_descriptions();
        tools.extend(self.bridge.tool_catalog().await);
        tools
    }
}

#[async_trait]
impl Stage for DrafterStage {
    async fn run(&self, ctx: &mut TaskContext) -> Transition {
        let Some(step) = ctx.current_step().map(str::to_string) else {
            tracing::info!("No remaining step to draft");
            ctx.drafted_calls.clear();
            return Transition::jump(ROUTER);
        };

        ctx.push_message(Message::user(format!("Execute this specific step: {}", step)));
        let mut messages = vec![Message::system(drafter_system_prompt(
            &self.available_tools().await,
        ))];
        messages.extend(ctx.messages.iter().cloned());

        let schema = draft_schema();
        let raw = match self.llm.complete(&messages, Some(&schema)).await {
            Ok(r) => r,
            Err(e) => {
                let err = AgentError::from(e);
                tracing::warn!(error = %err, step = %step, "Drafter LLM call failed");
                ctx.push_message(Message::assistant(format!("LLM call failed: {}", err)));
                self.retry
                    .record(ctx, "drafter", &err, &json!({ "step": step }));
                return Transition::jump(ROUTER);
            }
        };

        let calls = match parse_draft(&raw) {
            Ok(calls) => calls,
            Err(err) => {
                tracing::warn!(error = %err, step = %step, "Draft rejected");
                ctx.drafted_calls.clear();
                ctx.push_message(Message::assistant(raw));
                ctx.push_message(Message::assistant(format!("Draft rejected: {}", err)));
                self.retry
                    .record(ctx, "drafter", &err, &json!({ "step": step }));
                return Transition::jump(ROUTER);
            }
        };

        ctx.drafted_calls = calls;
        for artifact in code_artifacts(&raw) {
            ctx.push_artifact(artifact);
        }
        tracing::info!(step = %step, calls = ctx.drafted_calls.len(), "Drafted tool calls");
        ctx.push_message(Message::assistant(raw));
        Transition::Advance
    }
}
