//! planner 阶段：结合仓库结构图把用户请求拆成有序步骤

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Message, TaskContext};
use crate::llm::LlmClient;
use crate::stages::parse::extract_json;
use crate::tools::{generate_repo_map, plan_schema, Plan};
use crate::workflow::{Stage, Transition};

const PLANNER_PROMPT: &str = "You are a coding architect. Break the user request into a step-by-step plan. \
Each step must be a single concrete instruction that can be carried out with the available tools. \
After making changes, include a verification step that runs the tests or the program. \
Return ONLY a JSON object of the form {\"steps\": [\"...\", ...]} with no additional text.";

/// 端点不可达时的占位回复
const EMPTY_PLAN: &str = r#"{"steps": []}"#;

pub fn planner_system_prompt(repo_map: &str) -> String {
    format!(
        "{}\n\nHere is the current project structure:\n{}\n\nUse this to plan your file edits accurately.",
        PLANNER_PROMPT, repo_map
    )
}

/// 解析规划回复；无法解析时为空规划
pub fn parse_plan(raw: &str) -> Vec<String> {
    extract_json(raw)
        .and_then(|v| serde_json::from_value::<Plan>(v).ok())
        .map(|p| p.steps)
        .unwrap_or_default()
}

pub struct PlannerStage {
    llm: Arc<dyn LlmClient>,
    workspace: PathBuf,
}

impl PlannerStage {
    pub fn new(llm: Arc<dyn LlmClient>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            llm,
            workspace: workspace.into(),
        }
    }
}

#[async_trait]
impl Stage for PlannerStage {
    async fn run(&self, ctx: &mut TaskContext) -> Transition {
        let root = self.workspace.clone();
        let repo_map = tokio::task::spawn_blocking(move || generate_repo_map(&root))
            .await
            .unwrap_or_default();

        let mut messages = vec![Message::system(planner_system_prompt(&repo_map))];
        messages.extend(ctx.messages.iter().cloned());

        let schema = plan_schema();
        let raw = match self.llm.complete(&messages, Some(&schema)).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Planner LLM call failed, using empty plan");
                EMPTY_PLAN.to_string()
            }
        };

        let steps = parse_plan(&raw);
        tracing::info!(steps = steps.len(), "Plan created");
        ctx.set_plan(steps);
        ctx.active_model = Some(self.llm.model_id());
        ctx.push_message(Message::assistant(raw));
        Transition::Advance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn plan_parsing_tolerates_fences_and_garbage() {
        assert_eq!(parse_plan(r#"{"steps": ["a", "b"]}"#), vec!["a", "b"]);
        assert_eq!(parse_plan("```json\n{\"steps\": [\"x\"]}\n```"), vec!["x"]);
        assert!(parse_plan("I cannot plan this").is_empty());
    }

    #[tokio::test]
    async fn replaces_plan_and_resets_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let llm = Arc::new(MockLlmClient::new().with_plan(["write hello.txt", "verify"]));
        let stage = PlannerStage::new(llm, dir.path());

        let mut ctx = TaskContext::new("make hello");
        ctx.set_plan(vec!["old".into()]);
        ctx.advance_step();
        stage.run(&mut ctx).await;

        assert_eq!(ctx.plan, vec!["write hello.txt", "verify"]);
        assert_eq!(ctx.current_step_index, 0);
        assert!(ctx.last_message().unwrap().content.contains("steps"));
    }

    #[tokio::test]
    async fn unreachable_oracle_yields_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        let stage = PlannerStage::new(Arc::new(MockLlmClient::new().failing()), dir.path());
        let mut ctx = TaskContext::new("anything");
        stage.run(&mut ctx).await;
        assert!(ctx.plan.is_empty());
        assert_eq!(ctx.last_message().unwrap().content, EMPTY_PLAN);
    }
}
