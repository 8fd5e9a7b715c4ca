//! 按配置与环境变量创建 LLM 后端，并按能力分配模型

use std::sync::Arc;

use crate::config::LlmSection;
use crate::llm::{Capability, LlmClient, MockLlmClient, OpenAiClient};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// 按能力区分的一组模型
#[derive(Clone)]
pub struct ModelSet {
    reasoning: Arc<dyn LlmClient>,
    coding: Arc<dyn LlmClient>,
}

impl ModelSet {
    pub fn new(reasoning: Arc<dyn LlmClient>, coding: Arc<dyn LlmClient>) -> Self {
        Self { reasoning, coding }
    }

    /// 所有能力共用一个客户端（测试常用）
    pub fn uniform(client: Arc<dyn LlmClient>) -> Self {
        Self {
            reasoning: client.clone(),
            coding: client,
        }
    }

    pub fn get(&self, capability: Capability) -> Arc<dyn LlmClient> {
        match capability {
            Capability::Reasoning => self.reasoning.clone(),
            Capability::Coding => self.coding.clone(),
        }
    }
}

/// 根据 [llm] 段选择后端（OpenAI / DeepSeek / Ollama / Mock）
///
/// openai 与 deepseek 需要对应 API Key，缺失时回退 Mock 并告警；ollama 无需 Key。
pub fn create_models_from_config(cfg: &LlmSection) -> ModelSet {
    let provider = cfg.provider.to_lowercase();
    let timeout = cfg.timeouts.request;
    let build = |base: Option<&str>, key: Option<String>| -> ModelSet {
        let reasoning = OpenAiClient::new(base, &cfg.reasoning_model, key.as_deref(), timeout);
        let coding = OpenAiClient::new(base, &cfg.coding_model, key.as_deref(), timeout);
        ModelSet::new(Arc::new(reasoning), Arc::new(coding))
    };

    match provider.as_str() {
        "ollama" => {
            let base = cfg.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL);
            tracing::info!(base = %base, "Using Ollama LLM ({} / {})", cfg.reasoning_model, cfg.coding_model);
            build(Some(base), Some("ollama".to_string()))
        }
        "deepseek" => match std::env::var("DEEPSEEK_API_KEY").ok() {
            Some(key) => {
                let base = cfg.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
                tracing::info!("Using DeepSeek LLM ({} / {})", cfg.reasoning_model, cfg.coding_model);
                build(Some(base), Some(key))
            }
            None => mock_fallback("DEEPSEEK_API_KEY not set"),
        },
        "openai" => match std::env::var("OPENAI_API_KEY").ok() {
            Some(key) => {
                tracing::info!("Using OpenAI LLM ({} / {})", cfg.reasoning_model, cfg.coding_model);
                build(cfg.base_url.as_deref(), Some(key))
            }
            None => mock_fallback("OPENAI_API_KEY not set"),
        },
        "mock" => ModelSet::uniform(Arc::new(MockLlmClient::new())),
        other => mock_fallback(&format!("unknown provider '{}'", other)),
    }
}

fn mock_fallback(reason: &str) -> ModelSet {
    tracing::warn!("{}, using Mock LLM", reason);
    ModelSet::uniform(Arc::new(MockLlmClient::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_uses_mock_for_all_capabilities() {
        let cfg = LlmSection::default();
        let models = create_models_from_config(&cfg);
        assert_eq!(models.get(Capability::Reasoning).model_id(), "mock");
        assert_eq!(models.get(Capability::Coding).model_id(), "mock");
    }

    #[test]
    fn ollama_assigns_models_per_capability() {
        let cfg = LlmSection {
            provider: "ollama".into(),
            reasoning_model: "llama3".into(),
            coding_model: "qwen2.5-coder".into(),
            ..LlmSection::default()
        };
        let models = create_models_from_config(&cfg);
        assert_eq!(models.get(Capability::Reasoning).model_id(), "llama3");
        assert_eq!(models.get(Capability::Coding).model_id(), "qwen2.5-coder");
    }

    #[test]
    fn unknown_provider_falls_back_to_mock() {
        let cfg = LlmSection {
            provider: "carrier-pigeon".into(),
            ..LlmSection::default()
        };
        assert_eq!(create_models_from_config(&cfg).get(Capability::Coding).model_id(), "mock");
    }
}
