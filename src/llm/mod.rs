//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）及按能力选择模型的工厂

pub mod factory;
pub mod mock;
pub mod openai;
pub mod traits;

pub use factory::{create_models_from_config, ModelSet};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{Capability, LlmClient, LlmError};
