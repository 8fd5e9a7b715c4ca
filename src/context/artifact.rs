//! 产物与起草的工具调用

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Code,
    Diff,
    Markdown,
}

/// 产物：写类工具的副作用，或 LLM 回复中的代码块
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub kind: ArtifactKind,
    pub title: String,
    pub content: String,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            content: content.into(),
        }
    }

    /// 无路径的生成代码：标题形如 generated_code_1a2b3c4d.txt
    pub fn generated_code(content: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        let hex = id.simple().to_string();
        Self {
            id,
            kind: ArtifactKind::Code,
            title: format!("generated_code_{}.txt", &hex[..8]),
            content: content.into(),
        }
    }
}

/// 起草阶段产出的一次抽象工具调用（尚未执行）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DraftedCall {
    /// 工具名：内置工具名，或 `server:tool` / 可唯一解析的裸名
    #[serde(alias = "tool")]
    pub name: String,
    /// 参数对象
    #[serde(default)]
    pub args: Value,
}

impl DraftedCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// 起草文档：`{"tool_calls": [...]}`
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct DraftDocument {
    #[serde(default)]
    pub tool_calls: Vec<DraftedCall>,
}
