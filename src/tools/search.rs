//! search_code：在沙箱内递归查找包含关键字的文件
//!
//! 跳过 .git / node_modules / venv / __pycache__ / target；无法按 UTF-8 读取的文件（二进制）忽略。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::core::AgentError;
use crate::tools::{required_str, Tool};

/// 遍历时忽略的目录名（与 repo_map 共用）
pub const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "venv", "__pycache__", "target"];

pub fn is_ignored(name: &str) -> bool {
    IGNORED_DIRS.contains(&name)
}

pub struct SearchCodeTool {
    root: PathBuf,
    max_results: usize,
}

impl SearchCodeTool {
    pub fn new(root: impl AsRef<Path>, max_results: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_results,
        }
    }

    /// 返回包含 query 的文件相对路径（/ 分隔，已排序）
    pub fn search(&self, query: &str) -> Vec<String> {
        if query.is_empty() {
            return Vec::new();
        }
        let mut found = Vec::new();
        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored(&e.file_name().to_string_lossy()));
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            if !content.contains(query) {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                found.push(rel);
            }
        }
        found.sort();
        found.truncate(self.max_results);
        found
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }

    fn description(&self) -> &str {
        "Find workspace files containing a text. Args: {\"query\": \"text to find\"}. Returns relative paths."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Literal text to search for" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let query = required_str(&args, "query")?.to_string();
        tracing::info!(query = %query, "search_code tool execute");
        let root = self.root.clone();
        let max_results = self.max_results;
        let found = tokio::task::spawn_blocking(move || {
            SearchCodeTool::new(root, max_results).search(&query)
        })
        .await
        .map_err(|e| AgentError::ToolExecutionFailed(format!("Search task failed: {}", e)))?;
        Ok(json!(found))
    }
}
