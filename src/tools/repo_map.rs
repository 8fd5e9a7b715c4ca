//! 仓库地图：树形展示目录结构，供规划阶段定位文件
//!
//! 目录优先、忽略常见依赖目录；文件数超过 200 时深度限制为 3，输出最多 1000 行。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::core::AgentError;
use crate::tools::search::is_ignored;
use crate::tools::{optional_str, SafeFs, Tool};

const LARGE_REPO_FILES: usize = 200;
const LARGE_REPO_DEPTH: usize = 3;
const MAX_LINES: usize = 1000;

fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(&e.file_name().to_string_lossy()))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count()
}

/// 生成以 root 为根的树形地图
pub fn generate_repo_map(root: &Path) -> String {
    if !root.exists() {
        return format!("Path not found: {}", root.display());
    }
    let max_depth = if count_files(root) > LARGE_REPO_FILES {
        LARGE_REPO_DEPTH
    } else {
        usize::MAX
    };
    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.display().to_string());
    let mut lines = vec![format!("{}/", root_name)];
    walk_dir(root, "", 0, max_depth, &mut lines);
    lines.join("\n")
}

fn sorted_children(path: &Path) -> Option<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).ok()?.filter_map(Result::ok) {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_ignored(&name) {
            continue;
        }
        // 不跟随符号链接：指向沙箱外的目录只作为叶子列出
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            dirs.push(entry.path());
        } else {
            files.push(entry.path());
        }
    }
    dirs.sort();
    files.sort();
    Some((dirs, files))
}

fn walk_dir(path: &Path, prefix: &str, depth: usize, max_depth: usize, lines: &mut Vec<String>) {
    if lines.len() >= MAX_LINES {
        return;
    }
    let Some((dirs, files)) = sorted_children(path) else {
        lines.push(format!("{}└── [permission denied]", prefix));
        return;
    };
    let total = dirs.len() + files.len();
    let ordered = dirs.iter().map(|d| (d, true)).chain(files.iter().map(|f| (f, false)));

    for (idx, (full, is_dir)) in ordered.enumerate() {
        let is_last = idx + 1 == total;
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if is_dir {
            lines.push(format!("{}{}{}/", prefix, connector, name));
            if depth + 1 >= max_depth {
                let has_children = sorted_children(full)
                    .map(|(d, f)| !d.is_empty() || !f.is_empty())
                    .unwrap_or(false);
                if has_children {
                    lines.push(format!("{}└── ... (truncated)", child_prefix));
                }
            } else {
                walk_dir(full, &child_prefix, depth + 1, max_depth, lines);
            }
        } else {
            lines.push(format!("{}{}{}", prefix, connector, name));
        }

        if lines.len() >= MAX_LINES {
            lines.truncate(MAX_LINES);
            return;
        }
    }
}

/// repo_map 工具：渲染沙箱内某个目录的树
pub struct RepoMapTool {
    fs: SafeFs,
}

impl RepoMapTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for RepoMapTool {
    fn name(&self) -> &str {
        "repo_map"
    }

    fn description(&self) -> &str {
        "Render the workspace directory tree. Args: {\"path\": \"directory relative to workspace, default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the workspace root" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let path = optional_str(&args, "path")?.unwrap_or(".");
        let target = if path == "." {
            self.fs.root().to_path_buf()
        } else {
            self.fs.resolve(path)?
        };
        let map = tokio::task::spawn_blocking(move || generate_repo_map(&target))
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Repo map task failed: {}", e)))?;
        Ok(Value::String(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirs_first_and_ignored_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();

        let map = generate_repo_map(dir.path());
        let lines: Vec<&str> = map.lines().collect();
        assert!(lines[0].ends_with('/'));
        assert_eq!(lines[1], "├── src/");
        assert_eq!(lines[2], "│   └── main.rs");
        assert_eq!(lines[3], "└── a.txt");
        assert!(!map.contains(".git"));
    }

    #[test]
    fn large_trees_are_depth_limited() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c/d");
        std::fs::create_dir_all(&deep).unwrap();
        for i in 0..201 {
            std::fs::write(dir.path().join(format!("f{}.txt", i)), "").unwrap();
        }
        std::fs::write(deep.join("leaf.txt"), "").unwrap();
        let map = generate_repo_map(dir.path());
        assert!(map.contains("... (truncated)"));
        assert!(!map.contains("leaf.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_dirs_are_not_followed() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(outside.path().join("secret_dir")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let map = generate_repo_map(dir.path());
        assert!(map.contains("└── escape"));
        assert!(!map.contains("escape/"));
        assert!(!map.contains("secret_dir"));
    }

    #[tokio::test]
    async fn tool_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let tool = RepoMapTool::new(dir.path());
        assert!(matches!(
            tool.execute(json!({"path": "../x"})).await,
            Err(AgentError::PathEscape(_))
        ));
    }
}
