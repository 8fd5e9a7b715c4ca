//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径经 resolve 校验：必须为相对路径、不含 `..`，解析后仍在 root 下；
//! 违规是参数校验错误（PathEscape），不是崩溃。list_files / read_file / write_file 基于 SafeFs。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::{Artifact, ArtifactKind};
use crate::core::AgentError;
use crate::tools::{optional_str, required_str, Tool, ToolEffect};

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 校验并解析沙箱内路径（目标可以尚不存在）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        if path.trim().is_empty() {
            return Err(AgentError::Validation("path must not be empty".to_string()));
        }
        let rel = Path::new(path);
        if rel.is_absolute() {
            return Err(AgentError::PathEscape(path.to_string()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(AgentError::PathEscape(path.to_string())); // 如 ../../etc/passwd
                }
            }
        }

        let full = self.root_dir.join(rel);
        // 符号链接可能指向根外：取最近的已存在祖先，规范化后再比较
        let existing = full
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or(&self.root_dir);
        let canonical = existing
            .canonicalize()
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Resolve failed: {}", e)))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(full)
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        if !resolved.is_file() {
            return Err(AgentError::ToolExecutionFailed(format!("Not a file: {}", path)));
        }
        std::fs::read_to_string(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<usize, AgentError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::ToolExecutionFailed(format!("Create dir failed: {}", e)))?;
        }
        std::fs::write(&resolved, content)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {}", e)))?;
        Ok(content.len())
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, AgentError> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        if !base.is_dir() {
            return Err(AgentError::ToolExecutionFailed(format!("Not a directory: {}", path)));
        }
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {}", e)))?
        {
            let e = e.map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?;
            let name = e.file_name().to_string_lossy().to_string();
            let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                "/"
            } else {
                ""
            };
            entries.push(format!("{}{}", name, ty));
        }
        entries.sort();
        Ok(entries)
    }
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": description }
        },
        "required": ["path"]
    })
}

/// list_files：列出目录直接子项
pub struct ListFilesTool {
    fs: SafeFs,
}

impl ListFilesTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List entries of a workspace directory. Args: {\"path\": \"directory relative to workspace, default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        path_schema("Directory relative to the workspace root (default '.')")
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let path = optional_str(&args, "path")?.unwrap_or(".");
        tracing::info!(path = %path, "list_files tool execute");
        let entries = self.fs.list_dir(path)?;
        Ok(json!(entries))
    }
}

/// read_file：读取文本文件
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Args: {\"path\": \"file path relative to workspace\"}"
    }

    fn parameters_schema(&self) -> Value {
        path_schema("File path relative to the workspace root")
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let path = required_str(&args, "path")?;
        tracing::info!(path = %path, "read_file tool execute");
        Ok(Value::String(self.fs.read_file(path)?))
    }
}

/// write_file：写入文件（自动创建父目录），成功后生成 code 产物
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a text file, creating parent directories. Args: {\"path\": \"relative path\", \"content\": \"text\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path relative to the workspace root" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::Mutating
    }

    fn artifact(&self, args: &Value) -> Option<Artifact> {
        let content = args.get("content").and_then(Value::as_str).unwrap_or("");
        match args.get("path").and_then(Value::as_str) {
            Some(path) => Some(Artifact::new(ArtifactKind::Code, path, content)),
            None => Some(Artifact::generated_code(content)),
        }
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        tracing::info!(path = %path, bytes = content.len(), "write_file tool execute");
        let written = self.fs.write_file(path, content)?;
        Ok(json!(format!("Wrote {} bytes to {}", written, path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn absolute_path() -> &'static str {
        if cfg!(target_os = "windows") {
            "C:\\Windows\\win.ini"
        } else {
            "/etc/passwd"
        }
    }

    #[tokio::test]
    async fn every_fs_tool_enforces_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/b.txt"), "inside").unwrap();

        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(ListFilesTool::new(dir.path())),
            Box::new(ReadFileTool::new(dir.path())),
            Box::new(WriteFileTool::new(dir.path())),
        ];
        for tool in &tools {
            for bad in ["../secret", absolute_path(), "a/../../secret"] {
                let err = tool
                    .execute(json!({"path": bad, "content": "x"}))
                    .await
                    .unwrap_err();
                assert!(
                    matches!(err, AgentError::PathEscape(_)),
                    "{} accepted {}: {:?}",
                    tool.name(),
                    bad,
                    err
                );
            }
        }

        let fs = SafeFs::new(dir.path());
        assert!(fs.resolve("a/b.txt").is_ok());
        assert!(fs.resolve("../secret").is_err());
        assert!(fs.resolve(absolute_path()).is_err());
    }

    #[tokio::test]
    async fn write_then_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let write = WriteFileTool::new(dir.path());
        write
            .execute(json!({"path": "a/b.txt", "content": "hi"}))
            .await
            .unwrap();

        let read = ReadFileTool::new(dir.path());
        assert_eq!(read.execute(json!({"path": "a/b.txt"})).await.unwrap(), json!("hi"));

        let ls = ListFilesTool::new(dir.path());
        assert_eq!(ls.execute(json!({})).await.unwrap(), json!(["a/"]));
        assert_eq!(ls.execute(json!({"path": "a"})).await.unwrap(), json!(["b.txt"]));
    }

    #[tokio::test]
    async fn missing_arguments_are_validation_faults() {
        let dir = tempfile::tempdir().unwrap();
        let write = WriteFileTool::new(dir.path());
        let err = write.execute(json!({"path": "x.txt"})).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[test]
    fn write_artifact_uses_path_as_title() {
        let dir = tempfile::tempdir().unwrap();
        let write = WriteFileTool::new(dir.path());
        let art = write
            .artifact(&json!({"path": "hello.txt", "content": "hi"}))
            .unwrap();
        assert_eq!(art.title, "hello.txt");
        assert_eq!(art.content, "hi");
        assert_eq!(art.kind, ArtifactKind::Code);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let fs = SafeFs::new(dir.path());
        assert!(matches!(
            fs.resolve("link/file.txt"),
            Err(AgentError::PathEscape(_))
        ));
    }
}
