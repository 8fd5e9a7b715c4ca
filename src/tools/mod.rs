//! 工具层：内置工具（list_files / read_file / write_file / run_command / search_code / repo_map）、
//! 注册表与执行器，以及结构化输出 schema

pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod repo_map;
pub mod schema;
pub mod search;
pub mod shell;

use std::path::Path;

use crate::config::ToolsSection;

pub use executor::ToolExecutor;
pub use filesystem::{ListFilesTool, ReadFileTool, SafeFs, WriteFileTool};
pub use registry::{optional_str, required_str, Tool, ToolEffect, ToolRegistry};
pub use repo_map::{generate_repo_map, RepoMapTool};
pub use schema::{draft_schema, plan_schema, Plan};
pub use search::SearchCodeTool;
pub use shell::RunCommandTool;

/// 注册全部内置工具，根目录即沙箱根
pub fn builtin_registry(workspace: &Path, cfg: &ToolsSection) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ListFilesTool::new(workspace));
    registry.register(ReadFileTool::new(workspace));
    registry.register(WriteFileTool::new(workspace));
    registry.register(RunCommandTool::new(workspace, cfg.shell.timeout_secs));
    registry.register(SearchCodeTool::new(workspace, cfg.search.max_results));
    registry.register(RepoMapTool::new(workspace));
    registry
}
