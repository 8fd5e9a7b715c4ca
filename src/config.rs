//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub policy: PolicySection,
    pub graph: GraphSection,
    pub mcp: McpSection,
}

/// [app] 段：应用名、沙箱根目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
}

impl AppSection {
    /// 解析沙箱根目录（不存在则创建），返回规范化路径
    pub fn resolve_workspace(&self) -> PathBuf {
        let root = self
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"));
        if let Err(e) = std::fs::create_dir_all(&root) {
            tracing::warn!(root = %root.display(), "Failed to create workspace root: {}", e);
        }
        root.canonicalize().unwrap_or(root)
    }
}

/// [llm] 段：后端选择、按能力区分的模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：mock / openai / ollama / deepseek
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 规划与反思使用的模型
    #[serde(default = "default_reasoning_model")]
    pub reasoning_model: String,
    /// 起草工具调用使用的模型
    #[serde(default = "default_coding_model")]
    pub coding_model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            reasoning_model: default_reasoning_model(),
            coding_model: default_coding_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_reasoning_model() -> String {
    "gpt-4o".to_string()
}

fn default_coding_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [tools] 段：工具超时、Shell 超时、代码搜索上限
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            shell: ShellSection::default(),
            search: SearchSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    120
}

/// [tools.shell] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default = "default_shell_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_shell_timeout_secs(),
        }
    }
}

fn default_shell_timeout_secs() -> u64 {
    60
}

/// [tools.search] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> usize {
    200
}

/// [policy] 段：重试阈值与需人工审批的工具
#[derive(Debug, Clone, Deserialize)]
pub struct PolicySection {
    /// 失败次数超过该值即升级（Escalation）
    #[serde(default = "default_retry_threshold")]
    pub retry_threshold: u32,
    #[serde(default = "default_approval_required")]
    pub approval_required: Vec<String>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            retry_threshold: default_retry_threshold(),
            approval_required: default_approval_required(),
        }
    }
}

fn default_retry_threshold() -> u32 {
    3
}

fn default_approval_required() -> Vec<String> {
    vec!["run_command".into()]
}

/// [graph] 段：暂停点与状态转移上限
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSection {
    #[serde(default = "default_pause_before")]
    pub pause_before: Vec<String>,
    #[serde(default = "default_max_transitions")]
    pub max_transitions: usize,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            pause_before: default_pause_before(),
            max_transitions: default_max_transitions(),
        }
    }
}

fn default_pause_before() -> Vec<String> {
    vec!["dispatch".into()]
}

fn default_max_transitions() -> usize {
    200
}

/// [mcp] 段：工具服务器进程与协议超时
#[derive(Debug, Clone, Deserialize)]
pub struct McpSection {
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_mcp_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 断开时关闭 stdin 后等待进程退出的时间，超时则强杀
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// 自动注册随仓库分发的检索服务器（bundled-mcp/rag-server）
    #[serde(default = "default_auto_bundled_rag")]
    pub auto_bundled_rag: bool,
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerEntry>,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            request_timeout_secs: default_mcp_request_timeout_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            auto_bundled_rag: default_auto_bundled_rag(),
            servers: BTreeMap::new(),
        }
    }
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_mcp_request_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_auto_bundled_rag() -> bool {
    true
}

/// [mcp.servers.<name>]：启动命令
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct McpServerEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl McpSection {
    /// 配置的服务器，加上（若存在且未被覆盖）workspace 上级目录中的 bundled-mcp/rag-server
    pub fn effective_servers(&self, workspace: &Path) -> BTreeMap<String, McpServerEntry> {
        let mut servers = self.servers.clone();
        if self.auto_bundled_rag && !servers.contains_key("rag") {
            if let Some(entry) = bundled_rag_server(workspace) {
                tracing::info!(command = %entry.command, "Auto-registering bundled rag server");
                servers.insert("rag".to_string(), entry);
            }
        }
        servers
    }
}

fn bundled_rag_server(workspace: &Path) -> Option<McpServerEntry> {
    let base = workspace.parent()?.join("bundled-mcp").join("rag-server");
    let script = base.join("server.py");
    let python = if cfg!(target_os = "windows") {
        base.join(".venv").join("Scripts").join("python.exe")
    } else {
        base.join(".venv").join("bin").join("python")
    };
    if script.is_file() && python.is_file() {
        Some(McpServerEntry {
            command: python.to_string_lossy().to_string(),
            args: vec![script.to_string_lossy().to_string()],
            env: BTreeMap::new(),
        })
    } else {
        None
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 加载失败时回退默认配置并告警
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.policy.retry_threshold, 3);
        assert_eq!(cfg.policy.approval_required, vec!["run_command".to_string()]);
        assert_eq!(cfg.graph.pause_before, vec!["dispatch".to_string()]);
        assert_eq!(cfg.tools.tool_timeout_secs, 120);
        assert_eq!(cfg.mcp.request_timeout_secs, 30);
    }

    #[test]
    fn workspace_root_is_created_or_left_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppSection {
            name: None,
            workspace_root: Some(dir.path().join("ws")),
        };
        let root = app.resolve_workspace();
        assert!(root.is_dir());

        // 父路径是普通文件，无法创建：记录告警，原样返回
        std::fs::write(dir.path().join("blocker"), "").unwrap();
        let blocked = dir.path().join("blocker").join("ws");
        let app = AppSection {
            name: None,
            workspace_root: Some(blocked.clone()),
        };
        assert_eq!(app.resolve_workspace(), blocked);
    }

    #[test]
    fn bundled_rag_requires_venv_and_script() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace).unwrap();
        let section = McpSection::default();
        assert!(section.effective_servers(&workspace).is_empty());

        let base = dir.path().join("bundled-mcp").join("rag-server");
        let bin = if cfg!(target_os = "windows") {
            base.join(".venv").join("Scripts")
        } else {
            base.join(".venv").join("bin")
        };
        std::fs::create_dir_all(&bin).unwrap();
        let python = if cfg!(target_os = "windows") { "python.exe" } else { "python" };
        std::fs::write(bin.join(python), "").unwrap();
        std::fs::write(base.join("server.py"), "").unwrap();

        let servers = section.effective_servers(&workspace);
        assert!(servers.contains_key("rag"));
    }

    #[test]
    fn explicit_rag_entry_wins() {
        let mut section = McpSection::default();
        section.servers.insert(
            "rag".into(),
            McpServerEntry {
                command: "custom".into(),
                args: vec![],
                env: BTreeMap::new(),
            },
        );
        let servers = section.effective_servers(Path::new("/nonexistent/workspace"));
        assert_eq!(servers["rag"].command, "custom");
    }
}
