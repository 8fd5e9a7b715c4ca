//! 协议桥：工具服务器的生命周期、能力发现与调用路由
//!
//! 连接表由桥级锁保护（connect / disconnect / 表变更），每个连接另有会话锁串行化对同一子进程的调用。
//! 服务端方法命名约定不固定，发现与调用均按有序回退链尝试。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use crate::config::{McpSection, McpServerEntry};
use crate::core::AgentError;
use crate::mcp::protocol::{flatten_content, is_tool_error, normalize_tools};
use crate::mcp::StdioSession;

/// 依次尝试的发现方法
pub const DISCOVERY_METHODS: &[&str] = &["tools/list", "mcp.list_tools", "list_tools", "get_tools"];

/// `{tool, args}` 形态的通用调用方法
const GENERIC_INVOKE_METHODS: &[&str] = &["call", "invoke", "execute", "run_tool"];

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from(&McpSection::default())
    }
}

impl From<&McpSection> for BridgeSettings {
    fn from(cfg: &McpSection) -> Self {
        Self {
            handshake_timeout: Duration::from_secs(cfg.handshake_timeout_secs),
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
            shutdown_grace: Duration::from_millis(cfg.shutdown_grace_ms),
        }
    }
}

/// 一个已连接的工具服务器，只由桥持有
struct ServerConnection {
    session: Mutex<StdioSession>,
    tools: RwLock<BTreeMap<String, Value>>,
}

pub struct McpBridge {
    connections: Mutex<HashMap<String, Arc<ServerConnection>>>,
    settings: BridgeSettings,
}

impl Default for McpBridge {
    fn default() -> Self {
        Self::new(BridgeSettings::default())
    }
}

impl McpBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// 启动子进程、握手并立即尝试发现工具；名称重复报错，握手失败时杀掉子进程
    pub async fn connect(&self, name: &str, entry: &McpServerEntry) -> Result<(), AgentError> {
        let mut table = self.connections.lock().await;
        if table.contains_key(name) {
            return Err(AgentError::AlreadyConnected(name.to_string()));
        }

        tracing::info!(server = %name, command = %entry.command, args = ?entry.args, "Starting tool server");
        let mut session = StdioSession::spawn(name, entry, self.settings.request_timeout)?;
        if let Err(e) = session.handshake(self.settings.handshake_timeout).await {
            if let Err(kill_err) = session.kill().await {
                tracing::warn!(server = %name, "Failed to kill after handshake failure: {}", kill_err);
            }
            return Err(e);
        }

        let tools = match discover(&mut session).await {
            Ok(tools) => {
                tracing::info!(server = %name, count = tools.len(), "Discovered tools");
                tools
            }
            Err(e) => {
                tracing::warn!(server = %name, "Tool discovery failed: {}", e);
                BTreeMap::new()
            }
        };

        table.insert(
            name.to_string(),
            Arc::new(ServerConnection {
                session: Mutex::new(session),
                tools: RwLock::new(tools),
            }),
        );
        Ok(())
    }

    /// 批量连接配置中的服务器，单个失败只记录日志
    pub async fn connect_all(&self, servers: &BTreeMap<String, McpServerEntry>) -> usize {
        let mut connected = 0;
        for (name, entry) in servers {
            match self.connect(name, entry).await {
                Ok(()) => connected += 1,
                Err(e) => tracing::warn!(server = %name, "Tool server connect failed: {}", e),
            }
        }
        connected
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        self.connections.lock().await.contains_key(name)
    }

    pub async fn connected_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn snapshot(&self) -> Vec<(String, Arc<ServerConnection>)> {
        let table = self.connections.lock().await;
        let mut out: Vec<(String, Arc<ServerConnection>)> = table
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    async fn connection(&self, name: &str) -> Option<Arc<ServerConnection>> {
        self.connections.lock().await.get(name).cloned()
    }

    /// 汇总所有服务器的工具：server -> {tool -> metadata}；工具集为空的连接会惰性重新发现
    pub async fn list_tools(&self) -> BTreeMap<String, BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        for (name, conn) in self.snapshot().await {
            let known = conn.tools.read().await.clone();
            let tools = if known.is_empty() {
                let mut session = conn.session.lock().await;
                match discover(&mut session).await {
                    Ok(found) => {
                        *conn.tools.write().await = found.clone();
                        found
                    }
                    Err(e) => {
                        tracing::debug!(server = %name, "Lazy rediscovery failed: {}", e);
                        known
                    }
                }
            } else {
                known
            };
            out.insert(name, tools);
        }
        out
    }

    /// 带命名空间的工具目录 (server:tool, description)，供起草 prompt 使用
    pub async fn tool_catalog(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (server, tools) in self.list_tools().await {
            for (tool, meta) in tools {
                let desc = meta
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                out.push((format!("{}:{}", server, tool), desc));
            }
        }
        out
    }

    /// 解析为 (server, tool)：
    /// `server:tool` 优先；`server.tool` 仅当 server 为已连接服务器时按命名空间处理；
    /// 否则按裸名在所有服务器中唯一匹配，零个为未知工具，多个为歧义。
    pub async fn resolve(&self, qualified: &str) -> Result<(String, String), AgentError> {
        if let Some((server, tool)) = qualified.split_once(':') {
            if !self.is_connected(server).await {
                return Err(AgentError::UnknownTool(qualified.to_string()));
            }
            return Ok((server.to_string(), tool.to_string()));
        }
        if let Some((server, tool)) = qualified.split_once('.') {
            if self.is_connected(server).await {
                return Ok((server.to_string(), tool.to_string()));
            }
        }

        let matches: Vec<String> = self
            .list_tools()
            .await
            .into_iter()
            .filter(|(_, tools)| tools.contains_key(qualified))
            .map(|(server, _)| server)
            .collect();
        match matches.len() {
            0 => Err(AgentError::UnknownTool(qualified.to_string())),
            1 => Ok((matches[0].clone(), qualified.to_string())),
            _ => Err(AgentError::AmbiguousTool {
                name: qualified.to_string(),
                servers: matches,
            }),
        }
    }

    /// 解析工具名并按调用形态回退链调用，返回归一化结果
    pub async fn call_tool(&self, qualified: &str, args: Value) -> Result<Value, AgentError> {
        let (server, tool) = self.resolve(qualified).await?;
        let conn = self
            .connection(&server)
            .await
            .ok_or_else(|| AgentError::ServerNotConnected(server.clone()))?;
        let mut session = conn.session.lock().await;
        invoke(&mut session, &server, &tool, args).await
    }

    /// 幂等：未连接或已断开的名称直接返回
    pub async fn disconnect(&self, name: &str) -> Result<(), AgentError> {
        let removed = self.connections.lock().await.remove(name);
        let Some(conn) = removed else {
            return Ok(());
        };
        tracing::info!(server = %name, "Disconnecting tool server");
        let mut session = conn.session.lock().await;
        session.close(self.settings.shutdown_grace).await
    }

    /// 断开全部连接；单个失败记录日志并继续
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<ServerConnection>)> =
            self.connections.lock().await.drain().collect();
        for (name, conn) in drained {
            let mut session = conn.session.lock().await;
            if let Err(e) = session.close(self.settings.shutdown_grace).await {
                tracing::warn!(server = %name, "Error disconnecting tool server: {}", e);
            }
        }
    }
}

/// 依次尝试发现方法，第一个能归一化的结果胜出；会话失效（超时 / 断流）时立即放弃
async fn discover(session: &mut StdioSession) -> Result<BTreeMap<String, Value>, AgentError> {
    let mut last_err = AgentError::Protocol("no discovery method answered".to_string());
    for method in DISCOVERY_METHODS {
        match session.request(method, json!({})).await {
            Ok(value) => {
                if let Some(tools) = normalize_tools(&value) {
                    tracing::debug!(server = %session.name(), method = %method, "Discovery succeeded");
                    return Ok(tools);
                }
                tracing::debug!(server = %session.name(), method = %method, "Discovery result not a tool listing");
            }
            Err(e @ AgentError::Protocol(_)) => return Err(e),
            Err(e) => {
                tracing::debug!(server = %session.name(), method = %method, "Discovery attempt failed: {}", e);
                last_err = e;
            }
        }
    }
    Err(last_err)
}

fn invocation_shapes(tool: &str, args: &Value) -> Vec<(String, Value)> {
    let mut shapes = vec![
        (
            "tools/call".to_string(),
            json!({ "name": tool, "arguments": args }),
        ),
        (tool.to_string(), args.clone()),
        (
            "call_tool".to_string(),
            json!({ "name": tool, "arguments": args }),
        ),
    ];
    for method in GENERIC_INVOKE_METHODS {
        shapes.push((method.to_string(), json!({ "tool": tool, "args": args })));
    }
    shapes
}

/// 按调用形态回退链调用；保留最有信息量的错误（「方法不存在」不会掩盖真实的工具错误）
async fn invoke(
    session: &mut StdioSession,
    server: &str,
    tool: &str,
    args: Value,
) -> Result<Value, AgentError> {
    let invocation = |message: String| AgentError::Invocation {
        server: server.to_string(),
        tool: tool.to_string(),
        message,
    };
    let mut best: Option<AgentError> = None;
    for (method, params) in invocation_shapes(tool, &args) {
        match session.request(&method, params).await {
            Ok(value) if is_tool_error(&value) => {
                let text = flatten_content(value);
                let message = text.as_str().map(str::to_string).unwrap_or_else(|| text.to_string());
                return Err(invocation(message));
            }
            Ok(value) => {
                tracing::debug!(server = %server, tool = %tool, method = %method, "Invocation succeeded");
                return Ok(flatten_content(value));
            }
            Err(e @ AgentError::Protocol(_)) => return Err(invocation(e.to_string())),
            Err(e) => {
                tracing::debug!(server = %server, tool = %tool, method = %method, "Invocation attempt failed: {}", e);
                let replace = match &best {
                    None => true,
                    Some(prev) => prev.is_method_not_found() || !e.is_method_not_found(),
                };
                if replace {
                    best = Some(e);
                }
            }
        }
    }
    let message = best
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no invocation shape accepted".to_string());
    Err(invocation(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_are_ordered() {
        let shapes = invocation_shapes("search", &json!({"q": 1}));
        let methods: Vec<&str> = shapes.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(
            methods,
            vec!["tools/call", "search", "call_tool", "call", "invoke", "execute", "run_tool"]
        );
        assert_eq!(shapes[0].1, json!({"name": "search", "arguments": {"q": 1}}));
        assert_eq!(shapes[3].1, json!({"tool": "search", "args": {"q": 1}}));
    }

    #[tokio::test]
    async fn disconnect_unknown_is_noop() {
        let bridge = McpBridge::default();
        assert!(bridge.disconnect("never-opened").await.is_ok());
        assert!(bridge.disconnect("never-opened").await.is_ok());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn resolution_without_servers() {
        let bridge = McpBridge::default();
        assert_eq!(
            bridge.resolve("search").await.unwrap_err(),
            AgentError::UnknownTool("search".into())
        );
        assert_eq!(
            bridge.resolve("docs:search").await.unwrap_err(),
            AgentError::UnknownTool("docs:search".into())
        );
    }

    #[tokio::test]
    async fn spawn_failure_is_connection_fault() {
        let bridge = McpBridge::default();
        let entry = McpServerEntry {
            command: "/definitely/not/a/binary".into(),
            args: vec![],
            env: Default::default(),
        };
        let err = bridge.connect("ghost", &entry).await.unwrap_err();
        assert!(matches!(err, AgentError::Connection(_)));
        assert!(!bridge.is_connected("ghost").await);
    }
}
