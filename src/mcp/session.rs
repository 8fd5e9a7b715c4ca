//! stdio 会话：管理工具服务器子进程与按行 JSON-RPC 收发
//!
//! 每个会话同一时刻只处理一个请求（由上层的每连接锁保证）；stdout 中的非 JSON 行与
//! id 不匹配的响应（如超时后迟到的回复）会被跳过。

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::config::McpServerEntry;
use crate::core::AgentError;
use crate::mcp::protocol::{
    initialize_params, parse_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

pub struct StdioSession {
    name: String,
    process: Child,
    stdin: Option<ChildStdin>,
    stdout_reader: BufReader<ChildStdout>,
    request_id: AtomicU64,
    request_timeout: Duration,
}

impl StdioSession {
    /// 启动子进程（stdin / stdout 管道，stderr 转发到日志）
    pub fn spawn(
        name: &str,
        entry: &McpServerEntry,
        request_timeout: Duration,
    ) -> Result<Self, AgentError> {
        let mut cmd = Command::new(&entry.command);
        cmd.args(&entry.args)
            .envs(&entry.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(|e| {
            AgentError::Connection(format!(
                "Failed to spawn tool server '{}' (command: {}): {}",
                name, entry.command, e
            ))
        })?;

        let stdin = process.stdin.take().ok_or_else(|| {
            AgentError::Connection(format!("Failed to capture stdin for tool server '{}'", name))
        })?;
        let stdout = process.stdout.take().ok_or_else(|| {
            AgentError::Connection(format!("Failed to capture stdout for tool server '{}'", name))
        })?;
        if let Some(stderr) = process.stderr.take() {
            let server = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "stderr: {}", line);
                }
            });
        }

        Ok(Self {
            name: name.to_string(),
            process,
            stdin: Some(stdin),
            stdout_reader: BufReader::new(stdout),
            request_id: AtomicU64::new(1),
            request_timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 尽力握手：initialize 得到任意响应（即使是 JSON-RPC 错误）即视为会话可用；
    /// 无响应 / 进程退出 / 超时则失败。仅在 initialize 成功时发送 notifications/initialized。
    pub async fn handshake(&mut self, timeout: Duration) -> Result<Option<Value>, AgentError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, "initialize", initialize_params());
        self.send_line(&request).await.map_err(as_connection)?;
        let response = self.read_response(id, timeout).await.map_err(as_connection)?;
        match response.outcome {
            Ok(result) => {
                self.notify("notifications/initialized", serde_json::json!({}))
                    .await
                    .map_err(as_connection)?;
                tracing::info!(server = %self.name, "Tool server initialized");
                Ok(Some(result))
            }
            Err(e) => {
                tracing::warn!(
                    server = %self.name,
                    code = e.code,
                    "initialize rejected ({}), continuing without handshake",
                    e.message
                );
                Ok(None)
            }
        }
    }

    /// 发送请求并等待同 id 的响应
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value, AgentError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        self.send_line(&request).await?;
        let timeout = self.request_timeout;
        self.read_response(id, timeout).await?.into_result()
    }

    pub async fn notify(&mut self, method: &str, params: Value) -> Result<(), AgentError> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0",
            method,
            params,
        };
        self.send_line(&notification).await
    }

    async fn send_line<T: Serialize>(&mut self, message: &T) -> Result<(), AgentError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AgentError::Protocol(format!("session '{}' is closed", self.name)))?;
        let mut msg = serde_json::to_string(message)
            .map_err(|e| AgentError::Protocol(format!("Failed to serialize request: {}", e)))?;
        msg.push('\n');
        stdin
            .write_all(msg.as_bytes())
            .await
            .map_err(|e| AgentError::Protocol(format!("Failed to write to server stdin: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| AgentError::Protocol(format!("Failed to flush server stdin: {}", e)))
    }

    async fn read_response(
        &mut self,
        id: u64,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, AgentError> {
        let name = self.name.clone();
        let reader = &mut self.stdout_reader;
        let read = async {
            let mut line = String::new();
            loop {
                line.clear();
                let n = reader.read_line(&mut line).await.map_err(|e| {
                    AgentError::Protocol(format!("Failed to read from server stdout: {}", e))
                })?;
                if n == 0 {
                    return Err(AgentError::Protocol(format!(
                        "Tool server '{}' closed stdout (process may have crashed)",
                        name
                    )));
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_response(trimmed) {
                    Some(resp) if resp.id == Some(id) => return Ok(resp),
                    Some(resp) => {
                        tracing::debug!(server = %name, expected = id, got = ?resp.id, "Skipping response with foreign id");
                    }
                    None => {
                        tracing::debug!(server = %name, "Skipping non JSON-RPC line: {}", trimmed);
                    }
                }
            }
        };
        tokio::time::timeout(timeout, read).await.map_err(|_| {
            AgentError::Protocol(format!(
                "Timed out after {}s waiting for response {} from '{}'",
                timeout.as_secs_f32(),
                id,
                self.name
            ))
        })?
    }

    /// 关闭 stdin 请求优雅退出，超过 grace 仍未退出则强杀
    pub async fn close(&mut self, grace: Duration) -> Result<(), AgentError> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        match tokio::time::timeout(grace, self.process.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server = %self.name, %status, "Tool server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(AgentError::Connection(format!(
                "Failed waiting for tool server '{}': {}",
                self.name, e
            ))),
            Err(_) => {
                tracing::warn!(server = %self.name, "Tool server did not exit in time, killing");
                self.kill().await
            }
        }
    }

    pub async fn kill(&mut self) -> Result<(), AgentError> {
        self.stdin.take();
        self.process.kill().await.map_err(|e| {
            AgentError::Connection(format!("Failed to kill tool server '{}': {}", self.name, e))
        })
    }
}

fn as_connection(e: AgentError) -> AgentError {
    AgentError::Connection(format!("handshake failed: {}", e))
}
