//! run_command：在沙箱根目录执行 shell 命令
//!
//! 属于「需人工审批」类，dispatch 不会直接执行，只有审批通过后才会调用。
//! 即便已审批，命中危险子串（rm -rf、mkfs、fork bomb 等）仍拒绝执行。
//! 执行通过 sh -c / cmd /C，带超时；非零退出码、超时、启动失败均为结构化错误。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::core::AgentError;
use crate::tools::{required_str, Tool, ToolEffect};

/// 禁止的命令子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod 777 /",
    "curl | sh",
    "wget -o- | sh",
    ":(){ :|:& };:", // fork bomb
];

pub struct RunCommandTool {
    workdir: PathBuf,
    timeout_secs: u64,
}

impl RunCommandTool {
    pub fn new(workdir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            timeout_secs,
        }
    }

    fn check_forbidden(raw: &str) -> Result<(), AgentError> {
        let lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if lower.contains(forbidden) {
                return Err(AgentError::Validation(format!(
                    "Forbidden pattern: {}",
                    forbidden
                )));
            }
        }
        Ok(())
    }

    fn command(&self, raw: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", raw]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", raw]);
            c
        };
        cmd.current_dir(&self.workdir);
        cmd
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace (requires human approval). Args: {\"command\": \"...\", \"background\": false}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to run in the workspace root"
                },
                "background": {
                    "type": "boolean",
                    "description": "Start without waiting and return the pid"
                }
            },
            "required": ["command"]
        })
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::Mutating
    }

    fn requires_approval(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<Value, AgentError> {
        let command = required_str(&args, "command")?.trim();
        if command.is_empty() {
            return Err(AgentError::Validation("Empty command".to_string()));
        }
        Self::check_forbidden(command)?;
        let background = args
            .get("background")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        tracing::info!(command = %command, background, "run_command tool execute");

        let mut cmd = self.command(command);
        if background {
            let child = cmd
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| {
                    AgentError::ToolExecutionFailed(format!(
                        "Failed to start background process: {}",
                        e
                    ))
                })?;
            return Ok(json!({ "pid": child.id() }));
        }

        cmd.kill_on_drop(true);
        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| {
                AgentError::ToolTimeout(format!(
                    "run_command timed out after {}s",
                    self.timeout_secs
                ))
            })?
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Execution failed: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(AgentError::ToolExecutionFailed(format!(
                "Command failed (exit {}): {}",
                code,
                if stderr.trim().is_empty() {
                    stdout.trim()
                } else {
                    stderr.trim()
                }
            )));
        }
        Ok(json!({
            "exit_code": output.status.code().unwrap_or(0),
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}
