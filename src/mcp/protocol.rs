//! JSON-RPC 2.0 报文（按行分隔，经子进程 stdin / stdout 传输）及结果归一化

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::AgentError;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// 通知：无 id，不期待响应
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// 已解析的响应：result 与 error 二选一（result 允许为 null）
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    pub id: Option<u64>,
    pub outcome: Result<Value, JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, AgentError> {
        self.outcome.map_err(|e| AgentError::Rpc {
            code: e.code,
            message: e.message,
        })
    }
}

/// 解析一行 stdout；非 JSON、非响应（如服务端通知或日志）返回 None
pub fn parse_response(line: &str) -> Option<JsonRpcResponse> {
    let value: Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;
    let id = obj.get("id").and_then(Value::as_u64);
    if let Some(err) = obj.get("error").filter(|e| !e.is_null()) {
        let error = serde_json::from_value::<JsonRpcError>(err.clone()).unwrap_or(JsonRpcError {
            code: -32603,
            message: err.to_string(),
            data: None,
        });
        return Some(JsonRpcResponse {
            id,
            outcome: Err(error),
        });
    }
    let result = obj.get("result")?;
    Some(JsonRpcResponse {
        id,
        outcome: Ok(result.clone()),
    })
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "hive",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// 工具发现结果归一化为 name -> metadata
///
/// 接受 `{"tools": [...]}`、裸列表（元素为对象或字符串）、或 name -> meta 对象。
pub fn normalize_tools(value: &Value) -> Option<BTreeMap<String, Value>> {
    match value {
        Value::Object(map) => match map.get("tools") {
            Some(inner @ (Value::Array(_) | Value::Object(_))) => normalize_tools(inner),
            Some(_) => None,
            None => Some(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        },
        Value::Array(items) => {
            let mut out = BTreeMap::new();
            for item in items {
                match item {
                    Value::String(name) => {
                        out.insert(name.clone(), json!({ "name": name }));
                    }
                    Value::Object(obj) => {
                        let name = obj.get("name").and_then(Value::as_str)?;
                        out.insert(name.to_string(), item.clone());
                    }
                    _ => return None,
                }
            }
            Some(out)
        }
        _ => None,
    }
}

/// MCP 调用结果：content 中的文本片段拼接为一个字符串，其它形态原样返回
pub fn flatten_content(value: Value) -> Value {
    let texts: Option<Vec<String>> = value.get("content").and_then(Value::as_array).map(|parts| {
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str).map(str::to_string))
            .collect()
    });
    match texts {
        Some(texts) if !texts.is_empty() => Value::String(texts.join("\n")),
        _ => value,
    }
}

/// MCP 工具在结果里声明失败（isError）
pub fn is_tool_error(value: &Value) -> bool {
    value.get("isError").and_then(Value::as_bool).unwrap_or(false)
}
