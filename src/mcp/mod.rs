//! MCP 协议桥：stdio 子进程上的按行 JSON-RPC

pub mod bridge;
pub mod protocol;
pub mod session;

pub use bridge::{BridgeSettings, McpBridge};
pub use session::StdioSession;
