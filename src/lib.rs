//! Hive - 可恢复的多阶段编码任务编排
//!
//! 模块划分：
//! - **agent**: 运行时装配（LLM、工具、协议桥、执行图、任务服务）
//! - **config**: 配置加载（TOML + 环境变量）
//! - **context**: 贯穿执行图的 TaskContext 及其组成
//! - **core**: 错误分类、任务存储与服务、优雅关闭
//! - **dispatch**: 调度、人工审批闸门与重试升级策略
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **mcp**: 外部工具服务器的 stdio JSON-RPC 协议桥
//! - **observability**: 日志初始化
//! - **stages**: planner / drafter / reflector / router
//! - **tools**: 沙箱内置工具、注册表与执行器
//! - **workflow**: 可暂停、可恢复的执行图引擎

pub mod agent;
pub mod config;
pub mod context;
pub mod core;
pub mod dispatch;
pub mod llm;
pub mod mcp;
pub mod observability;
pub mod stages;
pub mod tools;
pub mod workflow;

pub use agent::AgentRuntime;
