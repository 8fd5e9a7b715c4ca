//! 核心层：错误分类、任务存储、任务服务与优雅关闭

pub mod error;
pub mod service;
pub mod shutdown;
pub mod store;

pub use error::{AgentError, FaultKind, METHOD_NOT_FOUND};
pub use service::{Decision, Resumption, TaskService, TaskSnapshot};
pub use shutdown::{
    run_with_graceful_shutdown, BridgeCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason, TaskStoreCleanup,
};
pub use store::{TaskRecord, TaskStatus, TaskStore};
