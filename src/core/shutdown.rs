//! 优雅关闭
//!
//! 收到 Ctrl+C / SIGTERM 后进入关闭状态：HTTP 前端不再接收新任务与恢复请求，
//! 随后依次执行清理（关闭所有工具服务器子进程、清空任务存储），每项清理有超时上限。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::TaskStore;
use crate::mcp::McpBridge;

/// 单项清理的超时
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);
/// 收到信号后等待应用收尾（处理中的请求）的上限
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::UserInitiated => write!(f, "ctrl-c"),
            ShutdownReason::Signal => write!(f, "sigterm"),
        }
    }
}

/// 关闭信号：一次触发，之后 is_shutdown 恒为 true
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!(%reason, "Shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Ctrl+C 与（unix 下）SIGTERM 均触发关闭
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 关闭时执行的一项清理
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理；单项失败或超时只记日志，不中断后续清理
#[derive(Default)]
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!(tasks = self.cleanup_tasks.len(), "Running cleanup");
        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(CLEANUP_TIMEOUT, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!(cleanup = name, "Cleanup finished"),
                Ok(Err(e)) => tracing::warn!(cleanup = name, "Cleanup failed: {}", e),
                Err(_) => tracing::warn!(
                    cleanup = name,
                    "Cleanup timed out after {}s",
                    CLEANUP_TIMEOUT.as_secs()
                ),
            }
        }
    }
}

/// 断开全部工具服务器（逐个关闭，失败只记日志）
pub struct BridgeCleanup {
    bridge: Arc<McpBridge>,
}

impl BridgeCleanup {
    pub fn new(bridge: Arc<McpBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for BridgeCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.bridge.shutdown().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "McpBridge"
    }
}

/// 清空内存任务存储
pub struct TaskStoreCleanup {
    store: Arc<TaskStore>,
}

impl TaskStoreCleanup {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for TaskStoreCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let dropped = self.store.clear().await;
        tracing::info!(tasks = dropped, "Task store cleared");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TaskStore"
    }
}

/// 运行主应用直到结束或收到关闭信号；收到信号后给应用 DRAIN_TIMEOUT 收尾，然后执行清理
pub async fn run_with_graceful_shutdown<F, Fut>(
    shutdown_manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    shutdown_manager.install_signal_handlers();
    tokio::pin!(app);

    tokio::select! {
        _ = &mut app => {
            tracing::info!("Application finished normally");
        }
        _ = shutdown_manager.wait_for_shutdown() => {
            tracing::info!("Shutdown signal received, draining");
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut app).await.is_err() {
                tracing::warn!("Application did not drain within {}s", DRAIN_TIMEOUT.as_secs());
            }
        }
    }

    cleanup().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn shutdown_is_sticky_and_wakes_waiters() {
        let manager = Arc::new(ShutdownManager::new());
        assert!(!manager.is_shutdown());
        let waiter = {
            let m = Arc::clone(&manager);
            tokio::spawn(async move { m.wait_for_shutdown().await })
        };
        manager.shutdown(ShutdownReason::Signal);
        manager.shutdown(ShutdownReason::UserInitiated);
        waiter.await.unwrap();
        assert!(manager.is_shutdown());
    }

    struct Flag(Arc<AtomicBool>);

    #[async_trait::async_trait]
    impl ShutdownCleanup for Flag {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Flag"
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl ShutdownCleanup for Failing {
        async fn cleanup(&self) -> anyhow::Result<()> {
            anyhow::bail!("disk gone")
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    #[tokio::test]
    async fn failing_cleanup_does_not_abort_sweep() {
        let mut coordinator = ShutdownCoordinator::new();
        let called = Arc::new(AtomicBool::new(false));
        coordinator.register(Failing);
        coordinator.register(Flag(called.clone()));
        coordinator.register(BridgeCleanup::new(Arc::new(McpBridge::default())));
        coordinator.run_cleanup().await;
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn store_cleanup_empties_store() {
        let store = Arc::new(TaskStore::new());
        store.create("hello").await;
        TaskStoreCleanup::new(store.clone()).cleanup().await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn app_drains_before_cleanup() {
        let manager = Arc::new(ShutdownManager::new());
        let drained = Arc::new(AtomicBool::new(false));
        let drained_first = Arc::new(AtomicBool::new(false));

        let trigger = Arc::clone(&manager);
        tokio::spawn(async move { trigger.shutdown(ShutdownReason::Signal) });

        let app = {
            let manager = Arc::clone(&manager);
            let drained = Arc::clone(&drained);
            async move {
                manager.wait_for_shutdown().await;
                drained.store(true, Ordering::SeqCst);
            }
        };
        let cleanup = {
            let drained = Arc::clone(&drained);
            let drained_first = Arc::clone(&drained_first);
            move || async move { drained_first.store(drained.load(Ordering::SeqCst), Ordering::SeqCst) }
        };
        run_with_graceful_shutdown(manager, app, cleanup).await;
        assert!(drained_first.load(Ordering::SeqCst));
    }
}
