//! Agent 运行时装配
//!
//! 从配置构建：按能力区分的 LLM、内置工具注册表与执行器、协议桥（连接配置的工具服务器）、
//! 调度策略、标准流水线执行图，以及任务服务。CLI 与 HTTP 前端共用。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{BridgeCleanup, ShutdownCoordinator, TaskService, TaskStore, TaskStoreCleanup};
use crate::dispatch::{DispatchPolicy, DispatchStage};
use crate::llm::{create_models_from_config, Capability, ModelSet};
use crate::mcp::{BridgeSettings, McpBridge};
use crate::stages::{DrafterStage, PlannerStage, ReflectorStage, RouterStage};
use crate::tools::{builtin_registry, ToolExecutor, ToolRegistry};
use crate::workflow::{build_pipeline, PipelineStages, StageGraph};

pub struct AgentRuntime {
    pub config: AppConfig,
    pub workspace: PathBuf,
    pub executor: Arc<ToolExecutor>,
    pub bridge: Arc<McpBridge>,
    pub policy: Arc<DispatchPolicy>,
    pub graph: Arc<StageGraph>,
    pub store: Arc<TaskStore>,
    pub tasks: Arc<TaskService>,
}

impl AgentRuntime {
    /// 完整装配：解析沙箱根、创建模型、注册内置工具并连接配置中的工具服务器
    pub async fn from_config(config: AppConfig) -> Self {
        let workspace = config.app.resolve_workspace();
        let models = create_models_from_config(&config.llm);
        let registry = builtin_registry(&workspace, &config.tools);
        let bridge = Arc::new(McpBridge::new(BridgeSettings::from(&config.mcp)));

        let servers = config.mcp.effective_servers(&workspace);
        if !servers.is_empty() {
            let connected = bridge.connect_all(&servers).await;
            tracing::info!(connected, configured = servers.len(), "Tool servers connected");
        }

        Self::from_parts(config, &workspace, models, registry, bridge)
    }

    /// 由现成组件装配（测试中注入 Mock LLM 与空协议桥）
    pub fn from_parts(
        config: AppConfig,
        workspace: &Path,
        models: ModelSet,
        registry: ToolRegistry,
        bridge: Arc<McpBridge>,
    ) -> Self {
        let executor = Arc::new(ToolExecutor::new(registry, config.tools.tool_timeout_secs));
        let policy = Arc::new(DispatchPolicy::from_config(
            Arc::clone(&executor),
            Arc::clone(&bridge),
            &config.policy,
        ));

        let graph = Arc::new(build_pipeline(PipelineStages {
            planner: Arc::new(PlannerStage::new(models.get(Capability::Reasoning), workspace)),
            drafter: Arc::new(DrafterStage::new(
                models.get(Capability::Coding),
                Arc::clone(&executor),
                Arc::clone(&bridge),
                policy.retry(),
            )),
            dispatch: Arc::new(DispatchStage::new(Arc::clone(&policy))),
            reflector: Arc::new(ReflectorStage::new(models.get(Capability::Reasoning))),
            router: Arc::new(RouterStage),
        }));

        let store = Arc::new(TaskStore::new());
        let tasks = Arc::new(TaskService::new(
            Arc::clone(&store),
            Arc::clone(&graph),
            &config.graph,
        ));

        Self {
            config,
            workspace: workspace.to_path_buf(),
            executor,
            bridge,
            policy,
            graph,
            store,
            tasks,
        }
    }

    /// 关闭时的清理：先断开工具服务器，再清空任务
    pub fn shutdown_coordinator(&self) -> ShutdownCoordinator {
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(BridgeCleanup::new(Arc::clone(&self.bridge)));
        coordinator.register(TaskStoreCleanup::new(Arc::clone(&self.store)));
        coordinator
    }

    pub async fn shutdown(&self) {
        self.bridge.shutdown().await;
    }
}
