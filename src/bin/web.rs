//! Hive HTTP 任务接口
//!
//! 启动: cargo run --bin hive-web --features web
//! 端口: HIVE_WEB_PORT，默认 8000

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use hive::config::load_config_or_default;
use hive::core::{run_with_graceful_shutdown, AgentError, Decision, ShutdownManager, TaskSnapshot};
use hive::AgentRuntime;

type ApiError = (StatusCode, String);

/// 路由共享状态：运行时 + 关闭信号（关闭开始后拒绝启动新的运行）
#[derive(Clone)]
struct AppState {
    runtime: Arc<AgentRuntime>,
    shutdown: Arc<ShutdownManager>,
}

impl AppState {
    fn accepting(&self) -> Result<(), ApiError> {
        if self.shutdown.is_shutdown() {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "server is shutting down".to_string(),
            ));
        }
        Ok(())
    }
}

fn api_error(e: AgentError) -> ApiError {
    let status = match e {
        AgentError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        AgentError::TaskBusy(_) | AgentError::NothingToDecide(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

#[derive(Deserialize)]
struct CreateTaskRequest {
    prompt: String,
}

#[derive(Deserialize)]
struct ApproveRequest {
    approved: bool,
    #[serde(default)]
    feedback: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cfg = load_config_or_default(None);
    let runtime = Arc::new(AgentRuntime::from_config(cfg).await);
    tracing::info!(workspace = %runtime.workspace.display(), "Runtime ready");

    let manager = Arc::new(ShutdownManager::new());
    let state = AppState {
        runtime: Arc::clone(&runtime),
        shutdown: Arc::clone(&manager),
    };

    let app = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/task", post(create_task))
        .route("/task/:id", get(get_task))
        .route("/task/:id/approve", post(approve_task))
        .route("/reset", post(reset))
        .route("/tools", get(list_tools))
        .with_state(state);

    let port = std::env::var("HIVE_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Hive task API: http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let coordinator = runtime.shutdown_coordinator();
    let draining = Arc::clone(&manager);
    run_with_graceful_shutdown(
        manager,
        async move {
            let stop = async move { draining.wait_for_shutdown().await };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
                tracing::error!("server error: {}", e);
            }
        },
        || async move { coordinator.run_cleanup().await },
    )
    .await;

    Ok(())
}

/// POST /task：创建并在后台运行
async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.accepting()?;
    let rt = &state.runtime;
    let prompt = req.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "prompt is required".to_string()));
    }
    let id = rt.tasks.create(prompt).await;
    let tasks = Arc::clone(&rt.tasks);
    let task_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = tasks.run(&task_id).await {
            tracing::warn!(task_id = %task_id, "task run failed: {}", e);
        }
    });
    Ok((StatusCode::CREATED, Json(json!({ "task_id": id }))))
}

/// GET /task/:id：上下文快照 + next
async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    state
        .runtime
        .tasks.get(&id).await.map(Json).map_err(api_error)
}

/// POST /task/:id/approve：批准则从暂停节点恢复；驳回则带反馈重新起草
async fn approve_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<Value>, ApiError> {
    state.accepting()?;
    let rt = &state.runtime;
    let decision = if req.approved {
        Decision::Approve
    } else {
        Decision::Reject {
            feedback: req.feedback,
        }
    };
    let resumption = rt.tasks.decide(&id, decision).await.map_err(api_error)?;
    let next: Vec<String> = resumption
        .as_ref()
        .map(|r| vec![r.stage.clone()])
        .unwrap_or_default();

    if let Some(resumption) = resumption {
        let tasks = Arc::clone(&rt.tasks);
        tokio::spawn(async move {
            let task_id = resumption.task_id.clone();
            if let Err(e) = tasks.resume(resumption).await {
                tracing::warn!(task_id = %task_id, "task resume failed: {}", e);
            }
        });
    }

    if req.approved {
        Ok(Json(json!({ "status": "resuming" })))
    } else {
        Ok(Json(json!({ "status": "rejected", "next": next })))
    }
}

/// POST /reset：清空任务存储
async fn reset(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.runtime.tasks.reset().await;
    Json(json!({ "status": "reset", "cleared": cleared }))
}

/// GET /tools：内置工具与外部工具目录
async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let rt = &state.runtime;
    let builtin: Vec<Value> = rt
        .executor
        .tool_descriptions()
        .into_iter()
        .map(|(name, description)| json!({ "name": name, "description": description }))
        .collect();
    let external: Vec<Value> = rt
        .bridge
        .tool_catalog()
        .await
        .into_iter()
        .map(|(name, description)| json!({ "name": name, "description": description }))
        .collect();
    Json(json!({
        "builtin": builtin,
        "external": external,
        "servers": rt.bridge.connected_servers().await,
    }))
}
