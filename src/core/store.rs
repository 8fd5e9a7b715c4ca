//! 内存任务存储：id → TaskRecord，后写覆盖前写

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::context::TaskContext;
use crate::workflow::{RunOutcome, RunState, StopReason, DISPATCH, DRAFTER, PLANNER};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Running,
    AwaitingApproval,
    Halted,
    Completed,
    Stopped,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub context: TaskContext,
    /// 暂停时的重入节点
    pub resume_at: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Created,
            context: TaskContext::new(prompt),
            resume_at: None,
            stop_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// 折叠一次运行的结果
    pub fn apply_outcome(&mut self, outcome: RunOutcome) {
        self.context = outcome.context;
        self.resume_at = None;
        self.stop_reason = None;
        self.status = match outcome.state {
            _ if self.context.halted => TaskStatus::Halted,
            RunState::Completed => TaskStatus::Completed,
            RunState::Paused { resume_at } => {
                self.resume_at = Some(resume_at);
                TaskStatus::AwaitingApproval
            }
            RunState::Stopped { reason } => {
                self.stop_reason = Some(reason);
                TaskStatus::Stopped
            }
        };
        self.touch();
    }

    /// 下一个将要执行的阶段（客户端据此决定轮询还是提示审批）
    pub fn next_hint(&self) -> Vec<String> {
        let ctx = &self.context;
        if self.status == TaskStatus::Completed || ctx.halted {
            return Vec::new();
        }
        if !ctx.drafted_calls.is_empty() || ctx.awaiting_approval() {
            vec![DISPATCH.to_string()]
        } else if ctx.has_remaining_steps() {
            vec![DRAFTER.to_string()]
        } else if ctx.plan.is_empty() && self.status == TaskStatus::Created {
            vec![PLANNER.to_string()]
        } else {
            Vec::new()
        }
    }
}

#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, prompt: impl Into<String>) -> TaskRecord {
        let record = TaskRecord::new(prompt);
        self.tasks
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        record
    }

    pub async fn get(&self, id: &str) -> Option<TaskRecord> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn update(&self, record: TaskRecord) {
        self.tasks.write().await.insert(record.id.clone(), record);
    }

    /// 在写锁内修改记录；记录不存在返回 None
    pub async fn with_record<R>(&self, id: &str, f: impl FnOnce(&mut TaskRecord) -> R) -> Option<R> {
        let mut tasks = self.tasks.write().await;
        tasks.get_mut(id).map(f)
    }

    /// 清空，返回被丢弃的任务数
    pub async fn clear(&self) -> usize {
        let mut tasks = self.tasks.write().await;
        let n = tasks.len();
        tasks.clear();
        n
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}
