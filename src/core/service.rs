//! 任务服务：创建、运行、查询、人工决策与恢复
//!
//! 单写者：任务运行期间（status = running）拒绝任何决策。
//! 恢复只由人工决策触发，没有后台轮询。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::GraphSection;
use crate::context::{Message, TaskContext};
use crate::core::{AgentError, TaskRecord, TaskStatus, TaskStore};
use crate::workflow::{RunObserver, StageGraph, DISPATCH, DRAFTER};

/// 人工决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { feedback: Option<String> },
}

/// 决策之后的重入点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resumption {
    pub task_id: String,
    pub stage: String,
    pub pause_before: Vec<String>,
}

/// 查询结果：记录快照 + next 提示
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub next: Vec<String>,
}

const DEFAULT_REJECTION: &str =
    "The proposed actions were rejected by the reviewer. Propose a different approach for this step.";

/// 每个阶段结束后把上下文写回存储，使查询能看到运行中的进度
struct StoreObserver {
    store: Arc<TaskStore>,
    task_id: String,
}

#[async_trait]
impl RunObserver for StoreObserver {
    async fn on_stage_complete(&self, stage: &str, ctx: &TaskContext) {
        tracing::debug!(task_id = %self.task_id, stage = %stage, "Stage completed");
        self.store
            .with_record(&self.task_id, |r| {
                r.context = ctx.clone();
                r.touch();
            })
            .await;
    }
}

pub struct TaskService {
    store: Arc<TaskStore>,
    graph: Arc<StageGraph>,
    pause_before: Vec<String>,
    max_transitions: usize,
}

impl TaskService {
    pub fn new(store: Arc<TaskStore>, graph: Arc<StageGraph>, cfg: &GraphSection) -> Self {
        Self {
            store,
            graph,
            pause_before: cfg.pause_before.clone(),
            max_transitions: cfg.max_transitions,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub async fn create(&self, prompt: impl Into<String>) -> String {
        let record = self.store.create(prompt).await;
        tracing::info!(task_id = %record.id, "Task created");
        record.id
    }

    pub async fn get(&self, id: &str) -> Result<TaskSnapshot, AgentError> {
        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;
        let next = record.next_hint();
        Ok(TaskSnapshot { record, next })
    }

    /// 从 START 运行
    pub async fn run(&self, id: &str) -> Result<TaskRecord, AgentError> {
        let ctx = self
            .store
            .with_record(id, |r| {
                if r.status == TaskStatus::Running {
                    return Err(AgentError::TaskBusy(r.id.clone()));
                }
                r.status = TaskStatus::Running;
                r.touch();
                Ok(r.context.clone())
            })
            .await
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))??;

        tracing::info!(task_id = %id, "Task started");
        let runner = self
            .graph
            .compile(self.pause_before.clone())
            .with_max_transitions(self.max_transitions)
            .with_observer(self.observer(id));
        let outcome = runner.run(ctx).await;
        self.finish(id, outcome).await
    }

    /// 校验并应用人工决策；返回 None 表示无需继续运行（如驳回升级，任务保持挂起）
    pub async fn decide(&self, id: &str, decision: Decision) -> Result<Option<Resumption>, AgentError> {
        let configured = self.pause_before.clone();
        self.store
            .with_record(id, move |r| {
                let task_id = r.id.clone();
                if r.status == TaskStatus::Running {
                    return Err(AgentError::TaskBusy(task_id));
                }
                let ctx = &mut r.context;
                let halted = ctx.halted || ctx.has_open_escalation();

                let resumption = match decision {
                    Decision::Approve if halted => {
                        ctx.clear_escalation();
                        tracing::info!(task_id = %task_id, "Escalation cleared by reviewer");
                        Some(Resumption {
                            task_id,
                            stage: DRAFTER.to_string(),
                            pause_before: Vec::new(),
                        })
                    }
                    Decision::Approve if r.status == TaskStatus::AwaitingApproval => {
                        let approved = ctx.approve_pending_actions();
                        tracing::info!(task_id = %task_id, approved, "Actions approved");
                        Some(Resumption {
                            task_id,
                            stage: r.resume_at.clone().unwrap_or_else(|| DISPATCH.to_string()),
                            pause_before: Vec::new(),
                        })
                    }
                    Decision::Reject { .. } if halted => {
                        ctx.reject_escalation();
                        tracing::info!(task_id = %task_id, "Escalation rejected, task stays halted");
                        None
                    }
                    Decision::Reject { feedback } if r.status == TaskStatus::AwaitingApproval => {
                        let rejected = ctx.reject_pending_actions();
                        ctx.drafted_calls.clear();
                        let feedback = feedback
                            .filter(|f| !f.trim().is_empty())
                            .unwrap_or_else(|| DEFAULT_REJECTION.to_string());
                        ctx.push_message(Message::user(feedback));
                        tracing::info!(task_id = %task_id, rejected, "Actions rejected, redrafting");
                        Some(Resumption {
                            task_id,
                            stage: DRAFTER.to_string(),
                            pause_before: configured,
                        })
                    }
                    _ => return Err(AgentError::NothingToDecide(task_id)),
                };

                if resumption.is_some() {
                    r.status = TaskStatus::Running;
                    r.resume_at = None;
                }
                r.touch();
                Ok(resumption)
            })
            .await
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?
    }

    /// 从决策给出的节点重入（该节点本身不经过暂停闸门）
    pub async fn resume(&self, resumption: Resumption) -> Result<TaskRecord, AgentError> {
        let id = resumption.task_id.as_str();
        let record = self
            .store
            .get(id)
            .await
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;
        let runner = self
            .graph
            .compile(resumption.pause_before.clone())
            .with_max_transitions(self.max_transitions)
            .with_observer(self.observer(id));
        let outcome = runner.resume(record.context, &resumption.stage).await;
        self.finish(id, outcome).await
    }

    pub async fn approve(&self, id: &str) -> Result<TaskRecord, AgentError> {
        self.decide_and_resume(id, Decision::Approve).await
    }

    pub async fn reject(&self, id: &str, feedback: Option<String>) -> Result<TaskRecord, AgentError> {
        self.decide_and_resume(id, Decision::Reject { feedback }).await
    }

    async fn decide_and_resume(&self, id: &str, decision: Decision) -> Result<TaskRecord, AgentError> {
        match self.decide(id, decision).await? {
            Some(resumption) => self.resume(resumption).await,
            None => self
                .store
                .get(id)
                .await
                .ok_or_else(|| AgentError::TaskNotFound(id.to_string())),
        }
    }

    /// 清空全部任务
    pub async fn reset(&self) -> usize {
        let n = self.store.clear().await;
        tracing::info!(tasks = n, "Task store reset");
        n
    }

    fn observer(&self, id: &str) -> Arc<dyn RunObserver> {
        Arc::new(StoreObserver {
            store: Arc::clone(&self.store),
            task_id: id.to_string(),
        })
    }

    async fn finish(&self, id: &str, outcome: crate::workflow::RunOutcome) -> Result<TaskRecord, AgentError> {
        let record = self
            .store
            .with_record(id, |r| {
                r.apply_outcome(outcome);
                r.clone()
            })
            .await
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;
        tracing::info!(task_id = %id, status = ?record.status, "Task run finished");
        Ok(record)
    }
}
