//! 执行图解释器
//!
//! 从 START 出发，每步取当前节点的第一条出边（或阶段返回的跳转目标）；
//! 目标在暂停集合中则原样返回上下文并标记暂停。恢复时从暂停节点重入，不回到 START。

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::context::TaskContext;
use crate::workflow::types::*;

/// 默认状态转移上限，防止条件路由成环时无限运行
pub const DEFAULT_MAX_TRANSITIONS: usize = 200;

/// 命名阶段 + 有序边表；出边不在添加时校验，只跟随第一条
#[derive(Clone, Default)]
pub struct StageGraph {
    stages: HashMap<String, Arc<dyn Stage>>,
    edges: Vec<(String, String)>,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&mut self, name: impl Into<String>, stage: impl Stage + 'static) -> &mut Self {
        self.stages.insert(name.into(), Arc::new(stage));
        self
    }

    pub fn add_shared_stage(&mut self, name: impl Into<String>, stage: Arc<dyn Stage>) -> &mut Self {
        self.stages.insert(name.into(), stage);
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// 编译为 Runner；pause_before 中的节点在进入前暂停
    pub fn compile<I, S>(&self, pause_before: I) -> Runner
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Runner {
            graph: Arc::new(self.clone()),
            pause_before: pause_before.into_iter().map(Into::into).collect(),
            max_transitions: DEFAULT_MAX_TRANSITIONS,
            observer: None,
        }
    }

    fn first_edge(&self, from: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|(a, _)| a == from)
            .map(|(_, b)| b.as_str())
    }
}

pub struct Runner {
    graph: Arc<StageGraph>,
    pause_before: HashSet<String>,
    max_transitions: usize,
    observer: Option<Arc<dyn RunObserver>>,
}

impl Runner {
    pub fn with_max_transitions(mut self, limit: usize) -> Self {
        self.max_transitions = limit;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// 从 START 开始运行
    pub async fn run(&self, ctx: TaskContext) -> RunOutcome {
        self.drive(ctx, START.to_string(), None).await
    }

    /// 从暂停节点重入：该节点直接执行，不再经过暂停闸门
    pub async fn resume(&self, ctx: TaskContext, stage: &str) -> RunOutcome {
        tracing::info!(stage = %stage, "Resuming run");
        self.drive(ctx, START.to_string(), Some(stage.to_string())).await
    }

    async fn drive(
        &self,
        mut ctx: TaskContext,
        mut current: String,
        entry: Option<String>,
    ) -> RunOutcome {
        let mut bypass_gate = entry.is_some();
        let mut next = entry;
        let mut transitions = 0usize;

        loop {
            let dest = match next.take() {
                Some(d) => d,
                None => match self.graph.first_edge(&current) {
                    Some(d) => d.to_string(),
                    None => {
                        return self.stopped(ctx, StopReason::NoOutgoingEdge { from: current });
                    }
                },
            };

            if dest == END {
                tracing::info!("Run completed");
                return RunOutcome {
                    context: ctx,
                    state: RunState::Completed,
                };
            }
            if !bypass_gate && self.pause_before.contains(&dest) {
                tracing::info!(stage = %dest, "Pausing before stage");
                return RunOutcome {
                    context: ctx,
                    state: RunState::Paused { resume_at: dest },
                };
            }
            bypass_gate = false;

            transitions += 1;
            if transitions > self.max_transitions {
                return self.stopped(
                    ctx,
                    StopReason::TransitionLimit {
                        limit: self.max_transitions,
                    },
                );
            }

            let Some(stage) = self.graph.stages.get(&dest).cloned() else {
                return self.stopped(ctx, StopReason::UnknownStage { name: dest });
            };

            tracing::debug!(stage = %dest, "Entering stage");
            let result = AssertUnwindSafe(stage.run(&mut ctx)).catch_unwind().await;
            let transition = match result {
                Ok(t) => t,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    return self.stopped(
                        ctx,
                        StopReason::StagePanicked {
                            stage: dest,
                            message,
                        },
                    );
                }
            };

            if let Some(observer) = &self.observer {
                observer.on_stage_complete(&dest, &ctx).await;
            }

            match transition {
                Transition::Advance => current = dest,
                Transition::Jump(target) => {
                    current = dest;
                    next = Some(target);
                }
                Transition::Pause { resume_at } => {
                    tracing::info!(stage = %current, resume_at = %resume_at, "Stage requested pause");
                    return RunOutcome {
                        context: ctx,
                        state: RunState::Paused { resume_at },
                    };
                }
            }
        }
    }

    fn stopped(&self, ctx: TaskContext, reason: StopReason) -> RunOutcome {
        tracing::warn!(reason = %reason, "Run stopped");
        RunOutcome {
            context: ctx,
            state: RunState::Stopped { reason },
        }
    }
}
