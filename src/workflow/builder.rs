//! 标准流水线装配
//!
//! START → planner → drafter → dispatch → router；reflector → drafter。
//! router 为伪阶段，只返回 Jump / Pause，不修改上下文。

use std::sync::Arc;

use crate::workflow::graph::StageGraph;
use crate::workflow::types::{Stage, START};

pub const PLANNER: &str = "planner";
pub const DRAFTER: &str = "drafter";
pub const DISPATCH: &str = "dispatch";
pub const REFLECTOR: &str = "reflector";
pub const ROUTER: &str = "router";

/// 流水线的五个阶段
pub struct PipelineStages {
    pub planner: Arc<dyn Stage>,
    pub drafter: Arc<dyn Stage>,
    pub dispatch: Arc<dyn Stage>,
    pub reflector: Arc<dyn Stage>,
    pub router: Arc<dyn Stage>,
}

pub fn build_pipeline(stages: PipelineStages) -> StageGraph {
    let mut graph = StageGraph::new();
    graph
        .add_shared_stage(PLANNER, stages.planner)
        .add_shared_stage(DRAFTER, stages.drafter)
        .add_shared_stage(DISPATCH, stages.dispatch)
        .add_shared_stage(REFLECTOR, stages.reflector)
        .add_shared_stage(ROUTER, stages.router)
        .add_edge(START, PLANNER)
        .add_edge(PLANNER, DRAFTER)
        .add_edge(DRAFTER, DISPATCH)
        .add_edge(DISPATCH, ROUTER)
        .add_edge(REFLECTOR, DRAFTER);
    graph
}
