//! 执行图引擎：命名阶段 + 有序边，支持条件跳转、进入前暂停与确定性恢复

pub mod builder;
pub mod graph;
pub mod types;

pub use builder::{build_pipeline, PipelineStages, DISPATCH, DRAFTER, PLANNER, REFLECTOR, ROUTER};
pub use graph::{Runner, StageGraph, DEFAULT_MAX_TRANSITIONS};
pub use types::*;
