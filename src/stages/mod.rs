//! 流水线阶段：planner、drafter、reflector 与 router

pub mod drafter;
pub mod parse;
pub mod planner;
pub mod reflector;
pub mod router;

pub use drafter::DrafterStage;
pub use planner::PlannerStage;
pub use reflector::ReflectorStage;
pub use router::{route, RouterStage};
