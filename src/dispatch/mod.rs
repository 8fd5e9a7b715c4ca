//! 调度与升级策略

pub mod policy;
pub mod stage;

pub use policy::{DispatchPolicy, RetryPolicy};
pub use stage::DispatchStage;
