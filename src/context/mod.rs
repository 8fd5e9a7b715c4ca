//! 任务上下文：贯穿所有阶段的可变记录
//!
//! 同一时刻只由当前执行的阶段写入（由执行图保证单写者，不加锁）。

pub mod approval;
pub mod artifact;
pub mod message;
pub mod task;

pub use approval::{ApprovalKind, ApprovalStatus, PendingApproval};
pub use artifact::{Artifact, ArtifactKind, DraftDocument, DraftedCall};
pub use message::{Message, Role};
pub use task::{CallError, CallOutcome, TaskContext};
