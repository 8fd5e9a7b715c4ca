//! router 伪阶段：只读上下文，决定下一跳

use async_trait::async_trait;

use crate::context::TaskContext;
use crate::workflow::{Stage, Transition, DISPATCH, DRAFTER, END, REFLECTOR};

/// 挂起 → 结束；出错 → 反思；有待审批 → 暂停（从 dispatch 恢复）；还有步骤 → 起草；否则结束
pub fn route(ctx: &TaskContext) -> Transition {
    if ctx.halted {
        Transition::jump(END)
    } else if ctx.error_state {
        Transition::jump(REFLECTOR)
    } else if ctx.awaiting_approval() {
        Transition::pause(DISPATCH)
    } else if ctx.has_remaining_steps() {
        Transition::jump(DRAFTER)
    } else {
        Transition::jump(END)
    }
}

pub struct RouterStage;

#[async_trait]
impl Stage for RouterStage {
    async fn run(&self, ctx: &mut TaskContext) -> Transition {
        let next = route(ctx);
        tracing::debug!(next = ?next, "Routing");
        next
    }
}
