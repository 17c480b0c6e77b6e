use super::{Flow, Step, StepError};
use crate::pipeline::RunCtx;
use crate::pipeline::workflow::ClickStep;
use tracing::{info, warn};

/// 点击固定坐标。点击失败只记日志，不影响工作流。
impl Step for ClickStep {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
        info!(x = self.x, y = self.y, "click");
        if let Err(err) = ctx.device()?.tap(self.x, self.y) {
            warn!(x = self.x, y = self.y, error = %err, "tap failed");
        }
        ctx.sleep_secs(ctx.settings().timing.click_settle)?;
        Ok(Flow::Next)
    }

    fn label(&self) -> &'static str {
        "click"
    }
}
