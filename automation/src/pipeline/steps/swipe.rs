use super::{Flow, Step, StepError};
use crate::pipeline::RunCtx;
use crate::pipeline::workflow::SwipeStep;
use std::time::Duration;
use tracing::{info, warn};

impl Step for SwipeStep {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
        let from = (self.x, self.y);
        let to = (self.end_x, self.end_y);
        info!(?from, ?to, duration_ms = self.swipe_duration_ms, "swipe");
        let duration = Duration::from_millis(self.swipe_duration_ms);
        if let Err(err) = ctx.device()?.swipe(from, to, duration) {
            warn!(error = %err, "swipe failed");
        }
        ctx.sleep_secs(ctx.settings().timing.swipe_settle)?;
        Ok(Flow::Next)
    }

    fn label(&self) -> &'static str {
        "swipe"
    }
}
