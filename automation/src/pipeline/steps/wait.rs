use super::{Flow, Step, StepError};
use crate::pipeline::RunCtx;
use crate::pipeline::workflow::WaitStep;
use std::time::Duration;
use tracing::info;

impl Step for WaitStep {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
        info!(ms = self.wait_duration_ms, "wait");
        ctx.sleep(Duration::from_millis(self.wait_duration_ms))?;
        Ok(Flow::Next)
    }

    fn label(&self) -> &'static str {
        "wait"
    }
}
