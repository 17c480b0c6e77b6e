use super::{Flow, StepError};
use crate::device::KEY_BACK;
use crate::pipeline::RunCtx;
use tracing::{info, warn};

pub(super) fn run(ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
    info!("press back");
    if let Err(err) = ctx.device()?.press_key(KEY_BACK) {
        warn!(error = %err, "back key failed");
    }
    ctx.sleep_secs(ctx.settings().timing.back_settle)?;
    Ok(Flow::Next)
}
