use super::{Flow, StepError};
use crate::pipeline::RunCtx;
use crate::pipeline::workflow::AppStep;
use tracing::{info, warn};

fn package(step: &AppStep, ctx: &RunCtx<'_>) -> String {
    step.package
        .clone()
        .unwrap_or_else(|| ctx.settings().game.package.clone())
}

/// 仅作标记：启动游戏由账号流程负责。
pub(super) fn start_game(step: &AppStep, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
    info!(package = %package(step, ctx), "start_game marker, launch handled by account loop");
    Ok(Flow::Next)
}

/// 强制停止后重新启动，两次等待都可被停止信号打断。
pub(super) fn restart_game(step: &AppStep, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
    let timing = &ctx.settings().timing;
    let pkg = package(step, ctx);
    info!(package = %pkg, "restart game");

    if let Err(err) = ctx.device()?.force_stop(&pkg) {
        warn!(package = %pkg, error = %err, "force stop failed");
    }
    ctx.sleep_secs(timing.restart_stop_wait)?;

    if let Err(err) = ctx.device()?.start_app(&pkg) {
        warn!(package = %pkg, error = %err, "start app failed");
    }
    ctx.sleep_secs(timing.restart_start_wait)?;
    Ok(Flow::Next)
}
