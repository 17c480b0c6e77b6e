use super::{Flow, Step, StepError};
use crate::pipeline::RunCtx;
use crate::pipeline::workflow::RepeatGroupStep;
use tracing::{debug, info, warn};

/// 反复执行同组的全部步骤，直到：
/// - 一轮结束后停止模板的出现/消失满足 `stop_on_not_found`
/// - 组内 `gacha_check` 命中（立即结束，本轮剩余步骤不再执行，也不做停止检查）
/// - 达到 `loop_max_iterations`
///
/// 组内步骤失败只记录日志，不影响外层工作流；组内的跳转被忽略。
impl Step for RepeatGroupStep {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
        let group = match self.loop_group_name.as_deref() {
            Some(g) if !g.is_empty() => g,
            _ => return Err(StepError::Misconfigured("repeat_group without loop_group_name".into())),
        };
        let workflow = ctx.workflow();
        let members = workflow.group_members(group);
        if members.is_empty() {
            return Err(StepError::Misconfigured(format!("group `{group}` has no member steps")));
        }

        let own_index = ctx.current_step();
        info!(
            group,
            members = members.len(),
            max_iterations = self.loop_max_iterations,
            stop_template = ?self.stop_template_path,
            "repeat group"
        );

        let mut iteration = 0u32;
        let mut outcome = "max iterations reached";
        'passes: while iteration < self.loop_max_iterations {
            ctx.check_stop()?;
            iteration += 1;
            debug!(group, iteration, "group pass");

            for (index, member) in &members {
                ctx.set_current_step(*index);
                let result = member.action.run(ctx);
                ctx.set_current_step(own_index);
                match result {
                    Ok(Flow::GachaMatched(name)) => {
                        info!(group, iteration, matched = %name, "gacha matched, ending group loop");
                        outcome = "gacha matched";
                        break 'passes;
                    }
                    Ok(Flow::Goto(target)) => {
                        debug!(step = index + 1, target = target + 1, "jump ignored inside group");
                    }
                    Ok(Flow::Next) => {}
                    Err(StepError::Aborted) => return Err(StepError::Aborted),
                    Err(err) => {
                        warn!(group, step = index + 1, kind = member.kind(), error = %err, "group member failed");
                    }
                }
            }

            if let Some(stop_template) = &self.stop_template_path {
                let screen = match ctx.capture() {
                    Ok(screen) => screen,
                    Err(StepError::Aborted) => return Err(StepError::Aborted),
                    Err(err) => {
                        warn!(error = %err, "screenshot failed, continuing group loop");
                        continue;
                    }
                };
                let found = ctx.locate(&screen, stop_template, self.threshold).is_some();
                debug!(group, iteration, found, stop_on_not_found = self.stop_on_not_found, "stop check");
                if self.stop_on_not_found != found {
                    outcome = "stop condition met";
                    break;
                }
            }
        }

        if outcome == "max iterations reached" {
            warn!(group, iteration, "repeat group reached max iterations");
        }
        info!(group, iterations = iteration, outcome, "repeat group finished");
        Ok(Flow::Next)
    }

    fn label(&self) -> &'static str {
        "repeat_group"
    }
}
