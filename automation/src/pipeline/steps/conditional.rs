use super::{Flow, Step, StepError};
use crate::pipeline::workflow::{ConditionType, ConditionalStep, template_display_name};
use crate::pipeline::{DecisionBranch, RunCtx};
use tracing::{debug, info, warn};

/// 条件分支步骤：截一次图判断模板是否存在，按结果跳到 `goto_step_on_true` / `goto_step_on_false`。
///
/// 跳转目标是 1-based 序号，这里转成 0-based 下标交给解释器。
/// 没有配置对应目标时顺序执行；截图失败按“模板不存在”处理。
impl Step for ConditionalStep {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
        let name = template_display_name(None, &self.template_path);
        let found = match ctx.capture() {
            Ok(screen) => ctx.locate(&screen, &self.template_path, self.threshold).is_some(),
            Err(StepError::Aborted) => return Err(StepError::Aborted),
            Err(err) => {
                warn!(error = %err, "screenshot failed, treating template as absent");
                false
            }
        };
        let result = match self.condition_type {
            ConditionType::ImageExists => found,
            ConditionType::ImageNotExists => !found,
        };
        info!(template = %name, condition = ?self.condition_type, found, result, "condition evaluated");

        let target = if result {
            self.goto_step_on_true
        } else {
            self.goto_step_on_false
        };
        let label = format!("conditional {name}");
        let Some(target) = target else {
            debug!(result, "no jump configured, continuing");
            ctx.record_decision(label, DecisionBranch::Skipped);
            return Ok(Flow::Next);
        };

        let len = ctx.workflow().steps.len();
        if target == 0 || target > len {
            ctx.record_decision(label, DecisionBranch::Skipped);
            return Err(StepError::Misconfigured(format!(
                "goto target {target} outside 1..={len}"
            )));
        }

        info!(target, "jumping to step");
        let branch = if result {
            DecisionBranch::Then(target)
        } else {
            DecisionBranch::Else(target)
        };
        ctx.record_decision(label, branch);
        Ok(Flow::Goto(target - 1))
    }

    fn label(&self) -> &'static str {
        "conditional"
    }
}
