use super::{Flow, Step, StepError};
use crate::config::secs;
use crate::pipeline::RunCtx;
use crate::pipeline::workflow::{LoopClickStep, template_display_name};
use tracing::{debug, info, warn};

/// 反复找模板并点击，连续 `not_found_threshold` 次找不到或达到 `max_iterations` 后结束。
/// 从不让工作流失败。
impl Step for LoopClickStep {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
        let name = template_display_name(None, &self.template_path);
        info!(template = %name, max_iterations = self.max_iterations, "loop click");

        let mut iteration = 0u32;
        let mut misses = 0u32;
        let mut clicks = 0u32;
        while iteration < self.max_iterations {
            iteration += 1;

            let screen = match ctx.capture() {
                Ok(screen) => screen,
                Err(StepError::Aborted) => return Err(StepError::Aborted),
                Err(err) => {
                    warn!(iteration, error = %err, "screenshot failed, retrying");
                    ctx.sleep(secs(ctx.settings().timing.screenshot_retry))?;
                    continue;
                }
            };

            match ctx.locate(&screen, &self.template_path, self.threshold) {
                Some(p) => {
                    clicks += 1;
                    misses = 0;
                    debug!(iteration, x = p.x, y = p.y, click = clicks, "found, clicking");
                    if let Err(err) = ctx.device()?.tap(p.x, p.y) {
                        warn!(error = %err, "tap failed");
                    }
                    ctx.sleep_secs(self.click_delay)?;
                }
                None => {
                    misses += 1;
                    debug!(iteration, misses, limit = self.not_found_threshold, "not found");
                    if misses >= self.not_found_threshold {
                        break;
                    }
                    ctx.sleep_secs(self.retry_delay)?;
                }
            }
        }

        if iteration >= self.max_iterations && misses < self.not_found_threshold {
            warn!(template = %name, iteration, "loop click reached max iterations");
        }
        info!(template = %name, iterations = iteration, clicks, "loop click finished");
        Ok(Flow::Next)
    }

    fn label(&self) -> &'static str {
        "loop_click"
    }
}
