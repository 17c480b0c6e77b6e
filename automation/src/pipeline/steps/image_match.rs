use super::{Flow, Step, StepError};
use crate::config::secs;
use crate::pipeline::RunCtx;
use crate::pipeline::workflow::ImageMatchStep;
use crate::vision::Point;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 轮询截图找模板，找到后点击中心点。
///
/// - 每次重试都重新截图
/// - 超过 `max_wait_seconds`，或设置了 `max_retries` 且次数用完，即放弃
/// - 截图失败也计入一次尝试
/// - 放弃后除非 `skip_if_not_found`，否则让工作流失败
impl Step for ImageMatchStep {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
        self.poll(ctx, self.match_all)
    }

    fn label(&self) -> &'static str {
        "image_match"
    }
}

impl ImageMatchStep {
    /// `find_all` 为真时点击所有命中（`find_all_click` / `match_all`）。
    pub(crate) fn poll(&self, ctx: &mut RunCtx<'_>, find_all: bool) -> Result<Flow, StepError> {
        let name = self.display_name();
        let max_wait = secs(self.max_wait_seconds);
        let max_retries = self.max_retries.filter(|n| *n > 0);
        let interval = secs(self.retry_interval);
        info!(template = %name, ?max_wait, ?max_retries, find_all, "searching for template");

        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            if started.elapsed() >= max_wait {
                debug!(template = %name, "timeout reached");
                break;
            }
            if max_retries.is_some_and(|limit| attempts >= limit) {
                debug!(template = %name, attempts, "max retries reached");
                break;
            }

            let screen = match ctx.capture() {
                Ok(screen) => screen,
                Err(StepError::Aborted) => return Err(StepError::Aborted),
                Err(err) => {
                    warn!(error = %err, "screenshot failed, retrying");
                    attempts += 1;
                    ctx.sleep(interval)?;
                    continue;
                }
            };

            let hits: Vec<Point> = if find_all {
                ctx.locate_all(&screen, &self.template_path, self.threshold)
            } else {
                ctx.locate(&screen, &self.template_path, self.threshold)
                    .into_iter()
                    .collect()
            };

            if !hits.is_empty() {
                info!(
                    template = %name,
                    matches = hits.len(),
                    attempts,
                    elapsed = ?started.elapsed(),
                    "template found"
                );
                tap_all(ctx, &hits)?;
                return Ok(Flow::Next);
            }

            attempts += 1;
            match max_retries {
                Some(limit) => debug!(template = %name, attempt = attempts, limit, "not found, retrying"),
                None => debug!(template = %name, elapsed = ?started.elapsed(), "not found yet, retrying"),
            }
            ctx.sleep(interval)?;
        }

        if self.skip_if_not_found {
            info!(template = %name, attempts, "template not found, skipping step");
            return Ok(Flow::Next);
        }
        Err(StepError::TemplateNotFound {
            template: name,
            attempts,
            waited: started.elapsed(),
        })
    }
}

/// 依次点击，点击之间有间隔，最后统一等待一次界面稳定。
fn tap_all(ctx: &mut RunCtx<'_>, hits: &[Point]) -> Result<(), StepError> {
    let timing = &ctx.settings().timing;
    for (i, p) in hits.iter().enumerate() {
        if i > 0 {
            ctx.sleep_secs(timing.find_all_gap)?;
        }
        debug!(index = i + 1, total = hits.len(), x = p.x, y = p.y, "tap match");
        if let Err(err) = ctx.device()?.tap(p.x, p.y) {
            warn!(x = p.x, y = p.y, error = %err, "tap failed");
        }
    }
    ctx.sleep_secs(timing.click_settle)
}
