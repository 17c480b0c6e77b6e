//! 没有配置工作流时使用的内置领奖流程。

use crate::config::{Settings, secs};
use crate::device::Device;
use crate::perception::Perception;
use crate::stop::{StopSignal, Stopped};
use tracing::{debug, info, warn};

/// 领奖流程的统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimSummary {
    pub iterations: u32,
    pub taps: u32,
}

/// 按优先级轮询领奖按钮（关闭、礼盒、全部领取、确定），每轮最多点一个。
///
/// 连续 `miss_limit` 轮都没找到按钮，或达到 `max_iterations` 时结束。
pub fn claim_rewards(
    device: &mut dyn Device,
    perception: &dyn Perception,
    settings: &Settings,
    stop: &StopSignal,
) -> Result<ClaimSummary, Stopped> {
    let claim = &settings.claim;
    let buttons = &settings.templates.claim_buttons;
    let threshold = settings.templates.builtin_threshold;
    info!(buttons = buttons.len(), max_iterations = claim.max_iterations, "auto claim");

    let mut summary = ClaimSummary::default();
    let mut misses = 0u32;
    while summary.iterations < claim.max_iterations {
        stop.checkpoint()?;
        summary.iterations += 1;
        debug!(scan = summary.iterations, "claim scan");

        let screen = match device.screenshot() {
            Ok(screen) => screen,
            Err(err) => {
                warn!(error = %err, "screenshot failed");
                stop.pause(secs(settings.timing.screenshot_retry))?;
                continue;
            }
        };

        let hit = buttons.iter().find_map(|button| {
            let path = settings.template_path(&button.template);
            match perception.find_template(&screen, &path, threshold) {
                Ok(found) => found.map(|p| (button, p)),
                Err(err) => {
                    warn!(button = %button.name, error = %format!("{err:#}"), "template match failed");
                    None
                }
            }
        });

        match hit {
            Some((button, p)) => {
                info!(button = %button.name, x = p.x, y = p.y, "tapping claim button");
                stop.checkpoint()?;
                if let Err(err) = device.tap(p.x, p.y) {
                    warn!(error = %err, "tap failed");
                }
                summary.taps += 1;
                misses = 0;
                stop.pause(secs(button.delay))?;
            }
            None => {
                misses += 1;
                debug!(misses, limit = claim.miss_limit, "no claim button found");
                if misses >= claim.miss_limit {
                    info!(taps = summary.taps, "no more buttons, claim complete");
                    return Ok(summary);
                }
                stop.pause(secs(claim.miss_wait))?;
            }
        }
    }

    warn!(iterations = summary.iterations, "claim reached max iterations");
    Ok(summary)
}
