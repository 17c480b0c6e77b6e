use super::{Flow, Step, StepError};
use crate::config::secs;
use crate::pipeline::RunCtx;
use crate::pipeline::workflow::WaitForColorStep;
use crate::vision::pixel_color_matches;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 轮询某个像素，直到颜色差（三通道绝对差之和）不超过 `tolerance`。超时让工作流失败。
///
/// `max_wait_seconds` 为 0 时不截图，直接超时。
impl Step for WaitForColorStep {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
        let Some(expected) = self.expected_bgr() else {
            return Err(StepError::Misconfigured(format!(
                "wait_for_color expected_color needs 3 channels, got {}",
                self.expected_color.len()
            )));
        };
        let max_wait = secs(self.max_wait_seconds);
        let interval = secs(self.check_interval);
        info!(x = self.x, y = self.y, ?expected, tolerance = self.tolerance, "waiting for color");

        let started = Instant::now();
        let mut checks = 0u32;
        while started.elapsed() < max_wait {
            match ctx.capture() {
                Ok(screen) => {
                    checks += 1;
                    match pixel_color_matches(&screen, self.x, self.y, expected, self.tolerance) {
                        Some(true) => {
                            info!(checks, elapsed = ?started.elapsed(), "color matched");
                            return Ok(Flow::Next);
                        }
                        Some(false) => debug!(checks, "color not matched yet"),
                        None => {
                            let (width, height) = screen.dimensions();
                            return Err(StepError::OutOfBounds {
                                x: self.x,
                                y: self.y,
                                width,
                                height,
                            });
                        }
                    }
                }
                Err(StepError::Aborted) => return Err(StepError::Aborted),
                Err(err) => warn!(error = %err, "screenshot failed, retrying"),
            }
            ctx.sleep(interval)?;
        }

        Err(StepError::ColorTimeout {
            x: self.x,
            y: self.y,
            waited: started.elapsed(),
        })
    }

    fn label(&self) -> &'static str {
        "wait_for_color"
    }
}
