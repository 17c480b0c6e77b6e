use super::StepError;
use super::workflow::Workflow;
use crate::config::{Settings, secs};
use crate::device::Device;
use crate::perception::Perception;
use crate::stop::StopSignal;
use crate::vision::Point;
use image::RgbImage;
use ocr::Region;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// 运行上下文：一次工作流执行独占的设备、感知、配置与停止信号。
///
/// 所有对设备的命令和所有睡眠都经过这里，因此每次命令前、每次等待中都会检查停止信号：
/// - `device()` 在交出设备前检查停止信号
/// - `sleep()` 用可被唤醒的等待代替 `thread::sleep`
/// - `capture()` 每次都重新截图，不缓存
pub struct RunCtx<'a> {
    workflow: &'a Workflow,
    device: &'a mut dyn Device,
    perception: &'a dyn Perception,
    settings: &'a Settings,
    stop: &'a StopSignal,
    current: usize,
    decisions: Vec<DecisionRecord>,
    gacha_matches: Vec<String>,
}

impl<'a> RunCtx<'a> {
    pub fn new(
        workflow: &'a Workflow,
        device: &'a mut dyn Device,
        perception: &'a dyn Perception,
        settings: &'a Settings,
        stop: &'a StopSignal,
    ) -> Self {
        Self {
            workflow,
            device,
            perception,
            settings,
            stop,
            current: 0,
            decisions: Vec::new(),
            gacha_matches: Vec::new(),
        }
    }

    pub fn workflow(&self) -> &'a Workflow {
        self.workflow
    }

    pub fn settings(&self) -> &'a Settings {
        self.settings
    }

    pub fn perception(&self) -> &'a dyn Perception {
        self.perception
    }

    pub fn serial(&self) -> &str {
        self.device.serial()
    }

    /// 当前执行的步骤下标（0-based）。
    pub fn current_step(&self) -> usize {
        self.current
    }

    pub(crate) fn set_current_step(&mut self, index: usize) {
        self.current = index;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_set()
    }

    pub fn check_stop(&self) -> Result<(), StepError> {
        if self.stop.is_set() {
            Err(StepError::Aborted)
        } else {
            Ok(())
        }
    }

    /// 交出设备句柄；停止信号已触发时返回 `Aborted`，不再发出任何命令。
    pub fn device(&mut self) -> Result<&mut dyn Device, StepError> {
        self.check_stop()?;
        Ok(&mut *self.device)
    }

    /// 可中断的等待。
    pub fn sleep(&self, duration: Duration) -> Result<(), StepError> {
        if self.stop.wait(duration) {
            Err(StepError::Aborted)
        } else {
            Ok(())
        }
    }

    pub fn sleep_secs(&self, seconds: f64) -> Result<(), StepError> {
        self.sleep(secs(seconds))
    }

    /// 新截一张图。设备无响应时返回 `DeviceUnreachable`，交给轮询循环决定是否重试。
    pub fn capture(&mut self) -> Result<RgbImage, StepError> {
        Ok(self.device()?.screenshot()?)
    }

    /// 模板匹配；模板读取或匹配出错按未命中处理并记录日志。
    pub fn locate(&self, screen: &RgbImage, template: &Path, threshold: f32) -> Option<Point> {
        let path = self.settings.template_path(template);
        match self.perception.find_template(screen, &path, threshold) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(template = %path.display(), error = %format!("{err:#}"), "template match failed");
                None
            }
        }
    }

    pub fn locate_all(&self, screen: &RgbImage, template: &Path, threshold: f32) -> Vec<Point> {
        let path = self.settings.template_path(template);
        match self.perception.find_all_templates(screen, &path, threshold) {
            Ok(hits) => hits,
            Err(err) => {
                warn!(template = %path.display(), error = %format!("{err:#}"), "template match failed");
                Vec::new()
            }
        }
    }

    /// OCR；失败返回 `None`。
    pub fn read_text(&self, screen: &RgbImage, region: Option<Region>) -> Option<String> {
        match self.perception.extract_text(screen, region) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(?region, error = %format!("{err:#}"), "ocr failed");
                None
            }
        }
    }

    /// 记录条件分支的命中情况，供外部观测。
    pub fn record_decision(&mut self, label: impl Into<String>, branch: DecisionBranch) {
        self.decisions.push(DecisionRecord {
            step: self.current + 1,
            label: label.into(),
            branch,
        });
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    pub(crate) fn record_gacha_match(&mut self, name: impl Into<String>) {
        self.gacha_matches.push(name.into());
    }

    pub fn gacha_matches(&self) -> &[String] {
        &self.gacha_matches
    }

    pub(crate) fn into_records(self) -> (Vec<DecisionRecord>, Vec<String>) {
        (self.decisions, self.gacha_matches)
    }
}

/// 条件分支命中记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRecord {
    /// 1-based
    pub step: usize,
    pub label: String,
    pub branch: DecisionBranch,
}

/// 条件分支命中类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionBranch {
    /// 条件成立并跳转。
    Then(usize),
    /// 条件不成立并跳转。
    Else(usize),
    /// 没有配置对应的跳转，顺序执行。
    Skipped,
}
