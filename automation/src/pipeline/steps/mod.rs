use super::RunCtx;
use super::workflow::StepAction;
use crate::device::DeviceError;
use std::any::type_name;
use std::time::Duration;
use thiserror::Error;

mod app;
mod click;
mod conditional;
mod gacha_check;
mod image_match;
mod loop_click;
mod press_back;
mod repeat_group;
mod swipe;
mod wait;
mod wait_for_color;

pub use gacha_check::export_file_name;

/// 步骤执行后的控制流。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// 顺序执行下一步。
    Next,
    /// 跳到指定下标（0-based）。
    Goto(usize),
    /// `gacha_check` 命中，携带命中的名字。组循环据此提前结束。
    GachaMatched(String),
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("device unreachable: {0}")]
    DeviceUnreachable(#[from] DeviceError),
    #[error("template not found: {template} after {attempts} attempts ({waited:.1?})")]
    TemplateNotFound {
        template: String,
        attempts: u32,
        waited: Duration,
    },
    #[error("color at ({x}, {y}) did not match within {waited:.1?}")]
    ColorTimeout { x: i32, y: i32, waited: Duration },
    #[error("position ({x}, {y}) outside {width}x{height} screen")]
    OutOfBounds {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    #[error("misconfigured step: {0}")]
    Misconfigured(String),
    #[error("export failed: {0}")]
    Export(#[from] std::io::Error),
    #[error("aborted by stop request")]
    Aborted,
}

/// 所有步骤类型的统一接口。
///
/// 每个步骤自己负责重试与等待，只在需要让整个工作流失败时返回错误。
/// 设备命令和等待都要经由 `ctx`，这样停止信号才能及时生效。
pub trait Step {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError>;

    /// 返回步骤名称，默认使用类型名称。
    fn label(&self) -> &'static str {
        type_name::<Self>()
    }
}

impl Step for StepAction {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
        match self {
            StepAction::Click(step) => step.run(ctx),
            StepAction::Swipe(step) => step.run(ctx),
            StepAction::Wait(step) => step.run(ctx),
            StepAction::ImageMatch(step) => step.run(ctx),
            StepAction::FindAllClick(step) => step.poll(ctx, true),
            StepAction::LoopClick(step) => step.run(ctx),
            StepAction::WaitForColor(step) => step.run(ctx),
            StepAction::PressBack {} => press_back::run(ctx),
            StepAction::Conditional(step) => step.run(ctx),
            StepAction::StartGame(step) => app::start_game(step, ctx),
            StepAction::RestartGame(step) => app::restart_game(step, ctx),
            StepAction::RepeatGroup(step) => step.run(ctx),
            StepAction::GachaCheck(step) => step.run(ctx),
        }
    }

    fn label(&self) -> &'static str {
        self.kind()
    }
}
