//! 工作流解释器：按程序计数器逐步执行步骤，处理跳转、组循环与停止信号。

use crate::config::Settings;
use crate::device::Device;
use crate::perception::Perception;
use crate::stop::StopSignal;
use tracing::{info, warn};

mod context;
mod steps;
pub mod workflow;

pub use context::*;
pub use steps::*;
pub use workflow::{StepAction, Workflow, WorkflowStep, select_for_mode};

/// 一次工作流执行的最终状态。停止不算失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Aborted,
}

/// 执行结果：状态、人类可读的说明、实际执行的步骤数和分支决策路径。
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub status: RunStatus,
    pub message: String,
    pub steps_executed: usize,
    pub decisions: Vec<DecisionRecord>,
    /// 本次执行中 `gacha_check` 命中的名字。
    pub gacha_matches: Vec<String>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// 在一台设备上执行整个工作流。
///
/// - 被某个 `repeat_group` 引用的分组成员只在组循环里执行，顶层跳过
/// - 配置错误的步骤记录日志后跳过
/// - 其余步骤错误让整个工作流失败，停止信号则返回 `Aborted`
pub fn execute_workflow(
    workflow: &Workflow,
    device: &mut dyn Device,
    perception: &dyn Perception,
    settings: &Settings,
    stop: &StopSignal,
) -> ExecutionReport {
    let serial = device.serial().to_string();
    let mut ctx = RunCtx::new(workflow, device, perception, settings, stop);
    let looped_groups = workflow.repeat_group_names();
    let len = workflow.steps.len();
    info!(serial = %serial, workflow = %workflow.name, steps = len, "executing workflow");

    let mut pc = 0usize;
    let mut executed = 0usize;
    let outcome: Result<(), (RunStatus, String)> = loop {
        let Some(step) = workflow.steps.get(pc) else {
            break Ok(());
        };
        if ctx.stop_requested() {
            break Err((RunStatus::Aborted, format!("Stopped before step {}", pc + 1)));
        }
        let grouped = step
            .group_name
            .as_deref()
            .is_some_and(|g| looped_groups.contains(g));
        if grouped && !matches!(step.action, StepAction::RepeatGroup(_)) {
            pc += 1;
            continue;
        }

        info!(step = pc + 1, total = len, kind = step.kind(), description = %step.description, "step");
        ctx.set_current_step(pc);
        executed += 1;
        match step.action.run(&mut ctx) {
            Ok(Flow::Next) => pc += 1,
            Ok(Flow::Goto(target)) => pc = target,
            Ok(Flow::GachaMatched(name)) => {
                info!(step = pc + 1, matched = %name, "gacha matched, continuing");
                pc += 1;
            }
            Err(StepError::Misconfigured(reason)) => {
                warn!(step = pc + 1, kind = step.kind(), reason = %reason, "skipping misconfigured step");
                pc += 1;
            }
            Err(StepError::Aborted) => {
                break Err((RunStatus::Aborted, format!("Stopped at step {}", pc + 1)));
            }
            Err(err) => break Err((RunStatus::Failed, format!("Error at step {}: {err}", pc + 1))),
        }
    };

    if !ctx.decisions().is_empty() {
        info!("decision path:");
        for record in ctx.decisions() {
            info!("  - step {} {} => {:?}", record.step, record.label, record.branch);
        }
    }

    let (status, message) = match outcome {
        Ok(()) => (RunStatus::Succeeded, format!("Workflow completed ({len} steps)")),
        Err(failure) => failure,
    };
    match status {
        RunStatus::Succeeded => info!(serial = %serial, executed, "{message}"),
        RunStatus::Aborted => warn!(serial = %serial, executed, "{message}"),
        RunStatus::Failed => warn!(serial = %serial, executed, "workflow failed: {message}"),
    }

    let (decisions, gacha_matches) = ctx.into_records();
    ExecutionReport {
        status,
        message,
        steps_executed: executed,
        decisions,
        gacha_matches,
    }
}
