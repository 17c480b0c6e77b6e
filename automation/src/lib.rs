//! 安卓设备上的手游自动化：工作流解释器、账号切换流程、共享账号队列与多设备编排。

pub mod account;
pub mod claim;
pub mod config;
pub mod device;
pub mod orchestrator;
pub mod perception;
pub mod pipeline;
pub mod queue;
pub mod stop;
pub mod vision;

#[cfg(test)]
mod testing;

pub use account::{AccountResult, AccountRunner};
pub use config::Settings;
pub use device::{AdbConnector, AdbDevice, Device, DeviceConnector, DeviceError};
pub use orchestrator::{DeviceProgress, Orchestrator, OrchestratorError, OrchestratorState, OrchestratorStatus};
pub use perception::{Perception, ScreenPerception};
pub use pipeline::{ExecutionReport, RunStatus, Workflow, execute_workflow};
pub use queue::{AccountOutcome, AccountRecord, QueueError, SharedAccountQueue};
pub use stop::StopSignal;
