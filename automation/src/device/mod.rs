//! 设备驱动：对安卓模拟器/真机的最小操作集合。
//!
//! 这一层不做任何重试，失败直接以 [`DeviceError`] 返回，由调用方的轮询循环决定是否再试。

mod adb;

pub use adb::{AdbConnector, AdbDevice, DeviceInfo, DeviceState, list_devices, parse_device_list, parse_wm_size};

use image::RgbImage;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// 返回键的 keyevent 名称。
pub const KEY_BACK: &str = "KEYCODE_BACK";

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("`{command}` failed ({status}): {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },
    #[error("{0} returned no data")]
    NoData(String),
    #[error("device {0} not found")]
    NotFound(String),
    #[error("failed to decode screenshot: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 单台设备的操作接口。实现方负责把每个调用映射到一次外部命令。
pub trait Device: Send {
    fn serial(&self) -> &str;

    /// 确认设备可用，必要时建立连接。
    fn connect(&mut self) -> Result<(), DeviceError>;

    fn tap(&mut self, x: i32, y: i32) -> Result<(), DeviceError>;

    fn swipe(
        &mut self,
        from: (i32, i32),
        to: (i32, i32),
        duration: Duration,
    ) -> Result<(), DeviceError>;

    fn press_key(&mut self, key: &str) -> Result<(), DeviceError>;

    /// 每次调用都重新截图，不做缓存。
    fn screenshot(&mut self) -> Result<RgbImage, DeviceError>;

    fn push(&mut self, local: &Path, remote: &str) -> Result<(), DeviceError>;

    fn pull(&mut self, remote: &str, local: &Path) -> Result<(), DeviceError>;

    fn shell(&mut self, command: &str) -> Result<String, DeviceError>;

    /// 以 root 权限执行，返回合并后的输出。
    fn shell_privileged(&mut self, command: &str) -> Result<String, DeviceError>;

    fn force_stop(&mut self, package: &str) -> Result<(), DeviceError>;

    fn start_app(&mut self, package: &str) -> Result<(), DeviceError>;

    /// 以 root 复制文件到应用私有目录，并修正权限与属主。
    ///
    /// 只有 `cp` 本身失败才算失败；权限修正失败只记录日志。
    fn copy_privileged(&mut self, source: &str, dest: &str) -> Result<(), DeviceError> {
        self.shell_privileged(&format!("cp '{source}' '{dest}'"))?;

        if let Err(err) = self.shell_privileged(&format!("chmod 660 '{dest}'")) {
            warn!(dest, error = %err, "chmod after privileged copy failed");
        }

        let parent = dest.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(".");
        let owner = match self.shell_privileged(&format!("stat -c '%U:%G' '{parent}'")) {
            Ok(out) if !out.trim().is_empty() => out.trim().to_string(),
            _ => "system:system".to_string(),
        };
        debug!(dest, owner = %owner, "restoring owner");
        if let Err(err) = self.shell_privileged(&format!("chown {owner} '{dest}'")) {
            warn!(dest, error = %err, "chown after privileged copy failed");
        }
        Ok(())
    }
}

/// 为每个工作线程打开一台设备，避免全局共享的设备实例。
pub trait DeviceConnector: Send + Sync {
    fn open(&self, serial: &str) -> Box<dyn Device>;
}
