use super::{Device, DeviceConnector, DeviceError};
use crate::config::{AdbSettings, secs};
use image::RgbImage;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 通过 `adb -s <serial>` 驱动一台设备。
#[derive(Debug, Clone)]
pub struct AdbDevice {
    serial: String,
    settings: AdbSettings,
}

impl AdbDevice {
    pub fn new(serial: impl Into<String>, settings: AdbSettings) -> Self {
        Self {
            serial: serial.into(),
            settings,
        }
    }

    fn command_timeout(&self) -> Duration {
        secs(self.settings.command_timeout)
    }

    /// 执行 `adb -s <serial> <args...>`，非零退出码视为失败。
    fn adb(&self, args: &[&str], timeout: Duration) -> Result<Output, DeviceError> {
        let mut cmd = Command::new(&self.settings.program);
        cmd.arg("-s").arg(&self.serial).args(args);
        let label = format!("adb -s {} {}", self.serial, args.join(" "));
        let output = run_with_timeout(&mut cmd, &label, timeout)?;
        if !output.status.success() {
            return Err(failed(&label, &output));
        }
        Ok(output)
    }

    fn shell_args(&self, args: &[&str]) -> Result<Output, DeviceError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.adb(&full, self.command_timeout())
    }
}

impl Device for AdbDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        let timeout = secs(self.settings.connect_timeout);
        let mut cmd = Command::new(&self.settings.program);
        cmd.arg("devices");
        let output = run_with_timeout(&mut cmd, "adb devices", timeout)?;
        let listing = String::from_utf8_lossy(&output.stdout);
        if parse_device_list(&listing)
            .iter()
            .any(|d| d.serial == self.serial && d.state == DeviceState::Online)
        {
            info!(serial = %self.serial, "device available");
            return Ok(());
        }

        // host:port 形式的模拟器需要先 adb connect
        if self.serial.contains(':') {
            let mut cmd = Command::new(&self.settings.program);
            cmd.arg("connect").arg(&self.serial);
            let label = format!("adb connect {}", self.serial);
            let output = run_with_timeout(&mut cmd, &label, timeout)?;
            let stdout = String::from_utf8_lossy(&output.stdout).to_lowercase();
            if stdout.contains("connected") && !stdout.contains("cannot") {
                info!(serial = %self.serial, "connected over tcp");
                return Ok(());
            }
            warn!(serial = %self.serial, response = %stdout.trim(), "adb connect refused");
        }

        Err(DeviceError::NotFound(self.serial.clone()))
    }

    fn tap(&mut self, x: i32, y: i32) -> Result<(), DeviceError> {
        debug!(serial = %self.serial, x, y, "tap");
        self.shell_args(&["input", "tap", &x.to_string(), &y.to_string()])?;
        Ok(())
    }

    fn swipe(
        &mut self,
        from: (i32, i32),
        to: (i32, i32),
        duration: Duration,
    ) -> Result<(), DeviceError> {
        debug!(serial = %self.serial, ?from, ?to, ?duration, "swipe");
        self.shell_args(&[
            "input",
            "swipe",
            &from.0.to_string(),
            &from.1.to_string(),
            &to.0.to_string(),
            &to.1.to_string(),
            &duration.as_millis().to_string(),
        ])?;
        Ok(())
    }

    fn press_key(&mut self, key: &str) -> Result<(), DeviceError> {
        self.shell_args(&["input", "keyevent", key])?;
        Ok(())
    }

    fn screenshot(&mut self) -> Result<RgbImage, DeviceError> {
        let output = self.adb(
            &["exec-out", "screencap", "-p"],
            secs(self.settings.screenshot_timeout),
        )?;
        if output.stdout.is_empty() {
            return Err(DeviceError::NoData("screencap".to_string()));
        }
        let image = image::load_from_memory(&output.stdout)?;
        Ok(image.to_rgb8())
    }

    fn push(&mut self, local: &Path, remote: &str) -> Result<(), DeviceError> {
        let local = local.to_string_lossy();
        self.adb(&["push", &local, remote], secs(self.settings.transfer_timeout))?;
        info!(serial = %self.serial, %local, remote, "pushed");
        Ok(())
    }

    fn pull(&mut self, remote: &str, local: &Path) -> Result<(), DeviceError> {
        let local = local.to_string_lossy();
        self.adb(&["pull", remote, &local], secs(self.settings.transfer_timeout))?;
        info!(serial = %self.serial, remote, %local, "pulled");
        Ok(())
    }

    fn shell(&mut self, command: &str) -> Result<String, DeviceError> {
        let output = self.shell_args(&[command])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn shell_privileged(&mut self, command: &str) -> Result<String, DeviceError> {
        let wrapped = format!("su -c \"{}\"", command.replace('"', "\\\""));
        debug!(serial = %self.serial, command = %wrapped, "privileged shell");
        let output = self.shell_args(&[&wrapped])?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    fn force_stop(&mut self, package: &str) -> Result<(), DeviceError> {
        self.shell_args(&["am", "force-stop", package])?;
        info!(serial = %self.serial, package, "force stopped");
        Ok(())
    }

    fn start_app(&mut self, package: &str) -> Result<(), DeviceError> {
        let monkey = self.shell_args(&[
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ]);
        match monkey {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if !stdout.contains("No activities found") && !stdout.contains("aborted") {
                    info!(serial = %self.serial, package, "started via monkey");
                    return Ok(());
                }
                debug!(serial = %self.serial, output = %stdout.trim(), "monkey could not launch");
            }
            Err(err) => debug!(serial = %self.serial, error = %err, "monkey failed"),
        }

        self.shell_args(&[
            "am",
            "start",
            "-a",
            "android.intent.action.MAIN",
            "-c",
            "android.intent.category.LAUNCHER",
            "-p",
            package,
        ])?;
        info!(serial = %self.serial, package, "started via implicit intent");
        Ok(())
    }
}

/// 为每个 serial 构造一个 [`AdbDevice`]。
#[derive(Debug, Clone, Default)]
pub struct AdbConnector {
    settings: AdbSettings,
}

impl AdbConnector {
    pub fn new(settings: AdbSettings) -> Self {
        Self { settings }
    }
}

impl DeviceConnector for AdbConnector {
    fn open(&self, serial: &str) -> Box<dyn Device> {
        Box::new(AdbDevice::new(serial, self.settings.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    Online,
    Offline,
    Unauthorized,
    Other(String),
}

impl DeviceState {
    fn parse(raw: &str) -> Self {
        match raw {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            other => DeviceState::Other(other.to_string()),
        }
    }
}

/// `adb devices -l` 中的一行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub state: DeviceState,
    pub model: Option<String>,
    pub screen_size: Option<(u32, u32)>,
}

/// 列出已连接设备；在线设备额外查询 `wm size`。
pub fn list_devices(settings: &AdbSettings) -> Result<Vec<DeviceInfo>, DeviceError> {
    let mut cmd = Command::new(&settings.program);
    cmd.args(["devices", "-l"]);
    let output = run_with_timeout(&mut cmd, "adb devices -l", secs(settings.command_timeout))?;
    let mut devices = parse_device_list(&String::from_utf8_lossy(&output.stdout));

    for device in devices.iter_mut().filter(|d| d.state == DeviceState::Online) {
        let mut adb = AdbDevice::new(device.serial.clone(), settings.clone());
        match adb.shell("wm size") {
            Ok(out) => device.screen_size = parse_wm_size(&out),
            Err(err) => warn!(serial = %device.serial, error = %err, "wm size failed"),
        }
    }
    Ok(devices)
}

/// 解析 `adb devices [-l]` 输出，跳过表头与空行。
pub fn parse_device_list(listing: &str) -> Vec<DeviceInfo> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            let model = parts
                .find_map(|kv| kv.strip_prefix("model:"))
                .map(str::to_string);
            Some(DeviceInfo {
                serial: serial.to_string(),
                state: DeviceState::parse(state),
                model,
                screen_size: None,
            })
        })
        .collect()
}

/// 解析 `wm size` 输出，存在 Override size 时以它为准。
pub fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let pick = |prefix: &str| {
        output
            .lines()
            .find_map(|line| line.trim().strip_prefix(prefix))
            .and_then(|size| {
                let (w, h) = size.trim().split_once('x')?;
                Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
            })
    };
    pick("Override size:").or_else(|| pick("Physical size:"))
}

fn failed(label: &str, output: &Output) -> DeviceError {
    let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if text.is_empty() {
        text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    }
    DeviceError::Failed {
        command: label.to_string(),
        status: output.status.to_string(),
        output: text,
    }
}

/// 带超时地运行外部命令；超时后杀掉子进程。
fn run_with_timeout(cmd: &mut Command, label: &str, timeout: Duration) -> Result<Output, DeviceError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| DeviceError::Spawn {
            program: label.split_whitespace().next().unwrap_or("adb").to_string(),
            source,
        })?;

    // 管道需要并发读取，否则大截图会把子进程阻塞在写端
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DeviceError::Timeout {
                command: label.to_string(),
                timeout,
            });
        }
        thread::sleep(Duration::from_millis(10));
    };

    let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
        handle.and_then(|h| h.join().ok()).unwrap_or_default()
    };
    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}
