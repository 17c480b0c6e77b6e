//! 测试用的脚本化设备与感知实现，不需要真机。

use crate::config::{Settings, TimingSettings};
use crate::device::{Device, DeviceConnector, DeviceError};
use crate::perception::Perception;
use crate::vision::Point;
use anyhow::{Result, anyhow};
use image::{Rgb, RgbImage};
use ocr::Region;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 所有等待都为 0 的配置。
pub fn fast_settings() -> Settings {
    Settings {
        timing: TimingSettings::immediate(),
        ..Settings::default()
    }
}

pub fn solid_frame(rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(64, 48, Rgb(rgb))
}

/// 设备收到的命令记录，可在设备被移走后继续读取。
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: String) {
        lock(&self.0).push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.0).iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        lock(&self.0).iter().position(|e| e.starts_with(prefix))
    }
}

/// 脚本化设备：截图按队列依次返回，队列空后一直返回最后一帧。
pub struct FakeDevice {
    serial: String,
    journal: Journal,
    frames: VecDeque<RgbImage>,
    last_frame: Option<RgbImage>,
    pub fail_connect: bool,
    pub fail_push: bool,
    pub fail_copy: bool,
    pub fail_screenshot: bool,
}

impl FakeDevice {
    pub fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            journal: Journal::default(),
            frames: VecDeque::new(),
            last_frame: Some(solid_frame([0, 0, 0])),
            fail_connect: false,
            fail_push: false,
            fail_copy: false,
            fail_screenshot: false,
        }
    }

    pub fn with_frames(mut self, frames: impl IntoIterator<Item = RgbImage>) -> Self {
        self.frames.extend(frames);
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    fn record(&self, entry: String) {
        self.journal.push(entry);
    }
}

impl Device for FakeDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        self.record("connect".into());
        if self.fail_connect {
            return Err(DeviceError::NotFound(self.serial.clone()));
        }
        Ok(())
    }

    fn tap(&mut self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.record(format!("tap {x},{y}"));
        Ok(())
    }

    fn swipe(&mut self, from: (i32, i32), to: (i32, i32), duration: Duration) -> Result<(), DeviceError> {
        self.record(format!(
            "swipe {},{} -> {},{} {}ms",
            from.0,
            from.1,
            to.0,
            to.1,
            duration.as_millis()
        ));
        Ok(())
    }

    fn press_key(&mut self, key: &str) -> Result<(), DeviceError> {
        self.record(format!("key {key}"));
        Ok(())
    }

    fn screenshot(&mut self) -> Result<RgbImage, DeviceError> {
        self.record("screenshot".into());
        if self.fail_screenshot {
            return Err(DeviceError::NoData("screencap".into()));
        }
        if let Some(frame) = self.frames.pop_front() {
            self.last_frame = Some(frame);
        }
        self.last_frame
            .clone()
            .ok_or_else(|| DeviceError::NoData("screencap".into()))
    }

    fn push(&mut self, local: &Path, remote: &str) -> Result<(), DeviceError> {
        self.record(format!("push {} {remote}", local.display()));
        if self.fail_push {
            return Err(DeviceError::NoData("push".into()));
        }
        Ok(())
    }

    fn pull(&mut self, remote: &str, local: &Path) -> Result<(), DeviceError> {
        self.record(format!("pull {remote} {}", local.display()));
        fs::write(local, format!("<pulled from {remote}/>"))?;
        Ok(())
    }

    fn shell(&mut self, command: &str) -> Result<String, DeviceError> {
        self.record(format!("shell {command}"));
        Ok(String::new())
    }

    fn shell_privileged(&mut self, command: &str) -> Result<String, DeviceError> {
        self.record(format!("su {command}"));
        if self.fail_copy && command.starts_with("cp ") {
            return Err(DeviceError::Failed {
                command: command.to_string(),
                status: "exit status: 1".into(),
                output: "Permission denied".into(),
            });
        }
        Ok(String::new())
    }

    fn force_stop(&mut self, package: &str) -> Result<(), DeviceError> {
        self.record(format!("force_stop {package}"));
        Ok(())
    }

    fn start_app(&mut self, package: &str) -> Result<(), DeviceError> {
        self.record(format!("start_app {package}"));
        Ok(())
    }
}

/// 按序列号打开 `FakeDevice`，所有设备共用一个命令记录，便于跨线程断言。
#[derive(Default)]
pub struct FakeConnector {
    pub journal: Journal,
    pub unreachable: HashSet<String>,
}

impl DeviceConnector for FakeConnector {
    fn open(&self, serial: &str) -> Box<dyn Device> {
        let mut device = FakeDevice::new(serial);
        device.journal = self.journal.clone();
        device.fail_connect = self.unreachable.contains(serial);
        Box::new(device)
    }
}

/// 脚本化感知：按模板文件名给出每次查询的结果，脚本用完后使用默认值。
#[derive(Default)]
pub struct ScriptedPerception {
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    defaults: Mutex<HashMap<String, bool>>,
    positions: Mutex<HashMap<String, Vec<Point>>>,
    texts: Mutex<VecDeque<String>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedPerception {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模板一直存在或一直不存在。
    pub fn always(self, template: &str, present: bool) -> Self {
        lock(&self.defaults).insert(template.to_string(), present);
        self
    }

    /// 依次返回给定结果，之后回落到 `always` 的设置（缺省为不存在）。
    pub fn script(self, template: &str, answers: impl IntoIterator<Item = bool>) -> Self {
        lock(&self.scripts)
            .entry(template.to_string())
            .or_default()
            .extend(answers);
        self
    }

    pub fn at(self, template: &str, points: Vec<Point>) -> Self {
        lock(&self.positions).insert(template.to_string(), points);
        self
    }

    pub fn texts(self, texts: impl IntoIterator<Item = &'static str>) -> Self {
        lock(&self.texts).extend(texts.into_iter().map(str::to_string));
        self
    }

    pub fn calls(&self, template: &str) -> usize {
        lock(&self.calls).get(template).copied().unwrap_or(0)
    }

    fn key(template: &Path) -> String {
        template
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn present(&self, key: &str) -> bool {
        *lock(&self.calls).entry(key.to_string()).or_default() += 1;
        if let Some(answer) = lock(&self.scripts).get_mut(key).and_then(VecDeque::pop_front) {
            return answer;
        }
        lock(&self.defaults).get(key).copied().unwrap_or(false)
    }

    fn points(&self, key: &str) -> Vec<Point> {
        lock(&self.positions)
            .get(key)
            .cloned()
            .unwrap_or_else(|| vec![Point::new(50, 50)])
    }
}

impl Perception for ScriptedPerception {
    fn find_template(&self, _screen: &RgbImage, template: &Path, _threshold: f32) -> Result<Option<Point>> {
        let key = Self::key(template);
        if key == "broken.png" {
            return Err(anyhow!("unreadable template"));
        }
        Ok(self.present(&key).then(|| self.points(&key)[0]))
    }

    fn find_all_templates(&self, _screen: &RgbImage, template: &Path, _threshold: f32) -> Result<Vec<Point>> {
        let key = Self::key(template);
        if self.present(&key) {
            Ok(self.points(&key))
        } else {
            Ok(Vec::new())
        }
    }

    fn extract_text(&self, _screen: &RgbImage, _region: Option<Region>) -> Result<String> {
        Ok(lock(&self.texts).pop_front().unwrap_or_default())
    }
}
