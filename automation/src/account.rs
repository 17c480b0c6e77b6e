//! 单个账号的处理流程：关游戏、注入凭据、重启、执行工作流或领奖、再关游戏。

use crate::claim::claim_rewards;
use crate::config::{Settings, secs};
use crate::device::Device;
use crate::perception::Perception;
use crate::pipeline::{RunStatus, Workflow, execute_workflow};
use crate::stop::{StopSignal, Stopped};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 单个账号的处理结果。停止不算失败，账号也不会被标记为已处理。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountResult {
    Succeeded,
    Failed(String),
    Aborted,
}

impl AccountResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AccountResult::Succeeded)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            AccountResult::Failed(msg) => Some(msg),
            _ => None,
        }
    }
}

/// 账号处理器，对一台设备执行一次完整的切号周期。
pub struct AccountRunner<'a> {
    settings: &'a Settings,
    perception: &'a dyn Perception,
    stop: &'a StopSignal,
}

impl<'a> AccountRunner<'a> {
    pub fn new(settings: &'a Settings, perception: &'a dyn Perception, stop: &'a StopSignal) -> Self {
        Self {
            settings,
            perception,
            stop,
        }
    }

    /// 处理一个账号文件。`workflow` 为空时使用内置领奖流程。
    ///
    /// 推送或 root 复制失败立即返回失败，不关闭游戏；停止信号立即返回 `Aborted`，不做清理。
    pub fn process(&self, device: &mut dyn Device, account: &Path, workflow: Option<&Workflow>) -> AccountResult {
        let started = Instant::now();
        let result = match self.cycle(device, account, workflow) {
            Ok(result) => result,
            Err(Stopped) => AccountResult::Aborted,
        };
        match &result {
            AccountResult::Succeeded => info!(account = %account.display(), elapsed = ?started.elapsed(), "account done"),
            AccountResult::Failed(msg) => warn!(account = %account.display(), error = %msg, "account failed"),
            AccountResult::Aborted => warn!(account = %account.display(), "account aborted by stop request"),
        }
        result
    }

    fn cycle(
        &self,
        device: &mut dyn Device,
        account: &Path,
        workflow: Option<&Workflow>,
    ) -> Result<AccountResult, Stopped> {
        let game = &self.settings.game;
        let timing = &self.settings.timing;

        self.stop.checkpoint()?;
        info!(package = %game.package, "closing game");
        if let Err(err) = device.force_stop(&game.package) {
            warn!(error = %err, "force stop failed");
        }
        self.stop.pause(secs(timing.app_close_wait))?;

        if game.clear_cache {
            self.stop.checkpoint()?;
            info!("clearing app cache");
            if let Err(err) = device.shell_privileged(&format!("rm -rf /data/data/{}/cache/*", game.package)) {
                warn!(error = %err, "cache clear failed");
            }
            self.stop.pause(secs(timing.cache_clear_wait))?;
        }

        self.stop.checkpoint()?;
        info!(account = %account.display(), remote = %game.push_temp_path, "pushing account file");
        if let Err(err) = device.push(account, &game.push_temp_path) {
            return Ok(AccountResult::Failed(format!("Failed to push account file: {err}")));
        }

        self.stop.checkpoint()?;
        info!(dest = %game.pref_path, "replacing account data");
        if let Err(err) = device.copy_privileged(&game.push_temp_path, &game.pref_path) {
            return Ok(AccountResult::Failed(format!("Failed to copy account file with root: {err}")));
        }
        self.stop.pause(secs(timing.post_push_wait))?;

        self.stop.checkpoint()?;
        info!(package = %game.package, "starting game");
        if let Err(err) = device.start_app(&game.package) {
            warn!(error = %err, "start app failed");
        }

        if !self.wait_for_ready(device)? {
            warn!("game load timeout, continuing anyway");
        }

        let outcome = match workflow {
            Some(wf) => {
                let report = execute_workflow(wf, device, self.perception, self.settings, self.stop);
                match report.status {
                    RunStatus::Succeeded => AccountResult::Succeeded,
                    RunStatus::Failed => AccountResult::Failed(report.message),
                    RunStatus::Aborted => return Err(Stopped),
                }
            }
            None => {
                let summary = claim_rewards(device, self.perception, self.settings, self.stop)?;
                debug!(?summary, "claim finished");
                AccountResult::Succeeded
            }
        };

        self.stop.pause(secs(timing.before_close_wait))?;
        self.stop.checkpoint()?;
        info!("closing game");
        if let Err(err) = device.force_stop(&game.package) {
            warn!(error = %err, "force stop failed");
        }
        Ok(outcome)
    }

    /// 轮询截图直到任一就绪模板出现；超时返回 `false`。
    pub fn wait_for_ready(&self, device: &mut dyn Device) -> Result<bool, Stopped> {
        let timing = &self.settings.timing;
        let timeout = secs(timing.load_timeout);
        let poll = secs(timing.ready_poll);
        let threshold = self.settings.templates.builtin_threshold;
        let started = Instant::now();

        loop {
            self.stop.checkpoint()?;
            if started.elapsed() >= timeout {
                return Ok(false);
            }

            match device.screenshot() {
                Ok(screen) => {
                    for template in &self.settings.templates.ready {
                        let path = self.settings.template_path(template);
                        match self.perception.find_template(&screen, &path, threshold) {
                            Ok(Some(_)) => {
                                info!(template = %template.display(), elapsed = ?started.elapsed(), "game loaded");
                                return Ok(true);
                            }
                            Ok(None) => {}
                            Err(err) => debug!(template = %template.display(), error = %format!("{err:#}"), "ready check failed"),
                        }
                    }
                    debug!(remaining = ?timeout.saturating_sub(started.elapsed()), "waiting for game");
                }
                Err(err) => warn!(error = %err, "screenshot failed while waiting for game"),
            }
            self.stop.pause(poll)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::workflow::{ImageMatchStep, StepAction, WorkflowStep};
    use crate::testing::{FakeDevice, ScriptedPerception, fast_settings};

    fn settings() -> Settings {
        let mut s = fast_settings();
        s.claim.miss_wait = 0.0;
        for b in &mut s.templates.claim_buttons {
            b.delay = 0.0;
        }
        s
    }

    #[test]
    fn full_cycle_runs_in_order() {
        let s = settings();
        let stop = StopSignal::new();
        let perception = ScriptedPerception::new().script("close.png", [true]);
        let runner = AccountRunner::new(&s, &perception, &stop);
        let mut device = FakeDevice::new("emu-1");
        let journal = device.journal();

        let result = runner.process(&mut device, Path::new("/accounts/a.xml"), None);
        assert_eq!(result, AccountResult::Succeeded);

        let entries = journal.entries();
        assert_eq!(entries[0], "force_stop com.linecorp.LGRGS");
        assert_eq!(entries[1], "su rm -rf /data/data/com.linecorp.LGRGS/cache/*");
        assert_eq!(entries[2], "push /accounts/a.xml /sdcard/_temp_lr_account.xml");
        assert!(entries[3].starts_with("su cp '/sdcard/_temp_lr_account.xml'"));
        let start = journal.position("start_app").unwrap();
        let tap = journal.position("tap").unwrap();
        assert!(start < tap);
        assert_eq!(entries.last().unwrap(), "force_stop com.linecorp.LGRGS");
        assert_eq!(journal.count("force_stop"), 2);
    }

    #[test]
    fn push_failure_skips_close() {
        let s = settings();
        let stop = StopSignal::new();
        let perception = ScriptedPerception::new();
        let runner = AccountRunner::new(&s, &perception, &stop);
        let mut device = FakeDevice::new("emu-1");
        device.fail_push = true;
        let journal = device.journal();

        let result = runner.process(&mut device, Path::new("a.xml"), None);
        assert!(result.error_message().unwrap().contains("push"));
        assert_eq!(journal.count("force_stop"), 1);
        assert_eq!(journal.count("start_app"), 0);
    }

    #[test]
    fn privileged_copy_failure_skips_close() {
        let s = settings();
        let stop = StopSignal::new();
        let perception = ScriptedPerception::new();
        let runner = AccountRunner::new(&s, &perception, &stop);
        let mut device = FakeDevice::new("emu-1");
        device.fail_copy = true;
        let journal = device.journal();

        let result = runner.process(&mut device, Path::new("a.xml"), None);
        assert!(result.error_message().unwrap().contains("root"));
        assert_eq!(journal.count("force_stop"), 1);
        assert_eq!(journal.count("su chmod"), 0);
    }

    #[test]
    fn workflow_failure_still_closes_game() {
        let s = settings();
        let stop = StopSignal::new();
        let perception = ScriptedPerception::new();
        let runner = AccountRunner::new(&s, &perception, &stop);
        let mut device = FakeDevice::new("emu-1");
        let journal = device.journal();
        let mut step = ImageMatchStep::new("never.png");
        step.max_retries = Some(1);
        step.retry_interval = 0.0;
        let wf = Workflow::new("strict", vec![WorkflowStep::new(StepAction::ImageMatch(step))]);

        let result = runner.process(&mut device, Path::new("a.xml"), Some(&wf));
        assert!(result.error_message().unwrap().starts_with("Error at step 1"));
        assert_eq!(journal.count("force_stop"), 2);
    }

    #[test]
    fn stop_aborts_without_touching_device() {
        let s = settings();
        let stop = StopSignal::new();
        stop.trigger();
        let perception = ScriptedPerception::new();
        let runner = AccountRunner::new(&s, &perception, &stop);
        let mut device = FakeDevice::new("emu-1");
        let journal = device.journal();

        assert_eq!(runner.process(&mut device, Path::new("a.xml"), None), AccountResult::Aborted);
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn wait_for_ready_detects_any_ready_template() {
        let mut s = settings();
        s.timing.load_timeout = 5.0;
        let stop = StopSignal::new();
        let perception = ScriptedPerception::new().script("ok.png", [false, false, true]);
        let runner = AccountRunner::new(&s, &perception, &stop);
        let mut device = FakeDevice::new("emu-1");
        let journal = device.journal();

        assert_eq!(runner.wait_for_ready(&mut device), Ok(true));
        assert_eq!(journal.count("screenshot"), 3);
    }

    #[test]
    fn wait_for_ready_times_out() {
        let mut s = settings();
        s.timing.load_timeout = 0.05;
        s.timing.ready_poll = 0.01;
        let stop = StopSignal::new();
        let perception = ScriptedPerception::new();
        let runner = AccountRunner::new(&s, &perception, &stop);
        let mut device = FakeDevice::new("emu-1");
        assert_eq!(runner.wait_for_ready(&mut device), Ok(false));
    }
}
