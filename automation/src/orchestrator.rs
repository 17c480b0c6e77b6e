//! 多设备编排：每台设备一个工作线程，共用一个账号队列。

use crate::account::{AccountResult, AccountRunner};
use crate::config::{Settings, secs};
use crate::device::DeviceConnector;
use crate::perception::Perception;
use crate::pipeline::Workflow;
use crate::queue::{QueueSnapshot, SharedAccountQueue};
use crate::stop::StopSignal;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Running,
    Completed,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("multi-device processing is already running")]
    AlreadyRunning,
    #[error("no accounts in queue, load a folder first")]
    EmptyQueue,
    #[error("no devices specified")]
    NoDevices,
    #[error("failed to spawn worker for {serial}: {source}")]
    Spawn {
        serial: String,
        #[source]
        source: io::Error,
    },
}

/// 单台设备的进度，只由该设备的工作线程写入。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProgress {
    pub serial: String,
    pub current_account: Option<String>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub running: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub state: OrchestratorState,
    pub devices: Vec<DeviceProgress>,
    pub queue: QueueSnapshot,
}

impl OrchestratorStatus {
    pub fn total_processed(&self) -> usize {
        self.devices.iter().map(|d| d.processed).sum()
    }

    pub fn total_succeeded(&self) -> usize {
        self.devices.iter().map(|d| d.succeeded).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.devices.iter().map(|d| d.failed).sum()
    }
}

struct Worker {
    progress: Arc<Mutex<DeviceProgress>>,
    handle: Option<JoinHandle<()>>,
}

struct Run {
    state: OrchestratorState,
    stop: StopSignal,
    workers: Vec<Worker>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 多设备编排器，状态机为 `Idle -> Running -> Completed`，显式停止后回到 `Idle`。
pub struct Orchestrator {
    queue: Arc<SharedAccountQueue>,
    connector: Arc<dyn DeviceConnector>,
    perception: Arc<dyn Perception>,
    settings: Arc<Settings>,
    workflow: Option<Arc<Workflow>>,
    run: Mutex<Run>,
}

impl Orchestrator {
    pub fn new(
        queue: Arc<SharedAccountQueue>,
        connector: Arc<dyn DeviceConnector>,
        perception: Arc<dyn Perception>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            queue,
            connector,
            perception,
            settings,
            workflow: None,
            run: Mutex::new(Run {
                state: OrchestratorState::Idle,
                stop: StopSignal::new(),
                workers: Vec::new(),
            }),
        }
    }

    /// 设置每个账号要执行的工作流；不设置则使用内置领奖流程。
    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        info!(workflow = %workflow.name, steps = workflow.steps.len(), "using workflow");
        self.workflow = Some(Arc::new(workflow));
        self
    }

    pub fn queue(&self) -> &Arc<SharedAccountQueue> {
        &self.queue
    }

    /// 为每台设备启动一个工作线程。
    ///
    /// `resume` 为真且队列还有剩余时只拨回游标；已全部处理或不续跑时重置队列。
    pub fn start(&self, serials: &[String], resume: bool) -> Result<(), OrchestratorError> {
        let mut run = lock(&self.run);
        refresh(&mut run);
        if run.state == OrchestratorState::Running {
            return Err(OrchestratorError::AlreadyRunning);
        }
        if self.queue.total_count() == 0 {
            return Err(OrchestratorError::EmptyQueue);
        }
        if serials.is_empty() {
            return Err(OrchestratorError::NoDevices);
        }

        let remaining = self.queue.remaining_count();
        if resume && remaining > 0 {
            self.queue.prepare_for_resume();
            info!(
                from = self.queue.processed_count() + 1,
                remaining, "resuming"
            );
        } else {
            if resume {
                info!("all accounts already processed, resetting for a new run");
            }
            self.queue.reset();
        }

        run.stop = StopSignal::new();
        run.workers.clear();
        run.state = OrchestratorState::Running;
        info!(devices = serials.len(), "starting multi-device processing");

        for serial in serials {
            let progress = Arc::new(Mutex::new(DeviceProgress {
                serial: serial.clone(),
                running: true,
                ..DeviceProgress::default()
            }));
            let job = WorkerJob {
                serial: serial.clone(),
                queue: Arc::clone(&self.queue),
                connector: Arc::clone(&self.connector),
                perception: Arc::clone(&self.perception),
                settings: Arc::clone(&self.settings),
                workflow: self.workflow.clone(),
                stop: run.stop.clone(),
                progress: Arc::clone(&progress),
            };
            let spawned = thread::Builder::new()
                .name(format!("device-{serial}"))
                .spawn(move || job.run());
            match spawned {
                Ok(handle) => run.workers.push(Worker {
                    progress,
                    handle: Some(handle),
                }),
                Err(source) => {
                    run.stop.trigger();
                    run.state = OrchestratorState::Idle;
                    return Err(OrchestratorError::Spawn {
                        serial: serial.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// 触发停止信号，在 `join_timeout` 内等待工作线程退出，然后回到 `Idle`。
    ///
    /// 超时未退出的线程被放弃，它们最多还会完成一条进行中的设备命令。
    pub fn stop(&self) -> bool {
        let (handles, progress): (Vec<JoinHandle<()>>, Vec<Arc<Mutex<DeviceProgress>>>) = {
            let mut run = lock(&self.run);
            refresh(&mut run);
            if run.state != OrchestratorState::Running {
                return false;
            }
            info!("stopping all devices");
            run.stop.trigger();
            let progress = run.workers.iter().map(|w| Arc::clone(&w.progress)).collect();
            let handles = run.workers.iter_mut().filter_map(|w| w.handle.take()).collect();
            (handles, progress)
        };

        let deadline = Instant::now() + secs(self.settings.timing.join_timeout);
        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("worker panicked");
                }
            } else {
                warn!(thread = ?handle.thread().name(), "worker did not stop in time, abandoning");
            }
        }
        // 句柄可能已被 wait_until_finished 取走，此时按进度标志等待
        while progress.iter().any(|p| lock(p).running) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        lock(&self.run).state = OrchestratorState::Idle;
        info!("all devices stopped");
        true
    }

    pub fn state(&self) -> OrchestratorState {
        let mut run = lock(&self.run);
        refresh(&mut run);
        run.state
    }

    pub fn status(&self) -> OrchestratorStatus {
        let mut run = lock(&self.run);
        refresh(&mut run);
        OrchestratorStatus {
            state: run.state,
            devices: run.workers.iter().map(|w| lock(&w.progress).clone()).collect(),
            queue: self.queue.snapshot(),
        }
    }

    /// 阻塞直到所有工作线程退出，返回最终状态。
    pub fn wait_until_finished(&self) -> OrchestratorStatus {
        let handles: Vec<JoinHandle<()>> = {
            let mut run = lock(&self.run);
            run.workers.iter_mut().filter_map(|w| w.handle.take()).collect()
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!("worker panicked");
            }
        }
        self.status()
    }
}

/// 所有工作线程都不再运行时从 `Running` 转为 `Completed`。
fn refresh(run: &mut Run) {
    if run.state != OrchestratorState::Running {
        return;
    }
    let progress: Vec<DeviceProgress> = run.workers.iter().map(|w| lock(&w.progress).clone()).collect();
    if progress.iter().all(|p| !p.running) {
        run.state = OrchestratorState::Completed;
        let total: usize = progress.iter().map(|p| p.processed).sum();
        let succeeded: usize = progress.iter().map(|p| p.succeeded).sum();
        info!(total, succeeded, "all devices completed");
    }
}

struct WorkerJob {
    serial: String,
    queue: Arc<SharedAccountQueue>,
    connector: Arc<dyn DeviceConnector>,
    perception: Arc<dyn Perception>,
    settings: Arc<Settings>,
    workflow: Option<Arc<Workflow>>,
    stop: StopSignal,
    progress: Arc<Mutex<DeviceProgress>>,
}

impl WorkerJob {
    fn update(&self, f: impl FnOnce(&mut DeviceProgress)) {
        f(&mut lock(&self.progress));
    }

    fn run(self) {
        let span = info_span!("device", serial = %self.serial);
        let _enter = span.enter();
        info!("worker started");

        let mut device = self.connector.open(&self.serial);
        if let Err(err) = device.connect() {
            error!(error = %err, "device connection failed");
            self.update(|p| {
                p.running = false;
                p.last_error = Some(format!("connection failed: {err}"));
            });
            return;
        }

        let runner = AccountRunner::new(&self.settings, self.perception.as_ref(), &self.stop);
        while !self.stop.is_set() {
            let Some(account) = self.queue.get_next() else {
                info!("no more accounts in queue");
                break;
            };
            self.update(|p| p.current_account = Some(account.id.clone()));
            info!(account = %account.id, "processing account");

            match runner.process(device.as_mut(), &account.path, self.workflow.as_deref()) {
                AccountResult::Aborted => {
                    info!(account = %account.id, "stopped mid-account, left unprocessed");
                    break;
                }
                AccountResult::Succeeded => {
                    if let Err(err) = self.queue.mark_processed(&account.id, Ok(())) {
                        warn!(error = %err, "mark processed failed");
                    }
                    self.update(|p| {
                        p.processed += 1;
                        p.succeeded += 1;
                    });
                    if self.queue.settings().move_on_complete {
                        if let Err(err) = self.queue.move_to_done(&account.id) {
                            warn!(account = %account.id, error = %err, "move to done failed");
                        }
                    }
                }
                AccountResult::Failed(msg) => {
                    if let Err(err) = self.queue.mark_processed(&account.id, Err(msg.clone())) {
                        warn!(error = %err, "mark processed failed");
                    }
                    self.update(|p| {
                        p.processed += 1;
                        p.failed += 1;
                        p.last_error = Some(msg);
                    });
                }
            }

            if self.stop.pause(secs(self.settings.timing.between_accounts)).is_err() {
                break;
            }
        }

        let processed = lock(&self.progress).processed;
        self.update(|p| {
            p.running = false;
            p.current_account = None;
        });
        info!(processed, "worker finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::workflow::{StepAction, WaitStep, WorkflowStep};
    use crate::testing::{FakeConnector, Journal, ScriptedPerception, fast_settings};
    use std::fs;

    fn settings() -> Settings {
        let mut s = fast_settings();
        s.claim.miss_wait = 0.0;
        s
    }

    fn setup(
        names: &[&str],
        connector: FakeConnector,
    ) -> (tempfile::TempDir, Orchestrator, Journal) {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), "<map/>").unwrap();
        }
        let queue = Arc::new(SharedAccountQueue::default());
        queue.load(dir.path()).unwrap();
        let journal = connector.journal.clone();
        let orchestrator = Orchestrator::new(
            queue,
            Arc::new(connector),
            Arc::new(ScriptedPerception::new()),
            Arc::new(settings()),
        );
        (dir, orchestrator, journal)
    }

    fn serials(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn long_wait() -> Workflow {
        Workflow::new(
            "slow",
            vec![WorkflowStep::new(StepAction::Wait(WaitStep { wait_duration_ms: 30_000 }))],
        )
    }

    #[test]
    fn two_devices_share_three_accounts() {
        let (dir, orchestrator, journal) = setup(&["a.xml", "b.xml", "c.xml"], FakeConnector::default());
        orchestrator.start(&serials(&["emu-1", "emu-2"]), false).unwrap();
        let status = orchestrator.wait_until_finished();

        assert_eq!(status.state, OrchestratorState::Completed);
        assert_eq!(status.queue.processed, 3);
        assert_eq!(status.queue.remaining, 0);
        assert_eq!(status.total_processed(), 3);
        assert_eq!(status.total_succeeded(), 3);
        for name in ["a.xml", "b.xml", "c.xml"] {
            let pushes = journal
                .entries()
                .iter()
                .filter(|e| e.starts_with("push") && e.contains(name))
                .count();
            assert_eq!(pushes, 1, "{name}");
            assert!(dir.path().join("done").join(name).exists());
        }
        assert!(status.devices.iter().all(|d| !d.running && d.current_account.is_none()));
    }

    #[test]
    fn connection_failure_only_affects_that_device() {
        let connector = FakeConnector {
            unreachable: ["emu-2".to_string()].into_iter().collect(),
            ..FakeConnector::default()
        };
        let (_dir, orchestrator, _journal) = setup(&["a.xml", "b.xml", "c.xml"], connector);
        orchestrator.start(&serials(&["emu-1", "emu-2"]), false).unwrap();
        let status = orchestrator.wait_until_finished();

        assert_eq!(status.state, OrchestratorState::Completed);
        let failed = status.devices.iter().find(|d| d.serial == "emu-2").unwrap();
        assert!(!failed.running);
        assert_eq!(failed.processed, 0);
        assert!(failed.last_error.as_deref().unwrap().contains("connection"));
        let ok = status.devices.iter().find(|d| d.serial == "emu-1").unwrap();
        assert_eq!(ok.processed, 3);
    }

    #[test]
    fn resume_skips_processed_accounts() {
        let (_dir, orchestrator, journal) = setup(&["a.xml", "b.xml", "c.xml"], FakeConnector::default());
        orchestrator.queue().mark_processed("a.xml", Ok(())).unwrap();
        orchestrator.start(&serials(&["emu-1"]), true).unwrap();
        let status = orchestrator.wait_until_finished();

        assert_eq!(status.queue.processed, 3);
        assert_eq!(status.total_processed(), 2);
        let pushed_a = journal.entries().iter().any(|e| e.starts_with("push") && e.contains("a.xml"));
        assert!(!pushed_a);
    }

    #[test]
    fn start_validates_preconditions() {
        let (_dir, orchestrator, _journal) = setup(&[], FakeConnector::default());
        assert!(matches!(
            orchestrator.start(&serials(&["emu-1"]), false),
            Err(OrchestratorError::EmptyQueue)
        ));

        let (_dir, orchestrator, _journal) = setup(&["a.xml"], FakeConnector::default());
        assert!(matches!(orchestrator.start(&[], false), Err(OrchestratorError::NoDevices)));
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);
    }

    #[test]
    fn stop_releases_a_thread_blocked_in_wait() {
        let (_dir, orchestrator, _journal) = setup(&["a.xml", "b.xml"], FakeConnector::default());
        let orchestrator = Arc::new(orchestrator.with_workflow(long_wait()));
        orchestrator.start(&serials(&["emu-1"]), false).unwrap();

        let waiter = {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || orchestrator.wait_until_finished())
        };
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        assert!(orchestrator.stop());
        let status = waiter.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(status.queue.processed, 0);
        assert!(orchestrator.status().devices.iter().all(|d| !d.running));
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);
        assert!(!orchestrator.stop());
    }

    #[test]
    fn stop_aborts_in_flight_accounts_and_returns_to_idle() {
        let (_dir, orchestrator, _journal) = setup(&["a.xml", "b.xml", "c.xml"], FakeConnector::default());
        let orchestrator = orchestrator.with_workflow(long_wait());
        orchestrator.start(&serials(&["emu-1", "emu-2"]), false).unwrap();
        assert!(matches!(
            orchestrator.start(&serials(&["emu-3"]), false),
            Err(OrchestratorError::AlreadyRunning)
        ));
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        assert!(orchestrator.stop());
        assert!(started.elapsed() < Duration::from_secs(5));

        let status = orchestrator.status();
        assert_eq!(status.state, OrchestratorState::Idle);
        assert_eq!(status.queue.processed, 0);
        assert_eq!(status.queue.remaining, 3);
        assert!(!orchestrator.stop());
    }
}
