use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use device_automation::config::DEFAULT_CONFIG_FILE;
use device_automation::device::{DeviceState, list_devices};
use device_automation::pipeline::{StepAction, select_for_mode};
use device_automation::{
    AdbConnector, DeviceConnector, Orchestrator, ScreenPerception, Settings, SharedAccountQueue, StopSignal, Workflow,
    execute_workflow,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 命令行参数：全局配置文件 + 子命令。
#[derive(Parser, Debug)]
#[command(name = "automation", version, about = "安卓模拟器上的手游自动化：按工作流执行操作并批量切换账号")]
struct Cli {
    /// 配置文件路径（TOML），不存在时使用默认配置
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 列出已连接的设备
    Devices,

    /// 在一台设备上执行一个工作流
    Exec {
        /// 设备序列号，例如 127.0.0.1:5555
        #[arg(long)]
        device: String,

        /// 工作流 JSON 文件
        #[arg(long)]
        workflow: PathBuf,
    },

    /// 多设备并行处理账号目录
    Run {
        /// 账号凭据文件所在目录
        #[arg(long)]
        accounts: PathBuf,

        /// 参与处理的设备，可重复指定
        #[arg(long = "device", required = true)]
        devices: Vec<String>,

        /// 每个账号执行的工作流文件；与 --workflows 二选一，都不给时使用内置领奖流程
        #[arg(long, conflicts_with = "workflows")]
        workflow: Option<PathBuf>,

        /// 工作流目录，按 --mode / --month 选择
        #[arg(long, requires = "mode")]
        workflows: Option<PathBuf>,

        /// 玩法名，例如 daily-login
        #[arg(long)]
        mode: Option<String>,

        /// 月份 YYYY-MM，默认当前月份
        #[arg(long)]
        month: Option<String>,
    },

    /// 删除损坏的账号文件
    Discard {
        /// 账号凭据文件所在目录
        #[arg(long)]
        accounts: PathBuf,

        /// 要删除的文件名
        #[arg(required = true)]
        files: Vec<String>,
    },
}

/// 程序入口：初始化日志、读取配置并分发子命令。
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;
    let started = Instant::now();

    match cli.command {
        Command::Devices => devices(&settings)?,
        Command::Exec { device, workflow } => exec(settings, &device, &workflow)?,
        Command::Run {
            accounts,
            devices,
            workflow,
            workflows,
            mode,
            month,
        } => {
            let workflow = match (workflow, workflows, mode) {
                (Some(path), _, _) => Some(Workflow::load(&path)?),
                (None, Some(dir), Some(mode)) => choose_workflow(&dir, &mode, month)?,
                _ => None,
            };
            run(settings, &accounts, devices, workflow)?;
        }
        Command::Discard { accounts, files } => discard(settings, &accounts, &files)?,
    }

    info!(elapsed = ?started.elapsed(), "done");
    Ok(())
}

fn devices(settings: &Settings) -> Result<()> {
    let devices = list_devices(&settings.adb).context("failed to list devices")?;
    if devices.is_empty() {
        println!("没有已连接的设备");
        return Ok(());
    }
    for d in devices {
        let state = match &d.state {
            DeviceState::Online => "online".to_string(),
            DeviceState::Offline => "offline".to_string(),
            DeviceState::Unauthorized => "unauthorized".to_string(),
            DeviceState::Other(s) => s.clone(),
        };
        let size = d
            .screen_size
            .map(|(w, h)| format!("{w}x{h}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<14} {:<20} {}",
            d.serial,
            state,
            d.model.as_deref().unwrap_or("-"),
            size
        );
    }
    Ok(())
}

fn exec(settings: Settings, serial: &str, path: &Path) -> Result<()> {
    let workflow = Workflow::load(path)?;
    let perception = ScreenPerception::new(&settings);
    warn_if_ocr_missing(&workflow, &perception);

    let connector = AdbConnector::new(settings.adb.clone());
    let mut device = connector.open(serial);
    device
        .connect()
        .with_context(|| format!("failed to connect {serial}"))?;

    let report = execute_workflow(&workflow, device.as_mut(), &perception, &settings, &StopSignal::new());
    println!("[{serial}] {:?}: {}", report.status, report.message);
    println!("执行步骤数: {}", report.steps_executed);
    if !report.decisions.is_empty() {
        println!("决策路径:");
        for record in &report.decisions {
            println!("  - step {} {} => {:?}", record.step, record.label, record.branch);
        }
    }
    for name in &report.gacha_matches {
        println!("抽中: {name}");
    }
    if !report.is_success() {
        bail!("workflow `{}` did not complete: {}", workflow.name, report.message);
    }
    Ok(())
}

/// 按玩法与月份挑选工作流，并排除不在有效期内的。
fn choose_workflow(dir: &Path, mode: &str, month: Option<String>) -> Result<Option<Workflow>> {
    let now = Local::now().naive_local();
    let month = month.unwrap_or_else(|| now.format("%Y-%m").to_string());
    let workflows: Vec<Workflow> = Workflow::load_dir(dir)?
        .into_iter()
        .filter(|w| w.is_valid_at(now))
        .collect();
    match select_for_mode(&workflows, mode, &month) {
        Some(wf) => {
            info!(workflow = %wf.name, mode, month = %month, "selected workflow");
            Ok(Some(wf.clone()))
        }
        None => {
            warn!(mode, month = %month, "no workflow for mode, falling back to built-in claim");
            Ok(None)
        }
    }
}

fn run(settings: Settings, accounts: &Path, devices: Vec<String>, workflow: Option<Workflow>) -> Result<()> {
    let queue = Arc::new(SharedAccountQueue::new(settings.queue.clone()));
    let count = queue
        .load(accounts)
        .with_context(|| format!("failed to load accounts from {}", accounts.display()))?;
    info!(count, "accounts loaded");

    let perception = ScreenPerception::new(&settings);
    if let Some(wf) = &workflow {
        warn_if_ocr_missing(wf, &perception);
    }
    let connector = Arc::new(AdbConnector::new(settings.adb.clone()));
    let mut orchestrator = Orchestrator::new(queue, connector, Arc::new(perception), Arc::new(settings));
    if let Some(wf) = workflow {
        orchestrator = orchestrator.with_workflow(wf);
    }

    let orchestrator = Arc::new(orchestrator);

    // 第一次 Ctrl-C 停止所有设备，第二次直接退出
    let handle = Arc::clone(&orchestrator);
    ctrlc::set_handler(move || {
        if !handle.stop() {
            std::process::exit(130);
        }
    })
    .context("failed to install Ctrl-C handler")?;

    orchestrator.start(&devices, false)?;
    let status = orchestrator.wait_until_finished();

    println!("状态: {:?}", status.state);
    for d in &status.devices {
        println!(
            "[{}] 处理 {} 成功 {} 失败 {}{}",
            d.serial,
            d.processed,
            d.succeeded,
            d.failed,
            d.last_error
                .as_deref()
                .map(|e| format!("（最后错误: {e}）"))
                .unwrap_or_default()
        );
    }
    println!(
        "合计: 处理 {} 成功 {} 失败 {} 剩余 {}",
        status.total_processed(),
        status.total_succeeded(),
        status.total_failed(),
        status.queue.remaining
    );
    Ok(())
}

fn discard(settings: Settings, accounts: &Path, files: &[String]) -> Result<()> {
    let queue = SharedAccountQueue::new(settings.queue);
    queue
        .load(accounts)
        .with_context(|| format!("failed to load accounts from {}", accounts.display()))?;
    for file in files {
        queue.delete(file).with_context(|| format!("failed to discard {file}"))?;
        println!("已删除: {file}");
    }
    Ok(())
}

fn warn_if_ocr_missing(workflow: &Workflow, perception: &ScreenPerception) {
    let needs_ocr = workflow
        .steps
        .iter()
        .any(|s| matches!(s.action, StepAction::GachaCheck(_)));
    if needs_ocr && !perception.ocr_available() {
        warn!("workflow has gacha_check steps but tesseract is not available");
    }
}
