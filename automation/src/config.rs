use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

/// 默认配置文件名，位于当前工作目录。
pub const DEFAULT_CONFIG_FILE: &str = "automation.toml";

/// 全局运行配置：所有等待时长、模板路径、游戏包名都集中在这里声明默认值。
///
/// 配置文件缺失时使用默认值；文件中缺少的字段同样回落到默认值。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub adb: AdbSettings,
    pub game: GameSettings,
    pub templates: TemplateSettings,
    pub timing: TimingSettings,
    pub claim: ClaimSettings,
    pub queue: QueueSettings,
    pub ocr: OcrSettings,
    pub vision: VisionSettings,
}

impl Settings {
    /// 读取 TOML 配置；文件不存在时返回默认配置。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config at {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// 把相对模板路径解析到模板目录下。
    pub fn template_path(&self, name: impl AsRef<Path>) -> PathBuf {
        let name = name.as_ref();
        if name.is_absolute() {
            name.to_path_buf()
        } else {
            self.templates.dir.join(name)
        }
    }
}

/// 秒数（允许小数）转 `Duration`，负数按 0 处理。
pub fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdbSettings {
    #[serde(default = "default_adb_program")]
    pub program: PathBuf,
    /// 普通 shell / 输入命令超时（秒）。
    #[serde(default = "default_command_timeout")]
    pub command_timeout: f64,
    #[serde(default = "default_screenshot_timeout")]
    pub screenshot_timeout: f64,
    /// push / pull 超时（秒）。
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout: f64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
}

impl Default for AdbSettings {
    fn default() -> Self {
        Self {
            program: default_adb_program(),
            command_timeout: default_command_timeout(),
            screenshot_timeout: default_screenshot_timeout(),
            transfer_timeout: default_transfer_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSettings {
    #[serde(default = "default_package")]
    pub package: String,
    /// 设备上账号凭据文件的位置。
    #[serde(default = "default_pref_path")]
    pub pref_path: String,
    #[serde(default = "default_push_temp_path")]
    pub push_temp_path: String,
    #[serde(default = "default_export_temp_path")]
    pub export_temp_path: String,
    #[serde(default = "default_true")]
    pub clear_cache: bool,
}

impl GameSettings {
    /// 导出文件名后缀，取凭据文件名本身。
    pub fn pref_file_name(&self) -> &str {
        self.pref_path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("account.xml")
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            package: default_package(),
            pref_path: default_pref_path(),
            push_temp_path: default_push_temp_path(),
            export_temp_path: default_export_temp_path(),
            clear_cache: true,
        }
    }
}

/// 奖励领取按钮：模板 + 点击后的等待时长，按声明顺序决定优先级。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimButton {
    pub name: String,
    pub template: PathBuf,
    pub delay: f64,
}

impl ClaimButton {
    fn new(name: &str, template: &str, delay: f64) -> Self {
        Self {
            name: name.to_string(),
            template: PathBuf::from(template),
            delay,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSettings {
    #[serde(default = "default_template_dir")]
    pub dir: PathBuf,
    /// 任一出现即认为游戏加载完成。
    #[serde(default = "default_ready_templates")]
    pub ready: Vec<PathBuf>,
    #[serde(default = "default_claim_buttons")]
    pub claim_buttons: Vec<ClaimButton>,
    #[serde(default = "default_builtin_threshold")]
    pub builtin_threshold: f32,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            dir: default_template_dir(),
            ready: default_ready_templates(),
            claim_buttons: default_claim_buttons(),
            builtin_threshold: default_builtin_threshold(),
        }
    }
}

/// 所有固定等待时长（秒）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_click_settle")]
    pub click_settle: f64,
    #[serde(default = "default_slow_settle")]
    pub swipe_settle: f64,
    #[serde(default = "default_slow_settle")]
    pub back_settle: f64,
    #[serde(default = "default_one")]
    pub restart_stop_wait: f64,
    #[serde(default = "default_restart_start_wait")]
    pub restart_start_wait: f64,
    #[serde(default = "default_click_settle")]
    pub find_all_gap: f64,
    /// 截图失败后的重试间隔。
    #[serde(default = "default_one")]
    pub screenshot_retry: f64,
    #[serde(default = "default_two")]
    pub app_close_wait: f64,
    #[serde(default = "default_one")]
    pub cache_clear_wait: f64,
    #[serde(default = "default_two")]
    pub post_push_wait: f64,
    #[serde(default = "default_load_timeout")]
    pub load_timeout: f64,
    #[serde(default = "default_two")]
    pub ready_poll: f64,
    #[serde(default = "default_two")]
    pub before_close_wait: f64,
    #[serde(default = "default_two")]
    pub between_accounts: f64,
    #[serde(default = "default_join_timeout")]
    pub join_timeout: f64,
}

impl TimingSettings {
    /// 全部为 0 的时序，测试用。
    pub fn immediate() -> Self {
        Self {
            click_settle: 0.0,
            swipe_settle: 0.0,
            back_settle: 0.0,
            restart_stop_wait: 0.0,
            restart_start_wait: 0.0,
            find_all_gap: 0.0,
            screenshot_retry: 0.0,
            app_close_wait: 0.0,
            cache_clear_wait: 0.0,
            post_push_wait: 0.0,
            load_timeout: 0.0,
            ready_poll: 0.0,
            before_close_wait: 0.0,
            between_accounts: 0.0,
            join_timeout: 1.0,
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            click_settle: default_click_settle(),
            swipe_settle: default_slow_settle(),
            back_settle: default_slow_settle(),
            restart_stop_wait: default_one(),
            restart_start_wait: default_restart_start_wait(),
            find_all_gap: default_click_settle(),
            screenshot_retry: default_one(),
            app_close_wait: default_two(),
            cache_clear_wait: default_one(),
            post_push_wait: default_two(),
            load_timeout: default_load_timeout(),
            ready_poll: default_two(),
            before_close_wait: default_two(),
            between_accounts: default_two(),
            join_timeout: default_join_timeout(),
        }
    }
}

/// 内置奖励领取流程的循环限制。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSettings {
    #[serde(default = "default_claim_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_miss_limit")]
    pub miss_limit: u32,
    #[serde(default = "default_two")]
    pub miss_wait: f64,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_claim_iterations(),
            miss_limit: default_miss_limit(),
            miss_wait: default_two(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// 成功处理后把账号文件移到 done 目录。
    #[serde(default = "default_true")]
    pub move_on_complete: bool,
    /// 为空时使用账号目录下的 `done/`。
    #[serde(default)]
    pub done_folder: Option<PathBuf>,
    #[serde(default = "default_account_extension")]
    pub extension: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            move_on_complete: true,
            done_folder: None,
            extension: default_account_extension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    #[serde(default = "default_tesseract")]
    pub program: PathBuf,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_psm")]
    pub psm: u8,
    #[serde(default = "default_contrast")]
    pub contrast: f32,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
}

impl OcrSettings {
    pub fn engine_options(&self) -> ocr::OcrOptions {
        ocr::OcrOptions {
            program: self.program.clone(),
            lang: self.lang.clone(),
            psm: self.psm,
            contrast: self.contrast,
        }
    }
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            program: default_tesseract(),
            lang: default_lang(),
            psm: default_psm(),
            contrast: default_contrast(),
            match_threshold: default_match_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionSettings {
    /// 模板缩放比例，依次尝试，取最高分。
    #[serde(default = "default_scales")]
    pub scales: Vec<f32>,
    /// `find_all` 去重半径（像素）。
    #[serde(default = "default_dedupe_radius")]
    pub dedupe_radius: u32,
    #[serde(default = "default_max_matches")]
    pub max_matches: usize,
    /// 粗匹配时截图与模板的缩小倍数，1 表示直接全分辨率匹配。
    #[serde(default = "default_coarse_factor")]
    pub coarse_factor: u32,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            scales: default_scales(),
            dedupe_radius: default_dedupe_radius(),
            max_matches: default_max_matches(),
            coarse_factor: default_coarse_factor(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

fn default_two() -> f64 {
    2.0
}

fn default_adb_program() -> PathBuf {
    PathBuf::from("adb")
}

fn default_command_timeout() -> f64 {
    10.0
}

fn default_screenshot_timeout() -> f64 {
    10.0
}

fn default_transfer_timeout() -> f64 {
    30.0
}

fn default_connect_timeout() -> f64 {
    5.0
}

fn default_package() -> String {
    "com.linecorp.LGRGS".to_string()
}

fn default_pref_path() -> String {
    "/data/data/com.linecorp.LGRGS/shared_prefs/_LINE_COCOS_PREF_KEY.xml".to_string()
}

fn default_push_temp_path() -> String {
    "/sdcard/_temp_lr_account.xml".to_string()
}

fn default_export_temp_path() -> String {
    "/sdcard/_temp_gacha_export.xml".to_string()
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_ready_templates() -> Vec<PathBuf> {
    ["giftbox.png", "close.png", "ok.png"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

fn default_claim_buttons() -> Vec<ClaimButton> {
    vec![
        ClaimButton::new("close", "close.png", 1.5),
        ClaimButton::new("giftbox", "giftbox.png", 2.0),
        ClaimButton::new("accept_all", "accept_all.png", 2.0),
        ClaimButton::new("ok", "ok.png", 1.5),
    ]
}

fn default_builtin_threshold() -> f32 {
    0.6
}

fn default_click_settle() -> f64 {
    0.3
}

fn default_slow_settle() -> f64 {
    0.5
}

fn default_restart_start_wait() -> f64 {
    3.0
}

fn default_load_timeout() -> f64 {
    60.0
}

fn default_join_timeout() -> f64 {
    5.0
}

fn default_claim_iterations() -> u32 {
    20
}

fn default_miss_limit() -> u32 {
    3
}

fn default_account_extension() -> String {
    "xml".to_string()
}

fn default_tesseract() -> PathBuf {
    PathBuf::from("tesseract")
}

fn default_lang() -> String {
    "eng".to_string()
}

fn default_psm() -> u8 {
    7
}

fn default_contrast() -> f32 {
    2.0
}

fn default_match_threshold() -> f32 {
    ocr::DEFAULT_MIN_SIMILARITY
}

fn default_scales() -> Vec<f32> {
    vec![1.0]
}

fn default_dedupe_radius() -> u32 {
    20
}

fn default_max_matches() -> usize {
    50
}

fn default_coarse_factor() -> u32 {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.game.package, "com.linecorp.LGRGS");
        assert_eq!(settings.claim.max_iterations, 20);
        assert_eq!(settings.templates.claim_buttons.len(), 4);
        assert_eq!(settings.templates.claim_buttons[0].name, "close");
        assert_eq!(settings.vision.max_matches, 50);
        assert_eq!(settings.vision.coarse_factor, 4);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let settings = Settings::from_toml(
            r#"
            [timing]
            click_settle = 0.1

            [queue]
            done_folder = "/tmp/finished"
            "#,
        )
        .unwrap();
        assert!((settings.timing.click_settle - 0.1).abs() < 1e-9);
        assert!((settings.timing.swipe_settle - 0.5).abs() < 1e-9);
        assert_eq!(settings.queue.done_folder, Some(PathBuf::from("/tmp/finished")));
        assert!(settings.queue.move_on_complete);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.adb.program, PathBuf::from("adb"));
    }

    #[test]
    fn pref_file_name_is_last_segment() {
        let game = GameSettings::default();
        assert_eq!(game.pref_file_name(), "_LINE_COCOS_PREF_KEY.xml");
    }

    #[test]
    fn relative_templates_resolve_under_dir() {
        let settings = Settings::default();
        assert_eq!(
            settings.template_path("ok.png"),
            PathBuf::from("templates").join("ok.png")
        );
        assert_eq!(settings.template_path("/abs/ok.png"), PathBuf::from("/abs/ok.png"));
    }

    #[test]
    fn negative_seconds_clamp_to_zero() {
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(1.5), Duration::from_millis(1500));
    }
}
