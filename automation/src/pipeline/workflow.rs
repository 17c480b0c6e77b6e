use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// 一个工作流：有序步骤列表加元数据。执行期间只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_screen_width")]
    pub screen_width: u32,
    #[serde(default = "default_screen_height")]
    pub screen_height: u32,
    #[serde(default)]
    pub valid_from: Option<NaiveDateTime>,
    #[serde(default)]
    pub valid_until: Option<NaiveDateTime>,
    #[serde(default)]
    pub is_master: bool,
    /// 绑定的玩法，例如 `daily-login`。
    #[serde(default)]
    pub mode_name: Option<String>,
    /// `YYYY-MM`
    #[serde(default)]
    pub month_year: Option<String>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

/// 单个步骤：公共字段 + 按 `step_type` 区分的具体动作。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    #[serde(default)]
    pub description: String,
    /// 分组标签，供 `repeat_group` 收集成员。
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
}

impl WorkflowStep {
    pub fn new(action: StepAction) -> Self {
        Self {
            description: String::new(),
            group_name: None,
            action,
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group_name = Some(group.into());
        self
    }

    pub fn kind(&self) -> &'static str {
        self.action.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepAction {
    Click(ClickStep),
    Swipe(SwipeStep),
    Wait(WaitStep),
    ImageMatch(ImageMatchStep),
    FindAllClick(ImageMatchStep),
    LoopClick(LoopClickStep),
    WaitForColor(WaitForColorStep),
    PressBack {},
    Conditional(ConditionalStep),
    StartGame(AppStep),
    RestartGame(AppStep),
    RepeatGroup(RepeatGroupStep),
    GachaCheck(GachaCheckStep),
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Click(_) => "click",
            StepAction::Swipe(_) => "swipe",
            StepAction::Wait(_) => "wait",
            StepAction::ImageMatch(_) => "image_match",
            StepAction::FindAllClick(_) => "find_all_click",
            StepAction::LoopClick(_) => "loop_click",
            StepAction::WaitForColor(_) => "wait_for_color",
            StepAction::PressBack {} => "press_back",
            StepAction::Conditional(_) => "conditional",
            StepAction::StartGame(_) => "start_game",
            StepAction::RestartGame(_) => "restart_game",
            StepAction::RepeatGroup(_) => "repeat_group",
            StepAction::GachaCheck(_) => "gacha_check",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickStep {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwipeStep {
    pub x: i32,
    pub y: i32,
    pub end_x: i32,
    pub end_y: i32,
    #[serde(default = "default_swipe_ms")]
    pub swipe_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitStep {
    #[serde(default = "default_wait_ms")]
    pub wait_duration_ms: u64,
}

/// `image_match` 与 `find_all_click` 共用的轮询参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMatchStep {
    pub template_path: PathBuf,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// 为真时点击所有命中，等同 `find_all_click`。
    #[serde(default)]
    pub match_all: bool,
    #[serde(default)]
    pub skip_if_not_found: bool,
    #[serde(default = "default_max_wait")]
    pub max_wait_seconds: f64,
    /// 0 或缺省表示只受时间限制。
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default = "default_retry_interval")]
    pub retry_interval: f64,
}

impl ImageMatchStep {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            template_name: None,
            threshold: default_threshold(),
            match_all: false,
            skip_if_not_found: false,
            max_wait_seconds: default_max_wait(),
            max_retries: None,
            retry_interval: default_retry_interval(),
        }
    }

    /// 日志里展示的模板名。
    pub fn display_name(&self) -> String {
        template_display_name(self.template_name.as_deref(), &self.template_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopClickStep {
    pub template_path: PathBuf,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_not_found_threshold")]
    pub not_found_threshold: u32,
    #[serde(default = "default_click_delay")]
    pub click_delay: f64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
}

impl LoopClickStep {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            threshold: default_threshold(),
            max_iterations: default_max_iterations(),
            not_found_threshold: default_not_found_threshold(),
            click_delay: default_click_delay(),
            retry_delay: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitForColorStep {
    pub x: i32,
    pub y: i32,
    /// B、G、R 顺序。
    #[serde(default = "default_expected_color")]
    pub expected_color: Vec<u8>,
    /// 三通道绝对差之和的上限。
    #[serde(default = "default_tolerance")]
    pub tolerance: u32,
    #[serde(default = "default_color_max_wait")]
    pub max_wait_seconds: f64,
    #[serde(default = "default_retry_interval")]
    pub check_interval: f64,
}

impl WaitForColorStep {
    pub fn new(x: i32, y: i32, expected_color: [u8; 3]) -> Self {
        Self {
            x,
            y,
            expected_color: expected_color.to_vec(),
            tolerance: default_tolerance(),
            max_wait_seconds: default_color_max_wait(),
            check_interval: default_retry_interval(),
        }
    }

    pub fn expected_bgr(&self) -> Option<[u8; 3]> {
        <[u8; 3]>::try_from(self.expected_color.as_slice()).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    ImageExists,
    ImageNotExists,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalStep {
    pub template_path: PathBuf,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    pub condition_type: ConditionType,
    /// 1-based 步骤序号。
    #[serde(default)]
    pub goto_step_on_true: Option<usize>,
    #[serde(default)]
    pub goto_step_on_false: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppStep {
    /// 缺省使用配置里的游戏包名。
    #[serde(default)]
    pub package: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatGroupStep {
    #[serde(default)]
    pub loop_group_name: Option<String>,
    #[serde(default)]
    pub stop_template_path: Option<PathBuf>,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// 为真：停止模板消失时结束；为假：停止模板出现时结束。
    #[serde(default = "default_true")]
    pub stop_on_not_found: bool,
    #[serde(default = "default_loop_max_iterations")]
    pub loop_max_iterations: u32,
}

impl RepeatGroupStep {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            loop_group_name: Some(group.into()),
            stop_template_path: None,
            threshold: default_threshold(),
            stop_on_not_found: true,
            loop_max_iterations: default_loop_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrRegion {
    #[serde(default = "default_region_x")]
    pub x: u32,
    #[serde(default = "default_region_y")]
    pub y: u32,
    #[serde(default = "default_region_width")]
    pub width: u32,
    #[serde(default = "default_region_height")]
    pub height: u32,
}

impl From<OcrRegion> for ocr::Region {
    fn from(r: OcrRegion) -> Self {
        ocr::Region::new(r.x, r.y, r.width, r.height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GachaCheckStep {
    /// 缺省时识别整张截图。
    #[serde(default)]
    pub ocr_region: Option<OcrRegion>,
    #[serde(default)]
    pub target_characters: Vec<String>,
    /// 为空时命中后不导出。
    #[serde(default)]
    pub gacha_save_folder: Option<PathBuf>,
}

impl GachaCheckStep {
    /// 导出目录；空路径视为未配置。
    pub fn save_folder(&self) -> Option<&Path> {
        self.gacha_save_folder
            .as_deref()
            .filter(|folder| !folder.as_os_str().is_empty())
    }
}

/// 加载期发现的配置问题。运行时对应步骤会被跳过或按默认处理。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// 1-based
    pub step: usize,
    pub kind: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({}): {}", self.step, self.kind, self.message)
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
            valid_from: None,
            valid_until: None,
            is_master: false,
            mode_name: None,
            month_year: None,
            updated_at: None,
            steps,
        }
    }

    /// 读取 JSON 工作流文件，加载后立即校验并把问题打到日志。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read workflow {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid workflow {}", path.display()))
    }

    /// 解析 JSON 工作流。值为 `null` 的字段按缺省处理，与未写出该字段等价。
    pub fn from_json(text: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(text)?;
        drop_nulls(&mut value);
        let workflow: Workflow = serde_json::from_value(value)?;
        for issue in workflow.validate() {
            warn!(workflow = %workflow.name, %issue, "workflow issue");
        }
        Ok(workflow)
    }

    /// 读取目录下所有 `.json` 工作流，按文件名排序。解析失败的文件记录后跳过。
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<Self>> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("failed to list workflows in {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut workflows = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::load(&path) {
                Ok(wf) => workflows.push(wf),
                Err(err) => warn!(path = %path.display(), error = %format!("{err:#}"), "skipping workflow"),
            }
        }
        Ok(workflows)
    }

    /// 被某个 `repeat_group` 引用的分组名。
    pub fn repeat_group_names(&self) -> HashSet<&str> {
        self.steps
            .iter()
            .filter_map(|s| match &s.action {
                StepAction::RepeatGroup(rg) => rg.loop_group_name.as_deref(),
                _ => None,
            })
            .collect()
    }

    /// 返回 `(下标, 步骤)`，按原顺序，不含嵌套的 `repeat_group`。
    pub fn group_members<'a>(&'a self, group: &str) -> Vec<(usize, &'a WorkflowStep)> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.group_name.as_deref() == Some(group))
            .filter(|(_, s)| !matches!(s.action, StepAction::RepeatGroup(_)))
            .collect()
    }

    pub fn validate(&self) -> Vec<ValidationIssue> {
        let len = self.steps.len();
        let mut issues = Vec::new();
        let mut push = |step: usize, kind: &'static str, message: String| {
            issues.push(ValidationIssue {
                step: step + 1,
                kind,
                message,
            })
        };

        for (i, step) in self.steps.iter().enumerate() {
            match &step.action {
                StepAction::RepeatGroup(rg) => match rg.loop_group_name.as_deref() {
                    None | Some("") => push(i, step.kind(), "missing loop_group_name".into()),
                    Some(group) => {
                        let members = self.group_members(group);
                        if members.is_empty() {
                            push(i, step.kind(), format!("group `{group}` has no member steps"));
                        }
                    }
                },
                StepAction::Conditional(c) => {
                    for (label, target) in [
                        ("goto_step_on_true", c.goto_step_on_true),
                        ("goto_step_on_false", c.goto_step_on_false),
                    ] {
                        if let Some(t) = target {
                            if t == 0 || t > len {
                                push(i, step.kind(), format!("{label}={t} outside 1..={len}"));
                            }
                        }
                    }
                }
                StepAction::GachaCheck(g) => {
                    if g.target_characters.iter().all(|t| t.trim().is_empty()) {
                        push(i, step.kind(), "no target_characters".into());
                    }
                }
                StepAction::WaitForColor(w) => {
                    if w.expected_bgr().is_none() {
                        push(
                            i,
                            step.kind(),
                            format!("expected_color needs 3 channels, got {}", w.expected_color.len()),
                        );
                    }
                }
                _ => {}
            }
        }
        issues
    }

    /// 是否处于有效期内，缺省边界视为不限。
    pub fn is_valid_at(&self, now: NaiveDateTime) -> bool {
        self.valid_from.is_none_or(|from| now >= from) && self.valid_until.is_none_or(|until| now <= until)
    }
}

/// 按玩法与月份选择工作流：
/// 先找玩法 + 月份精确匹配（master 优先），再退回该玩法下任一工作流（master 优先，其次最近更新）。
pub fn select_for_mode<'a>(workflows: &'a [Workflow], mode: &str, month: &str) -> Option<&'a Workflow> {
    let for_mode = || {
        workflows
            .iter()
            .filter(move |w| w.mode_name.as_deref() == Some(mode))
    };

    let exact = for_mode()
        .filter(|w| w.month_year.as_deref() == Some(month))
        .fold(None::<&Workflow>, |best, w| match best {
            Some(b) if b.is_master || !w.is_master => Some(b),
            _ => Some(w),
        });
    if exact.is_some() {
        return exact;
    }

    for_mode().fold(None::<&Workflow>, |best, w| match best {
        None => Some(w),
        Some(b) => {
            if (w.is_master, w.updated_at) > (b.is_master, b.updated_at) {
                Some(w)
            } else {
                Some(b)
            }
        }
    })
}

/// 递归删除对象中值为 `null` 的键，让 `#[serde(default)]` 接管。
fn drop_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(drop_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(drop_nulls),
        _ => {}
    }
}

pub(crate) fn template_display_name(name: Option<&str>, path: &Path) -> String {
    match name {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

fn default_true() -> bool {
    true
}

fn default_screen_width() -> u32 {
    960
}

fn default_screen_height() -> u32 {
    540
}

fn default_swipe_ms() -> u64 {
    300
}

fn default_wait_ms() -> u64 {
    1000
}

fn default_threshold() -> f32 {
    0.8
}

fn default_max_wait() -> f64 {
    10.0
}

fn default_retry_interval() -> f64 {
    1.0
}

fn default_max_iterations() -> u32 {
    20
}

fn default_not_found_threshold() -> u32 {
    3
}

fn default_click_delay() -> f64 {
    1.5
}

fn default_retry_delay() -> f64 {
    2.0
}

fn default_expected_color() -> Vec<u8> {
    vec![255, 255, 255]
}

fn default_tolerance() -> u32 {
    30
}

fn default_color_max_wait() -> f64 {
    30.0
}

fn default_loop_max_iterations() -> u32 {
    100
}

fn default_region_x() -> u32 {
    320
}

fn default_region_y() -> u32 {
    140
}

fn default_region_width() -> u32 {
    320
}

fn default_region_height() -> u32 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"{
        "name": "daily",
        "mode_name": "daily-login",
        "month_year": "2026-10",
        "valid_from": "2026-10-01T00:00:00",
        "steps": [
            {"step_type": "click", "x": 10, "y": 20, "description": "tap banner", "template_path": null},
            {"step_type": "image_match", "template_path": "ok.png", "skip_if_not_found": true, "max_retries": null},
            {"step_type": "press_back"},
            {"step_type": "conditional", "condition_type": "image_exists", "template_path": "x.png", "goto_step_on_true": 1},
            {"step_type": "gacha_check", "group_name": "pull", "target_characters": ["Sally"], "ocr_region": {"x": 1}},
            {"step_type": "repeat_group", "loop_group_name": "pull", "stop_on_not_found": false}
        ]
    }"#;

    #[test]
    fn parses_tagged_steps_with_defaults() {
        let wf = Workflow::from_json(SAMPLE).unwrap();
        assert_eq!(wf.steps.len(), 6);
        assert_eq!(wf.screen_width, 960);
        assert_eq!(wf.steps[0].description, "tap banner");
        assert!(matches!(wf.steps[0].action, StepAction::Click(ClickStep { x: 10, y: 20 })));

        let StepAction::ImageMatch(im) = &wf.steps[1].action else {
            panic!("expected image_match");
        };
        assert!(im.skip_if_not_found);
        assert_eq!(im.max_wait_seconds, 10.0);
        assert_eq!(im.max_retries, None);
        assert_eq!(im.display_name(), "ok.png");

        assert_eq!(wf.steps[2].kind(), "press_back");

        let StepAction::GachaCheck(g) = &wf.steps[4].action else {
            panic!("expected gacha_check");
        };
        assert_eq!(wf.steps[4].group_name.as_deref(), Some("pull"));
        assert_eq!(g.ocr_region, Some(OcrRegion { x: 1, y: 140, width: 320, height: 60 }));

        let StepAction::RepeatGroup(rg) = &wf.steps[5].action else {
            panic!("expected repeat_group");
        };
        assert!(!rg.stop_on_not_found);
        assert_eq!(rg.loop_max_iterations, 100);
        assert!(wf.validate().is_empty());
    }

    #[test]
    fn null_fields_fall_back_to_defaults() {
        let wf = Workflow::from_json(
            r#"{
                "name": "exported", "description": null, "valid_from": null, "mode_name": null,
                "steps": [
                    {"step_type": "wait_for_color", "x": 5, "y": 6, "expected_color": null,
                     "tolerance": null, "max_wait_seconds": null, "check_interval": null,
                     "description": null, "group_name": null, "template_path": null},
                    {"step_type": "image_match", "template_path": "ok.png", "threshold": null,
                     "max_wait_seconds": null, "retry_interval": null, "skip_if_not_found": null},
                    {"step_type": "gacha_check", "target_characters": ["Sally"],
                     "ocr_region": {"x": null, "y": 10}, "gacha_save_folder": null}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(wf.description, "");

        let StepAction::WaitForColor(color) = &wf.steps[0].action else {
            panic!("expected wait_for_color");
        };
        assert_eq!(color.expected_bgr(), Some([255, 255, 255]));
        assert_eq!(color.tolerance, 30);
        assert_eq!(color.max_wait_seconds, 30.0);
        assert_eq!(color.check_interval, 1.0);
        assert_eq!(wf.steps[0].description, "");
        assert_eq!(wf.steps[0].group_name, None);

        let StepAction::ImageMatch(im) = &wf.steps[1].action else {
            panic!("expected image_match");
        };
        assert_eq!(im.threshold, 0.8);
        assert_eq!(im.max_wait_seconds, 10.0);
        assert!(!im.skip_if_not_found);

        let StepAction::GachaCheck(g) = &wf.steps[2].action else {
            panic!("expected gacha_check");
        };
        assert_eq!(g.ocr_region, Some(OcrRegion { x: 320, y: 10, width: 320, height: 60 }));
        assert_eq!(g.save_folder(), None);
    }

    #[test]
    fn unknown_step_type_is_rejected() {
        let err = Workflow::from_json(r#"{"steps":[{"step_type":"teleport"}]}"#);
        assert!(err.is_err());
    }

    #[test]
    fn validate_reports_misconfigured_steps() {
        let mut missing = RepeatGroupStep::new("g");
        missing.loop_group_name = None;
        let wf = Workflow::new(
            "broken",
            vec![
                WorkflowStep::new(StepAction::RepeatGroup(missing)),
                WorkflowStep::new(StepAction::RepeatGroup(RepeatGroupStep::new("empty"))),
                WorkflowStep::new(StepAction::Conditional(ConditionalStep {
                    template_path: "x.png".into(),
                    threshold: 0.8,
                    condition_type: ConditionType::ImageExists,
                    goto_step_on_true: Some(9),
                    goto_step_on_false: Some(0),
                })),
                WorkflowStep::new(StepAction::GachaCheck(GachaCheckStep {
                    ocr_region: None,
                    target_characters: vec![],
                    gacha_save_folder: None,
                })),
                WorkflowStep::new(StepAction::WaitForColor(WaitForColorStep {
                    expected_color: vec![],
                    ..WaitForColorStep::new(0, 0, [0, 0, 0])
                })),
            ],
        );
        let issues = wf.validate();
        let steps: Vec<usize> = issues.iter().map(|i| i.step).collect();
        assert_eq!(steps, vec![1, 2, 3, 3, 4, 5]);
        assert!(issues[0].to_string().contains("loop_group_name"));
    }

    #[test]
    fn group_members_exclude_nested_repeat_groups() {
        let wf = Workflow::new(
            "g",
            vec![
                WorkflowStep::new(StepAction::Click(ClickStep { x: 1, y: 1 })).in_group("a"),
                WorkflowStep::new(StepAction::RepeatGroup(RepeatGroupStep::new("a"))).in_group("a"),
                WorkflowStep::new(StepAction::Wait(WaitStep { wait_duration_ms: 1 })).in_group("a"),
                WorkflowStep::new(StepAction::Click(ClickStep { x: 2, y: 2 })),
            ],
        );
        let idx: Vec<usize> = wf.group_members("a").iter().map(|(i, _)| *i).collect();
        assert_eq!(idx, vec![0, 2]);
        assert!(wf.repeat_group_names().contains("a"));
    }

    #[test]
    fn validity_window_is_inclusive() {
        let wf = Workflow::from_json(SAMPLE).unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2026, 10, d).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert!(wf.is_valid_at(day(1)));
        assert!(wf.is_valid_at(day(18)));
        let before = NaiveDate::from_ymd_opt(2026, 9, 30).unwrap().and_hms_opt(23, 0, 0).unwrap();
        assert!(!wf.is_valid_at(before));
    }

    #[test]
    fn select_prefers_exact_month_then_master() {
        let mk = |name: &str, month: &str, master: bool, updated: u32| {
            let mut w = Workflow::new(name, vec![]);
            w.mode_name = Some("daily-login".into());
            w.month_year = Some(month.into());
            w.is_master = master;
            w.updated_at = NaiveDate::from_ymd_opt(2026, 1, updated).unwrap().and_hms_opt(0, 0, 0);
            w
        };
        let all = vec![
            mk("old", "2026-09", false, 20),
            mk("master-old", "2026-09", true, 2),
            mk("oct", "2026-10", false, 1),
            mk("oct-master", "2026-10", true, 1),
        ];
        assert_eq!(select_for_mode(&all, "daily-login", "2026-10").unwrap().name, "oct-master");
        // 无精确月份：master 中最近更新的胜出
        assert_eq!(select_for_mode(&all, "daily-login", "2027-01").unwrap().name, "master-old");
        assert_eq!(select_for_mode(&all[..1], "daily-login", "2027-01").unwrap().name, "old");
        assert!(select_for_mode(&all, "stage-farm", "2026-10").is_none());
    }
}
