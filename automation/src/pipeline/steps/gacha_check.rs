use super::{Flow, Step, StepError};
use crate::pipeline::RunCtx;
use crate::pipeline::workflow::GachaCheckStep;
use chrono::{Local, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 抽卡结果检查：OCR 识别区域文字，与目标名单做模糊匹配。
///
/// 命中时把设备上当前账号的凭据文件导出到 `gacha_save_folder`，并返回 `GachaMatched`
/// 通知外层组循环结束。导出失败只记录日志，命中仍然成立。
impl Step for GachaCheckStep {
    fn run(&self, ctx: &mut RunCtx<'_>) -> Result<Flow, StepError> {
        let targets: Vec<String> = self
            .target_characters
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if targets.is_empty() {
            return Err(StepError::Misconfigured("gacha_check without target_characters".into()));
        }

        let screen = match ctx.capture() {
            Ok(screen) => screen,
            Err(StepError::Aborted) => return Err(StepError::Aborted),
            Err(err) => {
                warn!(error = %err, "screenshot failed, no gacha match");
                return Ok(Flow::Next);
            }
        };
        let region = self.ocr_region.map(ocr::Region::from);
        let Some(text) = ctx.read_text(&screen, region) else {
            return Ok(Flow::Next);
        };
        debug!(text = %text, ?region, "ocr text");

        let threshold = ctx.settings().ocr.match_threshold;
        let Some(matched) = ctx
            .perception()
            .fuzzy_match(&text, &targets, threshold)
            .map(str::to_string)
        else {
            info!(text = %text, "no target character matched");
            return Ok(Flow::Next);
        };
        info!(matched = %matched, text = %text, "gacha target matched");

        if let Some(folder) = self.save_folder() {
            match export_account(ctx, folder, &matched) {
                Ok(path) => info!(path = %path.display(), "account exported"),
                Err(StepError::Aborted) => return Err(StepError::Aborted),
                Err(err) => warn!(folder = %folder.display(), error = %err, "account export failed"),
            }
        }
        ctx.record_gacha_match(matched.clone());
        Ok(Flow::GachaMatched(matched))
    }

    fn label(&self) -> &'static str {
        "gacha_check"
    }
}

/// 导出文件名：`{label}_{YYYYMMDD}_{凭据文件名}`，label 中的空格和 `/` 替换为 `_`。
pub fn export_file_name(label: &str, date: NaiveDate, pref_file_name: &str) -> String {
    let safe: String = label
        .chars()
        .map(|c| if c == ' ' || c == '/' { '_' } else { c })
        .collect();
    format!("{safe}_{}_{pref_file_name}", date.format("%Y%m%d"))
}

/// root 复制凭据到临时路径 -> chmod 644 -> pull -> 删除临时文件。
fn export_account(ctx: &mut RunCtx<'_>, folder: &Path, label: &str) -> Result<PathBuf, StepError> {
    let game = &ctx.settings().game;
    fs::create_dir_all(folder)?;
    let dest = folder.join(export_file_name(
        label,
        Local::now().date_naive(),
        game.pref_file_name(),
    ));
    let temp = game.export_temp_path.as_str();

    let device = ctx.device()?;
    device.shell_privileged(&format!("cp '{}' '{temp}'", game.pref_path))?;
    device.shell_privileged(&format!("chmod 644 '{temp}'"))?;
    let pulled = device.pull(temp, &dest);
    if let Err(err) = device.shell_privileged(&format!("rm '{temp}'")) {
        warn!(temp, error = %err, "failed to remove temp export");
    }
    pulled?;
    Ok(dest)
}
