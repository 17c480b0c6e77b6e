//! 感知接口：模板匹配与文字识别。步骤只依赖这个 trait，测试里可以换成脚本化实现。

use crate::config::Settings;
use crate::vision::{Point, TemplateMatcher};
use anyhow::Result;
use image::RgbImage;
use ocr::{OcrEngine, Region};
use std::path::Path;

pub trait Perception: Send + Sync {
    /// 分数 ≥ `threshold` 时返回命中中心点。
    fn find_template(&self, screen: &RgbImage, template: &Path, threshold: f32) -> Result<Option<Point>>;

    fn find_all_templates(&self, screen: &RgbImage, template: &Path, threshold: f32) -> Result<Vec<Point>>;

    fn extract_text(&self, screen: &RgbImage, region: Option<Region>) -> Result<String>;

    /// 在候选中找第一个与文本足够相似的名字。
    fn fuzzy_match<'a>(&self, text: &str, candidates: &'a [String], threshold: f32) -> Option<&'a str> {
        ocr::fuzzy_match(text, candidates, threshold)
    }
}

/// 真实截图上的感知实现：`imageproc` 模板匹配 + tesseract OCR。
pub struct ScreenPerception {
    matcher: TemplateMatcher,
    ocr: OcrEngine,
}

impl ScreenPerception {
    pub fn new(settings: &Settings) -> Self {
        Self {
            matcher: TemplateMatcher::new(&settings.vision),
            ocr: OcrEngine::new(settings.ocr.engine_options()),
        }
    }

    pub fn ocr_available(&self) -> bool {
        self.ocr.is_available()
    }
}

impl Perception for ScreenPerception {
    fn find_template(&self, screen: &RgbImage, template: &Path, threshold: f32) -> Result<Option<Point>> {
        self.matcher.find(screen, template, threshold)
    }

    fn find_all_templates(&self, screen: &RgbImage, template: &Path, threshold: f32) -> Result<Vec<Point>> {
        self.matcher.find_all(screen, template, threshold)
    }

    fn extract_text(&self, screen: &RgbImage, region: Option<Region>) -> Result<String> {
        self.ocr.extract_text(screen, region)
    }
}
