use crate::config::VisionSettings;
use anyhow::{Context, Result};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage, imageops};
use imageproc::template_matching::{MatchTemplateMethod, find_extremes, match_template};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// 屏幕坐标（像素）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 模板匹配的结果，包含左上角坐标、匹配分数以及模板尺寸。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    /// 匹配结果的左上角（像素）。
    pub top_left: (u32, u32),
    /// 0.0–1.0 的匹配分数。
    pub score: f32,
    pub tpl_w: u32,
    pub tpl_h: u32,
}

impl TemplateMatch {
    /// 命中区域中心点。
    pub fn center(&self) -> Point {
        Point::new(
            (self.top_left.0 + self.tpl_w / 2) as i32,
            (self.top_left.1 + self.tpl_h / 2) as i32,
        )
    }
}

/// 粗匹配时缩小后的模板短边不低于该值，否则降低缩小倍数。
const MIN_COARSE_SIDE: u32 = 8;
/// 粗匹配分数相对最终阈值的放宽量，缩小会抹掉细节、压低分数。
const COARSE_SLACK: f32 = 0.2;
/// `find` 在粗匹配图上精修的候选峰数量。
const BEST_PEAKS: usize = 3;

type ScoreMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 灰度归一化互相关模板匹配，带模板缓存与多尺度搜索。
///
/// 先在缩小 `coarse_factor` 倍的截图上找候选峰，再回到全分辨率，
/// 只在候选附近的小窗口里精修位置与分数。只缓存模板文件，截图每次都是新的。
pub struct TemplateMatcher {
    scales: Vec<f32>,
    dedupe_radius: u32,
    max_matches: usize,
    coarse_factor: u32,
    cache: Mutex<HashMap<PathBuf, Arc<GrayImage>>>,
}

impl TemplateMatcher {
    pub fn new(settings: &VisionSettings) -> Self {
        let mut scales: Vec<f32> = settings.scales.iter().copied().filter(|s| *s > 0.0).collect();
        if scales.is_empty() {
            scales.push(1.0);
        }
        Self {
            scales,
            dedupe_radius: settings.dedupe_radius,
            max_matches: settings.max_matches.max(1),
            coarse_factor: settings.coarse_factor.max(1),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 读取模板（灰度），命中缓存则直接返回。
    pub fn load_template(&self, path: &Path) -> Result<Arc<GrayImage>> {
        if let Some(tpl) = self.lock_cache().get(path) {
            return Ok(Arc::clone(tpl));
        }
        let tpl = image::open(path)
            .with_context(|| format!("模板读取失败: {}", path.display()))?
            .to_luma8();
        let tpl = Arc::new(tpl);
        self.lock_cache().insert(path.to_path_buf(), Arc::clone(&tpl));
        Ok(tpl)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<GrayImage>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 在截图上找模板，分数 ≥ 阈值时返回中心点。
    pub fn find(&self, screen: &RgbImage, template: &Path, threshold: f32) -> Result<Option<Point>> {
        let tpl = self.load_template(template)?;
        let gray = imageops::grayscale(screen);
        let best = self.best_match(&gray, &tpl);
        if let Some(m) = &best {
            debug!(template = %template.display(), score = m.score, threshold, "best match");
        }
        Ok(best.filter(|m| m.score >= threshold).map(|m| m.center()))
    }

    /// 找出所有分数 ≥ 阈值的命中，中心点相近的只保留分数最高的一个。
    ///
    /// 返回顺序为从上到下、从左到右。
    pub fn find_all(&self, screen: &RgbImage, template: &Path, threshold: f32) -> Result<Vec<Point>> {
        let tpl = self.load_template(template)?;
        let gray = imageops::grayscale(screen);
        let mut pyramid = Pyramid::new(&gray);

        let mut candidates: Vec<TemplateMatch> = Vec::new();
        for scaled in self.scaled_templates(&tpl) {
            candidates.extend(self.search(&mut pyramid, &scaled, threshold, self.max_matches * 4));
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut kept: Vec<Point> = Vec::new();
        for m in candidates {
            let c = m.center();
            if !is_near_any(c, &kept, self.dedupe_radius) {
                kept.push(c);
                if kept.len() >= self.max_matches {
                    break;
                }
            }
        }
        kept.sort_by_key(|p| (p.y, p.x));
        debug!(template = %template.display(), count = kept.len(), "find_all");
        Ok(kept)
    }

    /// 多尺度匹配，返回得分最高的命中。模板大于截图的尺度会被跳过。
    pub fn best_match(&self, screen: &GrayImage, template: &GrayImage) -> Option<TemplateMatch> {
        let mut pyramid = Pyramid::new(screen);
        let mut best: Option<TemplateMatch> = None;
        for scaled in self.scaled_templates(template) {
            for m in self.search(&mut pyramid, &scaled, f32::NEG_INFINITY, BEST_PEAKS) {
                if best.as_ref().is_none_or(|b| m.score > b.score) {
                    best = Some(m);
                }
            }
        }
        best
    }

    /// 单个尺度的搜索：粗匹配选峰，再逐个全分辨率精修，只返回分数 ≥ `min_score` 的结果。
    fn search(&self, pyramid: &mut Pyramid<'_>, tpl: &GrayImage, min_score: f32, limit: usize) -> Vec<TemplateMatch> {
        let full = pyramid.full;
        if tpl.width() > full.width() || tpl.height() > full.height() {
            return Vec::new();
        }

        let factor = self.factor_for(tpl);
        if factor == 1 {
            let scores = match_template(full, tpl, MatchTemplateMethod::CrossCorrelationNormalized);
            return peaks(&scores, min_score, limit, self.dedupe_radius)
                .into_iter()
                .map(|(x, y, score)| TemplateMatch {
                    top_left: (x, y),
                    score,
                    tpl_w: tpl.width(),
                    tpl_h: tpl.height(),
                })
                .collect();
        }

        let small_tpl = shrink(tpl, factor);
        let small_screen = pyramid.level(factor);
        if small_tpl.width() > small_screen.width() || small_tpl.height() > small_screen.height() {
            return Vec::new();
        }
        let scores = match_template(small_screen, &small_tpl, MatchTemplateMethod::CrossCorrelationNormalized);
        let radius = (self.dedupe_radius / factor).max(1);
        peaks(&scores, min_score - COARSE_SLACK, limit, radius)
            .into_iter()
            .filter_map(|(x, y, _)| refine(full, tpl, (x * factor, y * factor), factor))
            .filter(|m| m.score >= min_score)
            .collect()
    }

    /// 缩小后模板短边过小时逐步降低倍数。
    fn factor_for(&self, tpl: &GrayImage) -> u32 {
        let side = tpl.width().min(tpl.height());
        let mut factor = self.coarse_factor;
        while factor > 1 && side / factor < MIN_COARSE_SIDE {
            factor -= 1;
        }
        factor
    }

    fn scaled_templates(&self, template: &GrayImage) -> Vec<GrayImage> {
        self.scales
            .iter()
            .filter_map(|&scale| {
                if (scale - 1.0).abs() < f32::EPSILON {
                    return Some(template.clone());
                }
                let w = (template.width() as f32 * scale).round() as u32;
                let h = (template.height() as f32 * scale).round() as u32;
                if w <= 1 || h <= 1 {
                    return None;
                }
                Some(imageops::resize(template, w, h, imageops::FilterType::Triangle))
            })
            .collect()
    }
}

/// 同一张截图按倍数缓存的缩小版本，一次查找内共享。
struct Pyramid<'a> {
    full: &'a GrayImage,
    levels: HashMap<u32, GrayImage>,
}

impl<'a> Pyramid<'a> {
    fn new(full: &'a GrayImage) -> Self {
        Self {
            full,
            levels: HashMap::new(),
        }
    }

    fn level(&mut self, factor: u32) -> &GrayImage {
        if factor <= 1 {
            return self.full;
        }
        let full = self.full;
        self.levels.entry(factor).or_insert_with(|| shrink(full, factor))
    }
}

fn shrink(image: &GrayImage, factor: u32) -> GrayImage {
    let w = (image.width() / factor).max(1);
    let h = (image.height() / factor).max(1);
    imageops::thumbnail(image, w, h)
}

/// 分数 ≥ `min_score` 的局部峰，按分数降序，半径内只留最高的一个。
fn peaks(scores: &ScoreMap, min_score: f32, limit: usize, radius: u32) -> Vec<(u32, u32, f32)> {
    let mut all: Vec<(u32, u32, f32)> = scores
        .enumerate_pixels()
        .map(|(x, y, p)| (x, y, p.0[0]))
        .filter(|(_, _, score)| score.is_finite() && *score >= min_score)
        .collect();
    all.sort_by(|a, b| b.2.total_cmp(&a.2));

    let radius = radius.max(1);
    let mut kept: Vec<(u32, u32, f32)> = Vec::new();
    for peak in all {
        if kept
            .iter()
            .any(|k| k.0.abs_diff(peak.0) < radius && k.1.abs_diff(peak.1) < radius)
        {
            continue;
        }
        kept.push(peak);
        if kept.len() >= limit {
            break;
        }
    }
    kept
}

/// 在粗定位附近 ±2 倍缩小倍数的窗口内做全分辨率匹配。
fn refine(screen: &GrayImage, tpl: &GrayImage, approx: (u32, u32), factor: u32) -> Option<TemplateMatch> {
    let margin = factor * 2;
    let x0 = approx.0.saturating_sub(margin);
    let y0 = approx.1.saturating_sub(margin);
    let x1 = (approx.0 + tpl.width() + margin).min(screen.width());
    let y1 = (approx.1 + tpl.height() + margin).min(screen.height());
    if x1 < x0 + tpl.width() || y1 < y0 + tpl.height() {
        return None;
    }

    let window = imageops::crop_imm(screen, x0, y0, x1 - x0, y1 - y0).to_image();
    let scores = match_template(&window, tpl, MatchTemplateMethod::CrossCorrelationNormalized);
    let extremes = find_extremes(&scores);
    if !extremes.max_value.is_finite() {
        return None;
    }
    Some(TemplateMatch {
        top_left: (x0 + extremes.max_value_location.0, y0 + extremes.max_value_location.1),
        score: extremes.max_value,
        tpl_w: tpl.width(),
        tpl_h: tpl.height(),
    })
}

fn is_near_any(p: Point, others: &[Point], radius: u32) -> bool {
    let r = radius as i32;
    others
        .iter()
        .any(|o| (p.x - o.x).abs() < r && (p.y - o.y).abs() < r)
}

/// 颜色差：三个通道绝对差之和。`expected_bgr` 按 B、G、R 顺序给出。
pub fn color_distance(pixel: Rgb<u8>, expected_bgr: [u8; 3]) -> u32 {
    let [r, g, b] = pixel.0;
    let [eb, eg, er] = expected_bgr;
    r.abs_diff(er) as u32 + g.abs_diff(eg) as u32 + b.abs_diff(eb) as u32
}

/// 判断 (x, y) 处像素是否在容差内；坐标越界时返回 `None`。
pub fn pixel_color_matches(
    image: &RgbImage,
    x: i32,
    y: i32,
    expected_bgr: [u8; 3],
    tolerance: u32,
) -> Option<bool> {
    if x < 0 || y < 0 {
        return None;
    }
    let pixel = image.get_pixel_checked(x as u32, y as u32)?;
    Some(color_distance(*pixel, expected_bgr) <= tolerance)
}
