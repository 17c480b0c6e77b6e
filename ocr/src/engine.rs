use crate::OcrResult;
use crate::config::OcrOptions;
use crate::result::Region;
use anyhow::{Context, anyhow, bail};
use image::{GrayImage, RgbImage, imageops};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// High-level OCR engine driving the `tesseract` command line tool.
///
/// The engine holds no process state, so one instance can be shared by every
/// device worker.
#[derive(Debug, Clone)]
pub struct OcrEngine {
    options: OcrOptions,
}

impl OcrEngine {
    pub fn new(options: OcrOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &OcrOptions {
        &self.options
    }

    /// Check whether the configured tesseract binary can be executed.
    pub fn is_available(&self) -> bool {
        match Command::new(&self.options.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(err) => {
                warn!(program = %self.options.program.display(), error = %err, "tesseract not available");
                false
            }
        }
    }

    /// Run OCR on a screenshot, optionally restricted to a region, and return
    /// the trimmed text.
    pub fn extract_text(&self, image: &RgbImage, region: Option<Region>) -> OcrResult<String> {
        let prepared = self.preprocess(image, region)?;

        let scratch = tempfile::Builder::new()
            .prefix("ocr-")
            .suffix(".png")
            .tempfile()
            .context("failed to create scratch file for OCR input")?;
        prepared
            .save(scratch.path())
            .context("failed to write OCR input image")?;

        let output = Command::new(&self.options.program)
            .arg(scratch.path())
            .arg("stdout")
            .args(["-l", &self.options.lang])
            .args(["--psm", &self.options.psm.to_string()])
            .stdin(Stdio::null())
            .output()
            .with_context(|| {
                format!("failed to spawn {}", self.options.program.display())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tesseract exited with {}: {}", output.status, stderr.trim());
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(chars = text.chars().count(), ?region, "ocr finished");
        Ok(text)
    }

    /// Crop, convert to greyscale and boost contrast.
    pub(crate) fn preprocess(&self, image: &RgbImage, region: Option<Region>) -> OcrResult<GrayImage> {
        let (width, height) = image.dimensions();
        let cropped = match region {
            Some(region) => {
                let r = region
                    .clamp_to(width, height)
                    .ok_or_else(|| anyhow!("ocr region {region:?} lies outside a {width}x{height} image"))?;
                imageops::crop_imm(image, r.x, r.y, r.width, r.height).to_image()
            }
            None => image.clone(),
        };

        let mut gray = imageops::grayscale(&cropped);
        enhance_contrast(&mut gray, self.options.contrast);
        Ok(gray)
    }
}

impl Default for OcrEngine {
    fn default() -> Self {
        Self::new(OcrOptions::default())
    }
}

/// Blend every pixel away from the mean grey level by `factor`.
fn enhance_contrast(gray: &mut GrayImage, factor: f32) {
    if (factor - 1.0).abs() < f32::EPSILON || gray.is_empty() {
        return;
    }
    let count = (gray.width() as u64 * gray.height() as u64) as f32;
    let sum: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    let mean = (sum as f32 / count).round();

    for p in gray.pixels_mut() {
        let v = mean + factor * (p.0[0] as f32 - mean);
        p.0[0] = v.round().clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::enhance_contrast;
    use image::{GrayImage, Luma};

    #[test]
    fn contrast_spreads_values_around_mean() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(0, 0, Luma([100]));
        img.put_pixel(1, 0, Luma([140]));
        enhance_contrast(&mut img, 2.0);
        assert_eq!(img.get_pixel(0, 0).0[0], 80);
        assert_eq!(img.get_pixel(1, 0).0[0], 160);
    }

    #[test]
    fn contrast_clamps_to_byte_range() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(1, 0, Luma([255]));
        enhance_contrast(&mut img, 3.0);
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(1, 0).0[0], 255);
    }
}
