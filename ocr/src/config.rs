use std::path::PathBuf;

/// Tunable parameters when running OCR.
#[derive(Debug, Clone)]
pub struct OcrOptions {
    /// Path or name of the tesseract executable.
    pub program: PathBuf,
    /// Tesseract language code.
    pub lang: String,
    /// Page segmentation mode. 7 treats the crop as a single text line.
    pub psm: u8,
    /// Contrast factor applied to the greyscale crop. 1.0 leaves it unchanged.
    pub contrast: f32,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("tesseract"),
            lang: "eng".to_string(),
            psm: 7,
            contrast: 2.0,
        }
    }
}
