//! Text extraction for game screenshots plus the fuzzy matcher used to
//! compare noisy OCR output against a list of expected labels.
//!
//! Recognition shells out to the `tesseract` CLI. The image is cropped to an
//! optional [`Region`], converted to greyscale and contrast-boosted before it
//! is handed over, which is what single-line name banners need. Pass custom
//! [`OcrOptions`] to change the program path, language or page mode.

mod config;
mod engine;
mod result;
mod text_match;

pub use config::OcrOptions;
pub use engine::OcrEngine;
pub use result::Region;
pub use text_match::{DEFAULT_MIN_SIMILARITY, fuzzy_match};

/// Crate-wide result type.
pub type OcrResult<T> = anyhow::Result<T>;
