use image::{Rgb, RgbImage};
use ocr::{OcrEngine, OcrOptions, Region, fuzzy_match};

#[test]
fn region_outside_screenshot_is_an_error() {
    let engine = OcrEngine::new(OcrOptions::default());
    let img = RgbImage::from_pixel(100, 50, Rgb([255, 255, 255]));
    let err = engine
        .extract_text(&img, Some(Region::new(200, 200, 10, 10)))
        .unwrap_err();
    assert!(err.to_string().contains("outside"));
}

#[test]
fn missing_binary_reports_unavailable() {
    let engine = OcrEngine::new(OcrOptions {
        program: "/nonexistent/tesseract-for-tests".into(),
        ..OcrOptions::default()
    });
    assert!(!engine.is_available());
    let img = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
    assert!(engine.extract_text(&img, None).is_err());
}

// Heavy test that needs a local tesseract install; run with:
// cargo test -p ocr -- --ignored
#[test]
#[ignore = "requires the tesseract binary on PATH"]
fn blank_banner_yields_no_target() {
    let engine = OcrEngine::default();
    assert!(engine.is_available(), "tesseract should be installed");

    let img = RgbImage::from_pixel(960, 540, Rgb([255, 255, 255]));
    let text = engine
        .extract_text(&img, Some(Region::default()))
        .expect("ocr pipeline should run without error");

    assert_eq!(fuzzy_match(&text, &["Sally", "Leonard"], 0.6), None);
}
