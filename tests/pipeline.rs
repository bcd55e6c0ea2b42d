//! End-to-end tests for the synchronous pipeline against the mock runtime.

mod common;

use common::*;
use image::RgbImage;
use npu_ocr::prelude::*;
use std::sync::Arc;

fn initialized_pipeline() -> OcrPipeline {
    let runtime = Arc::new(fixture_runtime());
    let mut pipeline = OcrPipeline::new(runtime, pipeline_config());
    pipeline.initialize().expect("pipeline should initialize");
    pipeline
}

#[test]
fn single_line_receipt() {
    let mut pipeline = initialized_pipeline();

    // One line "AB12 CD34" across a wide receipt strip.
    let mut image = RgbImage::new(1200, 80);
    draw_line(&mut image, 40, 20, 1160, 60, GRAY_RECEIPT, true);

    let (results, stats) = pipeline.process(&image, None).unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.text, "AB12 CD34");
    assert!(result.confidence >= 0.5, "confidence {}", result.confidence);
    assert_eq!(result.index, 0);

    // The quad covers the drawn line (unclipping may grow it).
    assert!(result.quad.x_min() <= 40.0);
    assert!(result.quad.x_max() >= 1159.0);
    assert!(result.quad.y_min() <= 20.0);
    assert!(result.quad.y_max() >= 59.0);

    assert_eq!(stats.detected_boxes, 1);
    assert_eq!(stats.recognized_boxes, 1);
    assert!((stats.recognition_rate - 100.0).abs() < 1e-9);
}

#[test]
fn two_rows_read_top_down_left_right() {
    let mut pipeline = initialized_pipeline();

    // Row 1 holds two boxes, row 2 one; expected reading order is
    // HELLO, AB12 CD34, WORLD.
    let mut image = RgbImage::new(400, 100);
    draw_line(&mut image, 20, 10, 180, 30, GRAY_HELLO, true);
    draw_line(&mut image, 240, 12, 392, 32, GRAY_RECEIPT, true);
    draw_line(&mut image, 20, 55, 260, 75, GRAY_WORLD, true);

    let (results, stats) = pipeline.process(&image, None).unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(stats.detected_boxes, 3);

    let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["HELLO", "AB12 CD34", "WORLD"]);

    // Indices are the post-sort positions, unique and dense.
    let mut indices: Vec<usize> = results.iter().map(|r| r.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2]);

    // Quads are canonical clockwise top-left-first.
    for result in &results {
        let quad = result.quad.as_quad().unwrap();
        assert_eq!(npu_ocr::processors::order_clockwise(&quad), quad);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }
}

#[test]
fn rotated_line_recovered_by_classifier() {
    let mut pipeline = initialized_pipeline();

    // Marker on the right simulates a line rotated by 180 degrees.
    let mut image = RgbImage::new(400, 80);
    draw_line(&mut image, 40, 20, 360, 60, GRAY_RECEIPT, false);

    // Classifier enabled (the default config): the crop is rotated back.
    let (results, stats) = pipeline.process(&image, None).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "AB12 CD34");
    assert_eq!(stats.rotated_boxes, 1);

    // Classifier disabled per task: the text comes out wrong.
    let task = PipelineTaskConfig {
        use_textline_orientation: Some(false),
        ..PipelineTaskConfig::default()
    };
    let (results, stats) = pipeline.process(&image, Some(&task)).unwrap();
    assert_eq!(results.len(), 1);
    assert_ne!(results[0].text, "AB12 CD34");
    assert_eq!(stats.rotated_boxes, 0);
}

#[test]
fn empty_image_is_empty_result_not_error() {
    let mut pipeline = initialized_pipeline();

    let image = RgbImage::new(800, 600);
    let (results, stats) = pipeline.process(&image, None).unwrap();

    assert!(results.is_empty());
    assert_eq!(stats.detected_boxes, 0);
    assert_eq!(stats.recognized_boxes, 0);
    assert_eq!(stats.recognition_rate, 0.0);
    assert!(stats.total_time_ms >= 0.0);
}

#[test]
fn zero_dimension_image_fails_fast() {
    let mut pipeline = initialized_pipeline();
    let image = RgbImage::new(0, 0);
    let err = pipeline.process(&image, None).unwrap_err();
    assert!(matches!(err, OCRError::InvalidInput { .. }));
}

#[test]
fn process_before_initialize_is_usage_error() {
    let runtime = Arc::new(fixture_runtime());
    let mut pipeline = OcrPipeline::new(runtime, pipeline_config());
    let image = RgbImage::new(64, 64);
    let err = pipeline.process(&image, None).unwrap_err();
    assert!(matches!(err, OCRError::Usage { .. }));
}

#[test]
fn initialize_is_idempotent() {
    let mut pipeline = initialized_pipeline();
    assert!(pipeline.is_initialized());
    pipeline.initialize().expect("re-initialize should be a no-op");

    let mut image = RgbImage::new(200, 60);
    draw_line(&mut image, 20, 10, 180, 50, GRAY_HELLO, true);
    let (results, _) = pipeline.process(&image, None).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn per_task_thresholds_filter_results() {
    let mut pipeline = initialized_pipeline();

    let mut image = RgbImage::new(400, 80);
    draw_line(&mut image, 40, 20, 360, 60, GRAY_HELLO, true);

    // Recognition confidence from the fixture is 0.9; a stricter per-task
    // threshold drops the entry without failing the image.
    let task = PipelineTaskConfig {
        rec_score_thresh: Some(0.95),
        ..PipelineTaskConfig::default()
    };
    let (results, stats) = pipeline.process(&image, Some(&task)).unwrap();
    assert!(results.is_empty());
    assert_eq!(stats.detected_boxes, 1);
    assert_eq!(stats.recognized_boxes, 0);

    // The shared configuration is untouched: the next call recognizes.
    let (results, _) = pipeline.process(&image, None).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "HELLO");
}

#[test]
fn process_batch_accumulates_stats() {
    let mut pipeline = initialized_pipeline();

    let mut first = RgbImage::new(400, 80);
    draw_line(&mut first, 40, 20, 360, 60, GRAY_HELLO, true);
    let second = RgbImage::new(400, 80);

    let (all_results, stats) = pipeline
        .process_batch(&[first, second])
        .expect("batch should run");

    assert_eq!(all_results.len(), 2);
    assert_eq!(all_results[0].len(), 1);
    assert!(all_results[1].is_empty());
    assert_eq!(stats.detected_boxes, 1);
    assert_eq!(stats.recognized_boxes, 1);
}

#[test]
fn cached_processed_image_matches_quad_space() {
    let mut pipeline = initialized_pipeline();

    let mut image = RgbImage::new(400, 80);
    draw_line(&mut image, 40, 20, 360, 60, GRAY_WORLD, true);
    let (results, _) = pipeline.process(&image, None).unwrap();

    let processed = pipeline
        .last_processed_image()
        .expect("processed image cached");
    // No doc preprocessing configured: same dimensions as the input, and
    // quads stay inside it.
    assert_eq!(processed.dimensions(), image.dimensions());
    for result in &results {
        assert!(result.quad.x_max() <= processed.width() as f32);
        assert!(result.quad.y_max() <= processed.height() as f32);
    }
}
