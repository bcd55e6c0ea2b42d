//! Shared fixtures for the end-to-end tests.
//!
//! Builds a mock NPU model fleet over a simple image convention: text lines
//! are solid gray rectangles on black, the gray value identifies the line's
//! text, and a bright marker strip at one end encodes orientation (marker
//! on the left means upright). The mock detection engines light up wherever
//! the input is non-black; the mock recognizers map the gray value back to
//! text (reversed when the marker sits on the wrong side); the mock
//! classifier reports "180" for marker-on-the-right crops.

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use npu_ocr::core::constants::REC_ASPECT_BUCKETS;
use npu_ocr::prelude::*;
use std::path::PathBuf;

/// Dictionary tokens, one character each. Blank is prepended and a space
/// token appended by the loader.
pub const DICT_TOKENS: [&str; 15] = [
    "A", "B", "C", "D", "H", "E", "L", "O", "W", "R", "0", "1", "2", "3", "4",
];

/// Total class count: blank + tokens + space.
pub const CLASSES: usize = DICT_TOKENS.len() + 2;

/// Gray values identifying the fixture strings.
pub const GRAY_RECEIPT: u8 = 100;
pub const GRAY_HELLO: u8 = 140;
pub const GRAY_WORLD: u8 = 180;

const MARKER: u8 = 250;
const CTC_TIMESTEPS: usize = 26;

/// The string a gray value stands for.
pub fn text_for_gray(gray: u8) -> &'static str {
    match gray {
        GRAY_RECEIPT => "AB12 CD34",
        GRAY_HELLO => "HELLO",
        GRAY_WORLD => "WORLD",
        other => panic!("no fixture string for gray value {other}"),
    }
}

fn class_of(c: char) -> usize {
    if c == ' ' {
        return DICT_TOKENS.len() + 1;
    }
    DICT_TOKENS
        .iter()
        .position(|t| t.chars().next() == Some(c))
        .map(|i| i + 1)
        .unwrap_or_else(|| panic!("character {c:?} missing from the fixture dictionary"))
}

/// Builds a `[1, T, C]` CTC tensor spelling `text`, one character every
/// other timestep, blanks elsewhere.
fn ctc_tensor(text: &str) -> Tensor {
    let mut data = vec![0.0f32; CTC_TIMESTEPS * CLASSES];
    for t in 0..CTC_TIMESTEPS {
        data[t * CLASSES] = 0.97;
    }
    for (i, c) in text.chars().enumerate() {
        let t = 1 + 2 * i;
        assert!(t < CTC_TIMESTEPS, "fixture string too long: {text}");
        let idx = class_of(c);
        data[t * CLASSES] = 0.01;
        data[t * CLASSES + idx] = 0.9;
    }
    Tensor::new(vec![1, CTC_TIMESTEPS, CLASSES], data).unwrap()
}

struct CropReading {
    gray: Option<u8>,
    flipped: bool,
}

/// Recovers the fixture encoding from a BGR HWC buffer: the dominant body
/// gray value and whether the marker sits past the midpoint of the content.
fn read_crop(input: &[u8], width: usize) -> CropReading {
    let mut histogram = [0usize; 256];
    let mut content_end = 0usize;
    let mut marker_sum = 0usize;
    let mut marker_count = 0usize;

    for (i, px) in input.chunks_exact(3).enumerate() {
        let x = i % width;
        let v = px[0];
        if v > 30 && x > content_end {
            content_end = x;
        }
        if v >= 240 {
            marker_sum += x;
            marker_count += 1;
        } else {
            histogram[v as usize] += 1;
        }
    }

    let mut best_value = 0usize;
    let mut best_count = 0usize;
    for v in 50..=220usize {
        if histogram[v] > best_count {
            best_count = histogram[v];
            best_value = v;
        }
    }

    let gray = if best_count > 50 {
        [GRAY_RECEIPT, GRAY_HELLO, GRAY_WORLD]
            .into_iter()
            .min_by_key(|&g| (g as i32 - best_value as i32).abs())
            .filter(|&g| (g as i32 - best_value as i32).abs() <= 20)
    } else {
        None
    };

    let flipped =
        marker_count > 0 && content_end > 0 && marker_sum / marker_count > content_end / 2;

    CropReading { gray, flipped }
}

/// Registers the full mock model fleet: two detection engines, six
/// recognizers, and the text line classifier.
pub fn fixture_runtime() -> MockRuntime {
    let mut runtime = MockRuntime::new();

    for (path, size) in [("models/det_640.bin", 640usize), ("models/det_960.bin", 960)] {
        runtime = runtime.register(
            path,
            vec![size, size, 3],
            vec![1, 1, size, size],
            move |input: &[u8]| {
                let data: Vec<f32> = input
                    .chunks_exact(3)
                    .map(|px| if px.iter().any(|&b| b > 16) { 0.95 } else { 0.02 })
                    .collect();
                vec![Tensor::new(vec![1, 1, size, size], data).unwrap()]
            },
        );
    }

    for bucket in REC_ASPECT_BUCKETS {
        let width = (48 * bucket) as usize;
        runtime = runtime.register(
            format!("models/rec_{bucket}.bin"),
            vec![48, width, 3],
            vec![1, CTC_TIMESTEPS, CLASSES],
            move |input: &[u8]| {
                let reading = read_crop(input, width);
                let tensor = match reading.gray {
                    Some(gray) => {
                        let mut text = text_for_gray(gray).to_string();
                        if reading.flipped {
                            text = text.chars().rev().collect();
                        }
                        ctc_tensor(&text)
                    }
                    None => ctc_tensor(""),
                };
                vec![tensor]
            },
        );
    }

    runtime.register(
        "models/textline_ori.bin",
        vec![80, 160, 3],
        vec![1, 2],
        |input: &[u8]| {
            let reading = read_crop(input, 160);
            let probs = if reading.flipped {
                vec![0.03, 0.97]
            } else {
                vec![0.97, 0.03]
            };
            vec![Tensor::new(vec![1, 2], probs).unwrap()]
        },
    )
}

/// Writes the fixture dictionary once per test binary and returns its path.
pub fn write_dict() -> PathBuf {
    static DICT_PATH: std::sync::OnceLock<PathBuf> = std::sync::OnceLock::new();
    DICT_PATH
        .get_or_init(|| {
            let dir = std::env::temp_dir().join(format!("npu_ocr_fixture_{}", std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join("dict.txt");
            std::fs::write(&path, DICT_TOKENS.join("\n")).unwrap();
            path
        })
        .clone()
}

/// Pipeline configuration wired to the mock model paths.
pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        detector: DetectorConfig {
            model_640_path: "models/det_640.bin".into(),
            model_960_path: "models/det_960.bin".into(),
            ..DetectorConfig::default()
        },
        recognizer: RecognizerConfig {
            dict_path: write_dict(),
            use_space_char: true,
            model_paths: REC_ASPECT_BUCKETS
                .into_iter()
                .map(|b| (b, PathBuf::from(format!("models/rec_{b}.bin"))))
                .collect(),
            ..RecognizerConfig::default()
        },
        classifier: ClassifierConfig {
            model_path: "models/textline_ori.bin".into(),
            ..ClassifierConfig::default()
        },
        use_classification: true,
        ..PipelineConfig::default()
    }
}

/// Draws a text line as a gray rectangle with an orientation marker strip.
pub fn draw_line(
    img: &mut RgbImage,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    gray: u8,
    marker_left: bool,
) {
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, Rgb([gray, gray, gray]));
        }
    }
    let marker_width = ((x1 - x0) / 8).clamp(8, 40);
    let (mx0, mx1) = if marker_left {
        (x0, x0 + marker_width)
    } else {
        (x1 - marker_width, x1)
    };
    for y in y0..y1 {
        for x in mx0..mx1 {
            img.put_pixel(x, y, Rgb([MARKER, MARKER, MARKER]));
        }
    }
}
