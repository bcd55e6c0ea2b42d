//! Utility functions for the OCR pipeline.

pub mod transform;

pub use transform::get_rotate_crop_image;

use crate::core::errors::OcrResult;
use std::path::Path;

/// Initializes a `tracing` subscriber for binaries and tests.
///
/// Filtering follows `RUST_LOG` and defaults to `info`. Safe to call more
/// than once; only the first call installs the subscriber.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Loads an image from disk as RGB.
pub fn load_image(path: &Path) -> OcrResult<image::RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}
