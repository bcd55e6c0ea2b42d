//! Image and geometry processors shared by the pipeline stages.

pub mod geometry;
pub mod resize;
pub mod sort;

pub use geometry::{BoundingBox, MinAreaRect, Point, clip_to_image, order_clockwise, unclip};
pub use resize::{
    PadResizeInfo, aspect_bucket, pad_and_resize, pad_and_resize_keep_ratio, resize_exact,
    to_bgr_hwc,
};
pub use sort::{compare_reading_order, sort_detection_boxes};
