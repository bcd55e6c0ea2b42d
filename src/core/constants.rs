//! Constants shared across the OCR pipeline.

/// Aspect-ratio buckets served by the recognition model family.
///
/// Each bucket `B` corresponds to a model consuming `REC_INPUT_HEIGHT x
/// (REC_INPUT_HEIGHT * B) x 3` uint8 HWC input. A crop routes to the smallest
/// bucket at least as large as its width/height ratio.
pub const REC_ASPECT_BUCKETS: [u32; 6] = [3, 5, 10, 15, 25, 35];

/// Input height of the recognition models.
pub const DEFAULT_REC_INPUT_HEIGHT: u32 = 48;

/// Default confidence threshold below which recognition results are dropped.
pub const DEFAULT_REC_CONF_THRESHOLD: f32 = 0.3;

/// Detection binarization threshold.
pub const DEFAULT_DET_THRESH: f32 = 0.3;

/// Detection box confidence threshold.
pub const DEFAULT_DET_BOX_THRESH: f32 = 0.6;

/// Detection box expansion ratio.
pub const DEFAULT_DET_UNCLIP_RATIO: f32 = 1.5;

/// Maximum number of candidate contours considered per image.
pub const DEFAULT_DET_MAX_CANDIDATES: usize = 1500;

/// Detection routes to the 640 model when `max(H, W)` is below this value,
/// and to the 960 model otherwise.
pub const DEFAULT_DET_SIZE_THRESHOLD: u32 = 800;

/// Input sizes of the two detection models.
pub const DET_TARGET_SMALL: u32 = 640;
pub const DET_TARGET_LARGE: u32 = 960;

/// Text line classifier input width.
pub const DEFAULT_CLS_INPUT_WIDTH: u32 = 160;

/// Text line classifier input height.
pub const DEFAULT_CLS_INPUT_HEIGHT: u32 = 80;

/// Confidence above which a "180" classification rotates the crop.
pub const DEFAULT_CLS_THRESHOLD: f32 = 0.9;

/// Confidence threshold for applying a document orientation correction.
pub const DEFAULT_ORIENTATION_CONF_THRESHOLD: f32 = 0.9;

/// Fixed input height of the UVDoc unwarping model.
pub const DEFAULT_UVDOC_INPUT_HEIGHT: u32 = 712;

/// Fixed input width of the UVDoc unwarping model.
pub const DEFAULT_UVDOC_INPUT_WIDTH: u32 = 488;

/// Default capacity of the async pipeline's input and output queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default deadline for correlated result waits.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Default age after which uncollected results are evicted from the
/// correlation map.
pub const DEFAULT_ORPHAN_TTL_MS: u64 = 60_000;
