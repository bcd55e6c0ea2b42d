//! Box ordering conventions.
//!
//! Two sorts apply at different points of the pipeline. Detection output is
//! sorted by the top-left corner so crops are recognized in a stable order;
//! assembled results are sorted into reading order using row-bucketed
//! centers, which is the ordering observable through the public API.

use crate::processors::geometry::BoundingBox;
use std::cmp::Ordering;

/// Vertical distance under which two detection boxes count as one row during
/// the refinement pass.
const SAME_ROW_TOLERANCE: f32 = 10.0;

/// Sorts detected boxes by `(p0.y, p0.x)`, then runs a bubble refinement
/// pass swapping adjacent boxes that share a row (|dy| < 10 px) but are out
/// of x-order, so same-line boxes read left to right.
pub fn sort_detection_boxes(mut boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    if boxes.len() < 2 {
        return boxes;
    }

    boxes.sort_by(|a, b| {
        let (pa, pb) = (&a.points[0], &b.points[0]);
        if (pa.y - pb.y).abs() < 1.0 {
            pa.x.partial_cmp(&pb.x).unwrap_or(Ordering::Equal)
        } else {
            pa.y.partial_cmp(&pb.y).unwrap_or(Ordering::Equal)
        }
    });

    for i in 0..boxes.len() - 1 {
        for j in (0..=i).rev() {
            let y_close =
                (boxes[j + 1].points[0].y - boxes[j].points[0].y).abs() < SAME_ROW_TOLERANCE;
            if y_close && boxes[j + 1].points[0].x < boxes[j].points[0].x {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }

    boxes
}

/// Compares two quads in reading order: rows top-to-bottom, left-to-right
/// within a row.
///
/// Two boxes belong to the same row when their centers differ in y by less
/// than half the smaller of the two box heights.
pub fn compare_reading_order(a: &BoundingBox, b: &BoundingBox) -> Ordering {
    let center_a = a.center();
    let center_b = b.center();

    let row_threshold = a.rect_height().min(b.rect_height()) * 0.5;
    let y_diff = (center_a.y - center_b.y).abs();

    if y_diff < row_threshold {
        center_a.x.partial_cmp(&center_b.x).unwrap_or(Ordering::Equal)
    } else {
        center_a.y.partial_cmp(&center_b.y).unwrap_or(Ordering::Equal)
    }
}
