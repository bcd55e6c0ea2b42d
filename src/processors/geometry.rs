//! Geometric primitives and algorithms for OCR processing.
//!
//! This module provides the 2D toolkit the detection postprocessor is built
//! on: point and polygon representations, area/perimeter computation, convex
//! hulls, minimum-area oriented rectangles, canonical clockwise quad
//! ordering, and polygon unclipping (outward offsetting).

use crate::core::errors::{OCRError, OcrResult};
use geo::{Coord, LineString, Polygon};
use geo_clipper::{ClipperInt, EndType, JoinType};
use imageproc::contours::Contour;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::f32::consts::PI;

/// Integer scaling applied to coordinates before clipper offsetting, for
/// sub-pixel fidelity.
const CLIPPER_SCALE: f64 = 100.0;

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    /// X-coordinate of the point.
    pub x: f32,
    /// Y-coordinate of the point.
    pub y: f32,
}

impl Point {
    /// Creates a new point with the given coordinates.
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

fn cmp_f32(a: f32, b: f32) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() { value } else { 0.0 }
}

/// Reorders four points so the result starts with the top-left corner and
/// proceeds clockwise.
///
/// The two points with the smallest and largest `x + y` sums become the
/// top-left and bottom-right corners; the remaining pair splits into
/// top-right and bottom-left by `y - x`. Ties on either key are broken by
/// `y`, then `x`, which keeps the ordering deterministic (and idempotent)
/// for degenerate quads.
pub fn order_clockwise(points: &[Point; 4]) -> [Point; 4] {
    let mut by_sum = *points;
    by_sum.sort_by(|a, b| {
        cmp_f32(a.x + a.y, b.x + b.y)
            .then(cmp_f32(a.y, b.y))
            .then(cmp_f32(a.x, b.x))
    });

    let top_left = by_sum[0];
    let bottom_right = by_sum[3];

    let mut rest = [by_sum[1], by_sum[2]];
    rest.sort_by(|a, b| {
        cmp_f32(a.y - a.x, b.y - b.x)
            .then(cmp_f32(a.y, b.y))
            .then(cmp_f32(a.x, b.x))
    });

    [top_left, rest[0], bottom_right, rest[1]]
}

/// Clamps every coordinate of a quad to `[0, width] x [0, height]` without
/// reordering.
pub fn clip_to_image(points: &[Point; 4], width: u32, height: u32) -> [Point; 4] {
    let w = width as f32;
    let h = height as f32;
    points.map(|p| Point::new(p.x.clamp(0.0, w), p.y.clamp(0.0, h)))
}

/// A polygon represented by an ordered collection of points.
///
/// Detection uses this both for transient N-vertex contours and for the
/// 4-point quads it ultimately emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    /// The points that define the polygon.
    pub points: Vec<Point>,
}

impl BoundingBox {
    /// Creates a new bounding box from a vector of points.
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Creates an axis-aligned rectangle from corner coordinates.
    pub fn from_coords(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            points: vec![
                Point::new(x1, y1),
                Point::new(x2, y1),
                Point::new(x2, y2),
                Point::new(x1, y2),
            ],
        }
    }

    /// Creates a bounding box from an imageproc contour.
    pub fn from_contour(contour: &Contour<u32>) -> Self {
        let points = contour
            .points
            .iter()
            .map(|p| Point::new(p.x as f32, p.y as f32))
            .collect();
        Self { points }
    }

    /// Returns the four points of a quad, failing for other vertex counts.
    pub fn as_quad(&self) -> OcrResult<[Point; 4]> {
        if self.points.len() != 4 {
            return Err(OCRError::invalid_input(format!(
                "expected a 4-point quad, got {} points",
                self.points.len()
            )));
        }
        Ok([
            self.points[0],
            self.points[1],
            self.points[2],
            self.points[3],
        ])
    }

    /// Calculates the area of the polygon using the shoelace formula.
    ///
    /// Returns 0.0 for fewer than 3 points.
    pub fn area(&self) -> f32 {
        if self.points.len() < 3 {
            return 0.0;
        }
        let mut area = 0.0;
        let n = self.points.len();
        for i in 0..n {
            let j = (i + 1) % n;
            area += self.points[i].x * self.points[j].y;
            area -= self.points[j].x * self.points[i].y;
        }
        area.abs() / 2.0
    }

    /// Calculates the perimeter of the polygon.
    pub fn perimeter(&self) -> f32 {
        let mut perimeter = 0.0;
        let n = self.points.len();
        for i in 0..n {
            let j = (i + 1) % n;
            perimeter += self.points[i].distance(&self.points[j]);
        }
        perimeter
    }

    /// Minimum x-coordinate over all points, or 0.0 when empty.
    pub fn x_min(&self) -> f32 {
        finite_or_zero(
            self.points
                .iter()
                .map(|p| p.x)
                .fold(f32::INFINITY, f32::min),
        )
    }

    /// Maximum x-coordinate over all points, or 0.0 when empty.
    pub fn x_max(&self) -> f32 {
        finite_or_zero(
            self.points
                .iter()
                .map(|p| p.x)
                .fold(f32::NEG_INFINITY, f32::max),
        )
    }

    /// Minimum y-coordinate over all points, or 0.0 when empty.
    pub fn y_min(&self) -> f32 {
        finite_or_zero(
            self.points
                .iter()
                .map(|p| p.y)
                .fold(f32::INFINITY, f32::min),
        )
    }

    /// Maximum y-coordinate over all points, or 0.0 when empty.
    pub fn y_max(&self) -> f32 {
        finite_or_zero(
            self.points
                .iter()
                .map(|p| p.y)
                .fold(f32::NEG_INFINITY, f32::max),
        )
    }

    /// Height of the axis-aligned bounding rectangle.
    pub fn rect_height(&self) -> f32 {
        (self.y_max() - self.y_min()).max(0.0)
    }

    /// Geometric center (centroid) of the points.
    pub fn center(&self) -> Point {
        if self.points.is_empty() {
            return Point::new(0.0, 0.0);
        }
        let sum_x: f32 = self.points.iter().map(|p| p.x).sum();
        let sum_y: f32 = self.points.iter().map(|p| p.y).sum();
        let count = self.points.len() as f32;
        Point::new(sum_x / count, sum_y / count)
    }

    /// Computes the convex hull using Graham's scan.
    fn convex_hull(&self) -> BoundingBox {
        if self.points.len() < 3 {
            return self.clone();
        }

        let mut points = self.points.clone();

        // Lowest y (leftmost on ties) is the anchor.
        let mut start_idx = 0;
        for i in 1..points.len() {
            if points[i].y < points[start_idx].y
                || (points[i].y == points[start_idx].y && points[i].x < points[start_idx].x)
            {
                start_idx = i;
            }
        }
        points.swap(0, start_idx);
        let start_point = points[0];

        points[1..].sort_by(|a, b| {
            let cross = Self::cross_product(&start_point, a, b);
            if cross == 0.0 {
                let dist_a = (a.x - start_point.x).powi(2) + (a.y - start_point.y).powi(2);
                let dist_b = (b.x - start_point.x).powi(2) + (b.y - start_point.y).powi(2);
                cmp_f32(dist_a, dist_b)
            } else if cross > 0.0 {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        });

        let mut hull: Vec<Point> = Vec::new();
        for point in points {
            while hull.len() > 1
                && Self::cross_product(&hull[hull.len() - 2], &hull[hull.len() - 1], &point) <= 0.0
            {
                hull.pop();
            }
            hull.push(point);
        }

        BoundingBox::new(hull)
    }

    fn cross_product(p1: &Point, p2: &Point, p3: &Point) -> f32 {
        (p2.x - p1.x) * (p3.y - p1.y) - (p2.y - p1.y) * (p3.x - p1.x)
    }

    /// Computes the minimum-area oriented rectangle enclosing the polygon.
    ///
    /// Uses the rotating-calipers algorithm on the convex hull. For fewer
    /// than 3 points (or a degenerate hull) falls back to the axis-aligned
    /// bounding rectangle.
    pub fn min_area_rect(&self) -> MinAreaRect {
        let hull = self.convex_hull();
        let hull_points = &hull.points;

        if hull_points.len() < 3 {
            let (min_x, max_x) = match self.points.iter().map(|p| p.x).minmax().into_option() {
                Some(pair) => pair,
                None => return MinAreaRect::degenerate(),
            };
            let (min_y, max_y) = match self.points.iter().map(|p| p.y).minmax().into_option() {
                Some(pair) => pair,
                None => return MinAreaRect::degenerate(),
            };
            return MinAreaRect {
                center: Point::new((min_x + max_x) / 2.0, (min_y + max_y) / 2.0),
                width: max_x - min_x,
                height: max_y - min_y,
                angle: 0.0,
            };
        }

        let mut min_area = f32::MAX;
        let mut min_rect = MinAreaRect::degenerate();

        let n = hull_points.len();
        for i in 0..n {
            let j = (i + 1) % n;

            let edge_x = hull_points[j].x - hull_points[i].x;
            let edge_y = hull_points[j].y - hull_points[i].y;
            let edge_length = (edge_x * edge_x + edge_y * edge_y).sqrt();
            if edge_length < f32::EPSILON {
                continue;
            }

            // Project the hull onto the edge direction and its normal.
            let nx = edge_x / edge_length;
            let ny = edge_y / edge_length;
            let px = -ny;
            let py = nx;

            let mut min_n = f32::MAX;
            let mut max_n = f32::MIN;
            let mut min_p = f32::MAX;
            let mut max_p = f32::MIN;

            for point in hull_points.iter() {
                let proj_n = nx * (point.x - hull_points[i].x) + ny * (point.y - hull_points[i].y);
                min_n = min_n.min(proj_n);
                max_n = max_n.max(proj_n);

                let proj_p = px * (point.x - hull_points[i].x) + py * (point.y - hull_points[i].y);
                min_p = min_p.min(proj_p);
                max_p = max_p.max(proj_p);
            }

            let width = max_n - min_n;
            let height = max_p - min_p;
            let area = width * height;

            if area < min_area {
                min_area = area;

                let center_n = (min_n + max_n) / 2.0;
                let center_p = (min_p + max_p) / 2.0;

                min_rect = MinAreaRect {
                    center: Point::new(
                        hull_points[i].x + center_n * nx + center_p * px,
                        hull_points[i].y + center_n * ny + center_p * py,
                    ),
                    width,
                    height,
                    angle: f32::atan2(ny, nx) * 180.0 / PI,
                };
            }
        }

        min_rect
    }
}

/// A minimum-area oriented rectangle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MinAreaRect {
    /// The center point of the rectangle.
    pub center: Point,
    /// The width of the rectangle.
    pub width: f32,
    /// The height of the rectangle.
    pub height: f32,
    /// The rotation angle of the rectangle in degrees.
    pub angle: f32,
}

impl MinAreaRect {
    fn degenerate() -> Self {
        Self {
            center: Point::new(0.0, 0.0),
            width: 0.0,
            height: 0.0,
            angle: 0.0,
        }
    }

    /// The four corner points of the rectangle, in canonical clockwise order
    /// starting at the top-left.
    pub fn box_points(&self) -> [Point; 4] {
        let cos_a = (self.angle * PI / 180.0).cos();
        let sin_a = (self.angle * PI / 180.0).sin();

        let w_2 = self.width / 2.0;
        let h_2 = self.height / 2.0;

        let corners = [(-w_2, -h_2), (w_2, -h_2), (w_2, h_2), (-w_2, h_2)];
        let rotated = corners.map(|(x, y)| {
            Point::new(
                x * cos_a - y * sin_a + self.center.x,
                x * sin_a + y * cos_a + self.center.y,
            )
        });

        order_clockwise(&rotated)
    }

    /// Length of the shorter side.
    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

/// Expands a quad outward by `distance = area * ratio / perimeter`.
///
/// The expansion is a true polygon offset (Minkowski sum with a disk) with
/// round joins and closed-polygon end type; the resulting N-vertex polygon
/// is reduced to its minimum-area oriented rectangle and re-ordered
/// clockwise. A centroid-scale approximation is not an acceptable substitute
/// here: it underestimates the recovered extent by 5-15%.
///
/// Returns `None` when the offset produces no solution or the expanded
/// polygon is degenerate (area below one pixel).
pub fn unclip(quad: &[Point; 4], ratio: f32) -> Option<BoundingBox> {
    let source = BoundingBox::new(quad.to_vec());
    let area = source.area();
    let perimeter = source.perimeter();
    if area <= f32::EPSILON || perimeter <= f32::EPSILON {
        return None;
    }

    let distance = (area as f64) * (ratio as f64) / (perimeter as f64);

    let ring: Vec<Coord<i64>> = quad
        .iter()
        .map(|p| Coord {
            x: (p.x as f64 * CLIPPER_SCALE).round() as i64,
            y: (p.y as f64 * CLIPPER_SCALE).round() as i64,
        })
        .collect();
    let polygon = Polygon::new(LineString::from(ring), vec![]);

    let expanded = polygon.offset(
        distance * CLIPPER_SCALE,
        JoinType::Round(2.0),
        EndType::ClosedPolygon,
    );
    let first = expanded.0.first()?;

    // The exterior ring repeats its first coordinate; drop the closing point.
    let coords: Vec<&Coord<i64>> = first.exterior().coords().collect();
    if coords.len() <= 3 {
        return None;
    }
    let points: Vec<Point> = coords[..coords.len() - 1]
        .iter()
        .map(|c| {
            Point::new(
                (c.x as f64 / CLIPPER_SCALE) as f32,
                (c.y as f64 / CLIPPER_SCALE) as f32,
            )
        })
        .collect();

    let expanded_box = BoundingBox::new(points);
    if expanded_box.area() < 1.0 {
        return None;
    }

    let rect = expanded_box.min_area_rect();
    Some(BoundingBox::new(rect.box_points().to_vec()))
}

/// A reusable buffer for polygon scanline rasterization.
///
/// Used by detection postprocessing to average probability scores over the
/// interior of a contour without allocating a mask per candidate.
pub(crate) struct ScanlineBuffer {
    intersections: Vec<f32>,
}

impl ScanlineBuffer {
    /// Creates a buffer sized for polygons of up to `max_polygon_points`.
    pub(crate) fn new(max_polygon_points: usize) -> Self {
        Self {
            intersections: Vec::with_capacity(max_polygon_points),
        }
    }

    /// Accumulates prediction scores along one scanline inside the polygon.
    ///
    /// Returns the summed score and the number of pixels visited.
    pub(crate) fn process_scanline(
        &mut self,
        y: f32,
        polygon: &BoundingBox,
        start_x: usize,
        end_x: usize,
        pred: &ndarray::ArrayView2<f32>,
    ) -> (f32, usize) {
        self.intersections.clear();

        let n = polygon.points.len();
        for i in 0..n {
            let j = (i + 1) % n;
            let p1 = &polygon.points[i];
            let p2 = &polygon.points[j];

            if ((p1.y <= y && y < p2.y) || (p2.y <= y && y < p1.y))
                && (p2.y - p1.y).abs() > f32::EPSILON
            {
                let x = p1.x + (y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y);
                self.intersections.push(x);
            }
        }

        self.intersections.sort_by(|a, b| cmp_f32(*a, *b));

        let mut line_score = 0.0;
        let mut line_pixels = 0;

        for chunk in self.intersections.chunks(2) {
            if chunk.len() == 2 {
                let x1 = chunk[0].max(start_x as f32) as usize;
                let x2 = chunk[1].min(end_x as f32) as usize;

                if x1 < x2 && x1 >= start_x && x2 <= end_x {
                    for x in x1..x2 {
                        if (y as usize) < pred.shape()[0] && x < pred.shape()[1] {
                            line_score += pred[[y as usize, x]];
                            line_pixels += 1;
                        }
                    }
                }
            }
        }

        (line_score, line_pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f32) -> [Point; 4] {
        [
            Point::new(0.0, 0.0),
            Point::new(size, 0.0),
            Point::new(size, size),
            Point::new(0.0, size),
        ]
    }

    #[test]
    fn test_order_clockwise_canonicalizes_any_permutation() {
        let expected = square(10.0);
        let shuffled = [expected[2], expected[0], expected[3], expected[1]];
        assert_eq!(order_clockwise(&shuffled), expected);
    }

    #[test]
    fn test_order_clockwise_idempotent() {
        let quad = [
            Point::new(3.0, 1.0),
            Point::new(11.0, 2.0),
            Point::new(12.0, 7.0),
            Point::new(2.0, 6.0),
        ];
        let once = order_clockwise(&quad);
        assert_eq!(order_clockwise(&once), once);
    }

    #[test]
    fn test_order_clockwise_degenerate_sum_tie() {
        // (0,4) and (4,0) share x+y = 4; y-then-x tie-breaking keeps the
        // ordering deterministic.
        let quad = [
            Point::new(0.0, 4.0),
            Point::new(4.0, 0.0),
            Point::new(0.0, 0.0),
            Point::new(4.0, 4.0),
        ];
        let ordered = order_clockwise(&quad);
        assert_eq!(ordered[0], Point::new(0.0, 0.0));
        assert_eq!(ordered[1], Point::new(4.0, 0.0));
        assert_eq!(ordered[2], Point::new(4.0, 4.0));
        assert_eq!(ordered[3], Point::new(0.0, 4.0));
    }

    #[test]
    fn test_clip_to_image_clamps_without_reordering() {
        let quad = [
            Point::new(-5.0, -5.0),
            Point::new(120.0, -1.0),
            Point::new(120.0, 90.0),
            Point::new(-5.0, 90.0),
        ];
        let clipped = clip_to_image(&quad, 100, 80);
        assert_eq!(clipped[0], Point::new(0.0, 0.0));
        assert_eq!(clipped[1], Point::new(100.0, 0.0));
        assert_eq!(clipped[2], Point::new(100.0, 80.0));
        assert_eq!(clipped[3], Point::new(0.0, 80.0));
    }

    #[test]
    fn test_area_and_perimeter() {
        let bbox = BoundingBox::new(square(10.0).to_vec());
        assert!((bbox.area() - 100.0).abs() < 1e-4);
        assert!((bbox.perimeter() - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_min_area_rect_of_rotated_square() {
        // A square rotated by 45 degrees.
        let bbox = BoundingBox::new(vec![
            Point::new(5.0, 0.0),
            Point::new(10.0, 5.0),
            Point::new(5.0, 10.0),
            Point::new(0.0, 5.0),
        ]);
        let rect = bbox.min_area_rect();
        let side = (50.0f32).sqrt();
        assert!((rect.width - side).abs() < 0.1, "width {}", rect.width);
        assert!((rect.height - side).abs() < 0.1, "height {}", rect.height);
    }

    #[test]
    fn test_unclip_grows_by_offset_distance() {
        // 10x10 square, ratio 1.5: d = 100 * 1.5 / 40 = 3.75, so the
        // expanded min-area rect is ~17.5 per side.
        let result = unclip(&square(10.0), 1.5).expect("offset should succeed");
        let rect = result.min_area_rect();
        assert!(
            (rect.width - 17.5).abs() < 0.5,
            "unexpected width {}",
            rect.width
        );
        assert!(
            (rect.height - 17.5).abs() < 0.5,
            "unexpected height {}",
            rect.height
        );

        // Result is a canonical clockwise quad.
        let quad = result.as_quad().unwrap();
        assert_eq!(order_clockwise(&quad), quad);
    }

    #[test]
    fn test_unclip_degenerate_quad_returns_none() {
        let line = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 0.0),
        ];
        assert!(unclip(&line, 1.5).is_none());
    }

    #[test]
    fn test_scanline_covers_square_interior() {
        let polygon = BoundingBox::new(square(4.0).to_vec());
        let pred = ndarray::Array2::<f32>::ones((8, 8));
        let mut buffer = ScanlineBuffer::new(8);
        let (score, pixels) = buffer.process_scanline(2.0, &polygon, 0, 8, &pred.view());
        assert_eq!(pixels, 4);
        assert!((score - 4.0).abs() < 1e-5);
    }
}
