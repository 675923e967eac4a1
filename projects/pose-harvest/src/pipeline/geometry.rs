// Geometry kernel: keypoint algebra shared by pose merging and feature derivation.
//
// Every gated helper returns a fixed sentinel instead of failing: `MISSING` for
// angles and lengths, `MISSING_WIDTH` for signed widths.

use serde::{Deserialize, Serialize};

/// Sentinel for angles, lengths, yaw and slopes whose inputs are not confident enough.
pub const MISSING: f32 = -1.0;

/// Sentinel for signed widths whose inputs are not confident enough.
pub const MISSING_WIDTH: f32 = 0.0;

/// A keypoint in model-input pixel coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl KeyPoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// Pairs this point with the confidence level it must reach.
    pub fn gated(self, level: f32) -> Gated {
        Gated { point: self, level }
    }

    pub fn passes(&self, level: f32) -> bool {
        self.confidence >= level
    }

    /// Coordinate-wise merge: a zero coordinate is treated as missing and takes
    /// the other value, two non-zero coordinates are averaged.
    ///
    /// A point legitimately detected at x == 0 or y == 0 is indistinguishable
    /// from a missing one here. Confidence is left as is.
    pub fn merge(self, other: KeyPoint) -> KeyPoint {
        KeyPoint {
            x: merge_coordinate(self.x, other.x),
            y: merge_coordinate(self.y, other.y),
            confidence: self.confidence,
        }
    }
}

fn merge_coordinate(mine: f32, theirs: f32) -> f32 {
    if mine == 0.0 {
        theirs
    } else if theirs != 0.0 {
        (mine + theirs) * 0.5
    } else {
        mine
    }
}

/// A keypoint together with the confidence level gating its use.
#[derive(Debug, Clone, Copy)]
pub struct Gated {
    pub point: KeyPoint,
    pub level: f32,
}

impl Gated {
    pub fn passes(&self) -> bool {
        self.point.passes(self.level)
    }
}

pub fn distance(a: &KeyPoint, b: &KeyPoint) -> f32 {
    let dx = (b.x - a.x) as f64;
    let dy = (b.y - a.y) as f64;
    (dx * dx + dy * dy).sqrt() as f32
}

/// Angle between two 2D vectors in degrees, or `None` when either is zero length.
fn vector_angle(ax: f64, ay: f64, bx: f64, by: f64) -> Option<f32> {
    let magnitude = (ax * ax + ay * ay).sqrt() * (bx * bx + by * by).sqrt();
    if magnitude <= f64::EPSILON {
        return None;
    }
    let cos = ((ax * bx + ay * by) / magnitude).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees() as f32)
}

/// Angle at `p0` between the rays to `p1` and `p2`, in degrees within [0, 180].
pub fn angle(p0: Gated, p1: Gated, p2: Gated) -> f32 {
    if !(p0.passes() && p1.passes() && p2.passes()) {
        return MISSING;
    }
    let (o, a, b) = (p0.point, p1.point, p2.point);
    vector_angle(
        (a.x - o.x) as f64,
        (a.y - o.y) as f64,
        (b.x - o.x) as f64,
        (b.y - o.y) as f64,
    )
    .unwrap_or(MISSING)
}

/// Angle between the bone `a0 -> a1` and the bone `b0 -> b1`, in degrees.
pub fn bone_angle(a0: Gated, a1: Gated, b0: Gated, b1: Gated) -> f32 {
    if !(a0.passes() && a1.passes() && b0.passes() && b1.passes()) {
        return MISSING;
    }
    vector_angle(
        (a1.point.x - a0.point.x) as f64,
        (a1.point.y - a0.point.y) as f64,
        (b1.point.x - b0.point.x) as f64,
        (b1.point.y - b0.point.y) as f64,
    )
    .unwrap_or(MISSING)
}

/// Euclidean distance between two gated points.
pub fn length(p0: Gated, p1: Gated) -> f32 {
    if !(p0.passes() && p1.passes()) {
        return MISSING;
    }
    distance(&p0.point, &p1.point)
}

/// Distance between `p1` and `p2`, negated when `p2` lies clockwise of `p1`
/// as seen from `p0` (cross product of `p1 - p0` and `p2 - p0` below zero).
pub fn signed_length(p0: Gated, p1: Gated, p2: Gated) -> f32 {
    if !(p0.passes() && p1.passes() && p2.passes()) {
        return MISSING_WIDTH;
    }
    let (o, a, b) = (p0.point, p1.point, p2.point);
    let cross = (a.x - o.x) as f64 * (b.y - o.y) as f64 - (a.y - o.y) as f64 * (b.x - o.x) as f64;
    let len = distance(&a, &b);
    if cross >= 0.0 {
        len
    } else {
        -len
    }
}

/// Midpoint of a left/right pair. Falls back to whichever side passes `level`,
/// and to the zero point when neither does.
pub fn midpoint(a: KeyPoint, b: KeyPoint, level: f32) -> KeyPoint {
    match (a.passes(level), b.passes(level)) {
        (true, true) => KeyPoint::new(
            (a.x + b.x) * 0.5,
            (a.y + b.y) * 0.5,
            a.confidence.min(b.confidence),
        ),
        (true, false) => a,
        (false, true) => b,
        (false, false) => KeyPoint::default(),
    }
}

/// Average of the points passing `level`; confidence is the lowest among them.
pub fn centroid(level: f32, points: &[KeyPoint]) -> KeyPoint {
    let mut count = 0usize;
    let (mut sum_x, mut sum_y) = (0.0f32, 0.0f32);
    let mut min_confidence = 1.0f32;

    for p in points.iter().filter(|p| p.passes(level)) {
        min_confidence = min_confidence.min(p.confidence);
        sum_x += p.x;
        sum_y += p.y;
        count += 1;
    }

    if count == 0 {
        return KeyPoint::default();
    }
    KeyPoint::new(sum_x / count as f32, sum_y / count as f32, min_confidence)
}

/// Orders points counter-clockwise (ascending `atan2`) around their centroid.
///
/// `clip` and `intersection_over_union` depend on consistent winding and call
/// this on their inputs; callers may pass vertices in any order.
pub fn sort_counter_clockwise(points: &[KeyPoint]) -> Vec<KeyPoint> {
    if points.is_empty() {
        return Vec::new();
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / n;

    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| {
        let angle_a = (a.y as f64 - cy).atan2(a.x as f64 - cx);
        let angle_b = (b.y as f64 - cy).atan2(b.x as f64 - cx);
        angle_a.total_cmp(&angle_b)
    });
    sorted
}

/// Shoelace area, always non-negative.
pub fn polygon_area(points: &[KeyPoint]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0f64;
    for (i, p1) in points.iter().enumerate() {
        let p2 = &points[(i + 1) % points.len()];
        twice_area += p1.x as f64 * p2.y as f64 - p2.x as f64 * p1.y as f64;
    }
    (twice_area.abs() / 2.0) as f32
}

fn is_inside(a: &KeyPoint, b: &KeyPoint, p: &KeyPoint) -> bool {
    (b.x - a.x) as f64 * (p.y - a.y) as f64 > (b.y - a.y) as f64 * (p.x - a.x) as f64
}

/// Intersection of the line through `a, b` with the line through `p, q`.
/// Parallel lines yield `p` rather than the origin, keeping clipped vertices
/// on the subject edge.
fn intersect(a: &KeyPoint, b: &KeyPoint, p: &KeyPoint, q: &KeyPoint) -> KeyPoint {
    let confidence = a
        .confidence
        .max(b.confidence)
        .max(p.confidence)
        .max(q.confidence);

    let a1 = (b.y - a.y) as f64;
    let b1 = (a.x - b.x) as f64;
    let c1 = a1 * a.x as f64 + b1 * a.y as f64;

    let a2 = (q.y - p.y) as f64;
    let b2 = (p.x - q.x) as f64;
    let c2 = a2 * p.x as f64 + b2 * p.y as f64;

    let det = a1 * b2 - a2 * b1;
    if det.abs() < 1e-10 {
        return KeyPoint::new(p.x, p.y, confidence);
    }

    KeyPoint::new(
        ((b2 * c1 - b1 * c2) / det) as f32,
        ((a1 * c2 - a2 * c1) / det) as f32,
        confidence,
    )
}

/// Sutherland–Hodgman clipping of one convex polygon by another.
///
/// Both polygons are re-wound counter-clockwise first. The result is the
/// (possibly empty) intersection polygon.
pub fn clip(subject: &[KeyPoint], clip_polygon: &[KeyPoint]) -> Vec<KeyPoint> {
    let clip_polygon = sort_counter_clockwise(clip_polygon);
    let mut output = sort_counter_clockwise(subject);

    for (i, a) in clip_polygon.iter().enumerate() {
        if output.is_empty() {
            break;
        }
        let b = &clip_polygon[(i + 1) % clip_polygon.len()];
        let input = std::mem::take(&mut output);

        for (j, p) in input.iter().enumerate() {
            let q = &input[(j + 1) % input.len()];
            match (is_inside(a, b, p), is_inside(a, b, q)) {
                (true, true) => output.push(*q),
                (true, false) => output.push(intersect(a, b, p, q)),
                (false, true) => {
                    output.push(intersect(a, b, p, q));
                    output.push(*q);
                }
                (false, false) => {}
            }
        }
    }

    output
}

/// Intersection-over-union of two convex polygons given in any vertex order.
pub fn intersection_over_union(a: &[KeyPoint], b: &[KeyPoint]) -> f32 {
    if a.len() < 3 || b.len() < 3 {
        return 0.0;
    }
    let a = sort_counter_clockwise(a);
    let b = sort_counter_clockwise(b);

    let area_a = polygon_area(&a);
    let area_b = polygon_area(&b);
    let intersection = polygon_area(&clip(&a, &b));

    let union = area_a + area_b - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, BooleanOps};
    use geo_types::{LineString, Polygon};

    fn kp(x: f32, y: f32) -> KeyPoint {
        KeyPoint::new(x, y, 1.0)
    }

    fn square(x: f32, y: f32, side: f32) -> Vec<KeyPoint> {
        vec![
            kp(x, y),
            kp(x + side, y),
            kp(x + side, y + side),
            kp(x, y + side),
        ]
    }

    fn to_geo(points: &[KeyPoint]) -> Polygon<f64> {
        let coords: Vec<(f64, f64)> = sort_counter_clockwise(points)
            .iter()
            .map(|p| (p.x as f64, p.y as f64))
            .collect();
        Polygon::new(LineString::from(coords), vec![])
    }

    #[test]
    fn test_iou_of_polygon_with_itself_is_one() {
        let sq = square(10.0, 10.0, 50.0);
        assert!((intersection_over_union(&sq, &sq) - 1.0).abs() < 1e-6);

        let tri = vec![kp(0.0, 0.0), kp(40.0, 5.0), kp(12.0, 33.0)];
        assert!((intersection_over_union(&tri, &tri) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_iou_of_disjoint_polygons_is_zero() {
        let a = square(0.0, 0.0, 10.0);
        let b = square(100.0, 100.0, 10.0);
        assert_eq!(intersection_over_union(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        // Intersection 50, union 150.
        let a = square(0.0, 0.0, 10.0);
        let b = square(5.0, 0.0, 10.0);
        assert!((intersection_over_union(&a, &b) - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_iou_ignores_vertex_order() {
        let a = square(0.0, 0.0, 10.0);
        let shuffled = vec![a[2], a[0], a[3], a[1]];
        let b = square(3.0, 4.0, 10.0);
        let expected = intersection_over_union(&a, &b);
        assert!((intersection_over_union(&shuffled, &b) - expected).abs() < 1e-6);
        assert!(expected > 0.0);
    }

    #[test]
    fn test_iou_matches_geo_boolean_intersection() {
        let a = vec![kp(0.0, 0.0), kp(30.0, 4.0), kp(26.0, 28.0), kp(2.0, 22.0)];
        let b = vec![kp(10.0, -5.0), kp(40.0, 10.0), kp(18.0, 35.0)];

        let ga = to_geo(&a);
        let gb = to_geo(&b);
        let inter = ga.intersection(&gb).unsigned_area();
        let union = ga.unsigned_area() + gb.unsigned_area() - inter;
        let expected = (inter / union) as f32;

        assert!((intersection_over_union(&a, &b) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_iou_requires_three_points() {
        let line = vec![kp(0.0, 0.0), kp(10.0, 10.0)];
        let sq = square(0.0, 0.0, 10.0);
        assert_eq!(intersection_over_union(&line, &sq), 0.0);
    }

    #[test]
    fn test_iou_of_collapsed_polygons_is_zero() {
        let zeros = vec![KeyPoint::default(); 4];
        assert_eq!(intersection_over_union(&zeros, &zeros), 0.0);
    }

    #[test]
    fn test_intersect_of_parallel_lines_is_edge_start() {
        let crossing = intersect(&kp(0.0, 0.0), &kp(10.0, 0.0), &kp(0.0, 5.0), &kp(10.0, 5.0));
        assert_eq!((crossing.x, crossing.y), (0.0, 5.0));

        let crossing = intersect(&kp(0.0, 0.0), &kp(10.0, 0.0), &kp(4.0, -5.0), &kp(4.0, 5.0));
        assert!((crossing.x - 4.0).abs() < 1e-6 && crossing.y.abs() < 1e-6);
    }

    #[test]
    fn test_polygon_area_shoelace() {
        assert!((polygon_area(&square(0.0, 0.0, 4.0)) - 16.0).abs() < 1e-6);
        let tri = vec![kp(0.0, 0.0), kp(4.0, 0.0), kp(0.0, 3.0)];
        assert!((polygon_area(&tri) - 6.0).abs() < 1e-6);
        assert_eq!(polygon_area(&tri[..2]), 0.0);
    }

    #[test]
    fn test_clip_contained_polygon() {
        let outer = square(0.0, 0.0, 100.0);
        let inner = square(20.0, 20.0, 10.0);
        let clipped = clip(&inner, &outer);
        assert!((polygon_area(&clipped) - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_angle_right_angle() {
        let o = kp(0.0, 0.0).gated(0.5);
        let a = kp(10.0, 0.0).gated(0.5);
        let b = kp(0.0, 10.0).gated(0.5);
        assert!((angle(o, a, b) - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_angle_gate_and_degenerate_return_sentinel() {
        let o = KeyPoint::new(0.0, 0.0, 0.4).gated(0.5);
        let a = kp(10.0, 0.0).gated(0.5);
        let b = kp(0.0, 10.0).gated(0.5);
        assert_eq!(angle(o, a, b), MISSING);

        // Coincident points would divide by zero.
        let p = kp(3.0, 3.0).gated(0.5);
        assert_eq!(angle(p, p, b), MISSING);
    }

    #[test]
    fn test_straight_angle_never_nan() {
        let o = kp(0.0, 0.0).gated(0.0);
        let a = kp(1e-3, 0.0).gated(0.0);
        let b = kp(-7.0, 0.0).gated(0.0);
        let value = angle(o, a, b);
        assert!(!value.is_nan());
        assert!((value - 180.0).abs() < 1e-3);
    }

    #[test]
    fn test_bone_angle_parallel_bones() {
        let a0 = kp(0.0, 0.0).gated(0.1);
        let a1 = kp(0.0, 5.0).gated(0.1);
        let b0 = kp(10.0, 0.0).gated(0.1);
        let b1 = kp(10.0, -5.0).gated(0.1);
        assert!((bone_angle(a0, a1, b0, b1) - 180.0).abs() < 1e-4);
    }

    #[test]
    fn test_signed_length_sign_follows_cross_product() {
        let origin = kp(0.0, 0.0).gated(0.5);
        let left = kp(-3.0, 4.0).gated(0.5);
        let right = kp(3.0, 4.0).gated(0.5);
        assert!((signed_length(origin, right, left) - 6.0).abs() < 1e-5);
        assert!((signed_length(origin, left, right) + 6.0).abs() < 1e-5);

        let weak = KeyPoint::new(3.0, 4.0, 0.1).gated(0.5);
        assert_eq!(signed_length(origin, left, weak), MISSING_WIDTH);
    }

    #[test]
    fn test_midpoint_fallbacks() {
        let a = KeyPoint::new(0.0, 0.0, 0.9);
        let b = KeyPoint::new(10.0, 20.0, 0.7);
        assert_eq!(midpoint(a, b, 0.5), KeyPoint::new(5.0, 10.0, 0.7));
        assert_eq!(midpoint(a, b, 0.8), a);
        assert_eq!(midpoint(a, b, 0.95), KeyPoint::default());
    }

    #[test]
    fn test_centroid_uses_passing_points_only() {
        let points = [
            KeyPoint::new(0.0, 0.0, 0.9),
            KeyPoint::new(10.0, 10.0, 0.7),
            KeyPoint::new(100.0, 100.0, 0.2),
        ];
        let c = centroid(0.5, &points);
        assert_eq!(c, KeyPoint::new(5.0, 5.0, 0.7));
        assert_eq!(centroid(0.95, &points), KeyPoint::default());
    }

    #[test]
    fn test_keypoint_merge_treats_zero_as_missing() {
        let merged = KeyPoint::new(0.0, 10.0, 0.8).merge(KeyPoint::new(6.0, 20.0, 0.1));
        assert_eq!(merged, KeyPoint::new(6.0, 15.0, 0.8));

        let kept = KeyPoint::new(4.0, 8.0, 0.5).merge(KeyPoint::default());
        assert_eq!(kept, KeyPoint::new(4.0, 8.0, 0.5));
    }
}
