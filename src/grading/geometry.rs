//! Planar geometry helpers for KPI rules.
//!
//! Everything works in the local ENU plane: x east, y north, heading in
//! radians counter-clockwise from +x.

use nalgebra::{Point2, Rotation2, Vector2};
use std::f64::consts::PI;

/// Box corners in the order front-left, front-right, rear-right, rear-left.
pub type Corners = [Point2<f64>; 4];

/// Wrap an angle into `(-PI, PI]`.
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a <= -PI {
        a += 2.0 * PI;
    } else if a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// Signed heading difference `a - b`, wrapped.
#[inline]
pub fn yaw_diff(a: f64, b: f64) -> f64 {
    normalize_angle(a - b)
}

/// Corners of a `length` x `width` box centred at `center` with `heading`.
pub fn box_corners(center: Point2<f64>, heading: f64, length: f64, width: f64) -> Corners {
    let rot = Rotation2::new(heading);
    let hl = length / 2.0;
    let hw = width / 2.0;
    [
        center + rot * Vector2::new(hl, hw),
        center + rot * Vector2::new(hl, -hw),
        center + rot * Vector2::new(-hl, -hw),
        center + rot * Vector2::new(-hl, hw),
    ]
}

/// Express `point` in the body frame of a pose at `origin` facing `heading`.
pub fn to_body_frame(origin: Point2<f64>, heading: f64, point: Point2<f64>) -> Vector2<f64> {
    Rotation2::new(heading).inverse() * (point - origin)
}

/// Separating-axis overlap test for two convex quadrilaterals.
/// Touching edges count as overlap.
pub fn boxes_overlap(a: &Corners, b: &Corners) -> bool {
    for poly in [a, b] {
        for i in 0..4 {
            let edge = poly[(i + 1) % 4] - poly[i];
            let axis = Vector2::new(-edge.y, edge.x);
            if axis.norm_squared() == 0.0 {
                continue;
            }
            let (a_min, a_max) = project(a, &axis);
            let (b_min, b_max) = project(b, &axis);
            if a_max < b_min || b_max < a_min {
                return false;
            }
        }
    }
    true
}

fn project(poly: &Corners, axis: &Vector2<f64>) -> (f64, f64) {
    poly.iter()
        .map(|p| p.coords.dot(axis))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), d| {
            (lo.min(d), hi.max(d))
        })
}

/// Distance from `p` to the segment `a`-`b`.
pub fn point_to_segment_distance(a: Point2<f64>, b: Point2<f64>, p: Point2<f64>) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq == 0.0 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

/// Even-odd point-in-polygon test.
pub fn point_in_polygon(p: Point2<f64>, poly: &[Point2<f64>]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (poly[i], poly[j]);
        if (pi.y > p.y) != (pj.y > p.y) && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Strict containment in a convex box: `p` lies on the inner side of every
/// edge. Points on an edge are outside.
pub fn point_in_box(p: Point2<f64>, corners: &Corners) -> bool {
    let mut sign = 0.0_f64;
    for i in 0..4 {
        let edge = corners[(i + 1) % 4] - corners[i];
        let to_p = p - corners[i];
        let cross = edge.x * to_p.y - edge.y * to_p.x;
        if cross == 0.0 || (sign != 0.0 && cross.signum() != sign) {
            return false;
        }
        sign = cross.signum();
    }
    true
}

/// Which corners of `corners` lie strictly inside `other`.
pub fn corners_inside(corners: &Corners, other: &Corners) -> [bool; 4] {
    corners.map(|c| point_in_box(c, other))
}
