//! 2D geometry helpers shared by scene objects.

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Rays shorter than this are treated as not hitting anything, so a ray
/// leaving a surface does not re-hit the same surface.
pub const MIN_RAY_LENGTH: f64 = 1e-6;

/// A point as it appears in records: `{"x": .., "y": ..}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<Point> for DVec2 {
    fn from(p: Point) -> Self {
        DVec2::new(p.x, p.y)
    }
}

impl From<DVec2> for Point {
    fn from(v: DVec2) -> Self {
        Point::new(v.x, v.y)
    }
}

/// Rotate `v` counter-clockwise by `radians`.
pub fn rotate(v: DVec2, radians: f64) -> DVec2 {
    let (s, c) = radians.sin_cos();
    DVec2::new(c * v.x - s * v.y, s * v.x + c * v.y)
}

/// Reflect `direction` about the line whose normal is `normal` (unit length).
pub fn reflect(direction: DVec2, normal: DVec2) -> DVec2 {
    direction - 2.0 * direction.dot(normal) * normal
}

/// Where a ray from `origin` along `direction` crosses segment `a`-`b`.
pub fn ray_segment_intersection(origin: DVec2, direction: DVec2, a: DVec2, b: DVec2) -> Option<DVec2> {
    let edge = b - a;
    let denom = direction.perp_dot(edge);
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let to_a = a - origin;
    let t = to_a.perp_dot(edge) / denom;
    let s = to_a.perp_dot(direction) / denom;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }
    let hit = origin + t * direction;
    if t <= 0.0 || (hit - origin).length() < MIN_RAY_LENGTH {
        return None;
    }
    Some(hit)
}

pub fn distance_to_segment(p: DVec2, a: DVec2, b: DVec2) -> f64 {
    let edge = b - a;
    let len_sq = edge.length_squared();
    if len_sq == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(edge) / len_sq).clamp(0.0, 1.0);
    p.distance(a + t * edge)
}

pub fn snap_to_grid(p: DVec2, grid: f64) -> DVec2 {
    if grid <= 0.0 {
        return p;
    }
    (p / grid).round() * grid
}
