//! Built-in optical and decorative objects.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::geometry::{distance_to_segment, ray_segment_intersection, reflect, rotate, Point};
use crate::ray::{Canvas, Ray, RayInteraction, RayResponse, Stroke};

fn default_wavelength() -> f64 {
    532.0
}

fn default_bandwidth() -> f64 {
    10.0
}

/// A flat mirror whose reflecting plane may be tilted away from its
/// physical surface, with optional dichroic band filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiltedMirror {
    pub p1: Point,
    pub p2: Point,
    /// Tilt of the reflecting normal relative to the surface normal, in degrees.
    #[serde(default)]
    pub tilt_angle: f64,
    /// Only reflect rays inside (or, inverted, outside) the wavelength band.
    #[serde(default)]
    pub filter: bool,
    #[serde(default)]
    pub invert: bool,
    #[serde(default = "default_wavelength")]
    pub wavelength: f64,
    #[serde(default = "default_bandwidth")]
    pub bandwidth: f64,
}

impl TiltedMirror {
    pub fn new(p1: Point, p2: Point) -> Self {
        Self {
            p1,
            p2,
            tilt_angle: 0.0,
            filter: false,
            invert: false,
            wavelength: default_wavelength(),
            bandwidth: default_bandwidth(),
        }
    }

    pub fn with_tilt(mut self, degrees: f64) -> Self {
        self.tilt_angle = degrees;
        self
    }

    pub fn with_band(mut self, wavelength: f64, bandwidth: f64, invert: bool) -> Self {
        self.filter = true;
        self.wavelength = wavelength;
        self.bandwidth = bandwidth;
        self.invert = invert;
        self
    }

    pub fn passes_filter(&self, ray: &Ray) -> bool {
        if !self.filter {
            return true;
        }
        match ray.wavelength {
            None => true,
            Some(wl) => ((wl - self.wavelength).abs() <= self.bandwidth) != self.invert,
        }
    }

    /// Unit normal the ray is reflected about: the surface normal rotated by the tilt.
    pub fn reflecting_normal(&self) -> Option<DVec2> {
        let edge = DVec2::from(self.p2) - DVec2::from(self.p1);
        let normal = edge.perp().try_normalize()?;
        Some(rotate(normal, self.tilt_angle.to_radians()))
    }

    pub fn translate(&mut self, delta: DVec2) {
        self.p1 = (DVec2::from(self.p1) + delta).into();
        self.p2 = (DVec2::from(self.p2) + delta).into();
    }
}

impl RayInteraction for TiltedMirror {
    fn intersect(&self, ray: &Ray) -> Option<DVec2> {
        if !self.passes_filter(ray) {
            return None;
        }
        ray_segment_intersection(ray.origin, ray.direction, self.p1.into(), self.p2.into())
    }

    fn respond(&self, ray: &Ray, incident: DVec2) -> RayResponse {
        let Some(normal) = self.reflecting_normal() else {
            return RayResponse::Absorbed;
        };
        RayResponse::Reflected(Ray {
            origin: incident,
            direction: reflect(ray.direction, normal),
            ..ray.clone()
        })
    }

    fn draw(&self, canvas: &mut dyn Canvas) {
        canvas.line(self.p1.into(), self.p2.into(), Stroke::Mirror);
    }

    fn hit_test(&self, point: DVec2, tolerance: f64) -> bool {
        distance_to_segment(point, self.p1.into(), self.p2.into()) <= tolerance
    }

    fn warning(&self) -> Option<String> {
        (self.p1 == self.p2).then(|| "mirror has zero length".to_string())
    }
}

/// Absorbs every ray that reaches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub p1: Point,
    pub p2: Point,
}

impl Blocker {
    pub fn translate(&mut self, delta: DVec2) {
        self.p1 = (DVec2::from(self.p1) + delta).into();
        self.p2 = (DVec2::from(self.p2) + delta).into();
    }
}

impl RayInteraction for Blocker {
    fn intersect(&self, ray: &Ray) -> Option<DVec2> {
        ray_segment_intersection(ray.origin, ray.direction, self.p1.into(), self.p2.into())
    }

    fn respond(&self, _ray: &Ray, _incident: DVec2) -> RayResponse {
        RayResponse::Absorbed
    }

    fn draw(&self, canvas: &mut dyn Canvas) {
        canvas.line(self.p1.into(), self.p2.into(), Stroke::Blocker);
    }

    fn hit_test(&self, point: DVec2, tolerance: f64) -> bool {
        distance_to_segment(point, self.p1.into(), self.p2.into()) <= tolerance
    }
}

fn default_font_size() -> f64 {
    24.0
}

/// Decorative text; never interacts with rays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextLabel {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
}

impl TextLabel {
    pub fn translate(&mut self, delta: DVec2) {
        self.x += delta.x;
        self.y += delta.y;
    }
}

impl RayInteraction for TextLabel {
    fn draw(&self, canvas: &mut dyn Canvas) {
        canvas.text(DVec2::new(self.x, self.y), &self.text);
    }

    fn hit_test(&self, point: DVec2, tolerance: f64) -> bool {
        point.distance(DVec2::new(self.x, self.y)) <= tolerance.max(self.font_size / 2.0)
    }

    // Labels draw above optics.
    fn z_index(&self) -> i32 {
        1
    }
}
