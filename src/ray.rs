//! The capability set every optical object implements.
//!
//! The ray-tracing driver and the canvas backend live outside this crate; they
//! only see objects through [`RayInteraction`] and [`Canvas`].

use glam::DVec2;

#[derive(Debug, Clone, PartialEq)]
pub struct Ray {
    pub origin: DVec2,
    pub direction: DVec2,
    /// Brightness of the s- and p-polarized components.
    pub brightness_s: f64,
    pub brightness_p: f64,
    /// Wavelength in nm; `None` for monochrome simulation.
    pub wavelength: Option<f64>,
}

impl Ray {
    pub fn new(origin: DVec2, direction: DVec2) -> Self {
        Self {
            origin,
            direction,
            brightness_s: 0.5,
            brightness_p: 0.5,
            wavelength: None,
        }
    }

    pub fn with_wavelength(mut self, wavelength: f64) -> Self {
        self.wavelength = Some(wavelength);
        self
    }

    pub fn brightness(&self) -> f64 {
        self.brightness_s + self.brightness_p
    }
}

/// What happens to a ray at an incident point.
#[derive(Debug, Clone, PartialEq)]
pub enum RayResponse {
    Reflected(Ray),
    Refracted(Ray),
    Absorbed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stroke {
    Mirror,
    Blocker,
    ControlPoint,
}

/// Drawing surface provided by the host.
pub trait Canvas {
    fn line(&mut self, a: DVec2, b: DVec2, stroke: Stroke);
    fn point(&mut self, at: DVec2, stroke: Stroke);
    fn text(&mut self, at: DVec2, text: &str);
}

pub trait RayInteraction {
    /// Nearest point where `ray` hits this object, if it interacts with it.
    fn intersect(&self, _ray: &Ray) -> Option<DVec2> {
        None
    }

    /// Outgoing ray for `ray` hitting this object at `incident`.
    fn respond(&self, _ray: &Ray, _incident: DVec2) -> RayResponse {
        RayResponse::Absorbed
    }

    fn draw(&self, canvas: &mut dyn Canvas);

    fn hit_test(&self, point: DVec2, tolerance: f64) -> bool;

    fn z_index(&self) -> i32 {
        0
    }

    fn error(&self) -> Option<String> {
        None
    }

    fn warning(&self) -> Option<String> {
        None
    }
}
