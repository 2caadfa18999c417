//! The closed set of object types a scene can hold.

use glam::DVec2;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::module_instance::ModuleInstance;
use crate::objects::{Blocker, TextLabel, TiltedMirror};
use crate::ray::{Canvas, Ray, RayInteraction, RayResponse};
use crate::registry::SceneContext;

pub const TYPE_KEY: &str = "type";

/// Type tags as they appear in records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneObjectKind {
    TiltedMirror,
    Blocker,
    TextLabel,
    Module,
}

impl SceneObjectKind {
    pub const ALL: [SceneObjectKind; 4] = [
        SceneObjectKind::TiltedMirror,
        SceneObjectKind::Blocker,
        SceneObjectKind::TextLabel,
        SceneObjectKind::Module,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            SceneObjectKind::TiltedMirror => "TiltedMirror",
            SceneObjectKind::Blocker => "Blocker",
            SceneObjectKind::TextLabel => "TextLabel",
            SceneObjectKind::Module => "ModuleObj",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SceneObject {
    TiltedMirror(TiltedMirror),
    Blocker(Blocker),
    TextLabel(TextLabel),
    Module(ModuleInstance),
}

impl SceneObject {
    pub fn kind(&self) -> SceneObjectKind {
        match self {
            SceneObject::TiltedMirror(_) => SceneObjectKind::TiltedMirror,
            SceneObject::Blocker(_) => SceneObjectKind::Blocker,
            SceneObject::TextLabel(_) => SceneObjectKind::TextLabel,
            SceneObject::Module(_) => SceneObjectKind::Module,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.kind().tag()
    }

    pub fn as_module(&self) -> Option<&ModuleInstance> {
        match self {
            SceneObject::Module(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_module_mut(&mut self) -> Option<&mut ModuleInstance> {
        match self {
            SceneObject::Module(m) => Some(m),
            _ => None,
        }
    }

    /// Move the object. Module instances move their control points and
    /// re-expand; their expanded objects are never moved directly.
    pub fn translate(&mut self, delta: DVec2, ctx: &SceneContext<'_>) {
        match self {
            SceneObject::TiltedMirror(m) => m.translate(delta),
            SceneObject::Blocker(b) => b.translate(delta),
            SceneObject::TextLabel(l) => l.translate(delta),
            SceneObject::Module(m) => m.translate(delta, ctx),
        }
    }

    /// Plain serializable record, `type` first.
    pub fn to_record(&self) -> Value {
        match self {
            SceneObject::TiltedMirror(m) => tagged(self.type_tag(), m),
            SceneObject::Blocker(b) => tagged(self.type_tag(), b),
            SceneObject::TextLabel(l) => tagged(self.type_tag(), l),
            SceneObject::Module(m) => m.to_record(),
        }
    }

    fn contract(&self) -> &dyn RayInteraction {
        match self {
            SceneObject::TiltedMirror(m) => m,
            SceneObject::Blocker(b) => b,
            SceneObject::TextLabel(l) => l,
            SceneObject::Module(m) => m,
        }
    }
}

fn tagged(tag: &str, fields: impl Serialize) -> Value {
    let mut out = Map::new();
    out.insert(TYPE_KEY.to_string(), Value::String(tag.to_string()));
    if let Ok(Value::Object(fields)) = serde_json::to_value(fields) {
        out.extend(fields);
    }
    Value::Object(out)
}

impl RayInteraction for SceneObject {
    fn intersect(&self, ray: &Ray) -> Option<DVec2> {
        self.contract().intersect(ray)
    }

    fn respond(&self, ray: &Ray, incident: DVec2) -> RayResponse {
        self.contract().respond(ray, incident)
    }

    fn draw(&self, canvas: &mut dyn Canvas) {
        self.contract().draw(canvas)
    }

    fn hit_test(&self, point: DVec2, tolerance: f64) -> bool {
        self.contract().hit_test(point, tolerance)
    }

    fn z_index(&self) -> i32 {
        self.contract().z_index()
    }

    fn error(&self) -> Option<String> {
        self.contract().error()
    }

    fn warning(&self) -> Option<String> {
        self.contract().warning()
    }
}
