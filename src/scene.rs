//! The scene: top-level objects plus everything needed to (re)expand the
//! module instances among them.

use std::sync::Arc;

use glam::DVec2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diagnostics::ExpansionDiagnostic;
use crate::error::SceneError;
use crate::expression::ExprEngine;
use crate::geometry::snap_to_grid;
use crate::module_def::{ModuleDefinition, ModuleLibrary};
use crate::module_instance::{ModuleInstance, PlacementState};
use crate::ray::{Canvas, Ray, RayInteraction};
use crate::registry::{Registry, SceneContext};
use crate::scene_object::SceneObject;

/// Persisted scene: module definitions, top-level object records and the
/// random seed expansions draw from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDocument {
    #[serde(default)]
    pub modules: Map<String, Value>,
    #[serde(default)]
    pub objs: Vec<Value>,
    #[serde(default)]
    pub random_seed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<f64>,
}

pub struct Scene {
    objects: Vec<SceneObject>,
    modules: ModuleLibrary,
    registry: Registry,
    engine: ExprEngine,
    random_seed: u64,
    grid_size: Option<f64>,
}

impl Scene {
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    pub fn with_seed(random_seed: u64) -> Self {
        Self::with_registry(Registry::standard(), random_seed)
    }

    pub fn with_registry(registry: Registry, random_seed: u64) -> Self {
        Self {
            objects: Vec::new(),
            modules: ModuleLibrary::new(),
            registry,
            engine: ExprEngine::new(random_seed),
            random_seed,
            grid_size: None,
        }
    }

    pub fn from_document(doc: &SceneDocument) -> Result<Self, SceneError> {
        let mut scene = Self::with_seed(doc.random_seed);
        scene.grid_size = doc.grid_size;
        for (name, definition) in &doc.modules {
            scene.define_module(name, definition)?;
        }
        for record in &doc.objs {
            scene.add_record(record)?;
        }
        log::debug!(
            "loaded scene: {} modules, {} objects, seed {}",
            scene.modules.len(),
            scene.objects.len(),
            scene.random_seed
        );
        Ok(scene)
    }

    pub fn from_json(value: &Value) -> Result<Self, SceneError> {
        let doc: SceneDocument =
            serde_json::from_value(value.clone()).map_err(|e| SceneError::invalid_record("scene", e))?;
        Self::from_document(&doc)
    }

    pub fn to_document(&self) -> SceneDocument {
        SceneDocument {
            modules: self
                .modules
                .iter()
                .map(|(name, def)| (name.to_string(), def.to_json()))
                .collect(),
            objs: self.objects.iter().map(SceneObject::to_record).collect(),
            random_seed: self.random_seed,
            grid_size: self.grid_size,
        }
    }

    fn context(&self) -> SceneContext<'_> {
        SceneContext::new(&self.registry, &self.modules, &self.engine)
    }

    pub fn engine(&self) -> &ExprEngine {
        &self.engine
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub fn grid_size(&self) -> Option<f64> {
        self.grid_size
    }

    pub fn set_grid_size(&mut self, grid_size: Option<f64>) {
        self.grid_size = grid_size.filter(|g| *g > 0.0);
    }

    /// Add or replace a module definition. Top-level instances of a replaced
    /// definition are rebound to the new one and re-expanded.
    pub fn define_module(&mut self, name: &str, definition: &Value) -> Result<Arc<ModuleDefinition>, SceneError> {
        let compiled = ModuleDefinition::from_json(name, definition, &self.engine)?;
        let module = self.modules.insert(name, compiled);

        let ctx = SceneContext::new(&self.registry, &self.modules, &self.engine);
        for object in &mut self.objects {
            if let Some(instance) = object.as_module_mut().filter(|m| m.module_name() == name) {
                instance.rebind(Arc::clone(&module), &ctx);
            }
        }
        Ok(module)
    }

    pub fn module(&self, name: &str) -> Option<&Arc<ModuleDefinition>> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> &ModuleLibrary {
        &self.modules
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn get(&self, index: usize) -> Option<&SceneObject> {
        self.objects.get(index)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Instantiate a record through the registry and append it.
    pub fn add_record(&mut self, record: &Value) -> Result<usize, SceneError> {
        let object = self.registry.instantiate(record, &self.context())?;
        Ok(self.add_object(object))
    }

    pub fn add_object(&mut self, object: SceneObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Result<SceneObject, SceneError> {
        self.check_index(index)?;
        Ok(self.objects.remove(index))
    }

    fn check_index(&self, index: usize) -> Result<(), SceneError> {
        if index < self.objects.len() {
            Ok(())
        } else {
            Err(SceneError::IndexOutOfRange {
                index,
                len: self.objects.len(),
            })
        }
    }

    fn module_at(&mut self, index: usize) -> Result<(&mut ModuleInstance, SceneContext<'_>), SceneError> {
        let len = self.objects.len();
        let ctx = SceneContext::new(&self.registry, &self.modules, &self.engine);
        let instance = self
            .objects
            .get_mut(index)
            .ok_or(SceneError::IndexOutOfRange { index, len })?
            .as_module_mut()
            .ok_or(SceneError::NotAModule(index))?;
        Ok((instance, ctx))
    }

    /// Start placing a new instance of `name`. Returns its index.
    pub fn begin_module_placement(&mut self, name: &str) -> Result<usize, SceneError> {
        let module = self
            .modules
            .get(name)
            .cloned()
            .ok_or_else(|| SceneError::UnknownModule(name.to_string()))?;
        let instance = ModuleInstance::begin_placement(name, module, &self.context());
        Ok(self.add_object(SceneObject::Module(instance)))
    }

    /// Place the next control point of the instance at `index`, snapped to
    /// the grid when one is set.
    pub fn place_point(&mut self, index: usize, point: DVec2) -> Result<PlacementState, SceneError> {
        let point = match self.grid_size {
            Some(grid) => snap_to_grid(point, grid),
            None => point,
        };
        let (instance, ctx) = self.module_at(index)?;
        instance.place_point(point, &ctx)
    }

    pub fn translate(&mut self, index: usize, delta: DVec2) -> Result<(), SceneError> {
        self.check_index(index)?;
        let ctx = SceneContext::new(&self.registry, &self.modules, &self.engine);
        self.objects[index].translate(delta, &ctx);
        Ok(())
    }

    pub fn set_module_param(&mut self, index: usize, name: &str, value: f64) -> Result<(), SceneError> {
        let (instance, ctx) = self.module_at(index)?;
        instance.set_param(name, value, &ctx)
    }

    pub fn set_module_point(&mut self, index: usize, point_index: usize, point: DVec2) -> Result<(), SceneError> {
        let (instance, ctx) = self.module_at(index)?;
        instance.set_point(point_index, point, &ctx)
    }

    /// Restart the random stream from the scene seed and re-expand every
    /// module instance in scene order.
    pub fn refresh(&mut self) {
        self.engine.reseed(self.random_seed);
        let ctx = SceneContext::new(&self.registry, &self.modules, &self.engine);
        for object in &mut self.objects {
            if let Some(instance) = object.as_module_mut() {
                instance.expand_objs(&ctx);
            }
        }
    }

    pub fn reseed(&mut self, random_seed: u64) {
        self.random_seed = random_seed;
        self.refresh();
    }

    /// Replace the module instance at `index` with its expanded objects,
    /// in place. Returns how many objects were spliced in.
    pub fn demodulize(&mut self, index: usize) -> Result<usize, SceneError> {
        self.check_index(index)?;
        if self.objects[index].as_module().is_none() {
            return Err(SceneError::NotAModule(index));
        }
        let expanded = match self.objects.remove(index) {
            SceneObject::Module(instance) => instance.into_objects(),
            other => vec![other],
        };
        let count = expanded.len();
        self.objects.splice(index..index, expanded);
        log::debug!("demodulized object #{} into {} objects", index, count);
        Ok(count)
    }

    /// Every object the ray tracer should see, with module instances
    /// replaced by their expanded objects.
    pub fn optical_objects(&self) -> Vec<&SceneObject> {
        fn flatten<'a>(objects: &'a [SceneObject], out: &mut Vec<&'a SceneObject>) {
            for object in objects {
                match object {
                    SceneObject::Module(instance) => flatten(instance.objects(), out),
                    other => out.push(other),
                }
            }
        }
        let mut out = Vec::new();
        flatten(&self.objects, &mut out);
        out
    }

    /// Closest object hit by `ray`, with the incident point.
    pub fn nearest_hit(&self, ray: &Ray) -> Option<(&SceneObject, DVec2)> {
        self.optical_objects()
            .into_iter()
            .filter_map(|object| object.intersect(ray).map(|hit| (object, hit)))
            .min_by(|a, b| {
                a.1.distance_squared(ray.origin)
                    .total_cmp(&b.1.distance_squared(ray.origin))
            })
    }

    /// Index of the topmost top-level object under `point`.
    pub fn pick(&self, point: DVec2, tolerance: f64) -> Option<usize> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, object)| object.hit_test(point, tolerance))
            .max_by_key(|(i, object)| (object.z_index(), *i))
            .map(|(i, _)| i)
    }

    /// Draw every object, lower z-index first.
    pub fn draw(&self, canvas: &mut dyn Canvas) {
        let mut order: Vec<&SceneObject> = self.objects.iter().collect();
        order.sort_by_key(|object| object.z_index());
        for object in order {
            object.draw(canvas);
        }
    }

    fn report(&self, item: impl Fn(&SceneObject) -> Option<String>) -> Option<String> {
        let lines: Vec<String> = self
            .objects
            .iter()
            .enumerate()
            .filter_map(|(i, object)| item(object).map(|msg| format!("obj #{} ({}): {}", i, object.type_tag(), msg)))
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    }

    pub fn error_report(&self) -> Option<String> {
        self.report(|object| object.error())
    }

    pub fn warning_report(&self) -> Option<String> {
        self.report(|object| object.warning())
    }

    /// Structured diagnostics for top-level instances whose last expansion failed.
    pub fn diagnostics(&self) -> Vec<(usize, ExpansionDiagnostic)> {
        self.objects
            .iter()
            .enumerate()
            .filter_map(|(i, object)| object.as_module()?.diagnostic().map(|d| (i, d)))
            .collect()
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::objects::TiltedMirror;
    use crate::ray::{RayResponse, Stroke};
    use serde_json::json;

    fn fan() -> Value {
        json!({
            "numPoints": 1,
            "params": ["n=1:1:20:3", "tilt=-45:1:45:0"],
            "objs": [{
                "for": "i=1:1:n",
                "type": "TiltedMirror",
                "p1": {"x": "`x_1 + i*10`", "y": "`y_1 - 1`"},
                "p2": {"x": "`x_1 + i*10`", "y": "`y_1 + 1`"},
                "tiltAngle": "`tilt`"
            }]
        })
    }

    fn scene_with_fan() -> Scene {
        let mut scene = Scene::new();
        scene.define_module("fan", &fan()).unwrap();
        scene
            .add_record(&json!({"type": "ModuleObj", "module": "fan", "points": [{"x": 0, "y": 0}]}))
            .unwrap();
        scene
    }

    #[derive(Default)]
    struct Recorder {
        lines: Vec<(DVec2, DVec2, Stroke)>,
        points: Vec<DVec2>,
        texts: Vec<String>,
    }

    impl Canvas for Recorder {
        fn line(&mut self, a: DVec2, b: DVec2, stroke: Stroke) {
            self.lines.push((a, b, stroke));
        }
        fn point(&mut self, at: DVec2, _stroke: Stroke) {
            self.points.push(at);
        }
        fn text(&mut self, _at: DVec2, text: &str) {
            self.texts.push(text.to_string());
        }
    }

    #[test]
    fn test_demodulize_splices_in_place() {
        let mut scene = scene_with_fan();
        scene
            .add_record(&json!({"type": "TextLabel", "x": 0, "y": 0, "text": "after"}))
            .unwrap();
        let expanded: Vec<Value> = scene.get(0).unwrap().as_module().unwrap().objects().iter().map(SceneObject::to_record).collect();

        assert_eq!(scene.demodulize(0).unwrap(), 3);
        assert_eq!(scene.len(), 4);
        let records: Vec<Value> = scene.objects()[..3].iter().map(SceneObject::to_record).collect();
        assert_eq!(records, expanded);
        assert_eq!(scene.get(3).unwrap().type_tag(), "TextLabel");
        assert!(scene.objects().iter().all(|o| o.as_module().is_none()));
    }

    #[test]
    fn test_demodulize_rejects_plain_objects() {
        let mut scene = scene_with_fan();
        scene.demodulize(0).unwrap();
        assert_eq!(scene.demodulize(0).unwrap_err(), SceneError::NotAModule(0));
        assert_eq!(
            scene.demodulize(10).unwrap_err(),
            SceneError::IndexOutOfRange { index: 10, len: 3 }
        );
    }

    #[test]
    fn test_placement_snaps_to_grid() {
        let mut scene = Scene::new();
        scene.set_grid_size(Some(5.0));
        scene.define_module("fan", &fan()).unwrap();
        let index = scene.begin_module_placement("fan").unwrap();

        let state = scene.place_point(index, DVec2::new(11.0, 6.5)).unwrap();
        assert_eq!(state, PlacementState::Complete);
        let instance = scene.get(index).unwrap().as_module().unwrap();
        assert_eq!(instance.points(), &[DVec2::new(10.0, 5.0)]);
        assert_eq!(instance.objects().len(), 3);
    }

    #[test]
    fn test_unknown_module_placement() {
        let mut scene = Scene::new();
        assert_eq!(
            scene.begin_module_placement("missing").unwrap_err(),
            SceneError::UnknownModule("missing".into())
        );
    }

    #[test]
    fn test_edit_param_reexpands() {
        let mut scene = scene_with_fan();
        scene.set_module_param(0, "n", 5.0).unwrap();
        scene.set_module_param(0, "tilt", 10.0).unwrap();
        let instance = scene.get(0).unwrap().as_module().unwrap();
        assert_eq!(instance.objects().len(), 5);
        match &instance.objects()[0] {
            SceneObject::TiltedMirror(m) => assert_eq!(m.tilt_angle, 10.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_translate_module_rederives_objects() {
        let mut scene = scene_with_fan();
        scene.translate(0, DVec2::new(0.0, 100.0)).unwrap();
        let optical = scene.optical_objects();
        match optical[0] {
            SceneObject::TiltedMirror(m) => assert_eq!(m.p1, Point::new(10.0, 99.0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_nearest_hit_flattens_modules() {
        let mut scene = scene_with_fan();
        scene.add_object(SceneObject::TiltedMirror(TiltedMirror::new(
            Point::new(50.0, -1.0),
            Point::new(50.0, 1.0),
        )));
        let ray = Ray::new(DVec2::new(0.0, 0.0), DVec2::new(1.0, 0.0));
        let (object, hit) = scene.nearest_hit(&ray).unwrap();

        assert!((hit - DVec2::new(10.0, 0.0)).length() < 1e-9);
        match object.respond(&ray, hit) {
            RayResponse::Reflected(out) => assert!((out.direction - DVec2::new(-1.0, 0.0)).length() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_report_and_diagnostics() {
        let mut scene = Scene::new();
        scene
            .define_module("bad", &json!({"objs": [{"type": "TextLabel", "x": "`nope`", "y": 0}]}))
            .unwrap();
        scene.add_record(&json!({"type": "ModuleObj", "module": "bad"})).unwrap();
        scene
            .add_record(&json!({"type": "TiltedMirror", "p1": {"x": 1, "y": 1}, "p2": {"x": 1, "y": 1}}))
            .unwrap();

        let errors = scene.error_report().unwrap();
        assert!(errors.starts_with("obj #0 (ModuleObj): "));
        assert!(errors.contains("nope"));
        assert_eq!(scene.warning_report().unwrap(), "obj #1 (TiltedMirror): mirror has zero length");

        let diagnostics = scene.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].0, 0);
        assert_eq!(diagnostics[0].1.trail, vec!["element [0]".to_string(), "field `x`".to_string()]);
    }

    #[test]
    fn test_seed_reproduces_random_layouts() {
        let doc: SceneDocument = serde_json::from_value(json!({
            "randomSeed": 42,
            "modules": {
                "scatter": {"objs": [{"for": "i=1:1:4", "type": "TextLabel", "x": "`random()*100`", "y": "`random()*100`"}]}
            },
            "objs": [{"type": "ModuleObj", "module": "scatter"}]
        }))
        .unwrap();

        let first = Scene::from_document(&doc).unwrap().to_document();
        let second = Scene::from_document(&doc).unwrap().to_document();
        assert_eq!(first, second);

        let mut scene = Scene::from_document(&doc).unwrap();
        let labels = |scene: &Scene| -> Vec<Value> {
            scene.optical_objects().iter().map(|o| o.to_record()).collect()
        };
        let original = labels(&scene);
        scene.refresh();
        assert_eq!(labels(&scene), original);
        scene.reseed(43);
        assert_ne!(labels(&scene), original);
    }

    #[test]
    fn test_document_round_trip() {
        let mut scene = scene_with_fan();
        scene.set_module_param(0, "n", 2.0).unwrap();
        scene.set_grid_size(Some(10.0));
        let doc = scene.to_document();

        assert_eq!(doc.objs[0]["params"]["n"], json!(2.0));
        assert_eq!(doc.grid_size, Some(10.0));

        let restored = Scene::from_document(&doc).unwrap();
        assert_eq!(restored.to_document(), doc);
        assert_eq!(restored.optical_objects().len(), 2);
    }

    #[test]
    fn test_redefinition_rebinds_instances() {
        let mut scene = scene_with_fan();
        let mut wider = fan();
        wider["params"] = json!(["n=1:1:20:6", "tilt=-45:1:45:0"]);
        scene.define_module("fan", &wider).unwrap();
        let instance = scene.get(0).unwrap().as_module().unwrap();
        // n keeps the instance's value
        assert_eq!(instance.param("n"), Some(3.0));
        assert!(Arc::ptr_eq(instance.definition(), scene.module("fan").unwrap()));
    }

    #[test]
    fn test_draw_order_and_pick() {
        let mut scene = scene_with_fan();
        scene
            .add_record(&json!({"type": "TextLabel", "x": 10, "y": 0, "text": "top"}))
            .unwrap();
        let mut canvas = Recorder::default();
        scene.draw(&mut canvas);

        assert_eq!(canvas.lines.len(), 3);
        assert_eq!(canvas.points, vec![DVec2::ZERO]);
        assert_eq!(canvas.texts, vec!["top".to_string()]);
        assert_eq!(scene.pick(DVec2::new(10.0, 0.0), 0.5), Some(1));
        assert_eq!(scene.pick(DVec2::new(30.0, 0.5), 0.5), Some(0));
        assert_eq!(scene.pick(DVec2::new(-50.0, 0.0), 0.5), None);
    }
}
