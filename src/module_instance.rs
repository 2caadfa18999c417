//! A placed module: control points and parameter values plus the objects
//! they currently expand to.

use std::collections::HashMap;
use std::sync::Arc;

use glam::DVec2;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::bindings::Bindings;
use crate::diagnostics::ExpansionDiagnostic;
use crate::error::{ExpansionError, SceneError};
use crate::expander::Expander;
use crate::expression::{number, ExprEngine};
use crate::geometry::Point;
use crate::module_def::ModuleDefinition;
use crate::ray::{Canvas, RayInteraction, Stroke};
use crate::registry::SceneContext;
use crate::scene_object::{SceneObject, SceneObjectKind, TYPE_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementState {
    CollectingPoints,
    Complete,
}

/// Persisted form of an instance.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceRecord {
    module: String,
    #[serde(default)]
    points: Option<Vec<Point>>,
    #[serde(default)]
    params: Option<HashMap<String, f64>>,
    #[serde(default)]
    not_done: bool,
}

#[derive(Debug, Clone)]
pub struct ModuleInstance {
    module_name: String,
    module: Arc<ModuleDefinition>,
    points: Vec<DVec2>,
    /// Declared parameters in declaration order.
    params: Vec<(String, f64)>,
    objs: Vec<SceneObject>,
    last_error: Option<SceneError>,
    state: PlacementState,
}

impl ModuleInstance {
    /// Restore an instance from its record and expand it, unless the record
    /// was saved mid-placement.
    pub fn from_record(record: &Value, ctx: &SceneContext<'_>) -> Result<Self, SceneError> {
        let tag = SceneObjectKind::Module.tag();
        let record: InstanceRecord =
            serde_json::from_value(record.clone()).map_err(|e| SceneError::invalid_record(tag, e))?;
        let module = ctx
            .modules
            .get(&record.module)
            .cloned()
            .ok_or_else(|| SceneError::UnknownModule(record.module.clone()))?;

        let state = if record.not_done {
            PlacementState::CollectingPoints
        } else {
            PlacementState::Complete
        };

        let points: Vec<DVec2> = match record.points {
            Some(points) => points.into_iter().map(DVec2::from).collect(),
            None if state == PlacementState::Complete => vec![DVec2::ZERO; module.num_points],
            None => Vec::new(),
        };
        let expected_ok = match state {
            PlacementState::Complete => points.len() == module.num_points,
            PlacementState::CollectingPoints => points.len() < module.num_points,
        };
        if !expected_ok {
            return Err(SceneError::invalid_record(
                tag,
                format!(
                    "module `{}` takes {} control points, record has {}",
                    record.module,
                    module.num_points,
                    points.len()
                ),
            ));
        }

        let params = match (record.params, state) {
            (Some(given), _) => resolve_params(&record.module, &module, given),
            (None, PlacementState::Complete) => module.defaults().to_vec(),
            (None, PlacementState::CollectingPoints) => Vec::new(),
        };

        let mut instance = Self {
            module_name: record.module,
            module,
            points,
            params,
            objs: Vec::new(),
            last_error: None,
            state,
        };
        instance.expand_objs(ctx);
        Ok(instance)
    }

    /// Start interactive placement. A module without control points is
    /// complete (and expanded) straight away.
    pub fn begin_placement(name: impl Into<String>, module: Arc<ModuleDefinition>, ctx: &SceneContext<'_>) -> Self {
        let mut instance = Self {
            module_name: name.into(),
            module,
            points: Vec::new(),
            params: Vec::new(),
            objs: Vec::new(),
            last_error: None,
            state: PlacementState::CollectingPoints,
        };
        if instance.module.num_points == 0 {
            instance.complete(ctx);
        }
        instance
    }

    /// Append the next control point.
    pub fn place_point(&mut self, point: DVec2, ctx: &SceneContext<'_>) -> Result<PlacementState, SceneError> {
        if self.state == PlacementState::Complete {
            return Err(SceneError::PlacementComplete);
        }
        self.points.push(point);
        if self.points.len() >= self.module.num_points {
            self.complete(ctx);
        }
        Ok(self.state)
    }

    fn complete(&mut self, ctx: &SceneContext<'_>) {
        self.state = PlacementState::Complete;
        if self.params.is_empty() {
            self.params = self.module.defaults().to_vec();
        }
        self.expand_objs(ctx);
    }

    /// Point at a new version of the definition, keeping the parameter
    /// values it still declares and padding or truncating the points.
    pub fn rebind(&mut self, module: Arc<ModuleDefinition>, ctx: &SceneContext<'_>) {
        let previous: HashMap<String, f64> = self.params.drain(..).collect();
        self.params = module
            .defaults()
            .iter()
            .map(|(name, default)| (name.clone(), previous.get(name).copied().unwrap_or(*default)))
            .collect();
        let collecting = self.state == PlacementState::CollectingPoints;
        if collecting {
            self.points.truncate(module.num_points);
        } else {
            self.points.resize(module.num_points, DVec2::ZERO);
        }
        self.module = module;
        if collecting && self.points.len() == self.module.num_points {
            self.complete(ctx);
        } else {
            self.expand_objs(ctx);
        }
    }

    /// Root bindings: parameters in declaration order, then `x_i`/`y_i` for
    /// every control point (1-based).
    pub fn bindings(&self) -> Bindings<'static> {
        let mut root = Bindings::new();
        for (name, value) in &self.params {
            root.insert(name.clone(), number(*value));
        }
        for (i, p) in self.points.iter().enumerate() {
            root.insert(format!("x_{}", i + 1), number(p.x));
            root.insert(format!("y_{}", i + 1), number(p.y));
        }
        root
    }

    /// Expand the definition into plain records without instantiating them.
    pub fn expand_records(&self, engine: &ExprEngine) -> Result<Vec<Value>, ExpansionError> {
        let expander = Expander::new(engine, self.module.max_loop_length);
        let root = self.bindings();
        let scope = match &self.module.vars {
            Some(vars) => expander.expand_sequential(vars, &root)?,
            None => root.layer(),
        };
        expander.expand_array(&self.module.objs, &scope)
    }

    /// Re-derive the expanded objects. Failures are recorded in
    /// `last_error`; objects instantiated before the failure are kept.
    pub fn expand_objs(&mut self, ctx: &SceneContext<'_>) {
        self.objs.clear();
        self.last_error = None;
        if self.state != PlacementState::Complete {
            return;
        }
        match self.instantiate_all(ctx) {
            Ok(()) => log::debug!("module `{}` expanded into {} objects", self.module_name, self.objs.len()),
            Err(err) => {
                log::warn!("module `{}` failed to expand: {}", self.module_name, err);
                self.last_error = Some(err);
            }
        }
    }

    fn instantiate_all(&mut self, ctx: &SceneContext<'_>) -> Result<(), SceneError> {
        let records = self.expand_records(ctx.engine)?;
        let nested = ctx.nested()?;
        for record in &records {
            let object = ctx.registry.instantiate(record, &nested)?;
            self.objs.push(object);
        }
        Ok(())
    }

    pub fn translate(&mut self, delta: DVec2, ctx: &SceneContext<'_>) {
        for p in &mut self.points {
            *p += delta;
        }
        self.expand_objs(ctx);
    }

    pub fn set_point(&mut self, index: usize, point: DVec2, ctx: &SceneContext<'_>) -> Result<(), SceneError> {
        let len = self.points.len();
        let slot = self
            .points
            .get_mut(index)
            .ok_or(SceneError::IndexOutOfRange { index, len })?;
        *slot = point;
        self.expand_objs(ctx);
        Ok(())
    }

    pub fn set_param(&mut self, name: &str, value: f64, ctx: &SceneContext<'_>) -> Result<(), SceneError> {
        if !self.module.declares(name) {
            return Err(SceneError::UnknownParameter {
                module: self.module_name.clone(),
                name: name.to_string(),
            });
        }
        match self.params.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name.to_string(), value)),
        }
        self.expand_objs(ctx);
        Ok(())
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn definition(&self) -> &Arc<ModuleDefinition> {
        &self.module
    }

    pub fn points(&self) -> &[DVec2] {
        &self.points
    }

    pub fn params(&self) -> &[(String, f64)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<f64> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objs
    }

    pub fn into_objects(self) -> Vec<SceneObject> {
        self.objs
    }

    pub fn last_error(&self) -> Option<&SceneError> {
        self.last_error.as_ref()
    }

    pub fn state(&self) -> PlacementState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == PlacementState::Complete
    }

    pub fn diagnostic(&self) -> Option<ExpansionDiagnostic> {
        self.last_error.as_ref().map(ExpansionDiagnostic::from_scene_error)
    }

    pub fn to_record(&self) -> Value {
        let params: Map<String, Value> = self
            .params
            .iter()
            .map(|(name, value)| (name.clone(), number(*value)))
            .collect();
        let points: Vec<Point> = self.points.iter().copied().map(Point::from).collect();

        let mut out = Map::new();
        out.insert(TYPE_KEY.to_string(), json!(SceneObjectKind::Module.tag()));
        out.insert("module".to_string(), json!(self.module_name));
        out.insert("points".to_string(), json!(points));
        out.insert("params".to_string(), Value::Object(params));
        if self.state == PlacementState::CollectingPoints {
            out.insert("notDone".to_string(), Value::Bool(true));
        }
        Value::Object(out)
    }

    fn collect_children(&self, report: impl Fn(&SceneObject) -> Option<String>) -> Option<String> {
        let lines: Vec<String> = self
            .objs
            .iter()
            .enumerate()
            .filter_map(|(i, obj)| report(obj).map(|msg| format!("obj #{} ({}): {}", i, obj.type_tag(), msg)))
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}

/// Declared parameters in declaration order; undeclared keys are dropped.
fn resolve_params(name: &str, module: &ModuleDefinition, mut given: HashMap<String, f64>) -> Vec<(String, f64)> {
    let params = module
        .defaults()
        .iter()
        .map(|(param, default)| (param.clone(), given.remove(param).unwrap_or(*default)))
        .collect();
    let mut dropped: Vec<String> = given.into_keys().collect();
    dropped.sort();
    for param in dropped {
        log::warn!("module `{}`: dropping undeclared parameter `{}`", name, param);
    }
    params
}

impl RayInteraction for ModuleInstance {
    fn draw(&self, canvas: &mut dyn Canvas) {
        for obj in &self.objs {
            obj.draw(canvas);
        }
        for p in &self.points {
            canvas.point(*p, Stroke::ControlPoint);
        }
    }

    fn hit_test(&self, point: DVec2, tolerance: f64) -> bool {
        self.points.iter().any(|p| p.distance(point) <= tolerance)
            || self.objs.iter().any(|obj| obj.hit_test(point, tolerance))
    }

    fn error(&self) -> Option<String> {
        match &self.last_error {
            Some(err) => Some(err.to_string()),
            None => self.collect_children(|obj| obj.error()),
        }
    }

    fn warning(&self) -> Option<String> {
        self.collect_children(|obj| obj.warning())
    }
}
