//! Module definitions and the library of definitions a scene knows about.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::bindings::Bindings;
use crate::error::SceneError;
use crate::expander::DEFAULT_MAX_LOOP_LENGTH;
use crate::expression::{number, ExprEngine};
use crate::template::{compile_array, ArrayItem, ObjectTemplate};
use crate::var_range::VariableRange;

fn default_max_loop_length() -> usize {
    DEFAULT_MAX_LOOP_LENGTH
}

/// Authoring format of a module definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionRecord {
    #[serde(default)]
    num_points: usize,
    #[serde(default)]
    params: Vec<String>,
    #[serde(default)]
    vars: Option<Value>,
    #[serde(default)]
    objs: Vec<Value>,
    #[serde(default = "default_max_loop_length")]
    max_loop_length: usize,
}

/// A compiled, validated module definition. Shared read-only between
/// every instance of the module.
#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    pub num_points: usize,
    /// Parameter range descriptors in declaration order.
    pub params: Vec<String>,
    pub vars: Option<ObjectTemplate>,
    pub objs: Vec<ArrayItem>,
    pub max_loop_length: usize,
    /// Parameter names and defaults, resolved at load time.
    defaults: Vec<(String, f64)>,
    source: Value,
}

impl ModuleDefinition {
    /// Compile and validate a definition. Every parameter must parse as a
    /// range descriptor; each may refer to the defaults of the ones before it.
    pub fn from_json(name: &str, value: &Value, engine: &ExprEngine) -> Result<Self, SceneError> {
        let invalid = |message: String| SceneError::InvalidDefinition {
            name: name.to_string(),
            message,
        };

        let record: DefinitionRecord =
            serde_json::from_value(value.clone()).map_err(|e| invalid(e.to_string()))?;
        if record.max_loop_length == 0 {
            return Err(invalid("maxLoopLength must be at least 1".to_string()));
        }

        let mut defaults: Vec<(String, f64)> = Vec::new();
        for descriptor in &record.params {
            let mut ctx = Bindings::new();
            for (n, v) in &defaults {
                ctx.insert(n.clone(), number(*v));
            }
            let range = VariableRange::parse(descriptor, engine, &ctx)
                .map_err(|e| invalid(format!("params: {}", e)))?;
            if defaults.iter().any(|(n, _)| *n == range.name) {
                return Err(invalid(format!("parameter `{}` is declared twice", range.name)));
            }
            defaults.push((range.name, range.default));
        }

        let vars = match &record.vars {
            None => None,
            Some(vars) => Some(ObjectTemplate::compile(vars).map_err(|e| invalid(format!("vars: {}", e)))?),
        };
        let objs = compile_array(&Value::Array(record.objs.clone()))
            .map_err(|e| invalid(format!("objs: {}", e)))?;

        Ok(Self {
            num_points: record.num_points,
            params: record.params,
            vars,
            objs,
            max_loop_length: record.max_loop_length,
            defaults,
            source: value.clone(),
        })
    }

    /// Declared parameter names with their default values, in declaration order.
    pub fn defaults(&self) -> &[(String, f64)] {
        &self.defaults
    }

    pub fn declares(&self, param: &str) -> bool {
        self.defaults.iter().any(|(n, _)| n == param)
    }

    /// The definition as it was authored.
    pub fn to_json(&self) -> Value {
        self.source.clone()
    }
}

/// Named module definitions available to a scene.
#[derive(Debug, Clone, Default)]
pub struct ModuleLibrary {
    modules: HashMap<String, Arc<ModuleDefinition>>,
    order: Vec<String>,
}

impl ModuleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition.
    pub fn insert(&mut self, name: impl Into<String>, definition: ModuleDefinition) -> Arc<ModuleDefinition> {
        let name = name.into();
        let definition = Arc::new(definition);
        if self.modules.insert(name.clone(), Arc::clone(&definition)).is_none() {
            self.order.push(name);
        }
        definition
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModuleDefinition>> {
        self.modules.get(name)
    }

    /// Definitions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ModuleDefinition>)> {
        self.order
            .iter()
            .filter_map(|name| self.modules.get(name).map(|m| (name.as_str(), m)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
