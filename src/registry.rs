//! Type tag → constructor registry.
//!
//! The standard registry is derived from [`SceneObjectKind::ALL`] with an
//! exhaustive match, so every object type has exactly one constructor. Custom
//! registries go through [`RegistryBuilder`], which rejects duplicate tags and
//! refuses to build while a built-in type is left without a constructor.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{SceneError, UnknownTypeError};
use crate::expression::ExprEngine;
use crate::module_def::ModuleLibrary;
use crate::module_instance::ModuleInstance;
use crate::scene_object::{SceneObject, SceneObjectKind, TYPE_KEY};

/// Module instances may contain module instances up to this depth.
pub const MAX_NESTING_DEPTH: usize = 16;

pub type Factory = for<'c> fn(&Value, &SceneContext<'c>) -> Result<SceneObject, SceneError>;

/// Everything a constructor may need from the owning scene.
#[derive(Clone, Copy)]
pub struct SceneContext<'a> {
    pub registry: &'a Registry,
    pub modules: &'a ModuleLibrary,
    pub engine: &'a ExprEngine,
    depth: usize,
}

impl<'a> SceneContext<'a> {
    pub fn new(registry: &'a Registry, modules: &'a ModuleLibrary, engine: &'a ExprEngine) -> Self {
        Self {
            registry,
            modules,
            engine,
            depth: 0,
        }
    }

    /// Context for objects produced by a module expansion.
    pub fn nested(&self) -> Result<SceneContext<'a>, SceneError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(SceneError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        Ok(SceneContext {
            depth: self.depth + 1,
            ..*self
        })
    }
}

fn plain<T: DeserializeOwned>(kind: SceneObjectKind, record: &Value) -> Result<T, SceneError> {
    serde_json::from_value(record.clone()).map_err(|e| SceneError::invalid_record(kind.tag(), e))
}

fn create_tilted_mirror(record: &Value, _ctx: &SceneContext<'_>) -> Result<SceneObject, SceneError> {
    plain(SceneObjectKind::TiltedMirror, record).map(SceneObject::TiltedMirror)
}

fn create_blocker(record: &Value, _ctx: &SceneContext<'_>) -> Result<SceneObject, SceneError> {
    plain(SceneObjectKind::Blocker, record).map(SceneObject::Blocker)
}

fn create_text_label(record: &Value, _ctx: &SceneContext<'_>) -> Result<SceneObject, SceneError> {
    plain(SceneObjectKind::TextLabel, record).map(SceneObject::TextLabel)
}

fn create_module(record: &Value, ctx: &SceneContext<'_>) -> Result<SceneObject, SceneError> {
    ModuleInstance::from_record(record, ctx).map(SceneObject::Module)
}

impl SceneObjectKind {
    pub fn factory(self) -> Factory {
        match self {
            SceneObjectKind::TiltedMirror => create_tilted_mirror,
            SceneObjectKind::Blocker => create_blocker,
            SceneObjectKind::TextLabel => create_text_label,
            SceneObjectKind::Module => create_module,
        }
    }
}

#[derive(Clone)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("tags", &self.tags()).finish()
    }
}

impl Registry {
    /// Every built-in type under its own tag.
    pub fn standard() -> Self {
        let factories = SceneObjectKind::ALL
            .iter()
            .map(|kind| (kind.tag().to_string(), kind.factory()))
            .collect();
        Self { factories }
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn create(&self, tag: &str, record: &Value, ctx: &SceneContext<'_>) -> Result<SceneObject, SceneError> {
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| UnknownTypeError { tag: tag.to_string() })?;
        factory(record, ctx)
    }

    /// Create an object from a record carrying its own `type` tag.
    pub fn instantiate(&self, record: &Value, ctx: &SceneContext<'_>) -> Result<SceneObject, SceneError> {
        let tag = record
            .get(TYPE_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| SceneError::invalid_record("?", format!("missing `{}` field in {}", TYPE_KEY, record)))?;
        self.create(tag, record, ctx)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    factories: HashMap<String, Factory>,
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("RegistryBuilder").field("tags", &tags).finish()
    }
}

impl RegistryBuilder {
    pub fn register(mut self, tag: impl Into<String>, factory: Factory) -> Result<Self, SceneError> {
        let tag = tag.into();
        if self.factories.contains_key(&tag) {
            return Err(SceneError::DuplicateType(tag));
        }
        self.factories.insert(tag, factory);
        Ok(self)
    }

    pub fn register_standard(self) -> Result<Self, SceneError> {
        SceneObjectKind::ALL
            .iter()
            .try_fold(self, |builder, kind| builder.register(kind.tag(), kind.factory()))
    }

    pub fn build(self) -> Result<Registry, SceneError> {
        if let Some(missing) = SceneObjectKind::ALL
            .iter()
            .find(|kind| !self.factories.contains_key(kind.tag()))
        {
            return Err(SceneError::MissingType(missing.tag().to_string()));
        }
        Ok(Registry {
            factories: self.factories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixture {
        registry: Registry,
        modules: ModuleLibrary,
        engine: ExprEngine,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: Registry::standard(),
                modules: ModuleLibrary::new(),
                engine: ExprEngine::new(0),
            }
        }

        fn ctx(&self) -> SceneContext<'_> {
            SceneContext::new(&self.registry, &self.modules, &self.engine)
        }
    }

    #[test]
    fn test_standard_covers_every_kind() {
        let registry = Registry::standard();
        for kind in SceneObjectKind::ALL {
            assert!(registry.contains(kind.tag()));
        }
    }

    #[test]
    fn test_instantiate_by_tag() {
        let f = Fixture::new();
        let obj = f
            .registry
            .instantiate(&json!({"type": "TiltedMirror", "p1": {"x": 0, "y": 0}, "p2": {"x": 1, "y": 1}, "tiltAngle": 5}), &f.ctx())
            .unwrap();
        match obj {
            SceneObject::TiltedMirror(m) => assert_eq!(m.tilt_angle, 5.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag() {
        let f = Fixture::new();
        let err = f.registry.instantiate(&json!({"type": "Lens"}), &f.ctx()).unwrap_err();
        assert_eq!(err, SceneError::UnknownType(UnknownTypeError { tag: "Lens".into() }));
    }

    #[test]
    fn test_bad_record() {
        let f = Fixture::new();
        let err = f
            .registry
            .instantiate(&json!({"type": "Blocker", "p1": "here"}), &f.ctx())
            .unwrap_err();
        assert!(matches!(err, SceneError::InvalidRecord { ref tag, .. } if tag == "Blocker"));
    }

    #[test]
    fn test_builder_rejects_duplicates_and_gaps() {
        let err = Registry::builder()
            .register("Blocker", SceneObjectKind::Blocker.factory())
            .and_then(|b| b.register("Blocker", SceneObjectKind::Blocker.factory()))
            .unwrap_err();
        assert_eq!(err, SceneError::DuplicateType("Blocker".into()));

        let err = Registry::builder()
            .register("Blocker", SceneObjectKind::Blocker.factory())
            .and_then(RegistryBuilder::build)
            .unwrap_err();
        assert!(matches!(err, SceneError::MissingType(_)));
    }

    #[test]
    fn test_builder_aliases() {
        let registry = Registry::builder()
            .register_standard()
            .and_then(|b| b.register("Mirror", SceneObjectKind::TiltedMirror.factory()))
            .and_then(RegistryBuilder::build)
            .unwrap();
        assert!(registry.contains("Mirror"));
        assert_eq!(registry.tags().len(), SceneObjectKind::ALL.len() + 1);
    }

    #[test]
    fn test_nesting_limit() {
        let f = Fixture::new();
        let mut ctx = f.ctx();
        for _ in 0..MAX_NESTING_DEPTH {
            ctx = ctx.nested().unwrap();
        }
        assert!(matches!(ctx.nested(), Err(SceneError::NestingTooDeep(MAX_NESTING_DEPTH))));
    }
}
