//! Layered variable bindings for one expansion pass.
//!
//! A nested scope (loop variables, derived vars) is a new [`Bindings`] layer
//! that borrows its parent, so entering a scope never copies or mutates the
//! outer context. Lookups walk from the innermost layer outward.

use std::fmt;

use serde_json::Value;

use crate::expression::value_to_text;

#[derive(Debug, Clone, Default)]
pub struct Bindings<'p> {
    parent: Option<&'p Bindings<'p>>,
    vars: Vec<(String, Value)>,
}

impl Bindings<'static> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'p> Bindings<'p> {
    /// Start an empty scope layered over `self`.
    pub fn layer(&self) -> Bindings<'_> {
        Bindings {
            parent: Some(self),
            vars: Vec::new(),
        }
    }

    /// Bind `name` in this layer, replacing an existing binding of the same layer.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .or_else(|| self.parent.and_then(|p| p.get(name)))
    }

    /// Every binding from the outermost layer inward. Shadowed names appear
    /// more than once; later entries win.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        let mut layers = Vec::new();
        let mut current = Some(self);
        while let Some(layer) = current {
            layers.push(layer);
            current = layer.parent;
        }
        layers
            .into_iter()
            .rev()
            .flat_map(|layer| layer.vars.iter().map(|(n, v)| (n.as_str(), v)))
    }

    /// Effective bindings, one entry per name, in first-bound order.
    pub fn resolved(&self) -> Vec<(&str, &Value)> {
        let mut out: Vec<(&str, &Value)> = Vec::new();
        for (name, value) in self.iter() {
            match out.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value,
                None => out.push((name, value)),
            }
        }
        out
    }
}

impl fmt::Display for Bindings<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.resolved().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                Value::Number(_) => write!(f, "{}: {}", name, value_to_text(value))?,
                other => write!(f, "{}: {}", name, other)?,
            }
        }
        write!(f, "}}")
    }
}
