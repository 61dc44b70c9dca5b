//! Variable bindings for one interpretation session

use crate::error::SpecError;
use crate::registry::Component;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone)]
pub(crate) enum Binding {
    /// The statement defining this name is still being evaluated.
    InProgress,
    Bound(Value),
}

/// Name → value bindings. A name is bound at most once per session.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    bindings: BTreeMap<String, Binding>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `value`; fails if `name` is already taken.
    pub fn bind(&mut self, name: &str, value: Value) -> Result<(), SpecError> {
        self.begin(name, 0)?;
        self.complete(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.bindings.get(name) {
            Some(Binding::Bound(value)) => Some(value),
            _ => None,
        }
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.get(name).and_then(Value::as_component)
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings
            .iter()
            .filter(|(_, b)| matches!(b, Binding::Bound(_)))
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.names().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Mark `name` as being defined.
    pub(crate) fn begin(&mut self, name: &str, line: usize) -> Result<(), SpecError> {
        if self.bindings.contains_key(name) {
            return Err(SpecError::Rebind {
                name: name.to_string(),
                line,
            });
        }
        self.bindings.insert(name.to_string(), Binding::InProgress);
        Ok(())
    }

    pub(crate) fn complete(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), Binding::Bound(value));
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, binding) in &self.bindings {
            if let Binding::Bound(value) = binding {
                writeln!(f, "{} {} = {};", value.type_name(), name, value)?;
            }
        }
        Ok(())
    }
}
