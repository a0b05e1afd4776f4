//! Property copying for wrappers.
//!
//! A wrapper must be indistinguishable from its original to introspection:
//! same name, same arity, same own properties.

use std::collections::BTreeMap;

use crate::function::Function;

/// The introspectable shape of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    /// Declared name.
    pub name: String,
    /// Declared parameter count.
    pub arity: usize,
    /// Own properties.
    pub props: BTreeMap<String, serde_json::Value>,
}

impl Shape {
    /// Captures the shape of `function`.
    #[must_use]
    pub fn of(function: &Function) -> Self {
        Self {
            name: function.name().to_string(),
            arity: function.arity(),
            props: function.props().clone(),
        }
    }

    /// Returns true if `function` has exactly this shape.
    #[must_use]
    pub fn matches(&self, function: &Function) -> bool {
        self.name == function.name()
            && self.arity == function.arity()
            && &self.props == function.props()
    }
}
