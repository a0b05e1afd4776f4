//! Declarative wrapping options.

use std::collections::BTreeMap;
use std::sync::Arc;

use periscope_core::Result;

use crate::function::Function;
use crate::value::ArgView;

/// One or more dotted property paths on a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// A single path such as `"query"` or `"prototype.query"`.
    Property(String),
    /// Several paths wrapped with the same options.
    Properties(Vec<String>),
}

impl Selector {
    /// Returns the selected paths.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::Property(path) => vec![path.as_str()],
            Self::Properties(paths) => paths.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for Selector {
    fn from(path: &str) -> Self {
        Self::Property(path.to_string())
    }
}

impl From<String> for Selector {
    fn from(path: String) -> Self {
        Self::Property(path)
    }
}

impl<const N: usize> From<[&str; N]> for Selector {
    fn from(paths: [&str; N]) -> Self {
        Self::Properties(paths.iter().map(|p| (*p).to_string()).collect())
    }
}

impl From<Vec<&str>> for Selector {
    fn from(paths: Vec<&str>) -> Self {
        Self::Properties(paths.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Selector {
    fn from(paths: Vec<String>) -> Self {
        Self::Properties(paths)
    }
}

/// Derives a segment name from call arguments.
pub type Namer = Arc<dyn Fn(&ArgView<'_>) -> Result<String> + Send + Sync>;

/// How an interceptor names its segment.
#[derive(Clone)]
pub enum Naming {
    /// Always the same name.
    Fixed(String),
    /// The wrapped function's declared name.
    FunctionName,
    /// Computed per call.
    Dynamic(Namer),
}

impl Naming {
    pub(crate) fn resolve(&self, function: &Function, args: &ArgView<'_>) -> Result<String> {
        match self {
            Self::Fixed(name) => Ok(name.clone()),
            Self::FunctionName if function.name().is_empty() => Ok("anonymous".to_string()),
            Self::FunctionName => Ok(function.name().to_string()),
            Self::Dynamic(namer) => namer(args),
        }
    }
}

impl std::fmt::Debug for Naming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(name) => f.debug_tuple("Fixed").field(name).finish(),
            Self::FunctionName => f.write_str("FunctionName"),
            Self::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

/// Which argument signals completion of a callback-style call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPosition {
    /// The last argument, if it is a function.
    Last,
    /// A fixed index, if a function sits there.
    Index(usize),
}

impl CallbackPosition {
    /// Resolves the position against actual arguments.
    #[must_use]
    pub fn resolve(&self, args: &ArgView<'_>) -> Option<usize> {
        match *self {
            Self::Last => args.last_callback(),
            Self::Index(index) => args.is_callback(index).then_some(index),
        }
    }
}

/// Options for [`Shim::wrap`](crate::Shim::wrap).
#[derive(Debug, Clone)]
pub struct RecordSpec {
    /// Segment naming rule.
    pub name: Naming,
    /// Completion callback, for callback-style APIs.
    pub callback: Option<CallbackPosition>,
    /// False to reuse the current segment instead of creating one.
    pub record: bool,
    /// Attributes added to every segment.
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl RecordSpec {
    /// Segments with a fixed name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_naming(Naming::Fixed(name.into()))
    }

    /// Segments named after the wrapped function.
    #[must_use]
    pub fn from_function() -> Self {
        Self::with_naming(Naming::FunctionName)
    }

    /// Segments named per call by `namer`.
    #[must_use]
    pub fn dynamic<F>(namer: F) -> Self
    where
        F: Fn(&ArgView<'_>) -> Result<String> + Send + Sync + 'static,
    {
        Self::with_naming(Naming::Dynamic(Arc::new(namer)))
    }

    fn with_naming(name: Naming) -> Self {
        Self {
            name,
            callback: None,
            record: true,
            attributes: BTreeMap::new(),
        }
    }

    /// Ends the segment when the callback at `position` is invoked.
    #[must_use]
    pub const fn callback(mut self, position: CallbackPosition) -> Self {
        self.callback = Some(position);
        self
    }

    /// Propagates context without creating a segment.
    #[must_use]
    pub const fn reuse_segment(mut self) -> Self {
        self.record = false;
        self
    }

    /// Adds a segment attribute.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl Default for RecordSpec {
    fn default() -> Self {
        Self::from_function()
    }
}
