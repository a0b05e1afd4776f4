//! Values that flow through wrapped calls.
//!
//! A monitored library is reached through [`Target`]s holding [`Value`]s.
//! Calls carry a receiver and arguments; results are either ready or a
//! pending future (the promise-style continuation).

use std::future::Future;

use futures::future::BoxFuture;

use crate::function::Function;
use crate::target::Target;

/// Result of a monitored call.
pub type CallResult = Result<Value, CallError>;

/// Error raised by monitored code.
///
/// Distinct from `ShimError`: a `CallError` belongs to the application and
/// must reach its caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CallError {
    message: String,
}

impl CallError {
    /// Creates an error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// What a call produced.
pub enum Outcome {
    /// Completed synchronously.
    Ready(CallResult),
    /// Completes when the future resolves.
    Pending(BoxFuture<'static, CallResult>),
}

impl Outcome {
    /// A successful synchronous result.
    #[must_use]
    pub fn ok(value: impl Into<Value>) -> Self {
        Self::Ready(Ok(value.into()))
    }

    /// A failed synchronous result.
    #[must_use]
    pub fn err(message: impl Into<String>) -> Self {
        Self::Ready(Err(CallError::new(message)))
    }

    /// An asynchronous result.
    #[must_use]
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = CallResult> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }

    /// Returns true for asynchronous results.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Returns the synchronous result, or `None` if pending.
    #[must_use]
    pub fn ready(self) -> Option<CallResult> {
        match self {
            Self::Ready(result) => Some(result),
            Self::Pending(_) => None,
        }
    }

    /// Waits for the result.
    pub async fn settle(self) -> CallResult {
        match self {
            Self::Ready(result) => result,
            Self::Pending(future) => future.await,
        }
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// A value held by a target or passed to a call.
#[derive(Clone, Default)]
pub enum Value {
    /// No value.
    #[default]
    Undefined,
    /// Plain data.
    Data(serde_json::Value),
    /// A callable.
    Function(Function),
    /// A nested object.
    Object(Target),
}

impl Value {
    /// Returns true for `Undefined`.
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Returns true for functions.
    #[must_use]
    pub const fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    /// Returns the data payload.
    #[must_use]
    pub const fn as_data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the string payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_data().and_then(serde_json::Value::as_str)
    }

    /// Returns the function.
    #[must_use]
    pub const fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Returns the object.
    #[must_use]
    pub const fn as_object(&self) -> Option<&Target> {
        match self {
            Self::Object(target) => Some(target),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) => true,
            (Self::Data(a), Self::Data(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.id() == b.id(),
            (Self::Object(a), Self::Object(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Data(data) => write!(f, "Data({data})"),
            Self::Function(function) => write!(f, "Function({})", function.name()),
            Self::Object(target) => write!(f, "Object({})", target.name()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Data(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Data(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Data(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Data(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Data(value.into())
    }
}

impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Self::Function(value)
    }
}

impl From<Target> for Value {
    fn from(value: Target) -> Self {
        Self::Object(value)
    }
}

/// One invocation: receiver plus arguments.
#[derive(Debug, Clone, Default)]
pub struct Call {
    /// The object the function was looked up on, if any.
    pub receiver: Option<Target>,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl Call {
    /// A call without a receiver.
    #[must_use]
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            receiver: None,
            args,
        }
    }

    /// A method call on `receiver`.
    #[must_use]
    pub fn method(receiver: Target, args: Vec<Value>) -> Self {
        Self {
            receiver: Some(receiver),
            args,
        }
    }

    /// Returns argument `index`.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Returns a read-only view for extractors.
    #[must_use]
    pub fn view(&self) -> ArgView<'_> {
        ArgView {
            receiver: self.receiver.as_ref(),
            args: &self.args,
        }
    }
}

/// Read-only view of a call's arguments.
///
/// Callbacks show up as [`ArgRef::Callback`] and cannot be invoked through
/// the view: naming and extraction treat them as opaque completion signals.
#[derive(Debug, Clone, Copy)]
pub struct ArgView<'a> {
    receiver: Option<&'a Target>,
    args: &'a [Value],
}

/// One argument as seen through an [`ArgView`].
#[derive(Debug, Clone, Copy)]
pub enum ArgRef<'a> {
    /// No value.
    Undefined,
    /// Plain data.
    Data(&'a serde_json::Value),
    /// An opaque callback.
    Callback,
    /// An object.
    Object(&'a Target),
}

impl<'a> ArgView<'a> {
    /// Returns the number of arguments.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.args.len()
    }

    /// Returns true if there are no arguments.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Returns the receiver.
    #[must_use]
    pub const fn receiver(&self) -> Option<&'a Target> {
        self.receiver
    }

    /// Returns argument `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<ArgRef<'a>> {
        self.args.get(index).map(|value| match value {
            Value::Undefined => ArgRef::Undefined,
            Value::Data(data) => ArgRef::Data(data),
            Value::Function(_) => ArgRef::Callback,
            Value::Object(target) => ArgRef::Object(target),
        })
    }

    /// Returns argument `index` as data.
    #[must_use]
    pub fn data(&self, index: usize) -> Option<&'a serde_json::Value> {
        self.args.get(index).and_then(Value::as_data)
    }

    /// Returns argument `index` as a string.
    #[must_use]
    pub fn str(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).and_then(Value::as_str)
    }

    /// Returns argument `index` as an object.
    #[must_use]
    pub fn object(&self, index: usize) -> Option<&'a Target> {
        self.args.get(index).and_then(Value::as_object)
    }

    /// Returns true if argument `index` is a callback.
    #[must_use]
    pub fn is_callback(&self, index: usize) -> bool {
        self.args.get(index).is_some_and(Value::is_function)
    }

    /// Returns the index of the last argument if it is a callback.
    #[must_use]
    pub fn last_callback(&self) -> Option<usize> {
        let last = self.args.len().checked_sub(1)?;
        self.is_callback(last).then_some(last)
    }
}
