//! Error types for periscope-core.
//!
//! Nothing in this crate is allowed to surface an error to monitored code.
//! Every `ShimError` ends up as a [`Diagnostic`](crate::Diagnostic) instead.

/// Result type alias for instrumentation operations.
pub type Result<T> = std::result::Result<T, ShimError>;

/// Errors raised by instrumentation bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    /// An instrumentation script used the shim API incorrectly.
    #[error("misuse: {0}")]
    Misuse(String),

    /// Bookkeeping itself failed (naming, extraction, segment creation).
    #[error("instrumentation failure: {0}")]
    Instrumentation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShimError {
    /// Creates a misuse error.
    #[must_use]
    pub fn misuse(msg: impl Into<String>) -> Self {
        Self::Misuse(msg.into())
    }

    /// Creates an instrumentation failure.
    #[must_use]
    pub fn instrumentation(msg: impl Into<String>) -> Self {
        Self::Instrumentation(msg.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if the error was caused by the caller rather than by
    /// the instrumentation machinery.
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(self, Self::Misuse(_) | Self::Config(_))
    }
}
