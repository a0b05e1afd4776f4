//! Test error types.

/// Result type alias for test operations.
pub type Result<T> = std::result::Result<T, TestError>;

/// Testing errors.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// Assertion failed.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// Agent or shim error.
    #[error("shim error: {0}")]
    Shim(#[from] periscope_core::ShimError),
}

impl TestError {
    /// Creates an assertion error.
    #[must_use]
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }
}
