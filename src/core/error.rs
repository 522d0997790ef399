use thiserror::Error;

/// Failures that end a test procedure immediately.
///
/// Test procedures return `anyhow::Result`; these variants travel inside the
/// `anyhow::Error` so the runner can tell an assertion apart from a broken
/// precondition. Any other error is fatal as well.
#[derive(Debug, Error)]
pub enum TestFailure {
    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("{command} failed (exit code {code:?})")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

impl TestFailure {
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed(message.into())
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, Self::AssertionFailed(_))
    }
}

/// Return early from a test procedure with [`TestFailure::AssertionFailed`].
#[macro_export]
macro_rules! fail {
    ($($arg:tt)*) => {
        return Err($crate::core::error::TestFailure::assertion(format!($($arg)*)).into())
    };
}
