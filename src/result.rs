//! Node execution results
//!
//! A result is an immutable, cheaply cloned handle. When a sequence stops
//! early (a failed permission grant) the executor hands the very same handle
//! back as the node-step outcome, so [`NodeExecutorResult::same_as`] holds
//! between what the transport returned and what the caller receives.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;

/// Optional failure cause attached to a result by a transport
pub type ResultCause = Arc<dyn Error + Send + Sync + 'static>;

struct Outcome {
    success: bool,
    exit_code: Option<i32>,
    cause: Option<ResultCause>,
}

/// Outcome of one command run by a `NodeExecutor`
#[derive(Clone)]
pub struct NodeExecutorResult {
    inner: Arc<Outcome>,
}

/// Outcome of one node-step invocation.
///
/// This is the result of the last command the step ran, passed through
/// untouched.
pub type NodeStepResult = NodeExecutorResult;

impl NodeExecutorResult {
    pub fn new(success: bool, exit_code: Option<i32>, cause: Option<ResultCause>) -> Self {
        Self {
            inner: Arc::new(Outcome {
                success,
                exit_code,
                cause,
            }),
        }
    }

    /// Command ran and reported success
    pub fn success(exit_code: i32) -> Self {
        Self::new(true, Some(exit_code), None)
    }

    /// Command ran and reported failure (non-zero exit)
    pub fn failure(exit_code: i32) -> Self {
        Self::new(false, Some(exit_code), None)
    }

    /// Failure without an exit code (e.g. killed by a signal), with a reason
    pub fn failure_with_cause(exit_code: Option<i32>, cause: impl Into<BoxError>) -> Self {
        Self::new(false, exit_code, Some(Arc::from(cause.into())))
    }

    pub fn is_success(&self) -> bool {
        self.inner.success
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.inner.exit_code
    }

    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.inner.cause.as_deref()
    }

    /// True when both handles point at the same result value
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for NodeExecutorResult {
    fn eq(&self, other: &Self) -> bool {
        if self.same_as(other) {
            return true;
        }
        self.inner.success == other.inner.success
            && self.inner.exit_code == other.inner.exit_code
            && self.inner.cause.as_ref().map(|c| c.to_string())
                == other.inner.cause.as_ref().map(|c| c.to_string())
    }
}

impl fmt::Debug for NodeExecutorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeExecutorResult")
            .field("success", &self.inner.success)
            .field("exit_code", &self.inner.exit_code)
            .field("cause", &self.inner.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl fmt::Display for NodeExecutorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.inner.success { "succeeded" } else { "failed" };
        match self.inner.exit_code {
            Some(code) => write!(f, "{} (exit code {})", status, code)?,
            None => write!(f, "{}", status)?,
        }
        if let Some(cause) = &self.inner.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}
