//! Kernel error types

use super::task::TaskState;
use std::fmt;

/// Kernel result type
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors returned by every public kernel operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Stale or unknown handle, out-of-range priority, zero size
    InvalidArgument(&'static str),
    /// Operation illegal for the task's current state
    InvalidState(TaskState),
    /// Resource already registered
    AlreadyInitialized,
    /// Unknown topic, subscription or queue
    NotFound,
    /// Queue full/empty at the primitive layer, or urgent slot taken
    Busy,
    /// Blocking operation exceeded its budget
    Timeout,
    /// Allocation of a task, topic, pool or context failed
    NoMemory,
    /// Operation not valid for this task kind
    NotSupported,
    /// Configuration could not be parsed or validated
    Config(String),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            KernelError::InvalidState(state) => write!(f, "invalid in state {}", state),
            KernelError::AlreadyInitialized => write!(f, "already initialized"),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::Busy => write!(f, "busy"),
            KernelError::Timeout => write!(f, "timed out"),
            KernelError::NoMemory => write!(f, "out of memory"),
            KernelError::NotSupported => write!(f, "not supported for this task kind"),
            KernelError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        KernelError::Config(e.to_string())
    }
}
