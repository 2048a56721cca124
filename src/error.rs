//! Unified error handling for planforge
//!
//! Every failure that crosses the crate boundary is a [`PlanForgeError`].
//! Errors carry a [`category`](PlanForgeError::category) and a stable
//! [`code`](PlanForgeError::code) so callers can act on the kind of failure
//! (configuration bug vs. kernel failure vs. cooperative termination)
//! without parsing messages. Kernels report their own
//! [`KernelError`](crate::kernel::KernelError); the executor wraps those
//! with node context exactly once at its boundary.

use std::fmt;

/// Unified error type for the execution engine
#[derive(Debug, thiserror::Error)]
pub enum PlanForgeError {
    // ========== Configuration errors (planner/session invariant violations) ==========
    /// No kernel registered for an executable node
    #[error("no kernel registered for node {node_index} ('{node_name}')")]
    MissingKernel { node_index: usize, node_name: String },

    /// Resume requested for a run id the registry does not know
    #[error("unknown run id: {0}")]
    UnknownRunId(i64),

    /// Monotonic run id counter reached its limit
    #[error("run id space exhausted")]
    RunIdsExhausted,

    /// Feed indices and feed values disagree in length
    #[error("feed count mismatch: {index_count} indices, {value_count} values")]
    FeedCountMismatch {
        index_count: usize,
        value_count: usize,
    },

    /// Session construction was handed inconsistent tables
    #[error("invalid session configuration: {0}")]
    InvalidSession(String),

    // ========== Kernel failures ==========
    /// A kernel returned a non-success status; annotated with node context
    #[error("non-zero status returned while running {op_type} node. Name:'{node_name}' Status Message: {message}")]
    ComputeFailed {
        op_type: String,
        node_name: String,
        message: String,
    },

    /// A kernel panicked; caught at the executor boundary
    #[error("runtime exception while running {op_type} node. Name:'{node_name}' Status Message: {message}")]
    ComputePanicked {
        op_type: String,
        node_name: String,
        message: String,
    },

    // ========== Cooperative termination ==========
    /// The cancellation token was observed set at the top of a node iteration
    #[error("exiting due to terminate flag being set to true")]
    Terminated,

    // ========== Frame / value slot errors ==========
    /// Slot index outside the frame's slot table
    #[error("value slot {0} out of range")]
    SlotOutOfRange(usize),

    /// Slot read after it was released back to the allocator
    #[error("value slot {0} was already released")]
    SlotReleased(usize),

    /// Slot read before any producer ran
    #[error("value slot {0} has not been produced")]
    SlotUnset(usize),

    // ========== Internal errors ==========
    /// Lock poisoned (indicates a bug or a panicking holder)
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl PlanForgeError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlanForgeError::MissingKernel { .. }
            | PlanForgeError::UnknownRunId(_)
            | PlanForgeError::FeedCountMismatch { .. }
            | PlanForgeError::InvalidSession(_) => ErrorCategory::Config,

            PlanForgeError::ComputeFailed { .. } | PlanForgeError::ComputePanicked { .. } => {
                ErrorCategory::Kernel
            }

            PlanForgeError::Terminated => ErrorCategory::Terminated,

            PlanForgeError::RunIdsExhausted => ErrorCategory::Resource,

            PlanForgeError::SlotOutOfRange(_)
            | PlanForgeError::SlotReleased(_)
            | PlanForgeError::SlotUnset(_)
            | PlanForgeError::LockPoisoned(_)
            | PlanForgeError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Stable status code for the error
    pub fn code(&self) -> StatusCode {
        match self {
            PlanForgeError::MissingKernel { .. }
            | PlanForgeError::FeedCountMismatch { .. }
            | PlanForgeError::InvalidSession(_) => StatusCode::InvalidArgument,
            PlanForgeError::UnknownRunId(_) => StatusCode::NoSuchEntry,
            PlanForgeError::ComputeFailed { .. } => StatusCode::Fail,
            PlanForgeError::ComputePanicked { .. } => StatusCode::RuntimeException,
            PlanForgeError::Terminated => StatusCode::Terminated,
            PlanForgeError::RunIdsExhausted => StatusCode::ResourceExhausted,
            _ => StatusCode::Fail,
        }
    }

    /// True when the failure came from kernel code rather than the engine
    pub fn is_kernel_failure(&self) -> bool {
        matches!(self.category(), ErrorCategory::Kernel)
    }

    /// True when execution was cancelled rather than failed
    pub fn is_terminated(&self) -> bool {
        matches!(self.category(), ErrorCategory::Terminated)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Planner or session invariant violation; not retryable
    Config,
    /// A kernel compute step failed or panicked
    Kernel,
    /// Execution was cooperatively cancelled
    Terminated,
    /// A bounded resource (run id space) ran out
    Resource,
    /// Engine bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "Config"),
            ErrorCategory::Kernel => write!(f, "Kernel"),
            ErrorCategory::Terminated => write!(f, "Terminated"),
            ErrorCategory::Resource => write!(f, "Resource"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

/// Stable numeric status codes, mirrored into diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    Fail = 1,
    InvalidArgument = 2,
    NoSuchEntry = 3,
    RuntimeException = 5,
    Terminated = 6,
    ResourceExhausted = 7,
}

impl<T> From<std::sync::PoisonError<T>> for PlanForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PlanForgeError::LockPoisoned(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type ForgeResult<T> = std::result::Result<T, PlanForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = PlanForgeError::MissingKernel {
            node_index: 3,
            node_name: "conv_0".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Config);
        assert_eq!(err.code(), StatusCode::InvalidArgument);

        let err = PlanForgeError::ComputeFailed {
            op_type: "Add".to_string(),
            node_name: "add_1".to_string(),
            message: "shape mismatch".to_string(),
        };
        assert!(err.is_kernel_failure());
        assert_eq!(err.code(), StatusCode::Fail);

        assert!(PlanForgeError::Terminated.is_terminated());
        assert_eq!(PlanForgeError::Terminated.code(), StatusCode::Terminated);
    }

    #[test]
    fn test_compute_failed_message_carries_node_context() {
        let err = PlanForgeError::ComputeFailed {
            op_type: "MatMul".to_string(),
            node_name: "proj".to_string(),
            message: "dimension mismatch".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("MatMul"));
        assert!(msg.contains("proj"));
        assert!(msg.contains("dimension mismatch"));
    }

    #[test]
    fn test_panic_and_failure_have_distinct_codes() {
        let failed = PlanForgeError::ComputeFailed {
            op_type: "Add".into(),
            node_name: "a".into(),
            message: "m".into(),
        };
        let panicked = PlanForgeError::ComputePanicked {
            op_type: "Add".into(),
            node_name: "a".into(),
            message: "m".into(),
        };
        assert_ne!(failed.code(), panicked.code());
        assert_eq!(failed.category(), panicked.category());
    }
}
