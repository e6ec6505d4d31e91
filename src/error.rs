//! Error types for condflags.
//!
//! The flag store and observer registry are infallible. Errors only arise at
//! the edges: invalid configuration, execution contexts refusing work, and
//! blocking waits that time out.

use thiserror::Error;

/// Validation errors that occur during configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Execution errors raised by execution contexts and blocking waits.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Execution context '{context}' is disconnected")]
    Disconnected {
        context: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Blocking wait on '{context}' would deadlock its own thread")]
    WouldDeadlock {
        context: String,
    },
}

/// Top-level error type for condflags.
#[derive(Debug, Error)]
pub enum CondError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl CondError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Timeout { .. }))
    }

    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(e, ExecutionError::Timeout { .. }),
        }
    }
}

/// Result type alias for condflags operations.
pub type CondResult<T> = Result<T, CondError>;

pub(crate) fn duration_ms(d: std::time::Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_invalid_config() {
        let err = ValidationError::InvalidConfig {
            field: "name".to_string(),
            reason: "must not be empty".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("name"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_execution_error_timeout() {
        let err = ExecutionError::Timeout { duration_ms: 5000 };
        let msg = format!("{err}");
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn test_execution_error_disconnected() {
        let err = ExecutionError::Disconnected {
            context: "main".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("main"));
        assert!(msg.contains("disconnected"));
    }

    #[test]
    fn test_cond_error_from_validation() {
        let err: CondError = ValidationError::InvalidConfig {
            field: "name".to_string(),
            reason: "empty".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cond_error_retryable() {
        let gone: CondError = ExecutionError::Disconnected {
            context: "q".to_string(),
        }
        .into();
        assert!(gone.is_execution());
        assert!(!gone.is_retryable());

        let timeout: CondError = ExecutionError::Timeout { duration_ms: 10 }.into();
        assert!(timeout.is_timeout());
        assert!(timeout.is_retryable());
    }

    #[test]
    fn test_cond_error_internal() {
        let err = CondError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(std::time::Duration::from_millis(42)), 42);
        assert_eq!(duration_ms(std::time::Duration::MAX), u64::MAX);
    }
}
