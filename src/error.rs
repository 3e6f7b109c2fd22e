use std::time::Duration;

use debrief_commons::{ErrorCategory, classify_engine_code, classify_error_message};
use thiserror::Error;

pub type CalcResult<T> = Result<T, CalcError>;

/// Failures surfaced by the calc client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CalcError {
    /// Handshake or transport failure while reaching the engine.
    #[error("connection to analysis engine failed: {0}")]
    Connection(String),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Listing tools failed after a successful or attempted connect.
    #[error("failed to fetch analysis tools: {0}")]
    ToolFetch(String),

    /// The engine reported a failure or the call itself failed.
    #[error("{message}")]
    Execution {
        code: Option<String>,
        message: String,
    },

    #[error("invalid selection: {0}")]
    Selection(String),

    #[error("circuit breaker open after {failures} failures, retry in {}ms", .retry_in.as_millis())]
    CircuitOpen { failures: u32, retry_in: Duration },

    #[error("execution in progress: {execution_id}")]
    ExecutionInProgress { execution_id: String },

    #[error("execution {execution_id} cancelled")]
    Cancelled { execution_id: String },
}

impl CalcError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            code: None,
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection(_) => ErrorCategory::Network,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::ToolFetch(message) => match classify_error_message(message) {
                ErrorCategory::ExecutionError => ErrorCategory::ServiceUnavailable,
                other => other,
            },
            Self::Execution {
                code: Some(code), ..
            } => classify_engine_code(code),
            Self::Execution {
                code: None,
                message,
            } => classify_error_message(message),
            Self::Selection(_) => ErrorCategory::EmptySelection,
            Self::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            Self::ExecutionInProgress { .. } => ErrorCategory::Busy,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_variant() {
        assert_eq!(
            CalcError::Connection("refused".into()).category(),
            ErrorCategory::Network
        );
        assert_eq!(
            CalcError::Timeout {
                operation: "handshake",
                after: Duration::from_secs(5)
            }
            .category(),
            ErrorCategory::Timeout
        );
        assert_eq!(
            CalcError::ExecutionInProgress {
                execution_id: "exec-1".into()
            }
            .category(),
            ErrorCategory::Busy
        );
        assert_eq!(
            CalcError::Cancelled {
                execution_id: "exec-1".into()
            }
            .category(),
            ErrorCategory::Cancelled
        );
        let selection = CalcError::Selection("no tracks selected".into());
        assert_eq!(selection.category(), ErrorCategory::EmptySelection);
        assert!(!selection.is_retryable());
    }

    #[test]
    fn engine_codes_drive_execution_category() {
        let err = CalcError::Execution {
            code: Some("KIND_MISMATCH".into()),
            message: "Tool accepts track only".into(),
        };
        assert_eq!(err.category(), ErrorCategory::KindMismatch);
        assert!(!err.is_retryable());

        let err = CalcError::execution("request timed out");
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn tool_fetch_defaults_to_service_unavailable() {
        let err = CalcError::ToolFetch("engine returned garbage".into());
        assert_eq!(err.category(), ErrorCategory::ServiceUnavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn display_includes_durations() {
        let err = CalcError::Timeout {
            operation: "waiting for connection",
            after: Duration::from_millis(5_000),
        };
        assert_eq!(err.to_string(), "waiting for connection timed out after 5000ms");
    }
}
