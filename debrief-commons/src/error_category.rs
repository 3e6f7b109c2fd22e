//! Canonical error categorisation for the debrief-calc client.
//!
//! Every failure surfaced by the client (connection, catalog fetch, tool
//! execution, configuration) maps onto a single `ErrorCategory`. The category
//! drives the `retryable` flag that UI collaborators use to decide whether to
//! offer a retry affordance.
//!
//! # Error Categories
//!
//! Errors are divided into **retryable** (transient) and **non-retryable**
//! (permanent) categories.
//!
//! - Engine error codes (`TOOL_NOT_FOUND`, `INVALID_CONTEXT`, ...) are mapped
//!   through [`classify_engine_code`], which is preferred over string matching.
//! - String-based fallback is kept for `anyhow::Error` chains where the
//!   original type is erased.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// Canonical error category used for retry decisions and user-facing labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    // === Retryable (Transient) ===
    /// Transport-level failure talking to the engine (spawn failure, broken pipe, ...)
    Network,
    /// Handshake, poll-wait or tool call exceeded its bound
    Timeout,
    /// Engine reachable but not able to serve requests right now
    ServiceUnavailable,
    /// Circuit breaker is open for the engine
    CircuitOpen,
    /// Another tool execution currently holds the execution slot
    Busy,

    // === Non-Retryable (Permanent) ===
    /// Engine does not know the requested tool
    ToolNotFound,
    /// Selection context does not match what the tool requires
    InvalidContext,
    /// Selected feature kinds are not accepted by the tool
    KindMismatch,
    /// Tool parameters rejected by the engine
    InvalidParameters,
    /// No qualifying track or location was selected
    EmptySelection,
    /// Client configuration is invalid
    Configuration,
    /// User cancelled the operation
    Cancelled,
    /// General execution error (catch-all for unclassified failures)
    ExecutionError,
}

/// Describes whether and how an error can be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retryability {
    /// Error is transient and may succeed on retry.
    Retryable {
        /// Suggested maximum retry attempts.
        max_attempts: u32,
        /// Suggested backoff strategy.
        backoff: BackoffStrategy,
    },
    /// Error is permanent and should NOT be retried.
    NonRetryable,
}

/// Backoff strategy for retryable errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Exponential backoff with base delay and maximum cap.
    Exponential { base: Duration, max: Duration },
    /// Fixed delay between retries (e.g. waiting out a breaker cooldown).
    Fixed(Duration),
}

impl ErrorCategory {
    /// Whether this error category is safe to retry.
    #[inline]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::ServiceUnavailable
                | ErrorCategory::CircuitOpen
                | ErrorCategory::Busy
        )
    }

    /// Whether the failure reflects a caller mistake rather than engine health.
    #[inline]
    pub const fn is_caller_mistake(&self) -> bool {
        matches!(
            self,
            ErrorCategory::InvalidContext
                | ErrorCategory::KindMismatch
                | ErrorCategory::InvalidParameters
                | ErrorCategory::EmptySelection
        )
    }

    /// Get the recommended retryability for this error category.
    pub fn retryability(&self) -> Retryability {
        match self {
            ErrorCategory::Network | ErrorCategory::ServiceUnavailable => Retryability::Retryable {
                max_attempts: 3,
                backoff: BackoffStrategy::Exponential {
                    base: Duration::from_millis(500),
                    max: Duration::from_secs(10),
                },
            },
            ErrorCategory::Timeout => Retryability::Retryable {
                max_attempts: 2,
                backoff: BackoffStrategy::Exponential {
                    base: Duration::from_millis(1000),
                    max: Duration::from_secs(15),
                },
            },
            ErrorCategory::CircuitOpen => Retryability::Retryable {
                max_attempts: 1,
                backoff: BackoffStrategy::Fixed(Duration::from_secs(30)),
            },
            ErrorCategory::Busy => Retryability::Retryable {
                max_attempts: 1,
                backoff: BackoffStrategy::Fixed(Duration::from_secs(1)),
            },
            _ => Retryability::NonRetryable,
        }
    }

    /// Get recovery suggestions for this error category.
    pub fn recovery_suggestions(&self) -> Vec<Cow<'static, str>> {
        match self {
            ErrorCategory::Network => vec![
                Cow::Borrowed("Check that the analysis engine can be launched"),
                Cow::Borrowed("Verify the configured engine command and Python environment"),
            ],
            ErrorCategory::Timeout => vec![
                Cow::Borrowed("Increase connection_timeout_ms or tool_timeout_ms if appropriate"),
                Cow::Borrowed("Reduce the number of selected features"),
            ],
            ErrorCategory::ServiceUnavailable => vec![
                Cow::Borrowed("The analysis engine is temporarily unavailable"),
                Cow::Borrowed("Retry after a brief delay"),
            ],
            ErrorCategory::CircuitOpen => vec![
                Cow::Borrowed("Analysis tools are paused after repeated engine failures"),
                Cow::Borrowed("Wait for the circuit breaker cooldown period"),
            ],
            ErrorCategory::Busy => vec![
                Cow::Borrowed("Wait for the running analysis to finish or cancel it"),
            ],
            ErrorCategory::ToolNotFound => vec![
                Cow::Borrowed("Refresh the tool list; the engine may have been upgraded"),
            ],
            ErrorCategory::InvalidContext => vec![
                Cow::Borrowed("Change the selection to match the tool's required context"),
            ],
            ErrorCategory::KindMismatch => vec![
                Cow::Borrowed("Select tracks or locations accepted by this tool"),
            ],
            ErrorCategory::InvalidParameters => vec![
                Cow::Borrowed("Check parameter names and types against the tool schema"),
                Cow::Borrowed("Ensure required parameters are provided"),
            ],
            ErrorCategory::EmptySelection => vec![
                Cow::Borrowed("Select at least one track or reference location"),
            ],
            ErrorCategory::Configuration => vec![
                Cow::Borrowed("Review the calc section of the debrief configuration"),
            ],
            ErrorCategory::Cancelled => vec![Cow::Borrowed("The operation was cancelled")],
            ErrorCategory::ExecutionError => vec![
                Cow::Borrowed("Review error details for specific issues"),
                Cow::Borrowed("Check the engine log output for a traceback"),
            ],
        }
    }

    /// Get a concise, user-friendly label for this error category.
    pub const fn user_label(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Engine connection error",
            ErrorCategory::Timeout => "Request timed out",
            ErrorCategory::ServiceUnavailable => "Engine temporarily unavailable",
            ErrorCategory::CircuitOpen => "Analysis temporarily disabled",
            ErrorCategory::Busy => "Another analysis is running",
            ErrorCategory::ToolNotFound => "Tool not found",
            ErrorCategory::InvalidContext => "Selection does not fit tool",
            ErrorCategory::KindMismatch => "Unsupported feature kind",
            ErrorCategory::InvalidParameters => "Invalid parameters",
            ErrorCategory::EmptySelection => "Nothing selected",
            ErrorCategory::Configuration => "Configuration error",
            ErrorCategory::Cancelled => "Operation cancelled",
            ErrorCategory::ExecutionError => "Execution failed",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_label())
    }
}

/// Map an error code reported by the analysis engine onto a category.
///
/// Unknown codes fall back to message classification of the code itself.
pub fn classify_engine_code(code: &str) -> ErrorCategory {
    match code.trim().to_ascii_uppercase().as_str() {
        "TOOL_NOT_FOUND" => ErrorCategory::ToolNotFound,
        "INVALID_CONTEXT" => ErrorCategory::InvalidContext,
        "KIND_MISMATCH" => ErrorCategory::KindMismatch,
        "VALIDATION_FAILED" | "INVALID_PARAMS" => ErrorCategory::InvalidParameters,
        "EXECUTION_FAILED" | "EXECUTION_ERROR" => ErrorCategory::ExecutionError,
        other => classify_error_message(other),
    }
}

/// Classify an `anyhow::Error` into a canonical `ErrorCategory`.
pub fn classify_anyhow_error(err: &anyhow::Error) -> ErrorCategory {
    classify_error_message(&format!("{err:#}"))
}

/// Classify an error message string into an `ErrorCategory`.
///
/// Marker groups are checked in priority order so that overlapping patterns
/// resolve consistently (e.g. "connection timed out" is a timeout).
pub fn classify_error_message(msg: &str) -> ErrorCategory {
    let msg = if msg.as_bytes().iter().any(u8::is_ascii_uppercase) {
        Cow::Owned(msg.to_ascii_lowercase())
    } else {
        Cow::Borrowed(msg)
    };

    if contains_any(&msg, &["cancelled", "canceled", "interrupted"]) {
        return ErrorCategory::Cancelled;
    }

    if contains_any(&msg, &["circuit breaker", "circuit open"]) {
        return ErrorCategory::CircuitOpen;
    }

    if contains_any(&msg, &["execution in progress", "already running"]) {
        return ErrorCategory::Busy;
    }

    if contains_any(
        &msg,
        &["tool not found", "tool_not_found", "unknown tool", "no such tool"],
    ) {
        return ErrorCategory::ToolNotFound;
    }

    if contains_any(&msg, &["invalid context", "invalid_context", "requires context"]) {
        return ErrorCategory::InvalidContext;
    }

    if contains_any(&msg, &["kind mismatch", "kind_mismatch", "accepts kinds"]) {
        return ErrorCategory::KindMismatch;
    }

    if contains_any(
        &msg,
        &[
            "invalid argument",
            "invalid parameters",
            "validation failed",
            "validation_failed",
            "missing required",
            "schema validation",
        ],
    ) {
        return ErrorCategory::InvalidParameters;
    }

    if contains_any(&msg, &["no tracks or locations selected", "empty selection"]) {
        return ErrorCategory::EmptySelection;
    }

    if contains_any(&msg, &["timeout", "timed out", "deadline exceeded"]) {
        return ErrorCategory::Timeout;
    }

    if contains_any(
        &msg,
        &["service unavailable", "temporarily unavailable", "overloaded", "try again"],
    ) {
        return ErrorCategory::ServiceUnavailable;
    }

    if contains_any(
        &msg,
        &[
            "connection refused",
            "connection reset",
            "connection closed",
            "broken pipe",
            "failed to spawn",
            "no such file",
            "transport",
            "handshake",
        ],
    ) {
        return ErrorCategory::Network;
    }

    if contains_any(&msg, &["configuration", "config error"]) {
        return ErrorCategory::Configuration;
    }

    ErrorCategory::ExecutionError
}

#[inline]
fn contains_any(message: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| message.contains(marker))
}
