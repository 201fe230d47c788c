//! # Stream Supervision Errors
//!
//! One error type for the whole supervision subsystem, classified so the
//! supervisors can decide locally whether to retry, rotate, or give up.
//!
//! ## Architecture
//!
//! - **`StreamError`**: struct variants, each carrying an [`ErrorContext`]
//!   (timestamp, operation, free-text context, severity, retryable flag)
//! - **Traits**: [`Retryable`] and [`HasSeverity`] expose the classification
//!   the supervisors act on
//! - **`classify`**: `is_fatal` lets the connection loop skip the remaining
//!   reconnect attempts for errors no retry can fix
//!
//! ## Taxonomy
//!
//! | Variant | Raised when | Handling |
//! |---------|-------------|----------|
//! | `OpenFailure` | source could not be opened | retried via reconnect |
//! | `StallTimeout` | no picture within the frame timeout | same as open failure |
//! | `ReadFailure` | one decode iteration failed | counted, reconnect past threshold |
//! | `ProcessExitFailure` | encoder exited non-zero or too early | segment retry |
//! | `RetriesExhausted` | bounded retries used up | terminal, reported upward |
//! | `ShutdownSignalFailure` | quit/terminate could not be delivered | logged and swallowed |
//!
//! Only `RetriesExhausted` ever leaves a supervisor, and then only through the
//! status callback and the stats flags.
//!
//! ## Usage
//!
//! ```rust
//! use camwatch::error::{Retryable, StreamError};
//!
//! let error = StreamError::open_failure("rtsp://10.0.0.5:554/live", "connection refused")
//!     .with_operation("connect");
//! assert!(error.is_retryable());
//! assert_eq!(error.category(), "open_failure");
//! ```

use std::{error::Error as StdError, fmt, time::SystemTime};

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational; nothing to act on
    Info,
    /// Degraded but self-healing
    Warning,
    /// Affects operation, handled locally
    Error,
    /// Cannot be recovered without external action
    Fatal,
}

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// When the error occurred
    pub timestamp: SystemTime,
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    /// Additional context about the error
    pub context: Option<String>,
    /// Error severity level
    pub severity: ErrorSeverity,
    /// Whether this error is retryable
    pub retryable: bool,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            severity: ErrorSeverity::Error,
            retryable: false,
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

/// Error type for connection, recording, audio and process supervision
#[derive(Debug)]
pub enum StreamError {
    /// Configuration validation errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// The source could not be opened or probed
    OpenFailure {
        /// Credential-free source URL
        url: String,
        reason: String,
        context: ErrorContext,
    },
    /// No picture arrived within the frame timeout
    StallTimeout {
        waited_ms: u64,
        context: ErrorContext,
    },
    /// A single decode iteration failed
    ReadFailure {
        reason: String,
        context: ErrorContext,
    },
    /// An external process exited unexpectedly or implausibly early
    ProcessExitFailure {
        label: String,
        code: Option<i32>,
        runtime_ms: u64,
        context: ErrorContext,
    },
    /// A bounded retry budget was used up
    RetriesExhausted {
        operation: String,
        attempts: u32,
        context: ErrorContext,
    },
    /// A quit or terminate request could not be delivered
    ShutdownSignalFailure {
        label: String,
        reason: String,
        context: ErrorContext,
    },
    /// An external process could not be launched
    Spawn {
        label: String,
        source: anyhow::Error,
        context: ErrorContext,
    },
    /// I/O errors
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
    /// Operation not valid in the current state
    State {
        current_state: String,
        attempted_operation: String,
        reason: String,
        context: ErrorContext,
    },
}

impl StreamError {
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    pub fn open_failure(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OpenFailure {
            url: url.into(),
            reason: reason.into(),
            context: ErrorContext::new().retryable(),
        }
    }

    pub fn stall_timeout(waited_ms: u64) -> Self {
        Self::StallTimeout {
            waited_ms,
            context: ErrorContext::new()
                .with_severity(ErrorSeverity::Warning)
                .retryable(),
        }
    }

    pub fn read_failure(reason: impl Into<String>) -> Self {
        Self::ReadFailure {
            reason: reason.into(),
            context: ErrorContext::new()
                .with_severity(ErrorSeverity::Warning)
                .retryable(),
        }
    }

    pub fn process_exit(label: impl Into<String>, code: Option<i32>, runtime_ms: u64) -> Self {
        Self::ProcessExitFailure {
            label: label.into(),
            code,
            runtime_ms,
            context: ErrorContext::new().retryable(),
        }
    }

    pub fn retries_exhausted(operation: impl Into<String>, attempts: u32) -> Self {
        Self::RetriesExhausted {
            operation: operation.into(),
            attempts,
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    pub fn shutdown_signal(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ShutdownSignalFailure {
            label: label.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Info),
        }
    }

    pub fn spawn(label: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Spawn {
            label: label.into(),
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn io_at(
        operation: impl Into<String>,
        path: impl AsRef<std::path::Path>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: Some(path.as_ref().display().to_string()),
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn state(
        current_state: impl Into<String>,
        attempted_operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::State {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.context_mut().severity = severity;
        self
    }

    pub fn retryable(mut self) -> Self {
        self.context_mut().retryable = true;
        self
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Config { context, .. }
            | Self::OpenFailure { context, .. }
            | Self::StallTimeout { context, .. }
            | Self::ReadFailure { context, .. }
            | Self::ProcessExitFailure { context, .. }
            | Self::RetriesExhausted { context, .. }
            | Self::ShutdownSignalFailure { context, .. }
            | Self::Spawn { context, .. }
            | Self::Io { context, .. }
            | Self::State { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Config { context, .. }
            | Self::OpenFailure { context, .. }
            | Self::StallTimeout { context, .. }
            | Self::ReadFailure { context, .. }
            | Self::ProcessExitFailure { context, .. }
            | Self::RetriesExhausted { context, .. }
            | Self::ShutdownSignalFailure { context, .. }
            | Self::Spawn { context, .. }
            | Self::Io { context, .. }
            | Self::State { context, .. } => context,
        }
    }

    /// Stable snake_case name, used as a structured log field
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::OpenFailure { .. } => "open_failure",
            Self::StallTimeout { .. } => "stall_timeout",
            Self::ReadFailure { .. } => "read_failure",
            Self::ProcessExitFailure { .. } => "process_exit_failure",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::ShutdownSignalFailure { .. } => "shutdown_signal_failure",
            Self::Spawn { .. } => "spawn",
            Self::Io { .. } => "io",
            Self::State { .. } => "state",
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Config {
                field,
                value,
                reason,
                ..
            } => write!(f, "Configuration error in '{}': {} (value: {})", field, reason, value),
            StreamError::OpenFailure { url, reason, .. } => {
                write!(f, "Failed to open {}: {}", url, reason)
            }
            StreamError::StallTimeout { waited_ms, .. } => {
                write!(f, "No frame received for {} ms", waited_ms)
            }
            StreamError::ReadFailure { reason, .. } => write!(f, "Frame read failed: {}", reason),
            StreamError::ProcessExitFailure {
                label,
                code,
                runtime_ms,
                ..
            } => match code {
                Some(code) => write!(
                    f,
                    "Process '{}' exited with code {} after {} ms",
                    label, code, runtime_ms
                ),
                None => write!(
                    f,
                    "Process '{}' was terminated by a signal after {} ms",
                    label, runtime_ms
                ),
            },
            StreamError::RetriesExhausted {
                operation, attempts, ..
            } => write!(f, "Gave up on {} after {} attempts", operation, attempts),
            StreamError::ShutdownSignalFailure { label, reason, .. } => {
                write!(f, "Could not signal '{}': {}", label, reason)
            }
            StreamError::Spawn { label, source, .. } => {
                write!(f, "Failed to launch '{}': {:#}", label, source)
            }
            StreamError::Io {
                operation,
                path,
                source,
                ..
            } => match path {
                Some(path) => write!(f, "I/O error during {} on {}: {}", operation, path, source),
                None => write!(f, "I/O error during {}: {}", operation, source),
            },
            StreamError::State {
                current_state,
                attempted_operation,
                reason,
                ..
            } => write!(
                f,
                "Cannot {} while {}: {}",
                attempted_operation, current_state, reason
            ),
        }
    }
}

impl StdError for StreamError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Spawn { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

/// Result type alias using our error type
pub type StreamResult<T> = Result<T, StreamError>;

/// Trait for errors that can be retried
pub trait Retryable {
    /// Check if this error can be retried
    fn is_retryable(&self) -> bool;
}

impl Retryable for StreamError {
    fn is_retryable(&self) -> bool {
        self.context().retryable
            || matches!(
                self,
                Self::OpenFailure { .. }
                    | Self::StallTimeout { .. }
                    | Self::ReadFailure { .. }
                    | Self::ProcessExitFailure { .. }
            )
    }
}

/// Trait for errors with severity levels
pub trait HasSeverity {
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for StreamError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Check if an error is fatal (retrying cannot help)
    pub fn is_fatal(error: &StreamError) -> bool {
        matches!(
            error,
            StreamError::Config { .. } | StreamError::RetriesExhausted { .. }
        ) || error.severity() == ErrorSeverity::Fatal
    }
}

impl From<std::io::Error> for StreamError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(error: serde_json::Error) -> Self {
        Self::read_failure(format!("malformed probe output: {}", error))
    }
}
