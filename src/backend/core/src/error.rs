//! Error handling for Stackup Core.
//!
//! This module provides:
//! - A single error type with a machine-readable code, context and chaining
//! - Severity classification that drives logging
//! - Process exit-code mapping for the command-line entry point
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use stackup_core::error::{StackupError, Result};
//!
//! fn declare() -> Result<()> {
//!     Err(StackupError::unknown_dependency("app", "databse"))
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Stackup operations.
pub type Result<T> = std::result::Result<T, StackupError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and appear in JSON output, so automation can branch
/// on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Graph Errors (1000-1099)
    GraphCycleDetected,
    UnknownDependency,
    DuplicateNode,
    NodeNotFound,

    // Probe Errors (1100-1199)
    ProbeBuildFailed,

    // Run Errors (1300-1399)
    RunCancelled,
    DeadlineExceeded,

    // Serialization Errors (2200-2299)
    SerializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::GraphCycleDetected => 1000,
            Self::UnknownDependency => 1001,
            Self::DuplicateNode => 1002,
            Self::NodeNotFound => 1003,

            Self::ProbeBuildFailed => 1100,

            Self::RunCancelled => 1300,
            Self::DeadlineExceeded => 1301,

            Self::SerializationError => 2200,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Check if this error is a configuration error detected before any probing.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self.numeric_code(),
            1000..=1099 | 5000..=5099
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "graph",
            1100..=1199 => "probe",
            1300..=1399 => "run",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }

    /// Process exit code used when this error aborts a run.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::RunCancelled => 130,
            _ if self.is_configuration() => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Operational issues (timeouts, cancellations)
    Medium,
    /// Misconfiguration that needs an operator
    High,
    /// Bugs and failures of the orchestrator itself
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::RunCancelled
            | ErrorCode::DeadlineExceeded
            | ErrorCode::NodeNotFound => Self::Medium,

            ErrorCode::GraphCycleDetected
            | ErrorCode::UnknownDependency
            | ErrorCode::DuplicateNode
            | ErrorCode::ProbeBuildFailed
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Node the error relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Stackup Core.
#[derive(Debug)]
pub struct StackupError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Operator-facing message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for StackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " ({})", internal)?;
        }
        Ok(())
    }
}

impl std::error::Error for StackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl StackupError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn is_configuration(&self) -> bool {
        self.code.is_configuration()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Process exit code for a run aborted by this error.
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    node = ?self.details.node,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "stackup_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Report (machine-readable)
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializable form of an error, printed when a run aborts before producing a
/// health report.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

impl From<&StackupError> for ErrorInfo {
    fn from(error: &StackupError) -> Self {
        let details = &error.details;
        Self {
            code: error.code,
            numeric_code: error.code.numeric_code(),
            category: error.code.category().to_string(),
            message: error.to_string(),
            details: if details.context.is_empty()
                && details.node.is_none()
                && details.suggested_action.is_none()
            {
                None
            } else {
                Some(details.clone())
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for StackupError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for StackupError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (
                ErrorCode::ConfigurationError,
                "Configuration could not be loaded",
            ),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl StackupError {
    // ─────────────────────────────────────────────────────────────────────────
    // Graph Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// A dependency cycle was found in the service declaration.
    pub fn cycle_detected(node: impl Into<String>) -> Self {
        let node = node.into();
        Self::new(
            ErrorCode::GraphCycleDetected,
            format!("Dependency cycle detected involving node '{}'", node),
        )
        .with_details(
            ErrorDetails::new()
                .with_node(&node)
                .with_suggestion("Remove one of the depends_on edges that forms the cycle"),
        )
    }

    /// A node depends on a node that was never declared.
    pub fn unknown_dependency(node: impl Into<String>, dependency: impl Into<String>) -> Self {
        let node = node.into();
        let dependency = dependency.into();
        Self::new(
            ErrorCode::UnknownDependency,
            format!("Node '{}' depends on undeclared node '{}'", node, dependency),
        )
        .with_details(
            ErrorDetails::new()
                .with_node(&node)
                .with_context("dependency", &dependency),
        )
    }

    /// Two nodes were declared with the same identifier.
    pub fn duplicate_node(node: impl Into<String>) -> Self {
        let node = node.into();
        Self::new(
            ErrorCode::DuplicateNode,
            format!("Node '{}' is declared more than once", node),
        )
        .with_details(ErrorDetails::new().with_node(node))
    }

    /// Lookup of an undeclared node.
    pub fn node_not_found(node: impl Into<String>) -> Self {
        let node = node.into();
        Self::new(
            ErrorCode::NodeNotFound,
            format!("Node not found: {}", node),
        )
        .with_details(ErrorDetails::new().with_node(node))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Probe Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// A probe could not be constructed from its declaration.
    pub fn probe_build_failed(node: impl Into<String>, reason: impl Into<String>) -> Self {
        let node = node.into();
        Self::with_internal(
            ErrorCode::ProbeBuildFailed,
            format!("Readiness probe for '{}' could not be built", node),
            reason,
        )
        .with_details(ErrorDetails::new().with_node(node))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Run Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// The run was interrupted by the operator.
    pub fn run_cancelled() -> Self {
        Self::new(ErrorCode::RunCancelled, "Run cancelled")
    }

    /// The overall run deadline passed before every node settled.
    pub fn deadline_exceeded(deadline: std::time::Duration) -> Self {
        Self::new(
            ErrorCode::DeadlineExceeded,
            format!("Run deadline of {:?} exceeded", deadline),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    /// Create a missing configuration error.
    pub fn missing_configuration(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(
            ErrorCode::MissingConfiguration,
            format!("Missing required configuration value: {}", key),
        )
        .with_context("key", key)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
