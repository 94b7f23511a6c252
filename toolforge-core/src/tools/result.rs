//! Tool execution result and error model
//!
//! Every invocation, static or dynamic, ends in a [`ToolExecutionResult`].
//! Failures are values: the error carries a [`ToolErrorKind`] from a closed
//! taxonomy, and only [`ToolErrorKind::Timeout`] is retryable.

use crate::dynamic::StepTrace;
use crate::tools::CapabilitySet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Result of invoking a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// Whether the tool completed successfully
    pub success: bool,

    /// Output value (`null` on failure)
    #[serde(default)]
    pub output: Value,

    /// Structured error when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,

    /// Provenance and timing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExecutionMetadata>,
}

impl ToolExecutionResult {
    /// Create a successful result
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: None,
        }
    }

    /// Create a failed result
    pub fn failed(error: ToolError) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error),
            metadata: None,
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: ExecutionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Error kind, if this result is a failure
    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Check if this result represents cancellation
    pub fn is_cancelled(&self) -> bool {
        self.error_kind() == Some(ToolErrorKind::Cancelled)
    }

    /// Check if the failure may be retried
    pub fn is_retryable(&self) -> bool {
        self.error_kind().is_some_and(|k| k.is_retryable())
    }

    /// Convert into a plain `Result`
    pub fn into_result(self) -> Result<Value, ToolError> {
        match self.error {
            Some(error) if !self.success => Err(error),
            _ => Ok(self.output),
        }
    }
}

impl From<Result<Value, ToolError>> for ToolExecutionResult {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(value) => ToolExecutionResult::ok(value),
            Err(error) => ToolExecutionResult::failed(error),
        }
    }
}

/// Structured tool error with taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    /// Error kind (determines retryability)
    pub kind: ToolErrorKind,

    /// Human-readable error message
    pub message: String,

    /// Stable machine-readable code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Additional context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Suggested retry delay (for retryable errors)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_millis"
    )]
    pub retry_after: Option<Duration>,

    /// Underlying error of a failed composite step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ToolError>>,
}

impl ToolError {
    /// Create a new tool error
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: Some(kind.default_code().to_string()),
            context: None,
            retry_after: None,
            cause: None,
        }
    }

    /// Override the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add context
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Add retry delay
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Tool name is unknown, disabled or expired
    pub fn not_found(name: &str) -> Self {
        Self::new(
            ToolErrorKind::NotFound,
            format!("No callable tool named '{}'", name),
        )
        .with_context(serde_json::json!({ "tool": name }))
    }

    /// Arguments do not satisfy the input schema
    pub fn schema_violation(issues: Vec<ArgumentIssue>) -> Self {
        Self {
            message: format!(
                "Arguments do not match input schema: {}",
                issues
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
            context: Some(serde_json::to_value(&issues).unwrap_or_default()),
            ..Self::new(ToolErrorKind::SchemaViolation, "")
        }
    }

    /// Required capabilities are not granted
    pub fn capability_denied(reason: impl Into<String>, missing: &CapabilitySet) -> Self {
        Self::new(ToolErrorKind::CapabilityDenied, reason)
            .with_context(serde_json::json!({ "missing": missing.to_tokens() }))
    }

    /// The user rejected a confirmation request
    pub fn approval_rejected(tool: &str, reason: Option<&str>) -> Self {
        let message = match reason {
            Some(r) => format!("Invocation of '{}' was rejected: {}", tool, r),
            None => format!("Invocation of '{}' was rejected", tool),
        };
        Self::new(ToolErrorKind::CapabilityDenied, message).with_code("APPROVAL_REJECTED")
    }

    /// Template id is not in the catalog
    pub fn template_not_found(template_id: &str) -> Self {
        Self::new(
            ToolErrorKind::TemplateNotFound,
            format!("Unknown template '{}'", template_id),
        )
    }

    /// Sandboxed code raised an error
    pub fn code_execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::CodeExecution, message)
    }

    /// A reference could not be resolved
    pub fn step_reference(step_id: &str, message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::StepReference, message)
            .with_context(serde_json::json!({ "step": step_id }))
    }

    /// A composite step failed; the child error becomes the cause
    pub fn step_failure(step_id: &str, tool_name: &str, cause: ToolError) -> Self {
        let mut error = Self::new(
            ToolErrorKind::StepFailure,
            format!("Step '{}' ({}) failed: {}", step_id, tool_name, cause.message),
        )
        .with_context(serde_json::json!({ "step": step_id, "tool": tool_name }));
        error.cause = Some(Box::new(cause));
        error
    }

    /// Invocation was cancelled
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Cancelled, reason)
    }

    /// Create a timeout error
    pub fn timeout(duration: Duration) -> Self {
        Self::new(
            ToolErrorKind::Timeout,
            format!("Tool execution timed out after {:?}", duration),
        )
        .with_retry_after(Duration::from_secs(1))
    }

    /// Composite nesting went too deep
    pub fn depth_exceeded(limit: usize) -> Self {
        Self::new(
            ToolErrorKind::DepthExceeded,
            format!("Composite nesting exceeded the limit of {}", limit),
        )
    }

    /// A tool failed on its own terms
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Execution, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, message)
    }

    /// Innermost error in a chain of step failures
    pub fn root_cause(&self) -> &ToolError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Error kind taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// No callable tool with that name
    NotFound,

    /// Arguments violate the input schema, or a template parameter is missing
    SchemaViolation,

    /// Capabilities missing or confirmation rejected
    CapabilityDenied,

    /// Template id not in the catalog
    TemplateNotFound,

    /// Sandboxed code raised an error
    CodeExecution,

    /// A `$.` reference or condition could not be resolved
    StepReference,

    /// A composite step failed
    StepFailure,

    /// Cancelled by user/system
    Cancelled,

    /// Execution timed out (retryable)
    Timeout,

    /// Composite recursion limit reached
    DepthExceeded,

    /// A built-in tool or template failed
    Execution,

    /// Bug or broken invariant
    Internal,
}

impl ToolErrorKind {
    /// Check if this error kind is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolErrorKind::Timeout)
    }

    /// Check if this error kind is fatal (never retry)
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// Code used when none is set explicitly
    pub fn default_code(&self) -> &'static str {
        match self {
            ToolErrorKind::NotFound => "NOT_FOUND",
            ToolErrorKind::SchemaViolation => "SCHEMA_VIOLATION",
            ToolErrorKind::CapabilityDenied => "CAPABILITY_DENIED",
            ToolErrorKind::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            ToolErrorKind::CodeExecution => "CODE_EXECUTION_ERROR",
            ToolErrorKind::StepReference => "STEP_REFERENCE_ERROR",
            ToolErrorKind::StepFailure => "STEP_FAILURE",
            ToolErrorKind::Cancelled => "CANCELLED",
            ToolErrorKind::Timeout => "TIMEOUT",
            ToolErrorKind::DepthExceeded => "DEPTH_EXCEEDED",
            ToolErrorKind::Execution => "EXECUTION_ERROR",
            ToolErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// A single argument that failed schema validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentIssue {
    /// Field path (e.g., "options.indent")
    pub field: String,

    /// What is wrong
    pub message: String,
}

impl ArgumentIssue {
    /// Create a new argument issue
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ArgumentIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Where a tool came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    Builtin,
    Dynamic,
}

/// Provenance metadata attached to a result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// Tool name
    pub tool_name: String,

    /// Builtin or dynamic
    pub origin: ToolOrigin,

    /// Specification version for dynamic tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<u32>,

    /// Hash of input arguments
    pub args_hash: String,

    /// Timestamp when execution started
    pub started_at: DateTime<Utc>,

    /// Execution duration
    #[serde(with = "duration_millis")]
    pub duration: Duration,

    /// Session that invoked the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Request/trace ID for correlation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Gate and approval decisions that were applied
    #[serde(default)]
    pub policy_decisions: Vec<PolicyDecision>,

    /// Per-step traces for composite tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepTrace>,
}

impl ExecutionMetadata {
    /// Create new metadata
    pub fn new(tool_name: impl Into<String>, origin: ToolOrigin, args: &Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            origin,
            tool_version: None,
            args_hash: hash_args(args),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            session_id: None,
            trace_id: None,
            policy_decisions: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Set duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Add a policy decision
    pub fn with_policy_decision(mut self, decision: PolicyDecision) -> Self {
        self.policy_decisions.push(decision);
        self
    }
}

/// Record of a policy decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// What was checked
    pub check: String,

    /// Whether it was allowed
    pub allowed: bool,

    /// Reason for decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyDecision {
    /// Create a new policy decision
    pub fn new(check: impl Into<String>, allowed: bool) -> Self {
        Self {
            check: check.into(),
            allowed,
            reason: None,
        }
    }

    /// Add a reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Stable SHA-256 of the canonical JSON form of the arguments
pub fn hash_args(args: &Value) -> String {
    use sha2::{Digest, Sha256};
    let canonical = serde_json::to_string(args).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<u64> = Option::deserialize(deserializer)?;
        Ok(opt.map(Duration::from_millis))
    }
}
