//! Error taxonomy for the invocation engine.
//!
//! Runtime failures ([`ToolError`]) are converted into
//! [`ToolResult`](crate::ToolResult) error payloads and handed back to the
//! model; they never escape the invocation API as panics or `Err` returns.
//! Registration failures ([`RegistrationError`]) raise immediately and
//! synchronously, since they represent programmer error rather than runtime
//! data error.

use std::time::Duration;
use thiserror::Error;

/// Category tag for a [`ToolError`], stable across message changes.
///
/// Retry predicates and tests should match on this rather than on the
/// rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolErrorKind {
    NotFound,
    GroupInactive,
    ValidationFailed,
    ExecutionFailed,
    Timeout,
    RetryExhausted,
}

/// A runtime tool-call failure.
///
/// Every variant carries the tool name so the error can be attributed in
/// logs and result payloads without extra bookkeeping at the call site.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The named tool is not registered.
    #[error("unknown tool '{0}'")]
    NotFound(String),

    /// The tool exists but none of its groups is active.
    #[error("tool '{0}' is not available: none of its groups is active")]
    GroupInactive(String),

    /// The call input did not match the tool's declared schema. The
    /// underlying callable was never invoked.
    #[error("argument validation failed for tool '{tool}':\n{detail}\nFix the arguments and try again.")]
    ValidationFailed { tool: String, detail: String },

    /// The tool's handler returned an error or panicked.
    #[error("tool '{tool}' failed: {message}")]
    ExecutionFailed { tool: String, message: String },

    /// The attempt exceeded its deadline. The underlying work is cancelled
    /// best-effort; blocking handlers may keep running to completion.
    #[error("tool '{tool}' timed out after {limit:?}")]
    Timeout { tool: String, limit: Duration },

    /// All configured attempts failed; wraps the last failure.
    #[error("tool '{tool}' failed after {attempts} attempts: {last}")]
    RetryExhausted {
        tool: String,
        attempts: u32,
        last: Box<ToolError>,
    },
}

impl ToolError {
    /// The stable category of this error.
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            ToolError::NotFound(_) => ToolErrorKind::NotFound,
            ToolError::GroupInactive(_) => ToolErrorKind::GroupInactive,
            ToolError::ValidationFailed { .. } => ToolErrorKind::ValidationFailed,
            ToolError::ExecutionFailed { .. } => ToolErrorKind::ExecutionFailed,
            ToolError::Timeout { .. } => ToolErrorKind::Timeout,
            ToolError::RetryExhausted { .. } => ToolErrorKind::RetryExhausted,
        }
    }

    /// The tool name this error is attributed to.
    pub fn tool(&self) -> &str {
        match self {
            ToolError::NotFound(tool) | ToolError::GroupInactive(tool) => tool,
            ToolError::ValidationFailed { tool, .. }
            | ToolError::ExecutionFailed { tool, .. }
            | ToolError::Timeout { tool, .. }
            | ToolError::RetryExhausted { tool, .. } => tool,
        }
    }

    /// Whether this failure is worth retrying by default: execution failures
    /// and timeouts are; lookup, activation, and validation failures are
    /// deterministic and are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ToolErrorKind::ExecutionFailed | ToolErrorKind::Timeout
        )
    }

    /// Fill in an empty tool-name field. Handlers built from plain closures
    /// do not know the name they were registered under; the executor stamps
    /// it after dispatch.
    pub(crate) fn stamped(self, name: &str) -> Self {
        match self {
            ToolError::ExecutionFailed { tool, message } if tool.is_empty() => {
                ToolError::ExecutionFailed {
                    tool: name.to_string(),
                    message,
                }
            }
            ToolError::ValidationFailed { tool, detail } if tool.is_empty() => {
                ToolError::ValidationFailed {
                    tool: name.to_string(),
                    detail,
                }
            }
            other => other,
        }
    }
}

/// A registration-time misuse. Raised eagerly from registration APIs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// A group with this name already exists.
    #[error("a group named '{0}' already exists")]
    DuplicateGroup(String),

    /// A tool referenced a group that was never created.
    #[error("group '{0}' does not exist")]
    UnknownGroup(String),

    /// Tool and group names must be non-empty.
    #[error("name must not be empty")]
    EmptyName,

    /// A tool was built without a handler. Use an external registration for
    /// tools executed outside the engine.
    #[error("tool '{0}' has no handler; register it as schema-only if it runs externally")]
    MissingHandler(String),
}
