//! Tool invocation engine for LLM-driven agents.
//!
//! `quiver-rs` owns the pieces between "the model asked for tool X with these
//! arguments" and "here is the result list": registration, group-based
//! activation, schema validation, context injection, dispatch, and per-call
//! timeout/retry policy.
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Register tools:** see [`Toolkit`](toolkit::Toolkit) (the facade agents
//!   hold), [`ToolBuilder`](toolkit::ToolBuilder) for declaring a tool's
//!   name/description/schema/handler, and [`ToolModule`](toolkit::ToolModule)
//!   for types that contribute several tools at once.
//!
//! - **Control which tools the model sees:** see
//!   [`GroupManager`](groups::GroupManager). Tools in no group are always
//!   active; grouped tools are visible only while at least one of their
//!   groups is active. [`Toolkit::list_tool_schemas`](toolkit::Toolkit::list_tool_schemas)
//!   exports the visible set.
//!
//! - **Inject call-time objects** (session handles, credentials) without
//!   exposing them to the model: see [`ContextStore`](context::ContextStore)
//!   and [`ExecutionContext`](context::ExecutionContext). Preset parameters
//!   (fixed argument values hidden from the schema) live on
//!   [`RegisteredTool`](registry::RegisteredTool).
//!
//! - **Execute calls:** [`Toolkit::call_tool`](toolkit::Toolkit::call_tool)
//!   and [`Toolkit::call_tools`](toolkit::Toolkit::call_tools). Batches run
//!   either in parallel or strictly sequentially; results always come back
//!   in input order. Timeout and retry/backoff are configured through
//!   [`ExecutionConfig`](executor::ExecutionConfig).
//!
//! The engine's external contract is "always returns a result": every call
//! produces exactly one [`ToolResult`], success, error, or suspended, and
//! never an unhandled panic. Only registration-time misuse (duplicate group
//! names, missing handlers) raises an error eagerly, since that is
//! programmer error rather than runtime data error.
//!
//! # Getting started
//!
//! ```ignore
//! use quiver_rs::prelude::*;
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize, JsonSchema)]
//! struct SearchArgs {
//!     /// The search query.
//!     query: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RegistrationError> {
//!     let toolkit = Toolkit::new();
//!     toolkit.register(
//!         ToolBuilder::new("search", "Search the knowledge base")
//!             .handler(|args: SearchArgs| async move {
//!                 format!("results for {}", args.query)
//!             })
//!             .build()?,
//!     )?;
//!
//!     let result = toolkit
//!         .call_tool(ToolCall::new("call-1", "search", serde_json::json!({"query": "rust"})))
//!         .await;
//!     println!("{}", result.render());
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod dispatch;
pub mod errors;
pub mod executor;
pub mod groups;
pub mod prelude;
pub mod registry;
pub mod schema;
pub mod toolkit;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use errors::{RegistrationError, ToolError, ToolErrorKind};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Sentinel success payload for handlers that return nothing.
pub const DONE_RESULT: &str = "done";

/// Model-facing text for a suspended result.
pub const SUSPENDED_RESULT: &str =
    "Suspended: this tool must be executed outside the engine and its result supplied back.";

/// Maximum size (in bytes) for a rendered success payload before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the schema document exposed to the model.
///
/// # Example
///
/// ```
/// use quiver_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct GrepArgs {
///     pattern: String,
///     #[serde(default)]
///     path: Option<String>,
/// }
///
/// let schema = json_schema_for::<GrepArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"pattern".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Call types ─────────────────────────────────────────────────────

/// An incoming invocation request, produced by the agent's reasoning step.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCall {
    /// Call identifier; results are attributed back to it.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Raw input as a JSON value (usually an object).
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

// ── Outcome types ──────────────────────────────────────────────────

/// The normalized outcome of a single tool invocation.
///
/// Suspension is an explicit variant, not an error: it signals that the tool
/// must be executed outside this engine (schema-only/external tools), without
/// marking the call as failed.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// The tool ran and produced a value.
    Success(Value),
    /// The call failed; see [`ToolError`] for the category.
    Error(ToolError),
    /// Execution is deferred to the caller.
    Suspended,
}

impl ToolOutcome {
    /// A plain-text success payload.
    pub fn text(s: impl Into<String>) -> Self {
        ToolOutcome::Success(Value::String(s.into()))
    }

    /// The fixed sentinel for handlers that return nothing.
    pub fn done() -> Self {
        ToolOutcome::Success(Value::String(DONE_RESULT.to_string()))
    }

    /// Serialize an arbitrary value into a success payload, falling back to
    /// a string representation if serialization fails.
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => ToolOutcome::Success(v),
            Err(e) => ToolOutcome::Success(Value::String(format!("<unserializable value: {e}>"))),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error(_))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, ToolOutcome::Suspended)
    }

    /// The error category, if this outcome is an error.
    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match self {
            ToolOutcome::Error(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Whether this is the done/null sentinel a streaming aggregate may
    /// replace.
    pub(crate) fn is_sentinel(&self) -> bool {
        match self {
            ToolOutcome::Success(Value::Null) => true,
            ToolOutcome::Success(Value::String(s)) => s == DONE_RESULT,
            _ => false,
        }
    }
}

/// The result of one tool call, always attributed back to the originating
/// call id and tool name.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// The originating call id.
    pub id: String,
    /// The originating tool name.
    pub name: String,
    /// What happened.
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn new(id: impl Into<String>, name: impl Into<String>, outcome: ToolOutcome) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            outcome,
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_error()
    }

    /// Render the model-facing result string.
    ///
    /// String payloads pass through unchanged; `null` renders as `"null"`;
    /// other values are serialized to JSON. Errors render with the `Error:`
    /// prefix the model is expected to self-correct from.
    pub fn render(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success(Value::String(s)) => s.clone(),
            ToolOutcome::Success(Value::Null) => "null".to_string(),
            ToolOutcome::Success(v) => {
                serde_json::to_string(v).unwrap_or_else(|_| format!("{v}"))
            }
            ToolOutcome::Error(e) => format!("Error: {e}"),
            ToolOutcome::Suspended => SUSPENDED_RESULT.to_string(),
        }
    }
}

// ── Schema export type ─────────────────────────────────────────────

/// The document handed to the LLM for one tool: name, description, and the
/// parameter schema it may call the tool with.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    /// Ask the provider to enforce the schema strictly, where supported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            strict: None,
        }
    }

    /// Mark the schema as strict (builder pattern).
    pub fn strict(mut self) -> Self {
        self.strict = Some(true);
        self
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Truncate a string to at most `max` bytes, appending a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...\n[truncated: {} bytes total]", &s[..cut], s.len())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_constructors() {
        assert!(matches!(
            ToolOutcome::text("hi"),
            ToolOutcome::Success(Value::String(_))
        ));
        assert!(ToolOutcome::done().is_sentinel());
        assert!(ToolOutcome::Success(Value::Null).is_sentinel());
        assert!(!ToolOutcome::text("hi").is_sentinel());
        assert!(ToolOutcome::Suspended.is_suspended());
    }

    #[test]
    fn outcome_json_serializes() {
        #[derive(Serialize)]
        struct Payload {
            count: u32,
        }
        let outcome = ToolOutcome::json(&Payload { count: 3 });
        match outcome {
            ToolOutcome::Success(v) => assert_eq!(v["count"], 3),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn result_render_variants() {
        let text = ToolResult::new("c1", "echo", ToolOutcome::text("hello"));
        assert_eq!(text.render(), "hello");

        let null = ToolResult::new("c2", "echo", ToolOutcome::Success(Value::Null));
        assert_eq!(null.render(), "null");

        let json = ToolResult::new(
            "c3",
            "echo",
            ToolOutcome::Success(serde_json::json!({"a": 1})),
        );
        assert_eq!(json.render(), r#"{"a":1}"#);

        let err = ToolResult::new(
            "c4",
            "echo",
            ToolOutcome::Error(ToolError::NotFound("echo".into())),
        );
        assert!(err.render().starts_with("Error: "));

        let suspended = ToolResult::new("c5", "ext", ToolOutcome::Suspended);
        assert!(suspended.render().starts_with("Suspended"));
    }

    #[test]
    fn truncate_short_unchanged() {
        assert_eq!(truncate_result("hello".into(), 100), "hello");
    }

    #[test]
    fn truncate_long_is_cut() {
        let s = "a".repeat(200);
        let result = truncate_result(s, 50);
        assert!(result.starts_with(&"a".repeat(50)));
        assert!(result.contains("[truncated: 200 bytes total]"));
    }

    #[test]
    fn schema_for_typed_args() {
        #[derive(Deserialize, JsonSchema)]
        #[allow(dead_code)]
        struct Args {
            query: String,
            #[serde(default)]
            limit: Option<u32>,
        }
        let schema = json_schema_for::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["query"].is_object());
    }
}
