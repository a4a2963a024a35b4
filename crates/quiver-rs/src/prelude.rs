//! Convenience re-exports for common `quiver-rs` types.
//!
//! Meant to be glob-imported when wiring an agent's tool layer:
//!
//! ```ignore
//! use quiver_rs::prelude::*;
//! ```
//!
//! This pulls in the types needed for the vast majority of integrations:
//! the [`Toolkit`] facade, [`ToolBuilder`], call/result types, context
//! stores, and execution config. Specialized types (raw handler variants,
//! the schema helpers, the group manager internals) are intentionally
//! excluded; import those from their modules directly when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    json_schema_for, RegistrationError, ToolCall, ToolError, ToolErrorKind, ToolOutcome,
    ToolResult, ToolSchema,
};

// ── Facade and registration ─────────────────────────────────────────
pub use crate::registry::{RegisterOptions, Tool};
pub use crate::toolkit::{ToolBuilder, ToolModule, Toolkit, ToolkitConfig, RESET_EQUIPPED_TOOLS};

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{ContextProvider, ContextStore, ExecutionContext};

// ── Dispatch and execution ──────────────────────────────────────────
pub use crate::dispatch::{AgentHandle, ChunkSink, IntoOutcome};
pub use crate::executor::{CallScope, ExecutionConfig};
pub use crate::groups::ToolGroup;
