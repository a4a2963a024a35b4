//! Handler dispatch: uniform invocation over heterogeneous callables and
//! normalization of their return shapes.
//!
//! Every tool body is a [`ToolHandler`], a tagged variant behind a single
//! `invoke(Invocation) -> ToolOutcome` interface:
//!
//! - [`ToolHandler::from_fn`] wraps a plain async closure over a typed
//!   argument struct.
//! - [`ToolHandler::from_fn_with_context`] also hands the closure the
//!   resolved [`ExecutionContext`] so it can pull session objects,
//!   credentials, or the calling [`AgentHandle`] by type.
//! - [`ToolHandler::from_streaming_fn`] additionally passes a [`ChunkSink`];
//!   emitted chunks are drained and aggregated into the final result.
//! - `ToolHandler::External` has no body; invoking it always yields a
//!   suspended outcome.
//!
//! Parameter binding happens once at registration: the argument struct's
//! serde and schemars definitions are the declarative parameter-descriptor
//! list. At call time the (coerced) input map is deserialized into the
//! struct; injected handles are resolved from the handler signature and the
//! context chain, never from the input map.

use crate::context::ExecutionContext;
use crate::errors::ToolError;
use crate::ToolOutcome;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

// ── Injected handles ───────────────────────────────────────────────

/// Identity of the agent on whose behalf a call runs.
///
/// The executor inserts the handle into the per-call context store, so any
/// context-aware handler can resolve it with `ctx.get::<AgentHandle>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHandle {
    pub id: String,
    pub name: String,
}

impl AgentHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Streaming-chunk emitter handed to streaming handlers.
///
/// Chunks are buffered by the engine and aggregated into the final result
/// when the handler itself returns nothing. Emitting after the call has
/// completed is a no-op.
#[derive(Clone, Debug)]
pub struct ChunkSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChunkSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit one chunk of incremental output.
    pub fn emit(&self, chunk: impl Into<String>) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(chunk.into());
    }
}

// ── Invocation ─────────────────────────────────────────────────────

/// The uniform input to every handler: the final argument map (preset and
/// call input already merged and coerced) plus the resolved context chain.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Name the tool was registered under, for error attribution.
    pub tool: String,
    pub arguments: Value,
    pub context: ExecutionContext,
}

// ── Return-shape normalization ─────────────────────────────────────

/// Conversion of handler return values into a [`ToolOutcome`].
///
/// `()` becomes the fixed `"done"` sentinel, `Option::None` the `null`
/// sentinel, `Result::Err` an execution failure, and an already-normalized
/// outcome passes through unchanged. Arbitrary serializable values go
/// through [`ToolOutcome::json`].
pub trait IntoOutcome {
    fn into_outcome(self) -> ToolOutcome;
}

impl IntoOutcome for ToolOutcome {
    fn into_outcome(self) -> ToolOutcome {
        self
    }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> ToolOutcome {
        ToolOutcome::done()
    }
}

impl IntoOutcome for Value {
    fn into_outcome(self) -> ToolOutcome {
        ToolOutcome::Success(self)
    }
}

impl IntoOutcome for String {
    fn into_outcome(self) -> ToolOutcome {
        ToolOutcome::Success(Value::String(self))
    }
}

impl IntoOutcome for &str {
    fn into_outcome(self) -> ToolOutcome {
        ToolOutcome::Success(Value::String(self.to_string()))
    }
}

impl<T: IntoOutcome> IntoOutcome for Option<T> {
    fn into_outcome(self) -> ToolOutcome {
        match self {
            Some(v) => v.into_outcome(),
            None => ToolOutcome::Success(Value::Null),
        }
    }
}

impl<T: IntoOutcome, E: fmt::Display> IntoOutcome for Result<T, E> {
    fn into_outcome(self) -> ToolOutcome {
        match self {
            Ok(v) => v.into_outcome(),
            // The executor stamps the registered tool name afterwards.
            Err(e) => ToolOutcome::Error(ToolError::ExecutionFailed {
                tool: String::new(),
                message: e.to_string(),
            }),
        }
    }
}

// ── ToolHandler ────────────────────────────────────────────────────

/// Boxed future returned by handler dispatch.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ToolOutcome> + Send + 'static>>;

type ErasedHandler = Box<dyn Fn(Invocation) -> HandlerFuture + Send + Sync>;
type ErasedStreamingHandler = Box<dyn Fn(Invocation, ChunkSink) -> HandlerFuture + Send + Sync>;

/// A tool body behind a uniform dispatch interface.
pub enum ToolHandler {
    /// A plain or context-aware async function.
    Function(ErasedHandler),
    /// An async function that also emits incremental chunks.
    Streaming(ErasedStreamingHandler),
    /// No executable body; invocation always suspends.
    External,
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolHandler::Function(_) => write!(f, "ToolHandler::Function"),
            ToolHandler::Streaming(_) => write!(f, "ToolHandler::Streaming"),
            ToolHandler::External => write!(f, "ToolHandler::External"),
        }
    }
}

/// Deserialize the argument map for a typed handler, producing the
/// validation-failure outcome the model can self-correct from.
fn parse_args<A: DeserializeOwned>(inv: &Invocation) -> Result<A, ToolOutcome> {
    serde_json::from_value(inv.arguments.clone()).map_err(|e| {
        ToolOutcome::Error(ToolError::ValidationFailed {
            tool: inv.tool.clone(),
            detail: format!("  - invalid arguments: {e}"),
        })
    })
}

impl ToolHandler {
    /// Wrap an async closure over a typed argument struct.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let handler = ToolHandler::from_fn(|args: SearchArgs| async move {
    ///     format!("searched for {}", args.query)
    /// });
    /// ```
    pub fn from_fn<A, F, Fut, R>(handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoOutcome + 'static,
    {
        ToolHandler::Function(Box::new(move |inv: Invocation| -> HandlerFuture {
            let args: A = match parse_args(&inv) {
                Ok(a) => a,
                Err(outcome) => return Box::pin(async move { outcome }),
            };
            let fut = handler(args);
            Box::pin(async move { fut.await.into_outcome() })
        }))
    }

    /// Wrap an async closure that also receives the resolved context chain.
    pub fn from_fn_with_context<A, F, Fut, R>(handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoOutcome + 'static,
    {
        ToolHandler::Function(Box::new(move |inv: Invocation| -> HandlerFuture {
            let args: A = match parse_args(&inv) {
                Ok(a) => a,
                Err(outcome) => return Box::pin(async move { outcome }),
            };
            let fut = handler(args, inv.context);
            Box::pin(async move { fut.await.into_outcome() })
        }))
    }

    /// Wrap an async closure that emits incremental output through a
    /// [`ChunkSink`].
    pub fn from_streaming_fn<A, F, Fut, R>(handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A, ChunkSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoOutcome + 'static,
    {
        ToolHandler::Streaming(Box::new(
            move |inv: Invocation, sink: ChunkSink| -> HandlerFuture {
                let args: A = match parse_args(&inv) {
                    Ok(a) => a,
                    Err(outcome) => return Box::pin(async move { outcome }),
                };
                let fut = handler(args, sink);
                Box::pin(async move { fut.await.into_outcome() })
            },
        ))
    }

    /// Invoke the handler and normalize its result.
    ///
    /// Streaming handlers are driven to completion, then their buffered
    /// chunks are drained: when the handler returned the done/null sentinel
    /// the concatenated chunks become the result, otherwise the concrete
    /// return value wins.
    pub async fn invoke(&self, inv: Invocation) -> ToolOutcome {
        match self {
            ToolHandler::Function(f) => f(inv).await,
            ToolHandler::Streaming(f) => {
                let (sink, mut rx) = ChunkSink::channel();
                let outcome = f(inv, sink).await;

                let mut chunks: Vec<String> = Vec::new();
                while let Ok(chunk) = rx.try_recv() {
                    chunks.push(chunk);
                }
                if !chunks.is_empty() && outcome.is_sentinel() {
                    ToolOutcome::Success(Value::String(chunks.concat()))
                } else {
                    outcome
                }
            }
            ToolHandler::External => ToolOutcome::Suspended,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ToolHandler::External)
    }
}
