//! The execution state machine: per-call phases, timeout, retry with
//! backoff, and batch fan-out.
//!
//! Each call runs a strictly ordered, short-circuiting pipeline: registry
//! lookup, group-activation check, schema validation, preset/input merge,
//! context merge, dispatch. Every failure along the way becomes an error
//! [`ToolResult`]; the engine never lets a call escape as a panic or an
//! `Err`. Batches fan out either as a concurrent join or a strictly
//! sequential chain, and the returned list always preserves input order.

use crate::context::{ContextStore, ExecutionContext};
use crate::dispatch::{AgentHandle, Invocation};
use crate::errors::ToolError;
use crate::groups::GroupManager;
use crate::registry::{JsonMap, Tool, ToolRegistry};
use crate::{schema, truncate_result, ToolCall, ToolOutcome, ToolResult};
use futures::future::join_all;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Default per-attempt timeout applied by [`ToolkitConfig`](crate::toolkit::ToolkitConfig).
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default initial backoff before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default cap on the backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Default backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Predicate deciding whether a failure is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&ToolError) -> bool + Send + Sync>;

// ── ExecutionConfig ────────────────────────────────────────────────

/// Timeout and retry/backoff policy for a call or batch.
///
/// Every field is optional; `None` means "defer to the fallback config".
/// Configs merge field-by-field with [`merged_with`](Self::merged_with), a
/// higher-priority config overriding a lower-priority one only where its
/// field is set. [`resolve`](Self::resolve) fills remaining holes with the
/// documented defaults.
#[derive(Clone, Default)]
pub struct ExecutionConfig {
    /// Hard per-attempt deadline. `None` defers; resolved default is no
    /// timeout.
    pub timeout: Option<Duration>,
    /// Total attempts, at least 1. One attempt means no retry and no
    /// backoff is ever scheduled.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_backoff: Option<Duration>,
    /// Cap on the backoff delay.
    pub max_backoff: Option<Duration>,
    /// Backoff multiplier, at least 1.0.
    pub backoff_multiplier: Option<f64>,
    /// Whether to jitter backoff delays to avoid thundering-herd retries.
    pub jitter: Option<bool>,
    /// Which failures to retry. Resolved default is
    /// [`ToolError::is_transient`].
    pub retry_on: Option<RetryPredicate>,
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-attempt timeout (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the total number of attempts (builder pattern).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the backoff curve (builder pattern).
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = Some(initial);
        self.max_backoff = Some(max);
        self.backoff_multiplier = Some(multiplier);
        self
    }

    /// Disable or enable backoff jitter (builder pattern).
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Set the retry predicate (builder pattern).
    pub fn with_retry_on(
        mut self,
        predicate: impl Fn(&ToolError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    /// Merge with a lower-priority config: fields set here win, unset
    /// fields fall through to `fallback`.
    pub fn merged_with(&self, fallback: &ExecutionConfig) -> ExecutionConfig {
        ExecutionConfig {
            timeout: self.timeout.or(fallback.timeout),
            max_attempts: self.max_attempts.or(fallback.max_attempts),
            initial_backoff: self.initial_backoff.or(fallback.initial_backoff),
            max_backoff: self.max_backoff.or(fallback.max_backoff),
            backoff_multiplier: self.backoff_multiplier.or(fallback.backoff_multiplier),
            jitter: self.jitter.or(fallback.jitter),
            retry_on: self.retry_on.clone().or_else(|| fallback.retry_on.clone()),
        }
    }

    /// Fill unset fields with defaults and clamp out-of-range values.
    pub fn resolve(&self) -> ResolvedConfig {
        ResolvedConfig {
            timeout: self.timeout,
            max_attempts: self.max_attempts.unwrap_or(1).max(1),
            initial_backoff: self.initial_backoff.unwrap_or(DEFAULT_INITIAL_BACKOFF),
            max_backoff: self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF),
            multiplier: self
                .backoff_multiplier
                .unwrap_or(DEFAULT_BACKOFF_MULTIPLIER)
                .max(1.0),
            jitter: self.jitter.unwrap_or(true),
            retry_on: self
                .retry_on
                .clone()
                .unwrap_or_else(|| Arc::new(ToolError::is_transient)),
        }
    }
}

impl fmt::Debug for ExecutionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionConfig")
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("has_retry_predicate", &self.retry_on.is_some())
            .finish()
    }
}

/// A fully resolved execution policy.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub timeout: Option<Duration>,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub retry_on: RetryPredicate,
}

impl ResolvedConfig {
    /// Backoff delay for a given attempt number (0-indexed):
    /// `min(max_backoff, initial * multiplier^attempt)`, jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        if self.jitter {
            // Deterministic attempt-keyed jitter; avoids pulling in rand
            // just for this.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                3 => 0.85,
                _ => 0.80,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

// ── CallScope ──────────────────────────────────────────────────────

/// Per-invocation environment: the calling agent plus context overrides.
///
/// The context chain resolves per-call store first, then the agent store,
/// then the toolkit default chain (with its fallback provider last).
#[derive(Clone, Default)]
pub struct CallScope {
    pub agent: Option<AgentHandle>,
    pub agent_context: Option<Arc<ContextStore>>,
    pub call_context: Option<Arc<ContextStore>>,
}

impl CallScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute calls to an agent (builder pattern). The handle is also
    /// inserted into the context chain for handlers to resolve by type.
    pub fn for_agent(mut self, agent: AgentHandle) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Attach the agent-level context store (builder pattern).
    pub fn with_agent_context(mut self, store: ContextStore) -> Self {
        self.agent_context = Some(Arc::new(store));
        self
    }

    /// Attach the per-call context store (builder pattern).
    pub fn with_call_context(mut self, store: ContextStore) -> Self {
        self.call_context = Some(Arc::new(store));
        self
    }
}

impl fmt::Debug for CallScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallScope")
            .field("agent", &self.agent)
            .field("has_agent_context", &self.agent_context.is_some())
            .field("has_call_context", &self.call_context.is_some())
            .finish()
    }
}

// ── ToolExecutor ───────────────────────────────────────────────────

/// Orchestrates one or many calls against a registry and group index.
///
/// Cloning is cheap; the registry and group manager are shared.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    groups: Arc<GroupManager>,
    base_context: ExecutionContext,
    defaults: ExecutionConfig,
    max_result_bytes: usize,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        groups: Arc<GroupManager>,
        base_context: ExecutionContext,
        defaults: ExecutionConfig,
        max_result_bytes: usize,
    ) -> Self {
        Self {
            registry,
            groups,
            base_context,
            defaults,
            max_result_bytes,
        }
    }

    /// Execute a single call through the full pipeline.
    ///
    /// Always returns a result tagged with the originating call id and tool
    /// name, whatever happened underneath.
    pub async fn execute(
        &self,
        call: ToolCall,
        scope: &CallScope,
        config: Option<&ExecutionConfig>,
    ) -> ToolResult {
        let resolved = match config {
            Some(c) => c.merged_with(&self.defaults).resolve(),
            None => self.defaults.resolve(),
        };
        let ToolCall {
            id,
            name,
            arguments,
        } = call;

        let mut outcome = self.run_pipeline(&name, arguments, scope, &resolved).await;

        // Keep oversized success payloads from flooding the model loop.
        if let ToolOutcome::Success(Value::String(s)) = outcome {
            outcome = ToolOutcome::Success(Value::String(truncate_result(
                s,
                self.max_result_bytes,
            )));
        }

        ToolResult::new(id, name, outcome)
    }

    /// Execute a batch of calls.
    ///
    /// With `parallel=true` all pipelines run concurrently; their side
    /// effects have no ordering guarantee, but the returned list preserves
    /// the input order. Sibling calls are independent: one call failing
    /// never cancels the others. With `parallel=false` call N+1 does not
    /// start until call N's full pipeline, retries included, has finished.
    pub async fn execute_all(
        &self,
        calls: Vec<ToolCall>,
        parallel: bool,
        config: Option<ExecutionConfig>,
        scope: &CallScope,
    ) -> Vec<ToolResult> {
        debug!(
            "executing {} tool call(s) ({})",
            calls.len(),
            if parallel { "parallel" } else { "sequential" }
        );

        if parallel && calls.len() > 1 {
            let futures: Vec<_> = calls
                .into_iter()
                .map(|call| self.execute(call, scope, config.as_ref()))
                .collect();
            join_all(futures).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(call, scope, config.as_ref()).await);
            }
            results
        }
    }

    /// Phases 1-6 for one call. Returns the outcome; attribution happens in
    /// [`execute`](Self::execute).
    async fn run_pipeline(
        &self,
        name: &str,
        arguments: Value,
        scope: &CallScope,
        config: &ResolvedConfig,
    ) -> ToolOutcome {
        // (1) Lookup.
        let Some(registered) = self.registry.get_metadata(name) else {
            return ToolOutcome::Error(ToolError::NotFound(name.to_string()));
        };

        // (2) Group activation.
        if !self.groups.is_active_tool(name) {
            return ToolOutcome::Error(ToolError::GroupInactive(name.to_string()));
        }

        // (3) Validate what the model sent against what it was shown.
        if let Err(e) = schema::validate_arguments(name, &registered.visible_parameters(), &arguments)
        {
            return ToolOutcome::Error(e);
        }

        // (4) Preset parameters sit under the call input.
        let merged = merge_preset(registered.preset(), arguments);

        // Best-effort coercion toward the declared property types.
        let tool = Arc::clone(registered.tool());
        let coerced = schema::coerce_arguments(&tool.parameters, merged);

        // (5) Context chain: call > agent > toolkit default.
        let context = self.build_context(scope);

        // (6) Dispatch with per-attempt timeout and retry.
        self.dispatch_with_retry(tool, name, coerced, context, config)
            .await
    }

    fn build_context(&self, scope: &CallScope) -> ExecutionContext {
        let mut stores: Vec<Arc<ContextStore>> = Vec::new();
        if let Some(agent) = &scope.agent {
            stores.push(Arc::new(ContextStore::of(agent.clone())));
        }
        if let Some(call_store) = &scope.call_context {
            stores.push(Arc::clone(call_store));
        }
        if let Some(agent_store) = &scope.agent_context {
            stores.push(Arc::clone(agent_store));
        }
        ExecutionContext::merge([
            ExecutionContext::layered(stores),
            self.base_context.clone(),
        ])
    }

    async fn dispatch_with_retry(
        &self,
        tool: Arc<Tool>,
        name: &str,
        arguments: Value,
        context: ExecutionContext,
        config: &ResolvedConfig,
    ) -> ToolOutcome {
        let mut attempt: u32 = 0;
        loop {
            let outcome = run_attempt(
                Arc::clone(&tool),
                name,
                arguments.clone(),
                context.clone(),
                config.timeout,
            )
            .await;

            let err = match outcome {
                ToolOutcome::Error(err) => err,
                other => return other,
            };

            let retryable = (config.retry_on)(&err);
            if retryable && attempt + 1 < config.max_attempts {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "tool '{name}' attempt {}/{} failed: {err}; retrying in {delay:?}",
                    attempt + 1,
                    config.max_attempts,
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if retryable && config.max_attempts > 1 {
                return ToolOutcome::Error(ToolError::RetryExhausted {
                    tool: name.to_string(),
                    attempts: attempt + 1,
                    last: Box::new(err),
                });
            }

            return ToolOutcome::Error(err);
        }
    }
}

impl fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.registry.len())
            .field("defaults", &self.defaults)
            .field("max_result_bytes", &self.max_result_bytes)
            .finish()
    }
}

/// Merge the preset map (lower priority) with the call input (higher
/// priority). Null input counts as an empty object; a non-object input
/// passes through untouched, since there is nothing to merge into.
fn merge_preset(preset: Arc<JsonMap>, arguments: Value) -> Value {
    match arguments {
        Value::Null => Value::Object((*preset).clone()),
        Value::Object(input) => {
            let mut merged = (*preset).clone();
            for (key, value) in input {
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        other => other,
    }
}

/// Run one dispatch attempt on the worker pool.
///
/// The handler runs in its own task so a panic is contained and a timed-out
/// attempt can be aborted. Abort is best-effort: it takes hold at the next
/// await point, so handlers doing blocking work may run to completion even
/// though the call already produced a timeout result.
async fn run_attempt(
    tool: Arc<Tool>,
    name: &str,
    arguments: Value,
    context: ExecutionContext,
    timeout: Option<Duration>,
) -> ToolOutcome {
    log_tool_call(name, &arguments);
    let start = std::time::Instant::now();

    let invocation = Invocation {
        tool: name.to_string(),
        arguments,
        context,
    };
    let mut handle =
        tokio::spawn(async move { tool.handler().invoke(invocation).await });

    let joined = if let Some(limit) = timeout {
        match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                info!(
                    "tool '{name}' timed out after {:.1}s (limit: {:.0}s)",
                    start.elapsed().as_secs_f64(),
                    limit.as_secs_f64(),
                );
                return ToolOutcome::Error(ToolError::Timeout {
                    tool: name.to_string(),
                    limit,
                });
            }
        }
    } else {
        (&mut handle).await
    };

    let outcome = match joined {
        Ok(outcome) => match outcome {
            ToolOutcome::Error(err) => ToolOutcome::Error(err.stamped(name)),
            other => other,
        },
        Err(join_err) => {
            let message = if join_err.is_panic() {
                let payload = join_err.into_panic();
                let text = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic with non-string payload".to_string());
                warn!("tool '{name}' panicked: {text}");
                format!("panicked: {text}")
            } else {
                "task cancelled".to_string()
            };
            ToolOutcome::Error(ToolError::ExecutionFailed {
                tool: name.to_string(),
                message,
            })
        }
    };

    debug!(
        "tool '{name}' completed in {:.0}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    outcome
}

/// Log a tool call at INFO level with a truncated preview of arguments.
fn log_tool_call(name: &str, arguments: &Value) {
    let rendered = arguments.to_string();
    let preview: String = rendered.chars().take(120).collect();
    info!(
        "[tool] {}({preview}{})",
        name,
        if rendered.len() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {rendered}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ToolHandler;
    use crate::registry::RegisterOptions;
    use crate::schema::object_schema;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Deserialize)]
    struct EchoArgs {
        #[serde(default)]
        text: Option<String>,
    }

    fn echo_schema() -> Value {
        object_schema(&[("text", json!({"type": "string"}))], &["text"])
    }

    fn executor(registry: Arc<ToolRegistry>, groups: Arc<GroupManager>) -> ToolExecutor {
        ToolExecutor::new(
            registry,
            groups,
            ExecutionContext::new(),
            ExecutionConfig::new(),
            crate::DEFAULT_MAX_RESULT_BYTES,
        )
    }

    fn setup() -> (Arc<ToolRegistry>, Arc<GroupManager>, ToolExecutor) {
        let registry = Arc::new(ToolRegistry::new());
        let groups = Arc::new(GroupManager::new());
        let exec = executor(Arc::clone(&registry), Arc::clone(&groups));
        (registry, groups, exec)
    }

    // ── Config merge and backoff ───────────────────────────────────

    #[test]
    fn merge_overrides_only_set_fields() {
        let base = ExecutionConfig::new()
            .with_timeout(Duration::from_secs(30))
            .with_max_attempts(3);
        let call = ExecutionConfig::new().with_max_attempts(5);

        let merged = call.merged_with(&base);
        assert_eq!(merged.timeout, Some(Duration::from_secs(30)));
        assert_eq!(merged.max_attempts, Some(5));
    }

    #[test]
    fn resolve_clamps_attempts_and_multiplier() {
        let resolved = ExecutionConfig::new()
            .with_max_attempts(0)
            .with_backoff(Duration::from_secs(1), Duration::from_secs(4), 0.5)
            .resolve();
        assert_eq!(resolved.max_attempts, 1);
        assert_eq!(resolved.multiplier, 1.0);
    }

    #[test]
    fn backoff_curve_doubles_then_caps() {
        let resolved = ExecutionConfig::new()
            .with_max_attempts(6)
            .with_backoff(Duration::from_secs(1), Duration::from_secs(10), 2.0)
            .with_jitter(false)
            .resolve();

        assert_eq!(resolved.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(resolved.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(resolved.delay_for_attempt(2), Duration::from_secs(4));
        // Capped from here on.
        assert_eq!(resolved.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(resolved.delay_for_attempt(9), Duration::from_secs(10));
    }

    #[test]
    fn jitter_never_exceeds_raw_delay() {
        let jittered = ExecutionConfig::new()
            .with_backoff(Duration::from_secs(1), Duration::from_secs(10), 2.0)
            .resolve();
        let raw = ExecutionConfig::new()
            .with_backoff(Duration::from_secs(1), Duration::from_secs(10), 2.0)
            .with_jitter(false)
            .resolve();
        for attempt in 0..6 {
            assert!(jittered.delay_for_attempt(attempt) <= raw.delay_for_attempt(attempt));
        }
    }

    // ── Pipeline phases ────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_tool_is_error_result() {
        let (_registry, _groups, exec) = setup();
        let result = exec
            .execute(
                ToolCall::new("c1", "ghost", json!({})),
                &CallScope::new(),
                None,
            )
            .await;
        assert_eq!(result.id, "c1");
        assert_eq!(result.name, "ghost");
        assert_eq!(
            result.outcome.error_kind(),
            Some(crate::ToolErrorKind::NotFound)
        );
    }

    #[tokio::test]
    async fn inactive_group_rejects_call() {
        let (registry, groups, exec) = setup();
        groups.create("files", "file tools", false).unwrap();
        registry.register(
            Tool::new(
                "read_file",
                "Read a file",
                echo_schema(),
                ToolHandler::from_fn(|args: EchoArgs| async move { args.text }),
            ),
            RegisterOptions::new().in_group("files"),
        );
        groups.add_tool("files", "read_file").unwrap();

        let result = exec
            .execute(
                ToolCall::new("c1", "read_file", json!({"text": "x"})),
                &CallScope::new(),
                None,
            )
            .await;
        assert_eq!(
            result.outcome.error_kind(),
            Some(crate::ToolErrorKind::GroupInactive)
        );
    }

    #[tokio::test]
    async fn validation_failure_never_invokes_handler() {
        let (registry, _groups, exec) = setup();
        let invocations = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&invocations);
        registry.register(
            Tool::new(
                "echo",
                "Echo",
                echo_schema(),
                ToolHandler::from_fn(move |args: EchoArgs| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        args.text
                    }
                }),
            ),
            RegisterOptions::new(),
        );

        let result = exec
            .execute(
                ToolCall::new("c1", "echo", json!({})),
                &CallScope::new(),
                None,
            )
            .await;
        assert_eq!(
            result.outcome.error_kind(),
            Some(crate::ToolErrorKind::ValidationFailed)
        );
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn preset_sits_under_call_input() {
        let (registry, _groups, exec) = setup();
        registry.register(
            Tool::new(
                "fetch",
                "Fetch",
                object_schema(&[("url", json!({"type": "string"}))], &["url"]),
                ToolHandler::from_fn(|args: Value| async move { args }),
            ),
            RegisterOptions::new()
                .preset("region", json!("eu"))
                .preset("url", json!("https://preset.example")),
        );

        let result = exec
            .execute(
                ToolCall::new("c1", "fetch", json!({"url": "https://call.example"})),
                &CallScope::new(),
                None,
            )
            .await;
        match &result.outcome {
            ToolOutcome::Success(v) => {
                // Call input wins; hidden preset keys are still injected.
                assert_eq!(v["url"], "https://call.example");
                assert_eq!(v["region"], "eu");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn agent_handle_resolvable_from_context() {
        let (registry, _groups, exec) = setup();
        registry.register(
            Tool::new(
                "whoami",
                "Report the calling agent",
                json!({"type": "object", "properties": {}}),
                ToolHandler::from_fn_with_context(|_args: Value, ctx| async move {
                    match ctx.get::<AgentHandle>() {
                        Some(agent) => agent.name.clone(),
                        None => "nobody".to_string(),
                    }
                }),
            ),
            RegisterOptions::new(),
        );

        let scope = CallScope::new().for_agent(AgentHandle::new("a-1", "planner"));
        let result = exec
            .execute(ToolCall::new("c1", "whoami", json!({})), &scope, None)
            .await;
        assert_eq!(result.render(), "planner");
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let (registry, _groups, exec) = setup();
        registry.register(
            Tool::new(
                "boom",
                "Panics",
                json!({"type": "object", "properties": {}}),
                ToolHandler::from_fn(|args: Value| async move {
                    assert!(args.get("nope").is_some(), "deliberate test panic");
                    ToolOutcome::done()
                }),
            ),
            RegisterOptions::new(),
        );

        let result = exec
            .execute(
                ToolCall::new("c1", "boom", json!({})),
                &CallScope::new(),
                None,
            )
            .await;
        assert_eq!(
            result.outcome.error_kind(),
            Some(crate::ToolErrorKind::ExecutionFailed)
        );
        assert!(result.render().contains("deliberate test panic"));
    }

    // ── Timeout and retry ──────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_error_result() {
        let (registry, _groups, exec) = setup();
        registry.register(
            Tool::new(
                "slow",
                "Sleeps",
                json!({"type": "object", "properties": {}}),
                ToolHandler::from_fn(|_args: Value| async move {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    "never".to_string()
                }),
            ),
            RegisterOptions::new(),
        );

        let config = ExecutionConfig::new().with_timeout(Duration::from_secs(1));
        let result = exec
            .execute(
                ToolCall::new("c1", "slow", json!({})),
                &CallScope::new(),
                Some(&config),
            )
            .await;
        assert_eq!(
            result.outcome.error_kind(),
            Some(crate::ToolErrorKind::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_until_success() {
        let (registry, _groups, exec) = setup();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        registry.register(
            Tool::new(
                "flaky",
                "Fails twice",
                json!({"type": "object", "properties": {}}),
                ToolHandler::from_fn(move |_args: Value| {
                    let counter = Arc::clone(&counter);
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("transient backend error".to_string())
                        } else {
                            Ok("recovered".to_string())
                        }
                    }
                }),
            ),
            RegisterOptions::new(),
        );

        let config = ExecutionConfig::new().with_max_attempts(3);
        let result = exec
            .execute(
                ToolCall::new("c1", "flaky", json!({})),
                &CallScope::new(),
                Some(&config),
            )
            .await;
        assert_eq!(result.render(), "recovered");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn single_attempt_never_retries() {
        let (registry, _groups, exec) = setup();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        registry.register(
            Tool::new(
                "flaky",
                "Always fails",
                json!({"type": "object", "properties": {}}),
                ToolHandler::from_fn(move |_args: Value| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<String, _>("boom")
                    }
                }),
            ),
            RegisterOptions::new(),
        );

        // Default config: one attempt, no retry, no backoff sleep. The test
        // is not time-paused, so a stray sleep would actually delay it.
        let result = exec
            .execute(
                ToolCall::new("c1", "flaky", json!({})),
                &CallScope::new(),
                None,
            )
            .await;
        assert_eq!(
            result.outcome.error_kind(),
            Some(crate::ToolErrorKind::ExecutionFailed)
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_wrap_last_error() {
        let (registry, _groups, exec) = setup();
        registry.register(
            Tool::new(
                "down",
                "Always fails",
                json!({"type": "object", "properties": {}}),
                ToolHandler::from_fn(|_args: Value| async move {
                    Err::<String, _>("backend unavailable")
                }),
            ),
            RegisterOptions::new(),
        );

        let config = ExecutionConfig::new().with_max_attempts(2);
        let result = exec
            .execute(
                ToolCall::new("c1", "down", json!({})),
                &CallScope::new(),
                Some(&config),
            )
            .await;
        assert_eq!(
            result.outcome.error_kind(),
            Some(crate::ToolErrorKind::RetryExhausted)
        );
        assert!(result.render().contains("after 2 attempts"));
        assert!(result.render().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_fast() {
        let (registry, _groups, exec) = setup();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        registry.register(
            Tool::new(
                "strict",
                "Fails",
                json!({"type": "object", "properties": {}}),
                ToolHandler::from_fn(move |_args: Value| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<String, _>("bad state")
                    }
                }),
            ),
            RegisterOptions::new(),
        );

        let config = ExecutionConfig::new()
            .with_max_attempts(4)
            .with_retry_on(|_err| false);
        let result = exec
            .execute(
                ToolCall::new("c1", "strict", json!({})),
                &CallScope::new(),
                Some(&config),
            )
            .await;
        // Predicate said no: plain failure, single attempt.
        assert_eq!(
            result.outcome.error_kind(),
            Some(crate::ToolErrorKind::ExecutionFailed)
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    // ── Batch execution ────────────────────────────────────────────

    fn sleep_tool(name: &'static str, millis: u64, log: Arc<Mutex<Vec<&'static str>>>) -> Tool {
        Tool::new(
            name,
            "Sleeps then reports",
            json!({"type": "object", "properties": {}}),
            ToolHandler::from_fn(move |_args: Value| {
                let log = Arc::clone(&log);
                async move {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    log.lock().unwrap_or_else(|e| e.into_inner()).push(name);
                    name.to_string()
                }
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_results_preserve_input_order() {
        let (registry, _groups, exec) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(sleep_tool("slow", 500, Arc::clone(&log)), RegisterOptions::new());
        registry.register(sleep_tool("fast", 10, Arc::clone(&log)), RegisterOptions::new());

        let results = exec
            .execute_all(
                vec![
                    ToolCall::new("c1", "slow", json!({})),
                    ToolCall::new("c2", "fast", json!({})),
                ],
                true,
                None,
                &CallScope::new(),
            )
            .await;

        // Completion order differs from input order.
        assert_eq!(*log.lock().unwrap(), vec!["fast", "slow"]);

        // The returned list does not.
        assert_eq!(results.len(), 2);
        assert_eq!((results[0].id.as_str(), results[0].name.as_str()), ("c1", "slow"));
        assert_eq!((results[1].id.as_str(), results[1].name.as_str()), ("c2", "fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_runs_in_call_order() {
        let (registry, _groups, exec) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(sleep_tool("slow", 500, Arc::clone(&log)), RegisterOptions::new());
        registry.register(sleep_tool("fast", 10, Arc::clone(&log)), RegisterOptions::new());

        let results = exec
            .execute_all(
                vec![
                    ToolCall::new("c1", "slow", json!({})),
                    ToolCall::new("c2", "fast", json!({})),
                ],
                false,
                None,
                &CallScope::new(),
            )
            .await;

        // The slow call finished before the fast one even started.
        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
        assert_eq!(results[0].id, "c1");
        assert_eq!(results[1].id, "c2");
    }

    #[tokio::test]
    async fn sibling_failure_does_not_cancel_batch() {
        let (registry, _groups, exec) = setup();
        registry.register(
            Tool::new(
                "ok",
                "Succeeds",
                json!({"type": "object", "properties": {}}),
                ToolHandler::from_fn(|_args: Value| async move { "fine" }),
            ),
            RegisterOptions::new(),
        );

        let results = exec
            .execute_all(
                vec![
                    ToolCall::new("c1", "ghost", json!({})),
                    ToolCall::new("c2", "ok", json!({})),
                ],
                true,
                None,
                &CallScope::new(),
            )
            .await;

        assert!(results[0].is_error());
        assert_eq!(results[1].render(), "fine");
    }
}
