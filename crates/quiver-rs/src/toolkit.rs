//! The facade agents hold: registration, group CRUD, schema export, and the
//! single invocation entry point.
//!
//! A [`Toolkit`] is an explicit instance owning its own registry, group
//! index, and default context chain. Nothing is global: a process can run
//! any number of independent toolkits. Tools are declared explicitly with
//! [`ToolBuilder`] (name, description, schema, handler), contributed in
//! bulk through [`ToolModule`], or registered schema-only for execution
//! outside the engine.

use crate::context::{ContextProvider, ContextStore, ExecutionContext};
use crate::dispatch::ToolHandler;
use crate::errors::RegistrationError;
use crate::executor::{
    CallScope, ExecutionConfig, ToolExecutor, DEFAULT_TOOL_TIMEOUT,
};
use crate::groups::{GroupManager, ToolGroup};
use crate::registry::{JsonMap, RegisterOptions, Tool, ToolRegistry};
use crate::{json_schema_for, ToolCall, ToolResult, ToolSchema, DEFAULT_MAX_RESULT_BYTES};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Name of the synthesized group-activation meta-tool.
pub const RESET_EQUIPPED_TOOLS: &str = "reset_equipped_tools";

// ── ToolkitConfig ──────────────────────────────────────────────────

/// Toolkit-wide defaults.
#[derive(Debug, Clone)]
pub struct ToolkitConfig {
    /// Lowest-priority execution policy; per-batch and per-call configs
    /// override it field-by-field.
    pub execution: ExecutionConfig,
    /// Truncation limit for rendered success payloads.
    pub max_result_bytes: usize,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::new().with_timeout(DEFAULT_TOOL_TIMEOUT),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }
}

impl ToolkitConfig {
    /// Set the default execution policy (builder pattern).
    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    /// Set the result truncation limit (builder pattern).
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }
}

// ── ToolBuilder ────────────────────────────────────────────────────

/// Declarative construction of a [`Tool`]: name, description, parameter
/// schema, and handler, supplied explicitly at registration time.
///
/// When the handler takes a typed argument struct, the parameter schema is
/// derived from it automatically unless one was set first.
///
/// # Example
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     /// The search query.
///     query: String,
/// }
///
/// let tool = ToolBuilder::new("search", "Search the knowledge base")
///     .handler(|args: SearchArgs| async move {
///         format!("results for {}", args.query)
///     })
///     .build()?;
/// ```
pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: Option<Value>,
    strict: bool,
    handler: Option<ToolHandler>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: None,
            strict: false,
            handler: None,
        }
    }

    /// Set the parameter schema explicitly.
    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }

    /// Derive the parameter schema from a typed argument struct.
    pub fn parameters_for<A: JsonSchema>(mut self) -> Self {
        self.parameters = Some(json_schema_for::<A>());
        self
    }

    /// Ask the provider to enforce the schema strictly.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Attach a plain async handler over a typed argument struct.
    pub fn handler<A, F, Fut, R>(mut self, f: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: crate::dispatch::IntoOutcome + 'static,
    {
        if self.parameters.is_none() {
            self.parameters = Some(json_schema_for::<A>());
        }
        self.handler = Some(ToolHandler::from_fn(f));
        self
    }

    /// Attach a handler that also receives the resolved execution context.
    pub fn handler_with_context<A, F, Fut, R>(mut self, f: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: crate::dispatch::IntoOutcome + 'static,
    {
        if self.parameters.is_none() {
            self.parameters = Some(json_schema_for::<A>());
        }
        self.handler = Some(ToolHandler::from_fn_with_context(f));
        self
    }

    /// Attach a streaming handler that emits chunks through a
    /// [`ChunkSink`](crate::dispatch::ChunkSink).
    pub fn streaming<A, F, Fut, R>(mut self, f: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A, crate::dispatch::ChunkSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: crate::dispatch::IntoOutcome + 'static,
    {
        if self.parameters.is_none() {
            self.parameters = Some(json_schema_for::<A>());
        }
        self.handler = Some(ToolHandler::from_streaming_fn(f));
        self
    }

    /// Attach a pre-built handler. Escape hatch for handlers constructed
    /// outside the builder.
    pub fn handler_raw(mut self, handler: ToolHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Validate and produce the tool. Missing name or handler is programmer
    /// error and fails here, before anything touches the registry.
    pub fn build(self) -> Result<Tool, RegistrationError> {
        if self.name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        let Some(handler) = self.handler else {
            return Err(RegistrationError::MissingHandler(self.name));
        };
        let parameters = self
            .parameters
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));
        let mut tool = Tool::new(self.name, self.description, parameters, handler);
        tool.strict = self.strict;
        Ok(tool)
    }
}

// ── ToolModule ─────────────────────────────────────────────────────

/// A type that contributes several tools at once.
///
/// This replaces reflective scanning: instead of the engine discovering
/// annotated members at runtime, a module explicitly declares the tools it
/// provides.
pub trait ToolModule {
    fn tools(&self) -> Result<Vec<Tool>, RegistrationError>;
}

// ── Toolkit ────────────────────────────────────────────────────────

/// Registration, groups, schema export, and invocation behind one handle.
///
/// Cloning shares the underlying registry and group index.
#[derive(Clone)]
pub struct Toolkit {
    registry: Arc<ToolRegistry>,
    groups: Arc<GroupManager>,
    executor: ToolExecutor,
}

impl Default for Toolkit {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Toolkit {
    /// A toolkit with default config and an empty context chain.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ToolkitBuilder {
        ToolkitBuilder {
            config: ToolkitConfig::default(),
            stores: Vec::new(),
            fallback: None,
        }
    }

    // ── Registration ───────────────────────────────────────────────

    /// Register a tool with no metadata: ungrouped, no presets, always
    /// active.
    pub fn register(&self, tool: Tool) -> Result<(), RegistrationError> {
        self.register_with(tool, RegisterOptions::new())
    }

    /// Register a tool with metadata. Referencing a group that was never
    /// created fails eagerly; registering over an existing name replaces
    /// it.
    pub fn register_with(
        &self,
        tool: Tool,
        options: RegisterOptions,
    ) -> Result<(), RegistrationError> {
        if tool.name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if let Some(group) = &options.group
            && !self.groups.contains(group)
        {
            return Err(RegistrationError::UnknownGroup(group.clone()));
        }

        let name = tool.name.clone();
        let group = options.group.clone();
        self.registry.register(tool, options);
        if let Some(group) = group {
            self.groups.add_tool(&group, &name)?;
        }
        debug!("registered tool '{name}'");
        Ok(())
    }

    /// Register a tool with no executable body. Invoking it always yields
    /// a suspended result: the caller must execute it outside the engine
    /// and supply the result back.
    pub fn register_schema_only(&self, schema: ToolSchema) -> Result<(), RegistrationError> {
        self.register(Tool::external(schema))
    }

    /// Register every tool a module contributes, applying the same options
    /// to each.
    pub fn register_module(
        &self,
        module: &dyn ToolModule,
        options: RegisterOptions,
    ) -> Result<(), RegistrationError> {
        for tool in module.tools()? {
            self.register_with(tool, options.clone())?;
        }
        Ok(())
    }

    /// Replace a tool's preset parameter map without re-registration.
    /// Returns `false` if the tool is unknown.
    pub fn set_preset_parameters(&self, tool: &str, preset: JsonMap) -> bool {
        match self.registry.get_metadata(tool) {
            Some(registered) => {
                registered.set_preset(preset);
                true
            }
            None => false,
        }
    }

    /// Remove a tool from the registry and detach it from every group.
    pub fn remove_tool(&self, name: &str) -> bool {
        self.groups.detach_tool(name);
        self.registry.remove(name)
    }

    pub fn remove_tools(&self, names: &[String]) -> usize {
        names.iter().filter(|n| self.remove_tool(n)).count()
    }

    // ── Groups ─────────────────────────────────────────────────────

    pub fn create_group(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        active: bool,
    ) -> Result<(), RegistrationError> {
        self.groups.create(name, description, active)
    }

    pub fn set_groups_active(&self, names: &[impl AsRef<str>], active: bool) -> usize {
        self.groups.set_active(names, active)
    }

    /// Activate the named groups additively; groups not named keep their
    /// current state. Returns the newly activated names.
    pub fn activate_groups(&self, names: &[impl AsRef<str>]) -> Vec<String> {
        self.groups.activate_only(names)
    }

    /// Remove groups, optionally purging tools that became fully
    /// ungrouped. Returns those tool names either way.
    pub fn remove_groups(&self, names: &[impl AsRef<str>], purge_orphans: bool) -> Vec<String> {
        let orphaned = self.groups.remove_groups(names);
        if purge_orphans {
            self.registry.remove_all(&orphaned);
        }
        orphaned
    }

    pub fn list_active_groups(&self) -> Vec<String> {
        self.groups.list_active()
    }

    pub fn get_group(&self, name: &str) -> Option<ToolGroup> {
        self.groups.get(name)
    }

    // ── Invocation ─────────────────────────────────────────────────

    /// Execute one call with the toolkit defaults.
    pub async fn call_tool(&self, call: ToolCall) -> ToolResult {
        self.executor.execute(call, &CallScope::new(), None).await
    }

    /// Execute one call with per-call context overrides.
    pub async fn call_tool_scoped(&self, call: ToolCall, scope: &CallScope) -> ToolResult {
        self.executor.execute(call, scope, None).await
    }

    /// Execute a batch of calls, in parallel or strictly sequentially.
    /// The returned list matches `calls` in length and order.
    pub async fn call_tools(
        &self,
        calls: Vec<ToolCall>,
        parallel: bool,
        config: Option<ExecutionConfig>,
        scope: &CallScope,
    ) -> Vec<ToolResult> {
        self.executor.execute_all(calls, parallel, config, scope).await
    }

    // ── Schema export ──────────────────────────────────────────────

    /// Export the schema of every visible tool: ungrouped or in at least
    /// one active group. Preset parameter keys are never included.
    pub fn list_tool_schemas(&self) -> Vec<ToolSchema> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|r| self.groups.is_active_tool(&r.tool().name))
            .map(|r| r.visible_schema())
            .collect()
    }

    // ── Meta-tool ──────────────────────────────────────────────────

    /// Register the synthesized `reset_equipped_tools` tool: it takes a
    /// list of group names, activates them (additively, never deactivating
    /// anything), and reports which tools became available.
    pub fn install_group_selector(&self) -> Result<(), RegistrationError> {
        let groups = Arc::clone(&self.groups);
        let tool = ToolBuilder::new(
            RESET_EQUIPPED_TOOLS,
            "Activate the named tool groups so their tools become available. \
             Groups not named keep their current state; nothing is ever \
             deactivated by this tool.",
        )
        .handler(move |args: EquipGroupsArgs| {
            let groups = Arc::clone(&groups);
            async move { equip_groups(&groups, &args.groups) }
        })
        .build()?;
        self.register(tool)
    }
}

impl fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolkit")
            .field("tools", &self.registry.names())
            .field("active_groups", &self.groups.list_active())
            .finish()
    }
}

/// Typed arguments for the group-activation meta-tool.
#[derive(Deserialize, JsonSchema)]
struct EquipGroupsArgs {
    /// Names of the tool groups to activate.
    groups: Vec<String>,
}

/// Activate groups and build the human-readable summary the model sees.
fn equip_groups(groups: &GroupManager, requested: &[String]) -> String {
    let newly = groups.activate_only(requested);

    let mut lines = Vec::new();
    for name in requested {
        match groups.get(name) {
            Some(group) if group.tools.is_empty() => {
                lines.push(format!("- {name}: no tools registered"));
            }
            Some(group) => lines.push(format!("- {name}: {}", group.tools.join(", "))),
            None => lines.push(format!("- {name}: unknown group")),
        }
    }

    let header = if newly.is_empty() {
        "No additional groups were activated (already active or unknown).".to_string()
    } else {
        format!("Activated: {}.", newly.join(", "))
    };
    format!("{header}\nEquipped tools:\n{}", lines.join("\n"))
}

// ── ToolkitBuilder ─────────────────────────────────────────────────

/// Builder for a [`Toolkit`] with config and default context chain.
pub struct ToolkitBuilder {
    config: ToolkitConfig,
    stores: Vec<Arc<ContextStore>>,
    fallback: Option<Arc<dyn ContextProvider>>,
}

impl ToolkitBuilder {
    pub fn with_config(mut self, config: ToolkitConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a store to the toolkit-default context chain. Stores added
    /// earlier take priority.
    pub fn with_context(mut self, store: ContextStore) -> Self {
        self.stores.push(Arc::new(store));
        self
    }

    /// Attach the fallback provider consulted when no store matches.
    pub fn with_fallback(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn build(self) -> Toolkit {
        let registry = Arc::new(ToolRegistry::new());
        let groups = Arc::new(GroupManager::new());
        let mut base_context = ExecutionContext::layered(self.stores);
        if let Some(fallback) = self.fallback {
            base_context = base_context.with_fallback(fallback);
        }
        let executor = ToolExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&groups),
            base_context,
            self.config.execution,
            self.config.max_result_bytes,
        );
        Toolkit {
            registry,
            groups,
            executor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        /// Text to echo back.
        text: String,
    }

    fn echo_tool() -> Tool {
        ToolBuilder::new("echo", "Echo the input")
            .handler(|args: EchoArgs| async move { args.text })
            .build()
            .unwrap()
    }

    #[test]
    fn builder_derives_schema_from_args() {
        let tool = echo_tool();
        assert_eq!(tool.name, "echo");
        assert!(tool.parameters["properties"]["text"].is_object());
    }

    #[test]
    fn builder_requires_name_and_handler() {
        let missing_handler = ToolBuilder::new("x", "No handler").build();
        assert_eq!(
            missing_handler.unwrap_err(),
            RegistrationError::MissingHandler("x".into())
        );

        let missing_name = ToolBuilder::new("", "No name")
            .handler(|args: EchoArgs| async move { args.text })
            .build();
        assert_eq!(missing_name.unwrap_err(), RegistrationError::EmptyName);
    }

    #[tokio::test]
    async fn register_and_call_roundtrip() {
        let toolkit = Toolkit::new();
        toolkit.register(echo_tool()).unwrap();

        let result = toolkit
            .call_tool(ToolCall::new("c1", "echo", json!({"text": "hello"})))
            .await;
        assert_eq!(result.render(), "hello");
        assert_eq!(result.id, "c1");
    }

    #[test]
    fn register_into_unknown_group_fails() {
        let toolkit = Toolkit::new();
        let err = toolkit
            .register_with(echo_tool(), RegisterOptions::new().in_group("ghost"))
            .unwrap_err();
        assert_eq!(err, RegistrationError::UnknownGroup("ghost".into()));
    }

    #[test]
    fn schemas_hide_preset_keys() {
        let toolkit = Toolkit::new();
        let tool = ToolBuilder::new("fetch", "Fetch a resource")
            .parameters(crate::schema::object_schema(
                &[
                    ("url", json!({"type": "string"})),
                    ("api_key", json!({"type": "string"})),
                ],
                &["url", "api_key"],
            ))
            .handler(|args: serde_json::Value| async move { args })
            .build()
            .unwrap();
        toolkit
            .register_with(
                tool,
                RegisterOptions::new().preset("api_key", json!("secret")),
            )
            .unwrap();

        let schemas = toolkit.list_tool_schemas();
        assert_eq!(schemas.len(), 1);
        assert!(schemas[0].parameters["properties"].get("api_key").is_none());

        // Swapping presets without re-registration changes the mask too.
        let mut preset = JsonMap::new();
        preset.insert("url".into(), json!("https://pinned.example"));
        assert!(toolkit.set_preset_parameters("fetch", preset));
        let schemas = toolkit.list_tool_schemas();
        assert!(schemas[0].parameters["properties"].get("url").is_none());
        assert!(schemas[0].parameters["properties"].get("api_key").is_some());
    }

    #[tokio::test]
    async fn group_visibility_round_trip() {
        let toolkit = Toolkit::new();
        toolkit.create_group("files", "file tools", true).unwrap();
        toolkit
            .register_with(echo_tool(), RegisterOptions::new().in_group("files"))
            .unwrap();

        assert_eq!(toolkit.list_tool_schemas().len(), 1);

        toolkit.set_groups_active(&["files"], false);
        assert!(toolkit.list_tool_schemas().is_empty());
        let result = toolkit
            .call_tool(ToolCall::new("c1", "echo", json!({"text": "x"})))
            .await;
        assert_eq!(
            result.outcome.error_kind(),
            Some(crate::ToolErrorKind::GroupInactive)
        );

        // Reactivation restores visibility without re-registration.
        toolkit.set_groups_active(&["files"], true);
        assert_eq!(toolkit.list_tool_schemas().len(), 1);
    }

    #[tokio::test]
    async fn schema_only_tool_suspends() {
        let toolkit = Toolkit::new();
        toolkit
            .register_schema_only(ToolSchema::new(
                "remote_deploy",
                "Deploy via the external runner",
                json!({"type": "object", "properties": {}}),
            ))
            .unwrap();

        let result = toolkit
            .call_tool(ToolCall::new("c1", "remote_deploy", json!({})))
            .await;
        assert!(result.outcome.is_suspended());
        assert!(!result.is_error());
    }

    #[tokio::test]
    async fn meta_tool_activates_additively() {
        let toolkit = Toolkit::new();
        toolkit.create_group("alpha", "a", false).unwrap();
        toolkit.create_group("beta", "b", true).unwrap();
        toolkit
            .register_with(echo_tool(), RegisterOptions::new().in_group("alpha"))
            .unwrap();
        toolkit.install_group_selector().unwrap();

        let result = toolkit
            .call_tool(ToolCall::new(
                "c1",
                RESET_EQUIPPED_TOOLS,
                json!({"groups": ["alpha"]}),
            ))
            .await;

        let summary = result.render();
        assert!(summary.contains("Activated: alpha"));
        assert!(summary.contains("echo"));

        // beta was not named and stays active.
        assert_eq!(toolkit.list_active_groups(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn meta_tool_reports_unknown_groups() {
        let toolkit = Toolkit::new();
        toolkit.install_group_selector().unwrap();

        let result = toolkit
            .call_tool(ToolCall::new(
                "c1",
                RESET_EQUIPPED_TOOLS,
                json!({"groups": ["ghost"]}),
            ))
            .await;
        assert!(result.render().contains("ghost: unknown group"));
    }

    #[test]
    fn remove_groups_can_purge_orphans() {
        let toolkit = Toolkit::new();
        toolkit.create_group("tmp", "temporary", true).unwrap();
        toolkit
            .register_with(echo_tool(), RegisterOptions::new().in_group("tmp"))
            .unwrap();

        let orphaned = toolkit.remove_groups(&["tmp"], true);
        assert_eq!(orphaned, vec!["echo"]);
        assert!(toolkit.list_tool_schemas().is_empty());
    }

    #[tokio::test]
    async fn toolkit_default_context_reaches_handlers() {
        #[derive(Debug)]
        struct ApiBase(&'static str);

        let toolkit = Toolkit::builder()
            .with_context(ContextStore::of(ApiBase("https://api.example")))
            .build();
        toolkit
            .register(
                ToolBuilder::new("where", "Report the API base")
                    .handler_with_context(|_args: serde_json::Value, ctx| async move {
                        match ctx.get::<ApiBase>() {
                            Some(base) => base.0.to_string(),
                            None => "unset".to_string(),
                        }
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let result = toolkit
            .call_tool(ToolCall::new("c1", "where", json!({})))
            .await;
        assert_eq!(result.render(), "https://api.example");
    }

    #[tokio::test]
    async fn module_registration() {
        struct MathTools;

        impl ToolModule for MathTools {
            fn tools(&self) -> Result<Vec<Tool>, RegistrationError> {
                #[derive(Deserialize, JsonSchema)]
                struct AddArgs {
                    a: i64,
                    b: i64,
                }
                Ok(vec![
                    ToolBuilder::new("add", "Add two integers")
                        .handler(|args: AddArgs| async move {
                            serde_json::json!(args.a + args.b)
                        })
                        .build()?,
                    ToolBuilder::new("negate", "Negate an integer")
                        .handler(|args: serde_json::Value| async move {
                            serde_json::json!(-args["n"].as_i64().unwrap_or(0))
                        })
                        .build()?,
                ])
            }
        }

        let toolkit = Toolkit::new();
        toolkit
            .register_module(&MathTools, RegisterOptions::new())
            .unwrap();
        assert_eq!(toolkit.list_tool_schemas().len(), 2);

        let result = toolkit
            .call_tool(ToolCall::new("c1", "add", json!({"a": 2, "b": 3})))
            .await;
        assert_eq!(result.render(), "5");
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let toolkit = Toolkit::new();
        toolkit.register(echo_tool()).unwrap();

        let calls = vec![
            ToolCall::new("c1", "echo", json!({"text": "one"})),
            ToolCall::new("c2", "missing", json!({})),
            ToolCall::new("c3", "echo", json!({"text": "three"})),
        ];
        let results = toolkit
            .call_tools(calls, true, None, &CallScope::new())
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].render(), "one");
        assert!(results[1].is_error());
        assert_eq!(results[2].render(), "three");
    }
}
