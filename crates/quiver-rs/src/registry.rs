//! Tool registry: the concurrent name→tool map plus per-tool registration
//! metadata.
//!
//! A [`Tool`] is the immutable unit of capability (name, description,
//! parameter schema, handler). A [`RegisteredTool`] wraps it with metadata
//! supplied at registration time: the owning group, an optional
//! provider-specific schema extension, an optional external-provider tag,
//! and the preset parameter map. The registry itself is read-heavy and
//! mutate-rarely; lookups observe a registration entirely before or entirely
//! after any mutation, never partially.

use crate::dispatch::ToolHandler;
use crate::{schema, ToolSchema};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// JSON object map used for arguments and preset parameters.
pub type JsonMap = Map<String, Value>;

// ── Tool ───────────────────────────────────────────────────────────

/// A named, described, schema-bearing unit of capability.
///
/// Identity is the unique name; everything else is immutable after
/// registration.
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON-Schema document for the model-supplied parameters.
    pub parameters: Value,
    /// Ask the provider to enforce the schema strictly, where supported.
    pub strict: bool,
    pub(crate) handler: ToolHandler,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            strict: false,
            handler,
        }
    }

    /// A tool with no executable body. Invoking it always yields a
    /// suspended result, signaling the caller must run it externally.
    pub fn external(schema: ToolSchema) -> Self {
        Self {
            name: schema.name,
            description: schema.description,
            parameters: schema.parameters,
            strict: schema.strict.unwrap_or(false),
            handler: ToolHandler::External,
        }
    }

    pub(crate) fn handler(&self) -> &ToolHandler {
        &self.handler
    }

    /// The unmasked base schema, as registered.
    pub fn schema(&self) -> ToolSchema {
        let mut s = ToolSchema::new(
            self.name.clone(),
            self.description.clone(),
            self.parameters.clone(),
        );
        if self.strict {
            s = s.strict();
        }
        s
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("strict", &self.strict)
            .field("handler", &self.handler)
            .finish()
    }
}

// ── RegisterOptions ────────────────────────────────────────────────

/// Metadata supplied alongside a tool at registration time.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Owning group; `None` means ungrouped, which is always active.
    pub group: Option<String>,
    /// Values injected automatically at call time and hidden from the
    /// exported schema.
    pub preset: JsonMap,
    /// Provider-specific fields folded into the exposed schema.
    pub schema_extension: Option<Value>,
    /// Tag identifying an external tool-provider integration.
    pub provider: Option<String>,
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the tool to a group (builder pattern).
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Add one preset parameter (builder pattern).
    pub fn preset(mut self, key: impl Into<String>, value: Value) -> Self {
        self.preset.insert(key.into(), value);
        self
    }

    /// Attach a schema extension (builder pattern).
    pub fn schema_extension(mut self, extension: Value) -> Self {
        self.schema_extension = Some(extension);
        self
    }

    /// Tag the tool with its external provider (builder pattern).
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

// ── RegisteredTool ─────────────────────────────────────────────────

/// A [`Tool`] plus its registration metadata.
pub struct RegisteredTool {
    tool: Arc<Tool>,
    group: Option<String>,
    schema_extension: Option<Value>,
    provider: Option<String>,
    // Whole-map swaps only: an in-flight dispatch holds the Arc it loaded
    // and sees a complete old or new set, never a mix.
    preset: RwLock<Arc<JsonMap>>,
}

impl RegisteredTool {
    fn new(tool: Tool, options: RegisterOptions) -> Self {
        Self {
            tool: Arc::new(tool),
            group: options.group,
            schema_extension: options.schema_extension,
            provider: options.provider,
            preset: RwLock::new(Arc::new(options.preset)),
        }
    }

    pub fn tool(&self) -> &Arc<Tool> {
        &self.tool
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn schema_extension(&self) -> Option<&Value> {
        self.schema_extension.as_ref()
    }

    pub fn is_external(&self) -> bool {
        self.tool.handler().is_external()
    }

    /// Load the current preset parameter map.
    pub fn preset(&self) -> Arc<JsonMap> {
        self.preset
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the preset parameter map atomically.
    pub fn set_preset(&self, preset: JsonMap) {
        let mut slot = self.preset.write().unwrap_or_else(|e| e.into_inner());
        *slot = Arc::new(preset);
    }

    /// The model-visible parameter schema: base merged with the extension,
    /// preset keys removed from `properties` and `required`.
    pub fn visible_parameters(&self) -> Value {
        let base = match &self.schema_extension {
            Some(ext) => schema::merge_schemas(&self.tool.parameters, ext),
            None => self.tool.parameters.clone(),
        };
        let hidden: Vec<String> = self.preset().keys().cloned().collect();
        schema::strip_properties(&base, &hidden)
    }

    /// The full exported document for this tool.
    pub fn visible_schema(&self) -> ToolSchema {
        let mut s = ToolSchema::new(
            self.tool.name.clone(),
            self.tool.description.clone(),
            self.visible_parameters(),
        );
        if self.tool.strict {
            s = s.strict();
        }
        s
    }
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("tool", &self.tool.name)
            .field("group", &self.group)
            .field("provider", &self.provider)
            .field("preset_keys", &self.preset().keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── ToolRegistry ───────────────────────────────────────────────────

/// Concurrent name→tool map. Registration for an existing name overwrites
/// it (last wins); there is no ordering guarantee across names.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with its metadata, replacing any previous
    /// registration under the same name.
    pub fn register(&self, tool: Tool, options: RegisterOptions) -> Arc<RegisteredTool> {
        let name = tool.name.clone();
        let registered = Arc::new(RegisteredTool::new(tool, options));
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        tools.insert(name, Arc::clone(&registered));
        registered
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.get_metadata(name).map(|r| Arc::clone(r.tool()))
    }

    pub fn get_metadata(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> bool {
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn remove_all(&self, names: &[String]) -> usize {
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        names.iter().filter(|n| tools.remove(*n).is_some()).count()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of all registrations, sorted by name for stable export.
    pub fn snapshot(&self) -> Vec<Arc<RegisteredTool>> {
        let mut all: Vec<Arc<RegisteredTool>> = self
            .tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.tool().name.cmp(&b.tool().name));
        all
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
