//! Toolkit walkthrough: typed tools, groups, presets, and batch execution.
//!
//! Demonstrates:
//! - Typed argument structs with `Deserialize` + `JsonSchema`
//! - Group-based activation and the `reset_equipped_tools` meta-tool
//! - Preset parameters hidden from the exported schema
//! - Parallel batch execution with per-batch retry policy
//!
//! # Usage
//!
//! ```bash
//! cargo run --example agent_toolkit
//! ```

use quiver_rs::prelude::*;
use quiver_rs::schemars;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

// ── Typed argument structs ──────────────────────────────────────────

/// Arguments for the `lookup_word` tool.
#[derive(Deserialize, JsonSchema)]
struct LookupWordArgs {
    /// The word to look up.
    word: String,
}

/// Arguments for the `fetch_page` tool.
#[derive(Deserialize, JsonSchema)]
struct FetchPageArgs {
    /// URL to fetch.
    url: String,
    /// API key, injected by the engine.
    #[serde(default)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), RegistrationError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let toolkit = Toolkit::new();

    // An always-active, ungrouped tool.
    toolkit.register(
        ToolBuilder::new("lookup_word", "Look up the definition of a word")
            .handler(|args: LookupWordArgs| async move {
                // In a real tool, you'd call a dictionary API here.
                format!("{}: [stub] definition goes here.", args.word)
            })
            .build()?,
    )?;

    // A grouped tool with a hidden preset parameter.
    toolkit.create_group("web", "Tools that reach the network", false)?;
    toolkit.register_with(
        ToolBuilder::new("fetch_page", "Fetch a page over HTTP")
            .handler(|args: FetchPageArgs| async move {
                format!(
                    "fetched {} (key: {})",
                    args.url,
                    args.api_key.as_deref().unwrap_or("none"),
                )
            })
            .build()?,
        RegisterOptions::new()
            .in_group("web")
            .preset("api_key", json!("sk-demo")),
    )?;

    // The meta-tool lets the model equip groups on demand.
    toolkit.install_group_selector()?;

    // Only lookup_word and reset_equipped_tools are visible: "web" is off.
    for schema in toolkit.list_tool_schemas() {
        println!("visible: {}", schema.name);
    }

    // The model equips the web group...
    let equip = toolkit
        .call_tool(ToolCall::new(
            "call-0",
            RESET_EQUIPPED_TOOLS,
            json!({"groups": ["web"]}),
        ))
        .await;
    println!("{}", equip.render());

    // ...then fans out a parallel batch with a retry policy.
    let config = ExecutionConfig::new()
        .with_timeout(Duration::from_secs(10))
        .with_max_attempts(3);
    let results = toolkit
        .call_tools(
            vec![
                ToolCall::new("call-1", "lookup_word", json!({"word": "ephemeral"})),
                ToolCall::new("call-2", "fetch_page", json!({"url": "https://example.com"})),
            ],
            true,
            Some(config),
            &CallScope::new().for_agent(AgentHandle::new("agent-1", "researcher")),
        )
        .await;

    for result in results {
        println!("[{}] {}", result.id, result.render());
    }
    Ok(())
}
