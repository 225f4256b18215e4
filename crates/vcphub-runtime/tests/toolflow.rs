//! Cross-module flow: model text in, parsed invocations through the
//! runtime, results formatted back out, and the catalog visible to
//! templates.

use std::sync::Arc;

use vcphub_runtime::template::CatalogProvider;
use vcphub_runtime::{PluginRuntime, ResolveContext, TemplateEngine, ToolCallParser};
use vcphub_types::{
    CapabilityManifest, EngineConfig, InvocationCommand, PluginDescriptor, PluginKind,
};

fn echo_internal(id: &str) -> PluginDescriptor {
    let mut d = PluginDescriptor::new(id, id, PluginKind::Internal);
    d.capabilities = CapabilityManifest {
        invocation_commands: vec![],
    };
    d
}

fn catalogued(id: &str, command: &str, description: &str, example: &str) -> PluginDescriptor {
    let mut d = PluginDescriptor::new(id, id, PluginKind::Internal);
    d.capabilities = CapabilityManifest {
        invocation_commands: vec![InvocationCommand {
            command: command.into(),
            description: description.into(),
            example: example.into(),
        }],
    };
    d
}

#[tokio::test]
async fn parsed_invocation_executes_and_formats() {
    let runtime = Arc::new(PluginRuntime::new());
    runtime.register(echo_internal("Notes")).await.unwrap();

    let parser = ToolCallParser::default();
    let text = "sure, let me check
<<<[TOOL_REQUEST]>>>
tool_name:「始」Notes「末」,
topic:「始」groceries「末」
<<<[END_TOOL_REQUEST]>>>
one moment";

    assert!(parser.has_invocations(text));
    let invocations = parser.parse(text);
    assert_eq!(invocations.len(), 1);
    let inv = &invocations[0];
    assert_eq!(inv.name, "Notes");
    assert_eq!(inv.args.get("topic").map(String::as_str), Some("groceries"));

    let result = runtime.execute(&inv.name, &inv.args_json()).await.unwrap();
    let rendered = parser.format_result(&inv.name, &result, true, None);
    assert!(rendered.contains("[Tool result from \"Notes\"]"));
    assert!(rendered.contains("Status: SUCCESS"));
}

#[tokio::test]
async fn failed_execution_formats_with_the_error() {
    let runtime = Arc::new(PluginRuntime::new());
    let parser = ToolCallParser::default();

    let err = runtime
        .execute("Ghost", &serde_json::json!({}))
        .await
        .unwrap_err();
    let rendered = parser.format_result(
        "Ghost",
        &serde_json::json!({"status": "error"}),
        false,
        Some(&err.to_string()),
    );
    assert!(rendered.contains("Status: FAILED"));
    assert!(rendered.contains("Ghost"));
}

#[tokio::test]
async fn templates_see_the_live_catalog() {
    let runtime = Arc::new(PluginRuntime::new());
    runtime
        .register(catalogued("Sum", "add", "adds two numbers", "add 1 2"))
        .await
        .unwrap();
    runtime
        .register(catalogued("Weather", "query", "weather lookup", "query Oslo"))
        .await
        .unwrap();

    let engine = TemplateEngine::new(EngineConfig::default());
    engine
        .register_provider(Arc::new(CatalogProvider::new(runtime.clone())))
        .await;

    let single = engine
        .resolve("tools: {{VCPSum}}", &ResolveContext::default())
        .await
        .unwrap();
    assert!(single.contains("- Sum (Sum) - command: add:"));
    assert!(single.contains("adds two numbers"));

    let all = engine
        .resolve("{{VCPAllTools}}", &ResolveContext::default())
        .await
        .unwrap();
    assert!(all.contains("adds two numbers"));
    assert!(all.contains("weather lookup"));
    assert!(all.contains("\n\n---\n\n"));

    // Unloading drops the entry; the placeholder then stays intact.
    runtime.unload("Weather").await.unwrap();
    let after = engine
        .resolve("{{VCPWeather}}", &ResolveContext::default())
        .await
        .unwrap();
    assert_eq!(after, "{{VCPWeather}}");
}
