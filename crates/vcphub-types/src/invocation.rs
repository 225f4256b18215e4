//! Parsed tool invocations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single tool invocation extracted from model output.
///
/// Produced by the protocol parser, consumed once by the plugin runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Target plugin id (the block's `tool_name` field).
    pub name: String,
    /// Every non-reserved field of the block.
    pub args: HashMap<String, String>,
    /// Fire-and-forget: the model does not await a synchronous reply.
    pub fire_and_forget: bool,
    /// Original block text, kept for diagnostics.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub raw_block: String,
}

impl ToolInvocation {
    /// Arguments as a JSON object, the shape subprocess plugins read
    /// from stdin and distributed nodes receive in `toolArgs`.
    #[must_use]
    pub fn args_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.args
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}
