//! Tool-request protocol parser.
//!
//! The model embeds tool invocations in free text as delimited blocks:
//!
//! ```text
//! <<<[TOOL_REQUEST]>>>
//! tool_name:「始」Fetch「末」,
//! url:「始」http://example.com「末」
//! <<<[END_TOOL_REQUEST]>>>
//! ```
//!
//! Fields are `name:「始」value「末」` pairs separated by commas or
//! newlines. `tool_name` selects the plugin; `archery` marks the call
//! fire-and-forget (`"true"` or `"no_reply"`). Everything else lands in
//! the argument map. Parsing is never fatal: malformed blocks are logged
//! and skipped, and the caller gets whatever could be recovered.

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, warn};

use vcphub_types::{ParserConfig, ToolInvocation};

use crate::strings::truncate_utf8;

/// Reserved field selecting the target plugin.
const FIELD_TOOL_NAME: &str = "tool_name";

/// Reserved field marking a fire-and-forget invocation.
const FIELD_ARCHERY: &str = "archery";

/// Parser for delimited tool-request blocks.
#[derive(Debug)]
pub struct ToolCallParser {
    config: ParserConfig,
    field_re: Regex,
}

impl ToolCallParser {
    /// Build a parser for the given delimiter set. Delimiters are
    /// regex-escaped before pattern construction, so any literal strings
    /// are safe.
    #[must_use]
    pub fn new(config: ParserConfig) -> Self {
        let pattern = format!(
            r"(?s)([A-Za-z0-9_]+)\s*:\s*{}(.*?){}\s*,?",
            regex::escape(&config.value_open),
            regex::escape(&config.value_close),
        );
        // The pattern is built from escaped literals around a fixed
        // skeleton; it cannot fail to compile.
        let field_re = Regex::new(&pattern).expect("field pattern is statically valid");
        Self { config, field_re }
    }

    /// Cheap check for the presence of at least one opening delimiter.
    #[must_use]
    pub fn has_invocations(&self, text: &str) -> bool {
        text.contains(&self.config.block_open)
    }

    /// Extract all well-formed invocations from `text`, in order.
    ///
    /// Blocks with a missing close delimiter or no `tool_name` field are
    /// logged and skipped.
    #[must_use]
    pub fn parse(&self, text: &str) -> Vec<ToolInvocation> {
        let mut invocations = Vec::new();
        let open = &self.config.block_open;
        let close = &self.config.block_close;
        let mut cursor = 0;

        while let Some(rel_open) = text[cursor..].find(open.as_str()) {
            let block_start = cursor + rel_open + open.len();
            let Some(rel_close) = text[block_start..].find(close.as_str()) else {
                warn!(
                    at = cursor + rel_open,
                    "tool request block has no closing delimiter; skipping"
                );
                cursor = block_start;
                continue;
            };
            let block = &text[block_start..block_start + rel_close];
            if let Some(invocation) = self.parse_block(block) {
                invocations.push(invocation);
            }
            cursor = block_start + rel_close + close.len();
        }

        debug!(count = invocations.len(), "parsed tool invocations");
        invocations
    }

    /// Parse the interior of one block into an invocation.
    fn parse_block(&self, block: &str) -> Option<ToolInvocation> {
        let mut name: Option<String> = None;
        let mut fire_and_forget = false;
        let mut args = HashMap::new();

        for caps in self.field_re.captures_iter(block) {
            let field = &caps[1];
            let value = caps[2].trim().to_string();
            match field {
                FIELD_TOOL_NAME => name = Some(value),
                FIELD_ARCHERY => {
                    fire_and_forget = matches!(value.as_str(), "true" | "no_reply");
                }
                _ => {
                    args.insert(field.to_string(), value);
                }
            }
        }

        let Some(name) = name.filter(|n| !n.is_empty()) else {
            warn!(
                block = truncate_utf8(block.trim(), 120),
                "tool request block has no tool_name field; discarding"
            );
            return None;
        };

        Some(ToolInvocation {
            name,
            args,
            fire_and_forget,
            raw_block: block.trim().to_string(),
        })
    }

    /// Render a tool result as text the model can re-ingest.
    ///
    /// Structured payloads are pretty-printed JSON inside the fence;
    /// rich-content attachments found in the payload are appended as an
    /// enumerated list after it.
    #[must_use]
    pub fn format_result(
        &self,
        name: &str,
        payload: &serde_json::Value,
        ok: bool,
        error: Option<&str>,
    ) -> String {
        let status = if ok { "SUCCESS" } else { "FAILED" };
        let body = match payload {
            serde_json::Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };

        let mut out = format!("[Tool result from \"{name}\"]\nStatus: {status}\n");
        if let Some(err) = error {
            out.push_str(&format!("Error: {err}\n"));
        }
        out.push_str("```\n");
        out.push_str(&body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```");

        let attachments = collect_attachments(payload);
        if !attachments.is_empty() {
            out.push_str("\nAttachments:");
            for (i, (kind, url)) in attachments.iter().enumerate() {
                out.push_str(&format!("\n{}. [{kind}] {url}", i + 1));
            }
        }
        out
    }
}

impl Default for ToolCallParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

/// Pull `(type, url)` pairs out of a payload's `attachments` array.
fn collect_attachments(payload: &serde_json::Value) -> Vec<(String, String)> {
    let Some(items) = payload.get("attachments").and_then(|a| a.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let url = item.get("url").and_then(|u| u.as_str())?;
            let kind = item
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("file");
            Some((kind.to_string(), url.to_string()))
        })
        .collect()
}
