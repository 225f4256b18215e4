//! Configuration structs.
//!
//! Plain data with `Default` impls; the embedding application owns
//! loading these from wherever it keeps its settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Delimiters the protocol parser scans for. All four are configurable;
/// the defaults are the wire-format standard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Opens a tool request block.
    pub block_open: String,
    /// Closes a tool request block.
    pub block_close: String,
    /// Opens a field value.
    pub value_open: String,
    /// Closes a field value.
    pub value_close: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            block_open: "<<<[TOOL_REQUEST]>>>".into(),
            block_close: "<<<[END_TOOL_REQUEST]>>>".into(),
            value_open: "「始」".into(),
            value_close: "「末」".into(),
        }
    }
}

/// Template engine guards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fail `resolve` when a key recurs on the resolution stack.
    pub cycle_detection: bool,
    /// Maximum recursion depth before `resolve` fails.
    pub max_depth: usize,
    /// Maximum unique placeholders per single text (DoS guard).
    pub max_fanout: usize,
    /// Substitution-regex cache bound; flushed wholesale on overflow.
    pub regex_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_detection: true,
            max_depth: 10,
            max_fanout: 100,
            regex_cache_size: 200,
        }
    }
}

/// File fetcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Directory holding cached file bodies.
    pub cache_dir: PathBuf,
    /// Bound on one distributed fetch round-trip, in milliseconds.
    pub distributed_timeout_ms: u64,
    /// Cache directory byte budget; oldest files are swept past it.
    pub cache_budget_bytes: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("file_cache"),
            distributed_timeout_ms: 30_000,
            cache_budget_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Hub-wide settings shared by the WebSocket channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Shared key embedded in every channel path (`VCP_Key=...`).
    pub shared_key: String,
    /// Identifier sent in `connection_ack` frames.
    pub server_id: String,
    /// Default distributed call timeout, in milliseconds.
    pub call_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            shared_key: String::new(),
            server_id: "vcphub".into(),
            call_timeout_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_defaults_match_wire_format() {
        let c = ParserConfig::default();
        assert_eq!(c.block_open, "<<<[TOOL_REQUEST]>>>");
        assert_eq!(c.block_close, "<<<[END_TOOL_REQUEST]>>>");
        assert_eq!(c.value_open, "「始」");
        assert_eq!(c.value_close, "「末」");
    }

    #[test]
    fn engine_defaults() {
        let c = EngineConfig::default();
        assert!(c.cycle_detection);
        assert_eq!(c.max_depth, 10);
        assert_eq!(c.max_fanout, 100);
        assert_eq!(c.regex_cache_size, 200);
    }
}
