//! Hub events.
//!
//! Two advisory event families: [`RuntimeEvent`] from the plugin runtime
//! and [`ChannelEvent`] from the distributed tool channel. Both travel
//! over broadcast buses; no component's correctness depends on a
//! subscriber handling them.

use serde::{Deserialize, Serialize};

/// Events emitted by the plugin runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A plugin entered the registry.
    Registered { id: String, kind: String },
    /// An `execute` call completed successfully.
    Executed { id: String },
    /// An `execute` call failed; `kind` is the stable error kind.
    #[serde(rename = "error")]
    ExecutionFailed {
        id: String,
        kind: String,
        message: String,
    },
    /// A plugin left the registry.
    Unloaded { id: String },
}

/// Events emitted by the distributed tool channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// A worker session completed its handshake.
    ServerConnected {
        session_id: String,
        name: Option<String>,
    },
    /// A worker advertised a toolset. Descriptors are the raw frames the
    /// worker sent; the runtime validates them during bulk registration.
    ToolsRegistered {
        session_id: String,
        tools: Vec<serde_json::Value>,
    },
    /// A session withdrew tools (selectively or by dying).
    ToolsUnregistered {
        session_id: String,
        tools: Vec<String>,
    },
    /// A worker pushed a result with no `requestId`: fire-and-forget
    /// completion of an earlier archery-style call.
    AsyncToolResult {
        session_id: String,
        payload: serde_json::Value,
    },
    /// A worker reported its network addresses.
    IpReport {
        session_id: String,
        local_ips: Vec<String>,
        public_ip: Option<String>,
    },
}
