//! Error types for the VCP hub.
//!
//! Every fallible operation in the workspace ultimately surfaces a
//! [`VcpError`]. Each variant maps to a stable kind identifier via
//! [`VcpError::kind`], which the HTTP layer and log channels use for
//! presentation; the core performs no mapping of its own.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type VcpResult<T> = Result<T, VcpError>;

/// Typed error covering parser, template, plugin, distributed-channel,
/// and websocket failures.
#[derive(Debug, Error)]
pub enum VcpError {
    // -- protocol parser ---------------------------------------------------
    #[error("protocol parse error: {0}")]
    ProtocolParse(String),

    #[error("invalid tool request: {0}")]
    InvalidToolRequest(String),

    #[error("invalid parameter format for '{field}': {reason}")]
    InvalidParameterFormat { field: String, reason: String },

    // -- plugin runtime ----------------------------------------------------
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("tool '{tool}' execution failed: {reason}")]
    ToolExecutionFailed { tool: String, reason: String },

    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidToolArgs { tool: String, reason: String },

    #[error("plugin '{plugin}' failed to load: {reason}")]
    PluginLoad { plugin: String, reason: String },

    #[error("plugin '{plugin}' failed to initialize: {reason}")]
    PluginInit { plugin: String, reason: String },

    #[error("plugin '{0}' not found")]
    PluginNotFound(String),

    #[error("invalid manifest for plugin '{plugin}': {reason}")]
    InvalidPluginManifest { plugin: String, reason: String },

    // -- template engine ---------------------------------------------------
    #[error("failed to resolve placeholder '{key}': {reason}")]
    VariableResolve { key: String, reason: String },

    #[error("circular placeholder reference at '{key}' (stack: {stack})")]
    CircularDependency { key: String, stack: String },

    #[error("placeholder recursion exceeded depth {max_depth} at '{key}'")]
    MaxRecursionDepth { key: String, max_depth: usize },

    #[error("no provider registered for '{0}'")]
    ProviderNotFound(String),

    // -- distributed channel -----------------------------------------------
    #[error("no connection to distributed node '{0}'")]
    DistributedConnection(String),

    #[error("distributed call '{tool}' on node '{session_id}' timed out after {timeout_ms}ms (request {request_id})")]
    DistributedTimeout {
        tool: String,
        session_id: String,
        request_id: String,
        timeout_ms: u64,
    },

    #[error("distributed node authentication failed: {0}")]
    DistributedAuthFailed(String),

    // -- websocket hub -----------------------------------------------------
    #[error("websocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("websocket authentication failed: {0}")]
    WebSocketAuthFailed(String),

    #[error("websocket message error: {0}")]
    WebSocketMessage(String),

    // -- configuration -----------------------------------------------------
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing required configuration: {0}")]
    MissingRequiredConfig(String),
}

impl VcpError {
    /// Stable kind identifier for wire/log mapping.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolParse(_) => "protocol-parse-error",
            Self::InvalidToolRequest(_) => "invalid-tool-request",
            Self::InvalidParameterFormat { .. } => "invalid-parameter-format",
            Self::ToolNotFound(_) => "tool-not-found",
            Self::ToolExecutionFailed { .. } => "tool-execution-failed",
            Self::ToolTimeout { .. } => "tool-timeout",
            Self::InvalidToolArgs { .. } => "invalid-tool-args",
            Self::PluginLoad { .. } => "plugin-load-error",
            Self::PluginInit { .. } => "plugin-init-error",
            Self::PluginNotFound(_) => "plugin-not-found",
            Self::InvalidPluginManifest { .. } => "invalid-plugin-manifest",
            Self::VariableResolve { .. } => "variable-resolve-error",
            Self::CircularDependency { .. } => "circular-dependency",
            Self::MaxRecursionDepth { .. } => "max-recursion-depth",
            Self::ProviderNotFound(_) => "provider-not-found",
            Self::DistributedConnection(_) => "distributed-connection-error",
            Self::DistributedTimeout { .. } => "distributed-timeout",
            Self::DistributedAuthFailed(_) => "distributed-auth-failed",
            Self::WebSocketConnection(_) => "websocket-connection-error",
            Self::WebSocketAuthFailed(_) => "websocket-auth-failed",
            Self::WebSocketMessage(_) => "websocket-message-error",
            Self::InvalidConfig(_) => "invalid-config",
            Self::MissingRequiredConfig(_) => "missing-required-config",
        }
    }

    /// Whether this error came out of a timeout path.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ToolTimeout { .. } | Self::DistributedTimeout { .. }
        )
    }
}
