//! Plugin descriptors and on-disk manifests.
//!
//! A [`PluginDescriptor`] is the registry's unit of bookkeeping: a stable
//! id, display metadata, a [`PluginKind`] tag carrying the fields relevant
//! to that kind, and the capability block the catalog renders from.
//! [`PluginManifest`] mirrors the `plugin-manifest.json` file a subprocess
//! plugin ships on disk; it is re-read at every execution so edits take
//! effect without re-registration.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::VcpError;

/// The closed set of plugin kinds, tagged with kind-specific fields.
///
/// Registration dispatch and execution dispatch are both a `match` over
/// this tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PluginKind {
    /// Executed as a child process; the manifest lives under `base_dir`.
    Subprocess {
        #[serde(default, rename = "pluginDir")]
        base_dir: PathBuf,
    },
    /// Owned by a connected worker node; executed over its session.
    Distributed {
        #[serde(default, rename = "serverId")]
        session_id: String,
    },
    /// Message-list transformer; runs in the preprocess pipeline only.
    Preprocessor,
    /// Long-lived handle the embedding app retrieves by name.
    Service,
    /// Contributes entries to the static placeholder map.
    Static,
    /// Built-in dispatch table inside the runtime.
    Internal,
    /// Accepted at registration; routed by the embedding layer, never
    /// executed by the runtime itself.
    Direct,
}

impl PluginKind {
    /// Short tag name, matching the wire spelling.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Subprocess { .. } => "subprocess",
            Self::Distributed { .. } => "distributed",
            Self::Preprocessor => "preprocessor",
            Self::Service => "service",
            Self::Static => "static",
            Self::Internal => "internal",
            Self::Direct => "direct",
        }
    }
}

/// One invocation command a plugin advertises to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationCommand {
    pub command: String,
    #[serde(default)]
    pub description: String,
    /// Illustrative call example rendered into the catalog.
    #[serde(default)]
    pub example: String,
}

/// Capability block: the commands a plugin can be invoked with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityManifest {
    #[serde(default)]
    pub invocation_commands: Vec<InvocationCommand>,
}

/// Registry entry for a plugin of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Stable id, unique across the whole registry.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub kind: PluginKind,
    #[serde(default)]
    pub capabilities: CapabilityManifest,
    /// Placeholder entries a `static`-kind plugin contributes.
    #[serde(
        default,
        rename = "staticValues",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub static_values: HashMap<String, String>,
}

impl PluginDescriptor {
    /// Minimal constructor; callers fill capabilities afterwards.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: PluginKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: String::new(),
            description: String::new(),
            kind,
            capabilities: CapabilityManifest::default(),
            static_values: HashMap::new(),
        }
    }

    /// Validate the fields every registration requires.
    ///
    /// # Errors
    ///
    /// Returns [`VcpError::InvalidPluginManifest`] when `id` or `name`
    /// is empty.
    pub fn validate(&self) -> Result<(), VcpError> {
        if self.id.trim().is_empty() {
            return Err(VcpError::InvalidPluginManifest {
                plugin: self.name.clone(),
                reason: "missing plugin id".into(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(VcpError::InvalidPluginManifest {
                plugin: self.id.clone(),
                reason: "missing plugin name".into(),
            });
        }
        Ok(())
    }

    /// Session id for distributed plugins, `None` otherwise.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match &self.kind {
            PluginKind::Distributed { session_id } => Some(session_id),
            _ => None,
        }
    }
}

/// Entry point section of a subprocess plugin manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Command line, tokenized on spaces for argv construction.
    #[serde(default)]
    pub command: String,
}

/// Communication settings of a subprocess plugin manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Communication {
    /// Execution timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// One entry of the manifest's `configSchema` object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchemaEntry {
    /// Default value, stringified into the child environment.
    #[serde(default)]
    pub default: serde_json::Value,
}

/// On-disk plugin manifest (`plugin-manifest.json`).
///
/// The execution path only reads `entryPoint`, `communication`, and
/// `configSchema`; the identity fields feed directory-based discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Kind tag (`subprocess`, `static`, `preprocessor`, ...).
    #[serde(default)]
    pub plugin_type: Option<String>,
    #[serde(default)]
    pub entry_point: EntryPoint,
    #[serde(default)]
    pub communication: Option<Communication>,
    #[serde(default)]
    pub config_schema: Option<HashMap<String, ConfigSchemaEntry>>,
    #[serde(default)]
    pub capabilities: Option<CapabilityManifest>,
    /// Placeholder entries contributed by `static` plugins.
    #[serde(default)]
    pub static_values: Option<HashMap<String, String>>,
}

impl PluginManifest {
    /// Argv tokens of the entry command.
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        self.entry_point.command.split_whitespace().collect()
    }

    /// Effective execution timeout in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self, default_ms: u64) -> u64 {
        self.communication
            .as_ref()
            .and_then(|c| c.timeout)
            .unwrap_or(default_ms)
    }

    /// Config defaults stringified for the child environment.
    #[must_use]
    pub fn env_defaults(&self) -> Vec<(String, String)> {
        let Some(schema) = &self.config_schema else {
            return Vec::new();
        };
        schema
            .iter()
            .map(|(name, entry)| {
                let value = match &entry.default {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}
