//! Built-in template providers.
//!
//! All optional; the embedding app registers whichever it needs, in the
//! priority order it wants.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio::sync::RwLock;

use vcphub_types::VcpResult;

use super::ResolveContext;

/// A named resolver for a class of placeholder keys.
///
/// Returning `Ok(None)` means "not mine"; the engine tries the next
/// provider. Errors are logged by the engine and treated as "not mine".
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn resolve(&self, key: &str, ctx: &ResolveContext) -> VcpResult<Option<String>>;
}

// ---------------------------------------------------------------------------
// Time provider
// ---------------------------------------------------------------------------

/// Serves `Date`, `Time`, `Today`, `DateTime`, `Timestamp`, `ISO8601`.
///
/// Values render in UTC. `Timestamp` is seconds since the epoch;
/// `ISO8601` is RFC 3339.
#[derive(Debug, Default)]
pub struct TimeProvider;

#[async_trait]
impl Provider for TimeProvider {
    fn name(&self) -> &str {
        "time"
    }

    async fn resolve(&self, key: &str, _ctx: &ResolveContext) -> VcpResult<Option<String>> {
        let now = Utc::now();
        let value = match key {
            "Date" => now.format("%Y-%m-%d").to_string(),
            "Time" => now.format("%H:%M:%S").to_string(),
            "Today" => now.format("%A, %B %-d, %Y").to_string(),
            "DateTime" => now.format("%Y-%m-%d %H:%M:%S").to_string(),
            "Timestamp" => now.timestamp().to_string(),
            "ISO8601" => now.to_rfc3339_opts(SecondsFormat::Secs, true),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

// ---------------------------------------------------------------------------
// Environment provider
// ---------------------------------------------------------------------------

/// Serves keys whose literal name is an OS environment variable matching
/// one of the configured prefixes. A matching key whose variable is not
/// set resolves to a visible `[not configured <key>]` marker so the
/// omission survives into downstream text.
#[derive(Debug)]
pub struct EnvProvider {
    prefixes: Vec<String>,
}

impl EnvProvider {
    #[must_use]
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new(vec!["Tar".into(), "Var".into(), "ENV_".into()])
    }
}

#[async_trait]
impl Provider for EnvProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn resolve(&self, key: &str, _ctx: &ResolveContext) -> VcpResult<Option<String>> {
        if !self.prefixes.iter().any(|p| key.starts_with(p.as_str())) {
            return Ok(None);
        }
        match std::env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(_) => Ok(Some(format!("[not configured {key}]"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Static provider
// ---------------------------------------------------------------------------

/// In-memory map settable by the embedding app.
#[derive(Debug, Default)]
pub struct StaticProvider {
    values: RwLock<HashMap<String, String>>,
}

impl StaticProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().await.insert(key.into(), value.into());
    }

    pub async fn remove(&self, key: &str) {
        self.values.write().await.remove(key);
    }

    pub async fn replace_all(&self, values: HashMap<String, String>) {
        *self.values.write().await = values;
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn resolve(&self, key: &str, _ctx: &ResolveContext) -> VcpResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }
}

// ---------------------------------------------------------------------------
// Catalog provider
// ---------------------------------------------------------------------------

/// Separator between catalog entries in the `VCPAllTools` rendering.
const ALL_TOOLS_SEPARATOR: &str = "\n\n---\n\n";

/// Anything that can hand out the current tool catalog. Implemented by
/// the plugin runtime.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Current catalog, keyed by `VCP<id>`.
    async fn catalog(&self) -> HashMap<String, String>;
}

/// Resolves `VCPAllTools` to every catalog entry joined together, and
/// `VCP<id>` to the entry for plugin `<id>`.
pub struct CatalogProvider {
    source: Arc<dyn CatalogSource>,
}

impl CatalogProvider {
    #[must_use]
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Provider for CatalogProvider {
    fn name(&self) -> &str {
        "catalog"
    }

    async fn resolve(&self, key: &str, _ctx: &ResolveContext) -> VcpResult<Option<String>> {
        if !key.starts_with("VCP") {
            return Ok(None);
        }
        let catalog = self.source.catalog().await;
        if key == "VCPAllTools" {
            let mut keys: Vec<&String> = catalog.keys().collect();
            keys.sort();
            let joined = keys
                .iter()
                .map(|k| catalog[*k].as_str())
                .collect::<Vec<_>>()
                .join(ALL_TOOLS_SEPARATOR);
            return Ok(Some(joined));
        }
        Ok(catalog.get(key).cloned())
    }
}

impl std::fmt::Debug for CatalogProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogProvider").finish_non_exhaustive()
    }
}
