//! Directory-based plugin discovery.
//!
//! Scans a plugins directory for subdirectories holding
//! `plugin-manifest.json`, turns each manifest into a descriptor, and
//! registers it. One broken plugin never stops the scan; failures are
//! logged and the healthy rest load normally.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use vcphub_types::{PluginDescriptor, PluginKind, PluginManifest, VcpError, VcpResult};

use super::subprocess::MANIFEST_FILE;
use super::PluginRuntime;

/// Scan `plugins_dir` and register every plugin found. Returns the ids
/// that loaded, in directory-scan order.
///
/// # Errors
///
/// `plugin-load-error` when the directory itself cannot be read;
/// individual plugin failures are logged, not returned.
pub async fn load_plugins_from_dir(
    runtime: &PluginRuntime,
    plugins_dir: &Path,
) -> VcpResult<Vec<String>> {
    let mut entries =
        tokio::fs::read_dir(plugins_dir)
            .await
            .map_err(|e| VcpError::PluginLoad {
                plugin: plugins_dir.display().to_string(),
                reason: format!("cannot read plugins directory: {e}"),
            })?;

    let mut loaded = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let dir = entry.path();
        if !dir.is_dir() || !dir.join(MANIFEST_FILE).is_file() {
            continue;
        }
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        match load_one(runtime, &dir, &dir_name).await {
            Ok(id) => loaded.push(id),
            Err(e) => {
                warn!(plugin_dir = %dir.display(), error = %e, "plugin failed to load");
            }
        }
    }
    info!(
        dir = %plugins_dir.display(),
        count = loaded.len(),
        "plugin directory scan complete"
    );
    Ok(loaded)
}

async fn load_one(runtime: &PluginRuntime, dir: &Path, dir_name: &str) -> VcpResult<String> {
    let manifest = super::subprocess::load_manifest(dir_name, dir).await?;
    let descriptor = descriptor_from_manifest(&manifest, dir, dir_name)?;
    let id = descriptor.id.clone();
    runtime.register(descriptor).await?;
    Ok(id)
}

/// Build a registry descriptor from an on-disk manifest. The directory
/// name is the fallback for the plugin id and name.
pub fn descriptor_from_manifest(
    manifest: &PluginManifest,
    dir: &Path,
    dir_name: &str,
) -> VcpResult<PluginDescriptor> {
    let id = manifest
        .name
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(dir_name)
        .to_string();
    let name = manifest
        .display_name
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&id)
        .to_string();

    let tag = manifest.plugin_type.as_deref().unwrap_or("subprocess");
    let kind = match tag {
        // The original worker scripts spell subprocess plugins by their
        // calling convention.
        "subprocess" | "synchronous" | "asynchronous" => PluginKind::Subprocess {
            base_dir: dir.to_path_buf(),
        },
        "preprocessor" | "messagePreprocessor" => PluginKind::Preprocessor,
        "static" => PluginKind::Static,
        "service" => PluginKind::Service,
        "internal" => PluginKind::Internal,
        "direct" => PluginKind::Direct,
        other => {
            return Err(VcpError::PluginLoad {
                plugin: id,
                reason: format!("unknown pluginType '{other}'"),
            });
        }
    };

    Ok(PluginDescriptor {
        id,
        name,
        version: manifest.version.clone().unwrap_or_default(),
        description: manifest.description.clone().unwrap_or_default(),
        kind,
        capabilities: manifest.capabilities.clone().unwrap_or_default(),
        static_values: manifest.static_values.clone().unwrap_or_else(HashMap::new),
    })
}
