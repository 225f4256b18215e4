//! Subprocess plugin execution.
//!
//! A subprocess plugin is a directory holding `plugin-manifest.json`.
//! The manifest is re-read on every execution, the child runs with the
//! plugin directory as its working directory, the invocation arguments
//! arrive as one JSON document on stdin, and the result comes back on
//! stdout (JSON when the plugin emits it, raw text otherwise).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use vcphub_types::{PluginManifest, VcpError, VcpResult};

use crate::strings::truncate_with_marker;

/// Manifest file name inside every subprocess plugin directory.
pub const MANIFEST_FILE: &str = "plugin-manifest.json";

/// Environment variable pointing the child at its plugin directory.
pub const ENV_PLUGIN_BASE_PATH: &str = "PLUGIN_BASE_PATH";

/// Cap on stderr carried inside an execution error.
const STDERR_CAP_BYTES: usize = 2000;

/// Load and parse a plugin manifest from `base_dir`.
///
/// # Errors
///
/// Returns [`VcpError::InvalidPluginManifest`] when the file is missing,
/// unreadable, or not valid JSON.
pub async fn load_manifest(plugin_id: &str, base_dir: &Path) -> VcpResult<PluginManifest> {
    let path = base_dir.join(MANIFEST_FILE);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| VcpError::InvalidPluginManifest {
            plugin: plugin_id.to_string(),
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
    serde_json::from_str(&raw).map_err(|e| VcpError::InvalidPluginManifest {
        plugin: plugin_id.to_string(),
        reason: format!("manifest is not valid JSON: {e}"),
    })
}

/// Execute a subprocess plugin with the given JSON arguments.
///
/// # Errors
///
/// `invalid-plugin-manifest` for manifest problems, `tool-timeout` when
/// the child outlives its budget (it is killed), `tool-execution-failed`
/// for spawn failures and non-zero exits.
pub async fn run(
    plugin_id: &str,
    base_dir: &Path,
    args: &serde_json::Value,
    default_timeout_ms: u64,
) -> VcpResult<serde_json::Value> {
    let manifest = load_manifest(plugin_id, base_dir).await?;
    let argv = manifest.argv();
    let Some((program, rest)) = argv.split_first() else {
        return Err(VcpError::InvalidPluginManifest {
            plugin: plugin_id.to_string(),
            reason: "entryPoint.command is empty".into(),
        });
    };
    let timeout_ms = manifest.timeout_ms(default_timeout_ms);

    let mut cmd = Command::new(program);
    cmd.args(rest)
        .current_dir(base_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the in-flight future on timeout must take the child
        // with it.
        .kill_on_drop(true);

    // Child env: parent env plus config defaults, a forced UTF-8 I/O
    // hint, and the plugin-tree pointer.
    for (name, value) in manifest.env_defaults() {
        cmd.env(name, value);
    }
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env(ENV_PLUGIN_BASE_PATH, base_dir);

    debug!(plugin = plugin_id, command = %manifest.entry_point.command, timeout_ms, "spawning plugin");
    let mut child = cmd.spawn().map_err(|e| VcpError::ToolExecutionFailed {
        tool: plugin_id.to_string(),
        reason: format!("failed to spawn '{program}': {e}"),
    })?;

    let input = serde_json::to_string(args).unwrap_or_else(|_| "{}".into());
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(input.as_bytes()).await {
            warn!(plugin = plugin_id, error = %e, "failed to write plugin stdin");
        }
        // Closing stdin tells the plugin the argument document is done.
        drop(stdin);
    }

    let output = match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        child.wait_with_output(),
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(VcpError::ToolExecutionFailed {
                tool: plugin_id.to_string(),
                reason: format!("failed to collect plugin output: {e}"),
            });
        }
        Err(_) => {
            return Err(VcpError::ToolTimeout {
                tool: plugin_id.to_string(),
                timeout_ms,
            });
        }
    };

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VcpError::ToolExecutionFailed {
            tool: plugin_id.to_string(),
            reason: format!(
                "exit code {code}: {}",
                truncate_with_marker(stderr.trim(), STDERR_CAP_BYTES)
            ),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let trimmed = stdout.trim();
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => Ok(value),
        Err(_) => Ok(serde_json::json!({
            "status": "success",
            "result": trimmed,
        })),
    }
}
