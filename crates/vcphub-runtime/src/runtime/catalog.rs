//! Tool catalog rendering.
//!
//! The catalog is a pure function of the registry: a per-plugin text
//! block keyed by `VCP<id>`, rebuilt whole whenever the plugin set
//! changes. Templates consume it through the catalog provider.

use std::collections::HashMap;

use vcphub_types::PluginDescriptor;

use crate::strings::indent_lines;

/// Prefix every catalog key carries.
pub const CATALOG_KEY_PREFIX: &str = "VCP";

/// Catalog key for a plugin id.
#[must_use]
pub fn catalog_key(id: &str) -> String {
    format!("{CATALOG_KEY_PREFIX}{id}")
}

/// Render the whole catalog from a registry snapshot.
#[must_use]
pub fn render_catalog(registry: &HashMap<String, PluginDescriptor>) -> HashMap<String, String> {
    registry
        .values()
        .filter_map(|d| render_entry(d).map(|entry| (catalog_key(&d.id), entry)))
        .collect()
}

/// Render one plugin's catalog block, or `None` when the plugin has no
/// described invocation command.
#[must_use]
pub fn render_entry(descriptor: &PluginDescriptor) -> Option<String> {
    let described: Vec<_> = descriptor
        .capabilities
        .invocation_commands
        .iter()
        .filter(|c| !c.description.trim().is_empty())
        .collect();
    if described.is_empty() {
        return None;
    }

    let blocks: Vec<String> = described
        .iter()
        .map(|cmd| {
            let mut block = format!(
                "- {} ({}) - command: {}:\n{}",
                descriptor.name,
                descriptor.id,
                cmd.command,
                indent_lines(cmd.description.trim(), 4),
            );
            if !cmd.example.trim().is_empty() {
                block.push_str(&format!(
                    "\n  call example:\n{}",
                    indent_lines(cmd.example.trim(), 4)
                ));
            }
            block
        })
        .collect();

    Some(blocks.join("\n\n"))
}
