//! Metadata synthesis for servers registered without descriptive data.
//!
//! Every id in the server map must have a metadata entry. Missing entries are
//! derived from the id alone, so repeated passes produce identical results.

use crate::document::ConfigDocument;
use toolwire_types::{PluginMetadata, PluginType};

const AUTO_DESCRIPTION: &str = "Automatically registered from server configuration";

const AUTO_LONG_DESCRIPTION: &str = "This server was found in the server configuration \
without descriptive metadata, so an entry was generated from its id. Edit the metadata \
to add a proper description, author and version.";

const AUTO_AUTHOR: &str = "Unknown";

const AUTO_VERSION: &str = "1.0.0";

/// Derive a display name from a server id.
///
/// `_` and `-` become spaces, the result is split on spaces, and the first
/// character of each token is upper-cased. Empty tokens are kept, so runs of
/// separators survive as runs of spaces.
pub fn display_name_from_id(id: &str) -> String {
    id.replace(['_', '-'], " ")
        .split(' ')
        .map(capitalize_first)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Build the default metadata entry for `id`.
pub fn synthesize_metadata(id: &str, now_ms: i64) -> PluginMetadata {
    PluginMetadata {
        id: id.to_string(),
        name: display_name_from_id(id),
        description: AUTO_DESCRIPTION.to_string(),
        long_description: AUTO_LONG_DESCRIPTION.to_string(),
        author: AUTO_AUTHOR.to_string(),
        version: AUTO_VERSION.to_string(),
        install_path: String::new(),
        plugin_type: PluginType::Local,
        endpoint: None,
        connection_type: None,
        bearer_token: None,
        headers: Default::default(),
        installed_time: now_ms,
    }
}

/// Add metadata for every server that lacks it. Returns how many were added.
pub fn fill_missing_metadata(doc: &mut ConfigDocument, now_ms: i64) -> usize {
    let missing: Vec<String> = doc
        .mcp_servers
        .keys()
        .filter(|id| !doc.plugin_metadata.contains_key(*id))
        .cloned()
        .collect();

    for id in &missing {
        tracing::debug!(server = %id, "Synthesizing missing plugin metadata");
        doc.plugin_metadata
            .insert(id.clone(), synthesize_metadata(id, now_ms));
    }
    missing.len()
}
