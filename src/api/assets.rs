//! Embedded static assets
//!
//! In development, falls back to serving from the filesystem.

use rust_embed::Embed;
use std::path::PathBuf;

#[derive(Embed)]
#[folder = "ui"]
struct Assets;

/// Get the index.html content (embedded or from filesystem)
pub fn get_index_html() -> Option<String> {
    read_asset("index.html").and_then(|bytes| String::from_utf8(bytes).ok())
}

fn read_asset(path: &str) -> Option<Vec<u8>> {
    if let Some(content) = Assets::get(path) {
        return Some(content.data.into_owned());
    }
    if path.split('/').any(|part| part == "..") {
        return None;
    }
    std::fs::read(PathBuf::from("ui").join(path)).ok()
}
