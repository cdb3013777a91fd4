//! Transcript file path utilities.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// `~/.claude`
pub fn claude_root() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude"))
}

/// `~/.claude/projects`
pub fn projects_dir() -> Option<PathBuf> {
    claude_root().map(|root| root.join("projects"))
}

/// Encode a filesystem path the way Claude Code names project directories.
///
/// Alphanumerics and `-` are kept. Any other character becomes
/// `max(1, utf8_len / 2)` dashes, so ASCII punctuation maps to one dash and
/// characters outside the BMP map to two.
///
/// # Example
/// ```
/// use ccstream::transcript::encode_path;
/// assert_eq!(encode_path("/Users/me/hobby/app"), "-Users-me-hobby-app");
/// assert_eq!(encode_path("/Users/me/develop/my_app.rs"), "-Users-me-develop-my-app-rs");
/// ```
pub fn encode_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_alphanumeric() || c == '-' {
            encoded.push(c);
        } else {
            let dashes = (c.len_utf8() / 2).max(1);
            encoded.extend(std::iter::repeat('-').take(dashes));
        }
    }
    encoded
}

/// Map a directory to its Claude project directory, if it has one.
///
/// Paths already inside `claude_root` are returned unchanged. Otherwise the
/// encoded project directory is returned when it exists, and the original
/// path when it does not.
pub fn resolve_watch_path(path: &Path, claude_root: &Path) -> PathBuf {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    if resolved.starts_with(claude_root) {
        return resolved;
    }

    let encoded = encode_path(&resolved.to_string_lossy());
    let project = claude_root.join("projects").join(encoded);
    if project.exists() {
        project
    } else {
        resolved
    }
}

fn is_transcript(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("jsonl")
}

/// All `.jsonl` files below `dir`, with their modification times.
pub fn list_transcripts(dir: &Path, recursive: bool) -> Vec<(PathBuf, SystemTime)> {
    let walker = WalkDir::new(dir).max_depth(if recursive { usize::MAX } else { 1 });
    walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_transcript(entry.path()))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.into_path(), modified))
        })
        .collect()
}

/// The most recently modified transcript anywhere under `root`.
pub fn find_latest_session(root: &Path) -> Result<PathBuf> {
    list_transcripts(root, true)
        .into_iter()
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
        .ok_or_else(|| Error::SessionNotFound(format!("no sessions under {}", root.display())))
}

/// The transcript named `<session_id>.jsonl` anywhere under `root`.
pub fn find_session_by_id(root: &Path, session_id: &str) -> Result<PathBuf> {
    let file_name = format!("{session_id}.jsonl");
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| {
            entry.file_type().is_file() && entry.file_name().to_str() == Some(file_name.as_str())
        })
        .map(|entry| entry.into_path())
        .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
}
