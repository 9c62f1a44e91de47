//! Target and media helpers.

use std::path::{Path, PathBuf};

const TARGET_PREFIXES: &[&str] = &["user:", "chat:", "wecom:"];

/// Strip a `user:`, `chat:` or `wecom:` prefix. `None` for a blank target.
pub fn normalize_target(target: &str) -> Option<String> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    for prefix in TARGET_PREFIXES {
        if let Some(rest) = target.strip_prefix(prefix) {
            return Some(rest.to_string());
        }
    }
    Some(target.to_string())
}

/// Media type accepted by the upload endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Voice,
    Video,
    File,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Voice => "voice",
            MediaKind::Video => "video",
            MediaKind::File => "file",
        }
    }
}

/// Pick the media kind from the file extension.
pub fn detect_media_kind(file_name: &str) -> MediaKind {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "bmp" => MediaKind::Image,
        "amr" | "silk" => MediaKind::Voice,
        "mp4" | "mov" | "avi" => MediaKind::Video,
        _ => MediaKind::File,
    }
}

/// File name from the last path segment of a URL, or `fallback`.
pub fn file_name_from_url(url: &str, fallback: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = path
        .split_once("://")
        .map(|(_, rest)| rest.split_once('/').map(|(_, p)| p).unwrap_or(""))
        .unwrap_or(path);

    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// `true` for `http://` and `https://` URLs; anything else is a local path.
pub fn is_remote_url(location: &str) -> bool {
    let lower = location.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Resolve a local media location: `file://` is stripped and a leading `~`
/// expands to `$HOME`.
pub fn local_media_path(location: &str) -> PathBuf {
    resolve_local_path(location, std::env::var("HOME").ok().as_deref())
}

fn resolve_local_path(location: &str, home: Option<&str>) -> PathBuf {
    let location = location.trim();
    let location = location.strip_prefix("file://").unwrap_or(location);
    match (location.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => PathBuf::from(format!("{}{}", home, rest)),
        _ => PathBuf::from(location),
    }
}

/// Split text into chunks of at most `limit` characters.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || text.is_empty() {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
