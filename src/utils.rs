use std::path::{Path, PathBuf};

/// Returns if the source is remote
pub fn is_remote_src(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://")
}

/// Returns if the url carries a scheme or is an absolute path, i.e. needs no base.
pub fn is_absolute_url(url: &str) -> bool {
    url.contains("://") || url.starts_with('/')
}

/// Maps a `file://` url or plain path to a filesystem path.
pub fn local_path(src: &str) -> PathBuf {
    PathBuf::from(src.strip_prefix("file://").unwrap_or(src))
}

/// Directory part of a manifest url, trailing slash kept. Falls back to `./`.
pub fn base_url(manifest_url: &str) -> String {
    match manifest_url.rfind('/') {
        Some(i) => manifest_url[..=i].to_string(),
        None => "./".to_string(),
    }
}

/// `scheme://host[:port]` of a url with a scheme.
pub fn origin(url: &str) -> Option<&str> {
    let host_at = url.find("://")? + 3;
    let end = url[host_at..].find('/').map_or(url.len(), |i| host_at + i);
    Some(&url[..end])
}

/// Resolves `media` against `base` unless it is already absolute.
///
/// Root-relative media keeps the origin of a base that has one.
pub fn resolve_url(base: &str, media: &str) -> String {
    if let (Some((scheme, _)), Some(origin)) = (base.split_once("://"), origin(base)) {
        if media.starts_with("//") {
            return format!("{scheme}:{media}");
        }
        if media.starts_with('/') {
            return format!("{origin}{media}");
        }
    }
    if is_absolute_url(media) {
        return media.to_string();
    }
    if base.is_empty() || base.ends_with('/') {
        format!("{base}{media}")
    } else {
        format!("{base}/{media}")
    }
}

pub fn frame_output_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("frame_{index}.ply"))
}
