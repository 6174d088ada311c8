//! Static file resolution under a configured web root (spec.md §4.E "Path
//! decoding and dispatch", supplemented from the original's MIME table and
//! path-safety checks).

use std::path::{Component, Path, PathBuf};

use crate::error::HttpError;

/// `(extension, mime type)` table, reproduced from the original static file
/// server rather than left as a one-line stub.
const MIME_TABLE: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("ico", "image/x-icon"),
    ("webp", "image/webp"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("wasm", "application/wasm"),
    ("gz", "application/gzip"),
    ("pdf", "application/pdf"),
];

const DEFAULT_MIME: &str = "application/octet-stream";

pub fn mime_for_extension(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    ext.and_then(|ext| MIME_TABLE.iter().find(|(e, _)| *e == ext).map(|(_, m)| *m))
        .unwrap_or(DEFAULT_MIME)
}

/// Resolve a request path to a file under `web_root`, rejecting traversal
/// outside the root and embedded control characters. The caller has
/// already URL-decoded `request_path`.
pub fn resolve(web_root: &Path, request_path: &str) -> Result<PathBuf, HttpError> {
    if request_path.chars().any(|c| c.is_control()) {
        return Err(HttpError::Malformed("control character in path".into()));
    }

    let relative = request_path.trim_start_matches('/');
    let relative = if relative.is_empty() { "index.html" } else { relative };

    let mut resolved = web_root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(HttpError::Malformed("path traversal rejected".into()));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(HttpError::Malformed("absolute path rejected".into()));
            }
        }
    }

    Ok(resolved)
}

/// Maximum bytes read into memory for one static response; larger files are
/// expected to be sliced by the caller across multiple non-blocking sends.
pub const STATIC_CHUNK_SIZE: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_lookup_matches_extension() {
        assert_eq!(mime_for_extension("chart.js"), "application/javascript");
        assert_eq!(mime_for_extension("style.CSS"), "text/css");
        assert_eq!(mime_for_extension("data.bin"), "application/octet-stream");
    }

    #[test]
    fn resolves_within_root() {
        let root = Path::new("/srv/www");
        let resolved = resolve(root, "/assets/app.js").unwrap();
        assert_eq!(resolved, Path::new("/srv/www/assets/app.js"));
    }

    #[test]
    fn rejects_parent_traversal() {
        let root = Path::new("/srv/www");
        assert!(resolve(root, "/../etc/passwd").is_err());
        assert!(resolve(root, "/assets/../../etc/passwd").is_err());
    }

    #[test]
    fn empty_path_serves_index() {
        let root = Path::new("/srv/www");
        let resolved = resolve(root, "/").unwrap();
        assert_eq!(resolved, Path::new("/srv/www/index.html"));
    }
}
