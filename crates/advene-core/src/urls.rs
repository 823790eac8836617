//! Url helpers: absolutizing package urls, resolving relative references
//! and reading the bytes behind a url.

use std::path::{Path, PathBuf};

use reqwest::Url;
use tracing::debug;

use crate::backend::StorageError;
use crate::error::{Error, Result};

/// True if `s` starts with a scheme (`letters:`), ignoring windows drives
pub fn has_scheme(s: &str) -> bool {
    match s.find(':') {
        Some(pos) if pos > 1 => s[..pos]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
        _ => false,
    }
}

/// Make a package url absolute
///
/// Urls with a scheme are kept verbatim; anything else is a path,
/// resolved against the current directory and turned into a `file:` url.
pub fn absolutize(url: &str) -> Result<String> {
    if has_scheme(url) {
        return Ok(url.to_string());
    }
    let path = Path::new(url);
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(StorageError::Io)?
            .join(path)
    };
    Url::from_file_path(&abs)
        .map(|u| u.to_string())
        .map_err(|_| Error::model(format!("can not make a url from path {:?}", abs)))
}

/// Resolve `reference` relative to `base`
pub fn resolve(base: &str, reference: &str) -> String {
    if has_scheme(reference) {
        return reference.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(reference)) {
        Ok(u) => u.to_string(),
        Err(_) => reference.to_string(),
    }
}

/// Local path behind a `file:` url or a plain path
pub fn to_file_path(url: &str) -> Option<PathBuf> {
    if !has_scheme(url) {
        return Some(PathBuf::from(url));
    }
    Url::parse(url)
        .ok()
        .filter(|u| u.scheme() == "file")
        .and_then(|u| u.to_file_path().ok())
}

/// Read every byte behind `url` (file path, `file:` or `http(s):`)
pub fn read_bytes(url: &str) -> Result<Vec<u8>> {
    if let Some(path) = to_file_path(url) {
        return std::fs::read(&path).map_err(|e| StorageError::from_read(e, path).into());
    }
    if url.starts_with("http:") || url.starts_with("https:") {
        debug!("fetching {}", url);
        let fetch = |source| Error::Fetch {
            url: url.to_string(),
            source,
        };
        let response = reqwest::blocking::get(url)
            .and_then(|r| r.error_for_status())
            .map_err(fetch)?;
        return response.bytes().map(|b| b.to_vec()).map_err(fetch);
    }
    Err(Error::model(format!("unsupported url scheme in {:?}", url)))
}

/// Decode `%XX` escapes; malformed escapes are kept verbatim
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
