//! Filesystem helpers for source references.
//!
//! Source references coming from the picker are opaque strings. Staging needs
//! a local path, so only `file://` URIs and absolute paths are accepted here.

use std::path::{Path, PathBuf};

use crate::{CoreError, CoreResult};

const FILE_SCHEME: &str = "file://";

/// Resolves a source reference to a local absolute path.
///
/// Accepts `file://` URIs (percent-decoded, optional `localhost` host) and
/// plain absolute paths. Remote or unknown schemes are rejected.
pub fn resolve_local_source(source_ref: &str) -> CoreResult<PathBuf> {
    let trimmed = source_ref.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidInput("source reference is empty".to_string()));
    }

    let raw = if let Some(rest) = strip_prefix_ignore_case(trimmed, FILE_SCHEME) {
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        let decoded = urlencoding::decode(rest).map_err(|e| {
            CoreError::InvalidInput(format!("source reference is not valid UTF-8: {e}"))
        })?;
        windows_drive_path(&decoded).unwrap_or_else(|| decoded.into_owned())
    } else if trimmed.contains("://") {
        return Err(CoreError::InvalidInput(format!(
            "source reference must be a local file: {trimmed}"
        )));
    } else {
        trimmed.to_string()
    };

    let path = PathBuf::from(raw);
    if !path.is_absolute() {
        return Err(CoreError::InvalidInput(format!(
            "source reference must be an absolute path: {}",
            path.display()
        )));
    }

    Ok(path)
}

/// Builds a `file://` URI for a local path, percent-encoding each segment.
pub fn file_uri(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    let encoded: Vec<String> = text
        .split('/')
        .map(|segment| {
            // Keep a drive letter such as `C:` readable.
            if segment.len() == 2 && segment.ends_with(':') {
                segment.to_string()
            } else {
                urlencoding::encode(segment).into_owned()
            }
        })
        .collect();

    let joined = encoded.join("/");
    if joined.starts_with('/') {
        format!("{FILE_SCHEME}{joined}")
    } else {
        format!("{FILE_SCHEME}/{joined}")
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

/// `/C:/videos/a.mp4` -> `C:/videos/a.mp4` on Windows
fn windows_drive_path(decoded: &str) -> Option<String> {
    if !cfg!(windows) {
        return None;
    }
    let bytes = decoded.as_bytes();
    (bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':')
        .then(|| decoded[1..].to_string())
}
