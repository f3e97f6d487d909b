//! Naming Utilities
//!
//! Derives filesystem-safe names from opaque source references and builds
//! collision-resistant file names for staged copies and conversion outputs.
//!
//! Naming never fails: when nothing usable can be derived from a reference,
//! the [`UNKNOWN_FILE_NAME`] placeholder is used instead.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::{OutputKind, TimeMs};

/// Placeholder used when a source reference has no usable name
pub const UNKNOWN_FILE_NAME: &str = "Unknown File";

/// Upper bound on timestamp bumps when a generated name is already taken
const MAX_NAME_ATTEMPTS: i64 = 1000;

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]").expect("valid regex"));

/// Base name and extension of a source reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameParts {
    /// Sanitized base name, or the placeholder
    pub name: String,
    /// Extension without the leading dot
    pub extension: Option<String>,
}

/// Replaces whitespace runs and every non `[A-Za-z0-9]` character with `_`.
pub fn sanitize_name(raw: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(raw, "_");
    NON_ALPHANUMERIC.replace_all(&collapsed, "_").into_owned()
}

/// Splits the final path segment of `source_ref` into name and extension.
///
/// The segment is percent-decoded before splitting at the last `.`.
/// An empty reference, an empty final segment or an empty name part all
/// yield [`UNKNOWN_FILE_NAME`].
pub fn split_name_and_extension(source_ref: &str) -> NameParts {
    let segment = source_ref.trim().rsplit('/').next().unwrap_or_default();
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());

    let (stem, extension) = match decoded.rfind('.') {
        Some(idx) => (&decoded[..idx], Some(&decoded[idx + 1..])),
        None => (decoded.as_str(), None),
    };

    let extension = extension
        .map(|e| e.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
        .filter(|e| !e.is_empty());

    let name = if stem.trim().is_empty() {
        UNKNOWN_FILE_NAME.to_string()
    } else {
        sanitize_name(stem)
    };

    NameParts { name, extension }
}

/// Builds `{name}_{timestamp}.{extension}` (no extension: `{name}_{timestamp}`).
///
/// The name is sanitized again so callers may pass the placeholder directly.
pub fn unique_output_name(name: &str, extension: Option<&str>, timestamp: TimeMs) -> String {
    let name = sanitize_name(name);
    match extension.filter(|e| !e.is_empty()) {
        Some(ext) => format!("{}_{}.{}", name, timestamp, ext),
        None => format!("{}_{}", name, timestamp),
    }
}

/// Name of a conversion output for `kind`.
///
/// `AudioVideo` keeps the source container (`mp4` if unknown), `AudioOnly`
/// always produces `mp3`.
pub fn output_file_name(parts: &NameParts, kind: OutputKind, timestamp: TimeMs) -> String {
    let stem = format!("{}_{}", parts.name, kind.name_suffix());
    let extension = kind.extension(parts.extension.as_deref());
    unique_output_name(&stem, Some(&extension), timestamp)
}

/// Current wall clock in milliseconds since the Unix epoch
pub fn now_millis() -> TimeMs {
    chrono::Utc::now().timestamp_millis()
}

/// Picks a path in `dir` that does not exist yet.
///
/// `build` maps a timestamp to a file name; the timestamp is bumped by one
/// millisecond while the candidate is taken.
pub async fn unique_path_in(
    dir: &Path,
    timestamp: TimeMs,
    build: impl Fn(TimeMs) -> String,
) -> std::io::Result<PathBuf> {
    for offset in 0..MAX_NAME_ATTEMPTS {
        let candidate = dir.join(build(timestamp + offset));
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free file name in {}", dir.display()),
    ))
}
