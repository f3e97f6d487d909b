//! vidshift Core Type Definitions
//!
//! Defines fundamental types shared by the batch, job and export modules.

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Opaque locator of an original media item (URI or path)
pub type SourceRef = String;

/// Job unique identifier (ULID)
pub type JobId = String;

/// Monotonic job generation, used to discard stale engine callbacks
pub type Generation = u64;

/// Time in milliseconds
pub type TimeMs = i64;

// =============================================================================
// Media Entry
// =============================================================================

/// A media item selected by the user.
///
/// Two entries with the same `source_ref` are the same entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    /// Locator of the original media
    pub source_ref: SourceRef,
    /// Human-readable name supplied by the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl MediaEntry {
    /// Creates an entry without a display name
    pub fn new(source_ref: impl Into<SourceRef>) -> Self {
        Self {
            source_ref: source_ref.into(),
            display_name: None,
        }
    }

    /// Sets the display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name to show in lists: the display name, else the last path segment.
    pub fn label(&self) -> &str {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name;
        }
        self.source_ref
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.source_ref)
    }
}

// =============================================================================
// Output Kind
// =============================================================================

/// Containers that take AAC audio alongside a copied video stream
const AAC_CONTAINERS: &[&str] = &["mp4", "m4v", "mov", "mkv", "3gp", "3g2", "ts", "mts", "m2ts"];

/// What a conversion produces
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    /// Processed audio with the video stream kept
    #[default]
    AudioVideo,
    /// Processed audio only
    AudioOnly,
}

impl OutputKind {
    /// Infix placed in the output file name
    pub fn name_suffix(self) -> &'static str {
        match self {
            OutputKind::AudioVideo => "modified",
            OutputKind::AudioOnly => "audio",
        }
    }

    /// Output extension, given the source extension.
    ///
    /// `AudioVideo` keeps the source container when it can carry AAC next to
    /// the copied video stream. WebM, Ogg and other unknown containers are
    /// remuxed into Matroska, which holds any of them.
    pub fn extension(self, source_extension: Option<&str>) -> String {
        match self {
            OutputKind::AudioVideo => match source_extension.filter(|e| !e.is_empty()) {
                None => "mp4".to_string(),
                Some(ext) => {
                    let ext = ext.to_ascii_lowercase();
                    if AAC_CONTAINERS.contains(&ext.as_str()) {
                        ext
                    } else {
                        "mkv".to_string()
                    }
                }
            },
            OutputKind::AudioOnly => "mp3".to_string(),
        }
    }

    /// Parses the settings/CLI spelling of the kind
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "audio-video" | "audiovideo" | "video" => Some(OutputKind::AudioVideo),
            "audio-only" | "audioonly" | "audio" => Some(OutputKind::AudioOnly),
            _ => None,
        }
    }
}
