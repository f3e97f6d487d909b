//! Settings Persistence
//!
//! Persistent application settings with:
//! - Atomic file writes (temp file + rename)
//! - Serde defaults for every field, so partial files load
//! - Normalization of out-of-range values instead of hard failures
//!
//! Storage location: {config_dir}/vidshift/settings.json

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{CoreResult, OutputKind};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Directory name used under the platform data/cache/config dirs
const APP_DIR: &str = "vidshift";

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Working and output locations
    #[serde(default)]
    pub storage: StorageSettings,

    /// Conversion recipe
    #[serde(default)]
    pub conversion: ConversionSettings,

    /// Export behaviour
    #[serde(default)]
    pub export: ExportSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            storage: StorageSettings::default(),
            conversion: ConversionSettings::default(),
            export: ExportSettings::default(),
        }
    }
}

impl AppSettings {
    /// Corrects bad values in place so persisted state is always usable.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        let album = self.storage.album_name.trim();
        if album.is_empty() || album.contains(['/', '\\']) || album == "." || album == ".." {
            self.storage.album_name = default_album_name();
        } else {
            self.storage.album_name = album.to_string();
        }

        if self.conversion.audio_filter.trim().is_empty() {
            self.conversion.audio_filter = default_audio_filter();
        }
        if self.conversion.video_codec.trim().is_empty() {
            self.conversion.video_codec = default_video_codec();
        }
        if self.conversion.audio_codec.trim().is_empty() {
            self.conversion.audio_codec = default_audio_codec();
        }
        if !is_bitrate(&self.conversion.audio_bitrate) {
            self.conversion.audio_bitrate = default_audio_bitrate();
        }
        self.conversion.mp3_quality = self.conversion.mp3_quality.min(9);
        self.conversion.default_output_kind = normalize_enum(
            &self.conversion.default_output_kind,
            &["audio-video", "audio-only"],
            default_output_kind(),
        );

        self.export.target = normalize_enum(
            &self.export.target,
            &["gallery", "share"],
            default_export_target(),
        );
    }
}

fn normalize_enum(value: &str, allowed: &[&str], fallback: String) -> String {
    let v = value.trim().to_ascii_lowercase();
    if allowed.contains(&v.as_str()) {
        v
    } else {
        fallback
    }
}

/// `192k`, `128K`, `320000`
fn is_bitrate(value: &str) -> bool {
    let digits = value
        .strip_suffix(['k', 'K'])
        .unwrap_or(value);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(std::env::temp_dir).join(APP_DIR)
}

/// Directory for rolling log files
pub fn default_log_dir() -> PathBuf {
    app_dir(dirs::data_local_dir()).join("logs")
}

// =============================================================================
// Storage
// =============================================================================

/// Working and output locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    /// Where sources are staged before processing
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Where conversion outputs are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Root of the user-visible gallery; albums are sub-directories
    #[serde(default = "default_gallery_root")]
    pub gallery_root: PathBuf,

    /// Album artifacts are saved into
    #[serde(default = "default_album_name")]
    pub album_name: String,

    /// Hand-off directory used by the share path
    #[serde(default = "default_share_dir")]
    pub share_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            output_dir: default_output_dir(),
            gallery_root: default_gallery_root(),
            album_name: default_album_name(),
            share_dir: default_share_dir(),
        }
    }
}

fn default_scratch_dir() -> PathBuf {
    app_dir(dirs::cache_dir()).join("staging")
}

fn default_output_dir() -> PathBuf {
    app_dir(dirs::data_local_dir()).join("outputs")
}

fn default_gallery_root() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| app_dir(dirs::data_local_dir()).join("gallery"))
}

fn default_album_name() -> String {
    "vidshift".to_string()
}

fn default_share_dir() -> PathBuf {
    app_dir(dirs::cache_dir()).join("share")
}

// =============================================================================
// Conversion
// =============================================================================

/// Encoding recipe parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSettings {
    /// ffmpeg audio filter graph applied to every conversion
    #[serde(default = "default_audio_filter")]
    pub audio_filter: String,

    /// Video codec for audio/video outputs
    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    /// Audio codec for audio/video outputs
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate for audio/video outputs
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// MP3 VBR quality for audio-only outputs (0-9)
    #[serde(default = "default_mp3_quality")]
    pub mp3_quality: u8,

    /// Output kind used when none is requested (audio-video, audio-only)
    #[serde(default = "default_output_kind")]
    pub default_output_kind: String,

    /// Directory holding ffmpeg and ffprobe, searched before the system paths
    #[serde(default)]
    pub ffmpeg_dir: Option<PathBuf>,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            audio_filter: default_audio_filter(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            mp3_quality: default_mp3_quality(),
            default_output_kind: default_output_kind(),
            ffmpeg_dir: None,
        }
    }
}

impl ConversionSettings {
    pub fn output_kind(&self) -> OutputKind {
        OutputKind::parse(&self.default_output_kind).unwrap_or_default()
    }
}

fn default_audio_filter() -> String {
    // Pitch up a major third while keeping the original tempo.
    "asetrate=44100*1.25,aresample=44100,atempo=0.8".to_string()
}

fn default_video_codec() -> String {
    "copy".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

fn default_mp3_quality() -> u8 {
    2
}

fn default_output_kind() -> String {
    "audio-video".to_string()
}

// =============================================================================
// Export
// =============================================================================

/// Where finished artifacts go
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportTarget {
    /// Album in the media gallery, permission gated
    Gallery,
    /// System share mechanism, no permission gate
    Share,
}

/// Export behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    /// gallery or share
    #[serde(default = "default_export_target")]
    pub target: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            target: default_export_target(),
        }
    }
}

impl ExportSettings {
    pub fn target(&self) -> ExportTarget {
        match self.target.as_str() {
            "share" => ExportTarget::Share,
            _ => ExportTarget::Gallery,
        }
    }
}

fn default_export_target() -> String {
    "gallery".to_string()
}

// =============================================================================
// Settings Manager
// =============================================================================

/// Loads, saves and resets settings on disk
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a manager storing settings in `config_dir`
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            settings_path: config_dir.join(SETTINGS_FILE),
        }
    }

    /// Manager for the platform config directory
    pub fn with_default_location() -> Self {
        Self::new(app_dir(dirs::config_dir()))
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if missing or unreadable
    pub fn load(&self) -> AppSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(AppSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings = serde_json::from_str::<AppSettings>(&content)?;

            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
                settings = migrate(settings);
            }

            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                AppSettings::default()
            }
        }
    }

    /// Save settings using atomic write (temp file + rename)
    pub fn save(&self, settings: &AppSettings) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            let content = serde_json::to_string_pretty(&normalized)?;

            let temp_path = self.settings_path.with_extension("json.tmp");
            if temp_path.exists() {
                let _ = fs::remove_file(&temp_path);
            }

            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            drop(file);

            if cfg!(windows) && self.settings_path.exists() {
                // rename does not overwrite on Windows
                fs::remove_file(&self.settings_path)?;
            }
            fs::rename(&temp_path, &self.settings_path)?;

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(AppSettings::default())
        })
    }
}

/// Brings an older schema up to [`SETTINGS_VERSION`]
fn migrate(mut settings: AppSettings) -> AppSettings {
    settings.version = SETTINGS_VERSION;
    settings
}
