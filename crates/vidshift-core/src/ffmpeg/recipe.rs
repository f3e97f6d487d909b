//! Command recipes
//!
//! Deterministic `{input, output} -> args` templates, one per output kind.

use std::path::Path;

use super::EngineCommand;
use crate::settings::ConversionSettings;
use crate::OutputKind;

/// Fixed encoding recipe shared by all conversions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRecipe {
    /// Audio filter graph applied in both kinds
    pub audio_filter: String,
    /// Video codec for `AudioVideo` (`copy` keeps the stream untouched)
    pub video_codec: String,
    /// Audio codec for `AudioVideo`
    pub audio_codec: String,
    /// Audio bitrate for `AudioVideo`
    pub audio_bitrate: String,
    /// LAME VBR quality for `AudioOnly` (0 best, 9 worst)
    pub mp3_quality: u8,
}

impl Default for CommandRecipe {
    fn default() -> Self {
        Self::from_settings(&ConversionSettings::default())
    }
}

impl CommandRecipe {
    pub fn from_settings(settings: &ConversionSettings) -> Self {
        Self {
            audio_filter: settings.audio_filter.clone(),
            video_codec: settings.video_codec.clone(),
            audio_codec: settings.audio_codec.clone(),
            audio_bitrate: settings.audio_bitrate.clone(),
            mp3_quality: settings.mp3_quality,
        }
    }

    /// Builds the engine command for `kind`
    pub fn build(&self, kind: OutputKind, input: &Path, output: &Path) -> EngineCommand {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];

        match kind {
            OutputKind::AudioVideo => {
                args.extend([
                    "-map".to_string(),
                    "0:v?".to_string(),
                    "-map".to_string(),
                    "0:a?".to_string(),
                    "-c:v".to_string(),
                    self.video_codec.clone(),
                    "-af".to_string(),
                    self.audio_filter.clone(),
                    "-c:a".to_string(),
                    self.audio_codec.clone(),
                    "-b:a".to_string(),
                    self.audio_bitrate.clone(),
                ]);
            }
            OutputKind::AudioOnly => {
                args.extend([
                    "-vn".to_string(),
                    "-af".to_string(),
                    self.audio_filter.clone(),
                    "-c:a".to_string(),
                    "libmp3lame".to_string(),
                    "-q:a".to_string(),
                    self.mp3_quality.to_string(),
                ]);
            }
        }

        args.push(output.to_string_lossy().to_string());
        EngineCommand::new(args)
    }
}
