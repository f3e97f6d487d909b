//! FFmpeg Integration Module
//!
//! The processing engine behind conversions:
//! - [`ProcessingEngine`], the seam the job controller talks to
//! - [`FFmpegRunner`], its implementation on top of system ffmpeg/ffprobe
//! - [`CommandRecipe`], the fixed argument templates per output kind

mod detection;
mod engine;
mod recipe;
mod runner;

pub use detection::*;
pub use engine::{EngineCommand, EngineEvent, EngineOutcome, ProcessingEngine};
pub use recipe::CommandRecipe;
pub use runner::{parse_progress_line, AudioStreamInfo, FFmpegRunner, MediaInfo, VideoStreamInfo};

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Please install FFmpeg or set its path in the settings.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;
