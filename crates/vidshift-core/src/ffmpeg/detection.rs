//! FFmpeg Detection Module
//!
//! Locates the ffmpeg/ffprobe pair: a configured directory first, then common
//! install locations, then `PATH`.

use std::path::{Path, PathBuf};

use super::{FFmpegError, FFmpegResult};

#[cfg(target_os = "windows")]
const FFMPEG_BINARY: &str = "ffmpeg.exe";
#[cfg(not(target_os = "windows"))]
const FFMPEG_BINARY: &str = "ffmpeg";

#[cfg(target_os = "windows")]
const FFPROBE_BINARY: &str = "ffprobe.exe";
#[cfg(not(target_os = "windows"))]
const FFPROBE_BINARY: &str = "ffprobe";

/// Information about a detected FFmpeg installation
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_path: PathBuf,
    /// First line of `ffmpeg -version`
    pub version: String,
}

impl FFmpegInfo {
    /// Detects an installation, preferring `configured_dir` when given.
    pub fn detect(configured_dir: Option<&Path>) -> FFmpegResult<Self> {
        let dir = candidate_dirs(configured_dir)
            .into_iter()
            .find(|dir| dir.join(FFMPEG_BINARY).is_file() && dir.join(FFPROBE_BINARY).is_file())
            .ok_or(FFmpegError::NotFound)?;

        let ffmpeg_path = dir.join(FFMPEG_BINARY);
        let version = read_version(&ffmpeg_path)?;
        tracing::info!("Using {} from {}", version, dir.display());

        Ok(Self {
            ffprobe_path: dir.join(FFPROBE_BINARY),
            ffmpeg_path,
            version,
        })
    }
}

/// Directories searched in order
fn candidate_dirs(configured_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(dir) = configured_dir {
        dirs.push(dir.to_path_buf());
    }

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\ffmpeg\bin"));
        dirs.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));
        if let Ok(userprofile) = std::env::var("USERPROFILE") {
            dirs.push(PathBuf::from(userprofile).join("scoop").join("shims"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/opt/homebrew/bin"));
        dirs.push(PathBuf::from("/usr/local/bin"));
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/bin"));
        dirs.push(PathBuf::from("/usr/local/bin"));
        dirs.push(PathBuf::from("/snap/bin"));
    }

    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }

    dirs
}

fn read_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let output = std::process::Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(FFmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(format!(
            "{} -version exited with {}",
            ffmpeg_path.display(),
            output.status
        )));
    }

    Ok(parse_version_line(&String::from_utf8_lossy(&output.stdout)))
}

/// Extracts `ffmpeg version X` from the first line of `-version` output
fn parse_version_line(stdout: &str) -> String {
    stdout
        .lines()
        .next()
        .map(|line| {
            line.split(" Copyright")
                .next()
                .unwrap_or(line)
                .trim()
                .to_string()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "ffmpeg (unknown version)".to_string())
}
