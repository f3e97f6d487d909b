//! Processing engine contract.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{FFmpegResult, MediaInfo};
use crate::TimeMs;

/// Opaque instruction for the engine: the argument list after the binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineCommand {
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arg in &self.args {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"') {
                write!(f, "\"{}\"", arg.replace('"', "\\\""))?;
            } else {
                f.write_str(arg)?;
            }
        }
        Ok(())
    }
}

/// Notification emitted while a command runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// Diagnostic output line
    Log(String),
    /// Position reached in the input
    Progress { elapsed_ms: TimeMs },
}

/// Terminal result of a command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOutcome {
    /// Process exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Tail of the diagnostic output
    pub diagnostics: String,
}

impl EngineOutcome {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            diagnostics: String::new(),
        }
    }

    pub fn failure(exit_code: Option<i32>, diagnostics: impl Into<String>) -> Self {
        Self {
            exit_code,
            diagnostics: diagnostics.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Media-processing engine.
///
/// `execute` runs until the command finishes. Progress and log lines are
/// pushed to `events` from whatever task the engine reads them on; they may
/// still arrive after the future was dropped.
#[async_trait]
pub trait ProcessingEngine: Send + Sync {
    /// Inspects a media file
    async fn probe(&self, input: &Path) -> FFmpegResult<MediaInfo>;

    /// Runs a command to completion
    async fn execute(
        &self,
        command: &EngineCommand,
        events: mpsc::Sender<EngineEvent>,
    ) -> FFmpegResult<EngineOutcome>;
}
