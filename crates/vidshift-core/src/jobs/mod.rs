//! Conversion Job Module
//!
//! One conversion attempt, from staging through a terminal state, and the
//! controller that owns it.

mod controller;

pub use controller::*;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::{Generation, JobId, MediaEntry, OutputKind, TimeMs};

// =============================================================================
// Job State
// =============================================================================

/// Lifecycle state of a conversion job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    /// Created, nothing started yet
    #[default]
    Idle,
    /// Copying the source into the scratch area
    Staging,
    /// Engine running
    Processing,
    /// Artifact written to `output_path`
    Succeeded,
    /// Stopped, see `failure_reason`
    Failed,
}

impl JobState {
    /// Checks if the job reached `Succeeded` or `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Why a job failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "camelCase")]
pub enum JobFailure {
    /// Source could not be copied into the scratch area
    StagingFailed(String),
    /// Engine reported a non-success result or could not run
    EngineFailure(String),
    /// Cancelled by the user
    Cancelled,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::StagingFailed(msg) => write!(f, "staging failed: {msg}"),
            JobFailure::EngineFailure(msg) => write!(f, "processing failed: {msg}"),
            JobFailure::Cancelled => f.write_str("cancelled"),
        }
    }
}

// =============================================================================
// Progress
// =============================================================================

/// Reported progress of a processing job
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(tag = "type", content = "percent", rename_all = "camelCase")]
pub enum JobProgress {
    /// Duration unknown, no numeric progress
    #[default]
    Indeterminate,
    /// 0.0 - 100.0
    Percent(f64),
}

impl JobProgress {
    /// Merges a new reading, never moving a numeric value backwards.
    pub fn advance(self, next: JobProgress) -> JobProgress {
        match (self, next) {
            (JobProgress::Percent(prev), JobProgress::Percent(new)) => {
                JobProgress::Percent(prev.max(new))
            }
            (JobProgress::Percent(prev), JobProgress::Indeterminate) => JobProgress::Percent(prev),
            (JobProgress::Indeterminate, next) => next,
        }
    }

    pub fn percent(self) -> Option<f64> {
        match self {
            JobProgress::Percent(p) => Some(p),
            JobProgress::Indeterminate => None,
        }
    }
}

/// Maps elapsed engine time onto `[0, 100]` by linear interpolation.
///
/// Negative or non-finite inputs and a zero duration all give `0`; anything
/// past the duration gives `100`. Never returns NaN or infinity.
pub fn progress_percent(elapsed_ms: f64, duration_ms: f64) -> f64 {
    if !elapsed_ms.is_finite() || !duration_ms.is_finite() || duration_ms <= 0.0 {
        return 0.0;
    }
    let percent = elapsed_ms / duration_ms * 100.0;
    if !percent.is_finite() {
        return 0.0;
    }
    percent.clamp(0.0, 100.0)
}

// =============================================================================
// Conversion Job
// =============================================================================

/// One conversion attempt
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    /// Unique job ID
    pub id: JobId,
    /// Controller generation this job belongs to
    pub generation: Generation,
    /// Entry being converted
    pub source_entry: MediaEntry,
    /// Requested output
    pub output_kind: OutputKind,
    /// Current state
    pub state: JobState,
    /// Working copy, set once staging picked a location
    pub staged_path: Option<PathBuf>,
    /// Artifact location, set on entering `Processing`
    pub output_path: Option<PathBuf>,
    /// Source duration from the probe, if known
    pub duration_ms: Option<TimeMs>,
    /// Progress while processing
    pub progress: JobProgress,
    /// Set only in `Failed`
    pub failure_reason: Option<JobFailure>,
    /// Creation timestamp
    pub created_at: String,
    /// Completion timestamp
    pub completed_at: Option<String>,
}

impl ConversionJob {
    /// Creates a new idle job
    pub fn new(generation: Generation, source_entry: MediaEntry, output_kind: OutputKind) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            generation,
            source_entry,
            output_kind,
            state: JobState::Idle,
            staged_path: None,
            output_path: None,
            duration_ms: None,
            progress: JobProgress::Indeterminate,
            failure_reason: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
        }
    }

    /// Checks if the job is staging or processing (or about to)
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Checks if the job is completed (success or failure)
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Artifact of a succeeded job
    pub fn artifact(&self) -> Option<&PathBuf> {
        match self.state {
            JobState::Succeeded => self.output_path.as_ref(),
            _ => None,
        }
    }

    fn succeed(&mut self) -> JobEvent {
        self.state = JobState::Succeeded;
        self.progress = JobProgress::Percent(100.0);
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
        JobEvent::Succeeded {
            output_path: self.output_path.clone().unwrap_or_default(),
        }
    }

    fn fail(&mut self, reason: JobFailure) -> JobEvent {
        self.state = JobState::Failed;
        self.failure_reason = Some(reason.clone());
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
        JobEvent::Failed(reason)
    }
}

/// Job update pushed to the handle's event stream.
///
/// A stream always ends with exactly one `Succeeded` or `Failed`.
#[derive(Clone, Debug, PartialEq)]
pub enum JobEvent {
    /// Copy into the scratch area started
    Staging { staged_path: PathBuf },
    /// Engine started writing `output_path`
    Processing { output_path: PathBuf },
    /// Progress changed
    Progress(JobProgress),
    /// Artifact ready
    Succeeded { output_path: PathBuf },
    /// Job stopped
    Failed(JobFailure),
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Succeeded { .. } | JobEvent::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_interpolates() {
        assert_eq!(progress_percent(2500.0, 5000.0), 50.0);
        assert_eq!(progress_percent(0.0, 5000.0), 0.0);
        assert_eq!(progress_percent(5000.0, 5000.0), 100.0);
    }

    #[test]
    fn test_progress_clamps() {
        assert_eq!(progress_percent(9000.0, 5000.0), 100.0);
        assert_eq!(progress_percent(-10.0, 5000.0), 0.0);
        assert_eq!(progress_percent(100.0, 0.0), 0.0);
        assert_eq!(progress_percent(100.0, -5.0), 0.0);
        assert_eq!(progress_percent(f64::NAN, 5000.0), 0.0);
        assert_eq!(progress_percent(100.0, f64::INFINITY), 0.0);
        assert_eq!(progress_percent(f64::INFINITY, 5000.0), 0.0);
        assert_eq!(progress_percent(f64::MAX, f64::MIN_POSITIVE), 0.0);
    }

    #[test]
    fn test_progress_is_monotonic_for_increasing_ticks() {
        let duration = 7_321.0;
        let mut progress = JobProgress::Indeterminate;
        let mut last = 0.0;

        for tick in (0..=7_321).step_by(97) {
            progress = progress.advance(JobProgress::Percent(progress_percent(tick as f64, duration)));
            let p = progress.percent().unwrap();
            assert!(p >= last);
            assert!((0.0..=100.0).contains(&p));
            last = p;
        }
    }

    #[test]
    fn test_advance_never_goes_backwards() {
        let p = JobProgress::Percent(60.0);
        assert_eq!(p.advance(JobProgress::Percent(40.0)), JobProgress::Percent(60.0));
        assert_eq!(p.advance(JobProgress::Indeterminate), JobProgress::Percent(60.0));
        assert_eq!(
            JobProgress::Indeterminate.advance(JobProgress::Percent(10.0)),
            JobProgress::Percent(10.0)
        );
    }

    #[test]
    fn test_job_status_checks() {
        let mut job = ConversionJob::new(1, MediaEntry::new("file:///a.mp4"), OutputKind::AudioOnly);
        assert!(job.is_active());
        assert!(job.artifact().is_none());

        job.state = JobState::Processing;
        job.output_path = Some(PathBuf::from("/out/a_audio_1.mp3"));
        assert!(job.artifact().is_none());

        let event = job.succeed();
        assert!(event.is_terminal());
        assert!(job.is_done());
        assert_eq!(job.artifact(), Some(&PathBuf::from("/out/a_audio_1.mp3")));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_failure_serialization() {
        let json = serde_json::to_value(JobFailure::EngineFailure("exit 1".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "engineFailure", "message": "exit 1"}));

        let json = serde_json::to_value(JobFailure::Cancelled).unwrap();
        assert_eq!(json, serde_json::json!({"type": "cancelled"}));
    }
}
