//! Job Controller Module
//!
//! Runs at most one conversion at a time. A job moves through
//! Idle -> Staging -> Processing -> Succeeded | Failed and every update is
//! tagged with the generation of the job it belongs to, so a callback from a
//! cancelled or replaced job never touches the current one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::{progress_percent, ConversionJob, JobEvent, JobFailure, JobProgress, JobState};
use crate::batch::MediaBatch;
use crate::ffmpeg::{
    CommandRecipe, EngineCommand, EngineEvent, EngineOutcome, FFmpegResult, ProcessingEngine,
};
use crate::fs::resolve_local_source;
use crate::naming::{
    now_millis, output_file_name, split_name_and_extension, unique_output_name, unique_path_in,
    NameParts,
};
use crate::settings::AppSettings;
use crate::{CoreError, CoreResult, Generation, JobId, MediaEntry, OutputKind, TimeMs};

/// Buffer between the engine and the job task
const ENGINE_EVENT_BUFFER: usize = 64;

// =============================================================================
// Configuration
// =============================================================================

/// Job controller configuration
#[derive(Clone, Debug)]
pub struct JobControllerConfig {
    /// Where sources are copied before processing
    pub scratch_dir: PathBuf,
    /// Where artifacts are written
    pub output_dir: PathBuf,
    /// Encoding recipe
    pub recipe: CommandRecipe,
}

impl JobControllerConfig {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            scratch_dir: settings.storage.scratch_dir.clone(),
            output_dir: settings.storage.output_dir.clone(),
            recipe: CommandRecipe::from_settings(&settings.conversion),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// A job plus the sender of its event stream
struct JobRecord {
    job: ConversionJob,
    /// Dropped on the terminal transition, which closes the stream
    events: Option<mpsc::UnboundedSender<JobEvent>>,
}

impl JobRecord {
    fn emit(&mut self, event: JobEvent) {
        let terminal = event.is_terminal();
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
        if terminal {
            self.events = None;
        }
    }
}

impl std::fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRecord").field("job", &self.job).finish_non_exhaustive()
    }
}

type JobCell = Arc<Mutex<JobRecord>>;

fn lock_record(cell: &JobCell) -> MutexGuard<'_, JobRecord> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

struct CurrentJob {
    generation: Generation,
    cell: JobCell,
    cancel: Arc<Notify>,
}

#[derive(Default)]
struct ControllerState {
    current: Option<CurrentJob>,
    last_generation: Generation,
}

#[derive(Clone, Default)]
struct SharedState(Arc<Mutex<ControllerState>>);

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to the job of `generation` if it is still current and not
    /// terminal. Returns false when the update was discarded.
    fn update<F>(&self, generation: Generation, f: F) -> bool
    where
        F: FnOnce(&mut ConversionJob) -> Option<JobEvent>,
    {
        let state = self.lock();
        let Some(current) = state.current.as_ref() else {
            return false;
        };
        if current.generation != generation {
            tracing::debug!(
                "Discarding update for generation {} (current {})",
                generation,
                current.generation
            );
            return false;
        }

        let mut record = lock_record(&current.cell);
        if record.job.state.is_terminal() {
            tracing::debug!("Discarding update for finished job {}", record.job.id);
            return false;
        }

        if let Some(event) = f(&mut record.job) {
            record.emit(event);
        }
        true
    }

    fn cancel(&self, generation: Option<Generation>) -> bool {
        let state = self.lock();
        let Some(current) = state.current.as_ref() else {
            return false;
        };
        if generation.is_some_and(|g| g != current.generation) {
            return false;
        }

        let mut record = lock_record(&current.cell);
        if record.job.state.is_terminal() {
            return false;
        }

        tracing::info!("Cancelling job {}", record.job.id);
        let event = record.job.fail(JobFailure::Cancelled);
        record.emit(event);
        current.cancel.notify_one();
        true
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedState")
    }
}

// =============================================================================
// Job Handle
// =============================================================================

/// Handle to a started job
#[derive(Debug)]
pub struct JobHandle {
    /// Job ID
    pub id: JobId,
    /// Generation the job runs under
    pub generation: Generation,
    events: mpsc::UnboundedReceiver<JobEvent>,
    cell: JobCell,
    shared: SharedState,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Next update, `None` once the terminal event was delivered
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Current snapshot of this job
    pub fn snapshot(&self) -> ConversionJob {
        lock_record(&self.cell).job.clone()
    }

    /// Cancels this job if it is still running
    pub fn cancel(&self) -> bool {
        self.shared.cancel(Some(self.generation))
    }

    /// Waits for the job task to finish and returns the final job
    pub async fn wait(self) -> ConversionJob {
        if let Err(e) = self.task.await {
            tracing::error!("Job task {} ended abnormally: {}", self.id, e);
        }
        lock_record(&self.cell).job.clone()
    }
}

// =============================================================================
// Job Controller
// =============================================================================

/// Owns the single in-flight conversion job
pub struct JobController {
    engine: Arc<dyn ProcessingEngine>,
    config: Arc<JobControllerConfig>,
    shared: SharedState,
}

impl JobController {
    /// Creates a controller with no job
    pub fn new(engine: Arc<dyn ProcessingEngine>, config: JobControllerConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            shared: SharedState::default(),
        }
    }

    /// Starts converting `entry`.
    ///
    /// Rejected with `JobAlreadyRunning` while another job is non-terminal.
    /// The job enters `Staging` before this returns.
    pub fn start_job(&self, entry: MediaEntry, kind: OutputKind) -> CoreResult<JobHandle> {
        let mut state = self.shared.lock();
        if let Some(current) = state.current.as_ref() {
            if lock_record(&current.cell).job.is_active() {
                return Err(CoreError::JobAlreadyRunning);
            }
        }

        state.last_generation += 1;
        let generation = state.last_generation;

        let mut job = ConversionJob::new(generation, entry, kind);
        job.state = JobState::Staging;
        let id = job.id.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let cell = Arc::new(Mutex::new(JobRecord {
            job,
            events: Some(tx),
        }));
        let cancel = Arc::new(Notify::new());

        state.current = Some(CurrentJob {
            generation,
            cell: Arc::clone(&cell),
            cancel: Arc::clone(&cancel),
        });
        drop(state);

        tracing::info!("Starting job {} (generation {})", id, generation);

        let run = JobRun {
            generation,
            shared: self.shared.clone(),
            cell: Arc::clone(&cell),
            engine: Arc::clone(&self.engine),
            config: Arc::clone(&self.config),
        };
        let task = tokio::spawn(run.run(cancel));

        Ok(JobHandle {
            id,
            generation,
            events: rx,
            cell,
            shared: self.shared.clone(),
            task,
        })
    }

    /// Starts converting the first entry of `batch`
    pub fn start_primary(&self, batch: &MediaBatch, kind: OutputKind) -> CoreResult<JobHandle> {
        let entry = batch
            .primary()
            .cloned()
            .ok_or_else(|| CoreError::InvalidInput("no media selected".to_string()))?;
        self.start_job(entry, kind)
    }

    /// Snapshot of the most recent job, if any
    pub fn current_job(&self) -> Option<ConversionJob> {
        let state = self.shared.lock();
        state
            .current
            .as_ref()
            .map(|current| lock_record(&current.cell).job.clone())
    }

    /// Cancels the running job. Returns false if nothing was running.
    pub fn cancel(&self) -> bool {
        self.shared.cancel(None)
    }
}

// =============================================================================
// Job Task
// =============================================================================

struct JobRun {
    generation: Generation,
    shared: SharedState,
    cell: JobCell,
    engine: Arc<dyn ProcessingEngine>,
    config: Arc<JobControllerConfig>,
}

/// Fails the job if the task ends without a terminal update, which closes
/// the event stream even when the task panicked.
struct TerminalGuard {
    generation: Generation,
    shared: SharedState,
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let applied = self.shared.update(self.generation, |job| {
            Some(job.fail(JobFailure::EngineFailure(
                "job task ended unexpectedly".to_string(),
            )))
        });
        if applied {
            tracing::error!("Job generation {} ended without a result", self.generation);
        }
    }
}

impl JobRun {
    async fn run(self, cancel: Arc<Notify>) {
        let _guard = TerminalGuard {
            generation: self.generation,
            shared: self.shared.clone(),
        };

        self.drive(&cancel).await;

        let (state, staged, output) = {
            let record = lock_record(&self.cell);
            (
                record.job.state,
                record.job.staged_path.clone(),
                record.job.output_path.clone(),
            )
        };
        if let Some(staged) = staged {
            remove_quietly(&staged).await;
        }
        // Anything short of success leaves no artifact behind, including an
        // engine that finished just as the job was cancelled.
        if state != JobState::Succeeded {
            if let Some(output) = output {
                remove_quietly(&output).await;
            }
        }
    }

    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut ConversionJob) -> Option<JobEvent>,
    {
        self.shared.update(self.generation, f)
    }

    fn fail(&self, reason: JobFailure) {
        let message = reason.to_string();
        if self.update(|job| Some(job.fail(reason))) {
            tracing::warn!("Job generation {} failed: {}", self.generation, message);
        }
    }

    /// Stages, probes and runs the engine. The copy into the scratch area
    /// always runs to completion; a cancel stops the job at the probe or the
    /// engine run, and dropping the engine future kills the process.
    async fn drive(&self, cancel: &Notify) {
        let (entry, kind) = {
            let record = lock_record(&self.cell);
            (record.job.source_entry.clone(), record.job.output_kind)
        };
        let parts = split_name_and_extension(&entry.source_ref);

        let (staged_path, output_path) = match self.stage(&entry, &parts, kind).await {
            Ok(paths) => paths,
            Err(CoreError::StagingFailed(msg)) => {
                self.fail(JobFailure::StagingFailed(msg));
                return;
            }
            Err(e) => {
                self.fail(JobFailure::StagingFailed(e.to_string()));
                return;
            }
        };

        let duration_ms = tokio::select! {
            biased;
            _ = cancel.notified() => {
                tracing::info!("Job generation {} stopped before processing", self.generation);
                return;
            }
            duration_ms = self.probe(&staged_path) => duration_ms,
        };

        let entered = self.update(|job| {
            job.state = JobState::Processing;
            job.duration_ms = duration_ms;
            job.output_path = Some(output_path.clone());
            job.progress = match duration_ms {
                Some(_) => JobProgress::Percent(0.0),
                None => JobProgress::Indeterminate,
            };
            Some(JobEvent::Processing {
                output_path: output_path.clone(),
            })
        });
        if !entered {
            return;
        }

        let command = self.config.recipe.build(kind, &staged_path, &output_path);
        tracing::info!("Processing {} -> {}", staged_path.display(), output_path.display());

        let outcome = tokio::select! {
            biased;
            _ = cancel.notified() => {
                tracing::info!("Job generation {} stopped", self.generation);
                return;
            }
            outcome = self.execute(command, duration_ms) => outcome,
        };

        match outcome {
            Ok(outcome) if outcome.is_success() => {
                tracing::info!("Job generation {} wrote {}", self.generation, output_path.display());
                self.update(|job| Some(job.succeed()));
            }
            Ok(outcome) => {
                let code = outcome
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                let detail = outcome.diagnostics.trim();
                let message = if detail.is_empty() {
                    format!("engine exited with {code}")
                } else {
                    format!("engine exited with {code}: {detail}")
                };
                self.fail(JobFailure::EngineFailure(message));
            }
            Err(e) => {
                self.fail(JobFailure::EngineFailure(e.to_string()));
            }
        }
    }

    /// Copies the source into the scratch area and picks the output path
    async fn stage(
        &self,
        entry: &MediaEntry,
        parts: &NameParts,
        kind: OutputKind,
    ) -> CoreResult<(PathBuf, PathBuf)> {
        let source = resolve_local_source(&entry.source_ref)?;
        let scratch_dir = &self.config.scratch_dir;
        tokio::fs::create_dir_all(scratch_dir).await?;

        let staged_path = unique_path_in(scratch_dir, now_millis(), |ts| {
            unique_output_name(&parts.name, parts.extension.as_deref(), ts)
        })
        .await?;

        let started = self.update(|job| {
            job.staged_path = Some(staged_path.clone());
            Some(JobEvent::Staging {
                staged_path: staged_path.clone(),
            })
        });
        if !started {
            return Err(CoreError::Internal("job is no longer current".to_string()));
        }

        tracing::debug!("Staging {} -> {}", source.display(), staged_path.display());
        tokio::fs::copy(&source, &staged_path).await.map_err(|e| {
            CoreError::StagingFailed(format!("cannot copy {}: {}", source.display(), e))
        })?;

        let output_dir = &self.config.output_dir;
        tokio::fs::create_dir_all(output_dir).await?;
        let output_path = unique_path_in(output_dir, now_millis(), |ts| {
            output_file_name(parts, kind, ts)
        })
        .await?;

        Ok((staged_path, output_path))
    }

    /// Source duration, `None` when the probe fails or reports none
    async fn probe(&self, staged_path: &Path) -> Option<TimeMs> {
        match self.engine.probe(staged_path).await {
            Ok(info) => {
                let duration = info.duration_ms();
                if duration.is_none() {
                    tracing::warn!("Probe of {} reported no duration", staged_path.display());
                }
                duration
            }
            Err(e) => {
                tracing::warn!("Probe of {} failed: {}", staged_path.display(), e);
                None
            }
        }
    }

    /// Runs the engine, applying its progress as it arrives
    async fn execute(
        &self,
        command: EngineCommand,
        duration_ms: Option<TimeMs>,
    ) -> FFmpegResult<EngineOutcome> {
        let (tx, mut rx) = mpsc::channel(ENGINE_EVENT_BUFFER);
        let execution = self.engine.execute(&command, tx);
        tokio::pin!(execution);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => self.on_engine_event(event, duration_ms),
                result = &mut execution => break result,
            }
        };

        // Events queued before the engine returned still count.
        while let Ok(event) = rx.try_recv() {
            self.on_engine_event(event, duration_ms);
        }

        outcome
    }

    fn on_engine_event(&self, event: EngineEvent, duration_ms: Option<TimeMs>) {
        match event {
            EngineEvent::Log(line) => tracing::trace!("engine: {}", line),
            EngineEvent::Progress { elapsed_ms } => {
                self.update(|job| {
                    if job.state != JobState::Processing {
                        return None;
                    }
                    let reading = match duration_ms {
                        Some(duration) => JobProgress::Percent(progress_percent(
                            elapsed_ms as f64,
                            duration as f64,
                        )),
                        None => JobProgress::Indeterminate,
                    };
                    let next = job.progress.advance(reading);
                    if next == job.progress {
                        return None;
                    }
                    job.progress = next;
                    Some(JobEvent::Progress(next))
                });
            }
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::{FFmpegError, MediaInfo};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tempfile::TempDir;

    /// What one `execute` call does
    #[derive(Default)]
    struct Script {
        ticks: Vec<TimeMs>,
        exit_code: i32,
        diagnostics: String,
        /// Blocks until notified before finishing
        gate: Option<Arc<Notify>>,
        /// Progress sent from a detached task once notified
        late: Option<(Arc<Notify>, Vec<TimeMs>)>,
        /// Writes part of the output before waiting on `gate`
        partial_output: bool,
        /// Panics instead of running
        crash: bool,
    }

    struct FakeEngine {
        duration_ms: Option<TimeMs>,
        probe_gate: Option<Arc<Notify>>,
        scripts: Mutex<VecDeque<Script>>,
        commands: Mutex<Vec<EngineCommand>>,
    }

    impl FakeEngine {
        fn new(duration_ms: Option<TimeMs>, scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                duration_ms,
                probe_gate: None,
                scripts: Mutex::new(scripts.into()),
                commands: Mutex::new(Vec::new()),
            })
        }

        /// Engine whose probe blocks until `gate` is notified
        fn with_probe_gate(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                duration_ms: Some(1000),
                probe_gate: Some(gate),
                scripts: Mutex::new(VecDeque::new()),
                commands: Mutex::new(Vec::new()),
            })
        }

        fn executed(&self) -> usize {
            self.commands.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProcessingEngine for FakeEngine {
        async fn probe(&self, _input: &Path) -> FFmpegResult<MediaInfo> {
            if let Some(gate) = &self.probe_gate {
                gate.notified().await;
            }
            match self.duration_ms {
                Some(ms) => Ok(MediaInfo {
                    duration_sec: Some(ms as f64 / 1000.0),
                    video: None,
                    audio: None,
                    format: "mov".to_string(),
                    size_bytes: 0,
                }),
                None => Err(FFmpegError::ProbeError("unreadable".to_string())),
            }
        }

        async fn execute(
            &self,
            command: &EngineCommand,
            events: mpsc::Sender<EngineEvent>,
        ) -> FFmpegResult<EngineOutcome> {
            self.commands.lock().unwrap().push(command.clone());
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            if script.crash {
                panic!("engine crashed");
            }

            if let Some((late_gate, ticks)) = script.late {
                let tx = events.clone();
                tokio::spawn(async move {
                    late_gate.notified().await;
                    for elapsed_ms in ticks {
                        let _ = tx.send(EngineEvent::Progress { elapsed_ms }).await;
                    }
                });
            }

            let _ = events.send(EngineEvent::Log("starting".to_string())).await;
            for elapsed_ms in script.ticks {
                let _ = events.send(EngineEvent::Progress { elapsed_ms }).await;
            }

            if script.partial_output {
                tokio::fs::write(command.args.last().unwrap(), b"half")
                    .await
                    .unwrap();
            }

            if let Some(gate) = script.gate {
                gate.notified().await;
            }

            if script.exit_code == 0 {
                let output = command.args.last().unwrap();
                tokio::fs::write(output, b"artifact").await.unwrap();
                Ok(EngineOutcome::success())
            } else {
                Ok(EngineOutcome::failure(Some(script.exit_code), script.diagnostics))
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        source: MediaEntry,
        config: JobControllerConfig,
    }

    fn fixture(file_name: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let source_path = dir.path().join(file_name);
        std::fs::write(&source_path, b"source bytes").unwrap();

        let config = JobControllerConfig {
            scratch_dir: dir.path().join("scratch"),
            output_dir: dir.path().join("out"),
            recipe: CommandRecipe::default(),
        };

        Fixture {
            source: MediaEntry::new(format!("file://{}", source_path.display())),
            _dir: dir,
            config,
        }
    }

    async fn collect_events(handle: &mut JobHandle) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), handle.next_event())
            .await
            .expect("job stalled")
        {
            events.push(event);
        }
        events
    }

    async fn wait_for_processing(handle: &mut JobHandle) {
        loop {
            match handle.next_event().await {
                Some(JobEvent::Processing { .. }) => return,
                Some(_) => continue,
                None => panic!("job ended before processing"),
            }
        }
    }

    #[tokio::test]
    async fn test_audio_only_conversion() {
        let fx = fixture("Clip One.mov");
        let engine = FakeEngine::new(
            Some(5000),
            vec![Script {
                ticks: vec![2500],
                ..Default::default()
            }],
        );
        let controller = JobController::new(engine.clone(), fx.config.clone());

        let mut handle = controller
            .start_job(fx.source.clone(), OutputKind::AudioOnly)
            .unwrap();
        let events = collect_events(&mut handle).await;

        assert_eq!(events.len(), 4, "{events:?}");

        let JobEvent::Staging { staged_path } = &events[0] else {
            panic!("expected staging, got {:?}", events[0]);
        };
        let staged_name = staged_path.file_name().unwrap().to_string_lossy();
        assert!(staged_name.starts_with("Clip_One_"));
        assert!(staged_name.ends_with(".mov"));
        assert_eq!(staged_path.parent(), Some(fx.config.scratch_dir.as_path()));

        let JobEvent::Processing { output_path } = &events[1] else {
            panic!("expected processing, got {:?}", events[1]);
        };
        let output_name = output_path.file_name().unwrap().to_string_lossy();
        assert!(output_name.starts_with("Clip_One_audio_"));
        assert!(output_name.ends_with(".mp3"));

        assert_eq!(events[2], JobEvent::Progress(JobProgress::Percent(50.0)));
        assert_eq!(
            events[3],
            JobEvent::Succeeded {
                output_path: output_path.clone()
            }
        );

        let job = handle.wait().await;
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.duration_ms, Some(5000));
        assert_eq!(job.artifact(), Some(output_path));
        assert!(output_path.exists());
        assert!(job.failure_reason.is_none());

        // Staged copy is cleaned up once the job ends.
        assert!(!staged_path.exists());

        let commands = engine.commands.lock().unwrap();
        assert!(commands[0].args.contains(&"-vn".to_string()));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let fx = fixture("a.mp4");
        let gate = Arc::new(Notify::new());
        let engine = FakeEngine::new(
            Some(1000),
            vec![
                Script {
                    gate: Some(gate.clone()),
                    ..Default::default()
                },
                Script::default(),
            ],
        );
        let controller = JobController::new(engine, fx.config.clone());

        let mut first = controller
            .start_job(fx.source.clone(), OutputKind::AudioVideo)
            .unwrap();

        // Rejected while still staging.
        assert!(matches!(
            controller.start_job(fx.source.clone(), OutputKind::AudioVideo),
            Err(CoreError::JobAlreadyRunning)
        ));

        wait_for_processing(&mut first).await;
        assert!(matches!(
            controller.start_job(fx.source.clone(), OutputKind::AudioOnly),
            Err(CoreError::JobAlreadyRunning)
        ));
        assert_eq!(first.snapshot().state, JobState::Processing);

        gate.notify_one();
        let job = first.wait().await;
        assert_eq!(job.state, JobState::Succeeded);

        let second = controller
            .start_job(fx.source.clone(), OutputKind::AudioOnly)
            .unwrap();
        assert_eq!(second.generation, job.generation + 1);
        assert_eq!(second.wait().await.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_missing_source_fails_staging() {
        let fx = fixture("a.mp4");
        let engine = FakeEngine::new(Some(1000), vec![]);
        let controller = JobController::new(engine.clone(), fx.config.clone());

        let missing = MediaEntry::new(format!(
            "file://{}",
            fx.config.scratch_dir.with_file_name("gone.mp4").display()
        ));
        let mut handle = controller.start_job(missing, OutputKind::AudioOnly).unwrap();
        let events = collect_events(&mut handle).await;

        assert!(matches!(
            events.last(),
            Some(JobEvent::Failed(JobFailure::StagingFailed(_)))
        ));
        assert!(!events
            .iter()
            .any(|e| matches!(e, JobEvent::Processing { .. })));

        let job = handle.wait().await;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.output_path.is_none());
        assert_eq!(engine.executed(), 0);
    }

    #[tokio::test]
    async fn test_remote_source_fails_staging() {
        let fx = fixture("a.mp4");
        let controller = JobController::new(FakeEngine::new(Some(1000), vec![]), fx.config.clone());

        let handle = controller
            .start_job(MediaEntry::new("https://example.com/a.mp4"), OutputKind::AudioOnly)
            .unwrap();
        let job = handle.wait().await;

        assert!(matches!(job.failure_reason, Some(JobFailure::StagingFailed(_))));
        assert!(job.staged_path.is_none());
    }

    #[tokio::test]
    async fn test_engine_failure_keeps_diagnostics() {
        let fx = fixture("a.mp4");
        let engine = FakeEngine::new(
            Some(1000),
            vec![Script {
                exit_code: 1,
                diagnostics: "Invalid data found when processing input".to_string(),
                ..Default::default()
            }],
        );
        let controller = JobController::new(engine, fx.config.clone());

        let mut handle = controller
            .start_job(fx.source.clone(), OutputKind::AudioVideo)
            .unwrap();
        let events = collect_events(&mut handle).await;
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        let job = handle.wait().await;
        assert_eq!(job.state, JobState::Failed);
        match &job.failure_reason {
            Some(JobFailure::EngineFailure(msg)) => {
                assert!(msg.contains("exited with 1"));
                assert!(msg.contains("Invalid data found"));
            }
            other => panic!("unexpected failure: {other:?}"),
        }
        assert!(job.output_path.is_some());
        assert!(job.artifact().is_none());
    }

    #[tokio::test]
    async fn test_probe_failure_reports_indeterminate_progress() {
        let fx = fixture("a.mp4");
        let engine = FakeEngine::new(
            None,
            vec![Script {
                ticks: vec![1000, 2000],
                ..Default::default()
            }],
        );
        let controller = JobController::new(engine, fx.config.clone());

        let mut handle = controller
            .start_job(fx.source.clone(), OutputKind::AudioVideo)
            .unwrap();

        loop {
            match handle.next_event().await {
                Some(JobEvent::Progress(p)) => panic!("unexpected progress {p:?}"),
                Some(JobEvent::Succeeded { .. }) => break,
                Some(other @ JobEvent::Failed(_)) => panic!("unexpected {other:?}"),
                Some(_) => {}
                None => panic!("stream closed without terminal event"),
            }
        }

        let job = handle.wait().await;
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.duration_ms, None);
    }

    #[tokio::test]
    async fn test_progress_is_clamped_and_monotonic() {
        let fx = fixture("a.mp4");
        let engine = FakeEngine::new(
            Some(5000),
            vec![Script {
                ticks: vec![1000, 3000, 2000, 6000, -5],
                ..Default::default()
            }],
        );
        let controller = JobController::new(engine, fx.config.clone());

        let mut handle = controller
            .start_job(fx.source.clone(), OutputKind::AudioVideo)
            .unwrap();
        let progress: Vec<f64> = collect_events(&mut handle)
            .await
            .into_iter()
            .filter_map(|e| match e {
                JobEvent::Progress(p) => p.percent(),
                _ => None,
            })
            .collect();

        assert_eq!(progress, vec![20.0, 60.0, 100.0]);
    }

    #[tokio::test]
    async fn test_zero_duration_reports_zero() {
        let fx = fixture("a.mp4");
        let engine = FakeEngine::new(
            Some(0),
            vec![Script {
                ticks: vec![500],
                ..Default::default()
            }],
        );
        let controller = JobController::new(engine, fx.config.clone());

        let mut handle = controller
            .start_job(fx.source.clone(), OutputKind::AudioVideo)
            .unwrap();
        let events = collect_events(&mut handle).await;
        assert!(!events.iter().any(|e| matches!(e, JobEvent::Progress(_))));
        assert!(matches!(events.last(), Some(JobEvent::Succeeded { .. })));
    }

    #[tokio::test]
    async fn test_cancel_marks_job_failed() {
        let fx = fixture("a.mp4");
        let gate = Arc::new(Notify::new());
        let engine = FakeEngine::new(
            Some(1000),
            vec![Script {
                gate: Some(gate),
                ..Default::default()
            }],
        );
        let controller = JobController::new(engine, fx.config.clone());

        assert!(!controller.cancel());

        let mut handle = controller
            .start_job(fx.source.clone(), OutputKind::AudioOnly)
            .unwrap();
        wait_for_processing(&mut handle).await;

        assert!(controller.cancel());
        assert!(!controller.cancel());

        let events = collect_events(&mut handle).await;
        assert_eq!(events, vec![JobEvent::Failed(JobFailure::Cancelled)]);

        let current = controller.current_job().unwrap();
        assert_eq!(current.state, JobState::Failed);
        assert_eq!(current.failure_reason, Some(JobFailure::Cancelled));

        let job = handle.wait().await;
        assert_eq!(job.failure_reason, Some(JobFailure::Cancelled));
        assert!(!job.staged_path.unwrap().exists());
    }

    fn files_in(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_cancel_removes_partial_output() {
        let fx = fixture("a.mp4");
        let engine = FakeEngine::new(
            Some(1000),
            vec![Script {
                gate: Some(Arc::new(Notify::new())),
                partial_output: true,
                ..Default::default()
            }],
        );
        let controller = JobController::new(engine, fx.config.clone());

        let mut handle = controller
            .start_job(fx.source.clone(), OutputKind::AudioOnly)
            .unwrap();
        wait_for_processing(&mut handle).await;

        let output = handle.snapshot().output_path.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !output.exists() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("engine never wrote output");

        assert!(handle.cancel());
        let job = handle.wait().await;

        assert_eq!(job.failure_reason, Some(JobFailure::Cancelled));
        assert!(!output.exists());
        assert!(files_in(&fx.config.output_dir).is_empty());
        assert!(files_in(&fx.config.scratch_dir).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_staging_leaves_no_copy() {
        let fx = fixture("Clip One.mov");
        let probe_gate = Arc::new(Notify::new());
        let engine = FakeEngine::with_probe_gate(probe_gate);
        let controller = JobController::new(engine.clone(), fx.config.clone());

        let mut handle = controller
            .start_job(fx.source.clone(), OutputKind::AudioVideo)
            .unwrap();
        match handle.next_event().await {
            Some(JobEvent::Staging { .. }) => {}
            other => panic!("expected staging, got {other:?}"),
        }

        assert!(handle.cancel());
        let events = collect_events(&mut handle).await;
        assert_eq!(events, vec![JobEvent::Failed(JobFailure::Cancelled)]);

        let job = handle.wait().await;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.output_path.is_none());
        assert!(files_in(&fx.config.scratch_dir).is_empty());
        assert!(files_in(&fx.config.output_dir).is_empty());
        assert_eq!(engine.executed(), 0);
    }

    #[tokio::test]
    async fn test_panicking_engine_still_ends_stream() {
        let fx = fixture("a.mp4");
        let engine = FakeEngine::new(
            Some(1000),
            vec![Script {
                crash: true,
                ..Default::default()
            }],
        );
        let controller = JobController::new(engine, fx.config.clone());

        let mut handle = controller
            .start_job(fx.source.clone(), OutputKind::AudioOnly)
            .unwrap();
        let events = collect_events(&mut handle).await;

        assert!(matches!(
            events.last(),
            Some(JobEvent::Failed(JobFailure::EngineFailure(_)))
        ));
        let job = handle.wait().await;
        assert_eq!(job.state, JobState::Failed);

        // The controller is free for the next job.
        assert!(controller
            .start_job(fx.source.clone(), OutputKind::AudioOnly)
            .is_ok());
    }

    #[tokio::test]
    async fn test_late_callbacks_do_not_touch_next_job() {
        let fx = fixture("a.mp4");
        let gate = Arc::new(Notify::new());
        let late_gate = Arc::new(Notify::new());
        let engine = FakeEngine::new(
            Some(10_000),
            vec![
                Script {
                    gate: Some(gate),
                    late: Some((late_gate.clone(), vec![9_000, 10_000])),
                    ..Default::default()
                },
                Script {
                    ticks: vec![1_000],
                    ..Default::default()
                },
            ],
        );
        let controller = JobController::new(engine, fx.config.clone());

        let mut first = controller
            .start_job(fx.source.clone(), OutputKind::AudioOnly)
            .unwrap();
        wait_for_processing(&mut first).await;
        assert!(first.cancel());

        let second = controller
            .start_job(fx.source.clone(), OutputKind::AudioOnly)
            .unwrap();
        let second_generation = second.generation;

        // Old job's engine keeps talking after being replaced.
        late_gate.notify_one();
        let second_job = second.wait().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let first_job = first.wait().await;
        assert_eq!(first_job.failure_reason, Some(JobFailure::Cancelled));
        assert_eq!(first_job.progress, JobProgress::Percent(0.0));

        let current = controller.current_job().unwrap();
        assert_eq!(current.generation, second_generation);
        assert_eq!(current.state, JobState::Succeeded);
        assert_eq!(current.id, second_job.id);
    }

    #[tokio::test]
    async fn test_stale_generation_updates_are_discarded() {
        let fx = fixture("a.mp4");
        let gate = Arc::new(Notify::new());
        let engine = FakeEngine::new(
            Some(1000),
            vec![Script {
                gate: Some(gate.clone()),
                ..Default::default()
            }],
        );
        let controller = JobController::new(engine, fx.config.clone());

        let mut handle = controller
            .start_job(fx.source.clone(), OutputKind::AudioOnly)
            .unwrap();
        wait_for_processing(&mut handle).await;

        let applied = controller.shared.update(handle.generation + 7, |job| {
            job.progress = JobProgress::Percent(99.0);
            None
        });
        assert!(!applied);
        assert_eq!(handle.snapshot().progress, JobProgress::Percent(0.0));

        gate.notify_one();
        assert_eq!(handle.wait().await.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_start_primary_uses_first_entry() {
        let fx = fixture("a.mp4");
        let controller = JobController::new(FakeEngine::new(Some(1000), vec![]), fx.config.clone());

        let mut batch = MediaBatch::new();
        assert!(matches!(
            controller.start_primary(&batch, OutputKind::AudioOnly),
            Err(CoreError::InvalidInput(_))
        ));

        batch.add([fx.source.clone(), MediaEntry::new("file:///b.mp4")]);
        let handle = controller
            .start_primary(&batch, OutputKind::AudioOnly)
            .unwrap();
        let job = handle.wait().await;
        assert_eq!(job.source_entry, fx.source);
        assert_eq!(job.state, JobState::Succeeded);
    }
}
