//! vidshift command line shell
//!
//! Picks files from the command line, converts the first one and exports the
//! result the way the configured platform would.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use vidshift_core::batch::MediaBatch;
use vidshift_core::export::{ExportCoordinator, ExportDestination, LocalStorageExporter};
use vidshift_core::ffmpeg::{FFmpegInfo, FFmpegRunner, ProcessingEngine};
use vidshift_core::jobs::{ConversionJob, JobController, JobControllerConfig, JobEvent, JobProgress};
use vidshift_core::picker::{ingest_pick, PathPicker};
use vidshift_core::settings::{default_log_dir, AppSettings, ExportTarget, SettingsManager};
use vidshift_core::{CoreError, OutputKind, UserAction};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser)]
#[command(name = "vidshift")]
#[command(about = "Pitch-shift the audio of a video, or extract it as MP3")]
struct Cli {
    /// Settings directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add files to the batch and convert the first one
    Convert {
        /// Media files to add
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// audio-video or audio-only (defaults to the configured kind)
        #[arg(long, value_parser = parse_output_kind)]
        kind: Option<OutputKind>,

        /// Export target (defaults to the configured target)
        #[arg(long, value_enum)]
        export: Option<ExportArg>,

        /// Leave the artifact in the output directory
        #[arg(long, conflicts_with = "export")]
        no_export: bool,
    },
    /// Show what ffprobe reports for a file
    Probe { file: PathBuf },
    /// Inspect or reset the settings file
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the effective settings
    Show,
    /// Print the settings file location
    Path,
    /// Restore defaults
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportArg {
    Gallery,
    Share,
}

impl From<ExportArg> for ExportTarget {
    fn from(arg: ExportArg) -> Self {
        match arg {
            ExportArg::Gallery => ExportTarget::Gallery,
            ExportArg::Share => ExportTarget::Share,
        }
    }
}

fn parse_output_kind(value: &str) -> Result<OutputKind, String> {
    OutputKind::parse(value).ok_or_else(|| format!("unknown output kind: {value}"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConvertReport<'a> {
    job: &'a ConversionJob,
    #[serde(skip_serializing_if = "Option::is_none")]
    export: Option<&'a ExportDestination>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let manager = match &cli.config_dir {
        Some(dir) => SettingsManager::new(dir.clone()),
        None => SettingsManager::with_default_location(),
    };

    match cli.command {
        Commands::Convert {
            files,
            kind,
            export,
            no_export,
        } => {
            let settings = manager.load();
            let kind = kind.unwrap_or_else(|| settings.conversion.output_kind());
            let target = (!no_export).then(|| {
                export
                    .map(ExportTarget::from)
                    .unwrap_or_else(|| settings.export.target())
            });
            convert(&settings, &files, kind, target, cli.json).await
        }
        Commands::Probe { file } => probe(&manager.load(), &file, cli.json).await,
        Commands::Settings { action } => settings_command(&manager, action, cli.json),
    }
}

/// Terminal gets warnings unless `RUST_LOG` says otherwise; the daily log
/// file always records info and above.
fn init_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let log_dir = default_log_dir();
    let file_layer = std::fs::create_dir_all(&log_dir).ok().map(|_| {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "vidshift.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(EnvFilter::new("info"))
    });

    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let subscriber = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn detect_engine(settings: &AppSettings) -> anyhow::Result<FFmpegRunner> {
    let info = FFmpegInfo::detect(settings.conversion.ffmpeg_dir.as_deref())
        .context("ffmpeg and ffprobe are required")?;
    Ok(FFmpegRunner::new(info))
}

async fn convert(
    settings: &AppSettings,
    files: &[PathBuf],
    kind: OutputKind,
    target: Option<ExportTarget>,
    json: bool,
) -> anyhow::Result<()> {
    let mut batch = MediaBatch::new();
    let pick = PathPicker::new(files.iter().cloned()).pick()?;
    let added = ingest_pick(&mut batch, pick)?;
    if added.duplicates > 0 && !json {
        eprintln!("{} files were already added", added.duplicates);
    }
    if batch.len() > 1 && !json {
        eprintln!("{} files selected, converting the first", batch.len());
    }

    let engine: Arc<dyn ProcessingEngine> = Arc::new(detect_engine(settings)?);
    let controller = JobController::new(engine, JobControllerConfig::from_settings(settings));
    let mut handle = controller.start_primary(&batch, kind)?;

    let mut progress = ProgressLine::new(!json);
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => progress.render(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if handle.cancel() {
                    progress.finish();
                    eprintln!("Cancelling...");
                }
            }
        }
    }
    progress.finish();

    let job = handle.wait().await;
    if let Some(reason) = job.failure_reason.clone() {
        if json {
            print_json(&ConvertReport { job: &job, export: None })?;
        }
        bail!("conversion {reason}");
    }

    let destination = match target {
        Some(target) => {
            let exporter = Arc::new(LocalStorageExporter::from_settings(&settings.storage));
            let coordinator =
                ExportCoordinator::new(exporter, target, settings.storage.album_name.clone());
            match coordinator.export_job(&job).await {
                Ok(destination) => Some(destination),
                Err(e) => {
                    if let Some(artifact) = job.artifact() {
                        eprintln!("Converted file kept at {}", artifact.display());
                    }
                    report_export_failure(&e);
                    return Err(e.into());
                }
            }
        }
        None => None,
    };

    if json {
        print_json(&ConvertReport {
            job: &job,
            export: destination.as_ref(),
        })?;
    } else {
        match (&destination, job.artifact()) {
            (Some(ExportDestination::Album(path)), _) => println!("Saved to {}", path.display()),
            (Some(ExportDestination::Shared(path)), _) => {
                println!("Ready to share: {}", path.display())
            }
            (None, Some(artifact)) => println!("Converted: {}", artifact.display()),
            (None, None) => {}
        }
    }

    Ok(())
}

fn report_export_failure(error: &CoreError) {
    match error.user_action() {
        UserAction::Retry => eprintln!("{error}. Run the command again to retry."),
        UserAction::OpenSettings => {
            eprintln!("{error}. Grant access in the system settings, then try again.")
        }
        UserAction::None => eprintln!("{error}"),
    }
}

async fn probe(settings: &AppSettings, file: &Path, json: bool) -> anyhow::Result<()> {
    let engine = detect_engine(settings)?;
    let info = engine
        .probe(file)
        .await
        .with_context(|| format!("cannot probe {}", file.display()))?;

    if json {
        return print_json(&info);
    }

    println!("Format:   {}", info.format);
    match info.duration_ms() {
        Some(ms) => println!("Duration: {:.2}s", ms as f64 / 1000.0),
        None => println!("Duration: unknown"),
    }
    if let Some(video) = &info.video {
        println!(
            "Video:    {} {}x{} @ {:.2} fps",
            video.codec, video.width, video.height, video.fps
        );
    }
    if let Some(audio) = &info.audio {
        println!(
            "Audio:    {} {} Hz, {} ch",
            audio.codec, audio.sample_rate, audio.channels
        );
    }
    Ok(())
}

fn settings_command(
    manager: &SettingsManager,
    action: SettingsAction,
    json: bool,
) -> anyhow::Result<()> {
    match action {
        SettingsAction::Show => print_json(&manager.load()),
        SettingsAction::Path => {
            if json {
                print_json(&serde_json::json!({ "path": manager.settings_path() }))
            } else {
                println!("{}", manager.settings_path().display());
                Ok(())
            }
        }
        SettingsAction::Reset => {
            let settings = manager.reset()?;
            if json {
                print_json(&settings)
            } else {
                println!("Settings reset: {}", manager.settings_path().display());
                Ok(())
            }
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Single status line redrawn in place on stderr
struct ProgressLine {
    enabled: bool,
    dirty: bool,
}

impl ProgressLine {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            dirty: false,
        }
    }

    fn render(&mut self, event: &JobEvent) {
        if !self.enabled {
            return;
        }
        let text = match event {
            JobEvent::Staging { .. } => "Preparing...".to_string(),
            JobEvent::Processing { .. } | JobEvent::Progress(JobProgress::Indeterminate) => {
                "Converting...".to_string()
            }
            JobEvent::Progress(JobProgress::Percent(p)) => format!("Converting... {p:5.1}%"),
            JobEvent::Succeeded { .. } => "Converting... done".to_string(),
            JobEvent::Failed(reason) => format!("Conversion {reason}"),
        };

        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r\x1b[2K{text}");
        let _ = stderr.flush();
        self.dirty = true;
    }

    fn finish(&mut self) {
        if self.dirty {
            eprintln!();
            self.dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_convert_arguments() {
        let cli = Cli::parse_from([
            "vidshift",
            "convert",
            "a.mov",
            "b.mov",
            "--kind",
            "audio-only",
            "--export",
            "share",
        ]);

        match cli.command {
            Commands::Convert {
                files,
                kind,
                export,
                no_export,
            } => {
                assert_eq!(files.len(), 2);
                assert_eq!(kind, Some(OutputKind::AudioOnly));
                assert!(matches!(export, Some(ExportArg::Share)));
                assert!(!no_export);
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(Cli::try_parse_from(["vidshift", "convert", "a.mov", "--kind", "gif"]).is_err());
        assert!(
            Cli::try_parse_from(["vidshift", "convert", "a.mov", "--export", "share", "--no-export"])
                .is_err()
        );
    }
}
