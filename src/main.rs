//! FrameVis-RS - Main Entry Point
//!
//! Command line front end: acquire frames from a device, replay a CSV
//! capture, or validate a project file.

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use framevis_rs::{
    config::AppConfig,
    export::{ConsoleExport, CsvExport, FrameSink},
    frame::OperationMode,
    project::{IndexBase, Project},
    replay::{CsvPlayer, Pacing},
    session::{FramePipeline, Session, SessionConfig, SessionMessage, Source},
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "framevis", version, about = "Telemetry frame acquisition and replay")]
struct Cli {
    /// Also write a daily rolling log file to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Project dataset indices start at 1 (Serial Studio project files)
    #[arg(long, global = true)]
    one_based_indices: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Acquire frames from the configured transport
    Connect {
        /// Application config (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Project file; Quick Plot mode when omitted
        #[arg(long)]
        project: Option<PathBuf>,
        /// The device sends self-describing JSON frames
        #[arg(long, conflicts_with = "project")]
        json: bool,
    },
    /// Replay a CSV capture
    Replay {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        project: Option<PathBuf>,
        /// CSV file to replay
        #[arg(long)]
        csv: PathBuf,
        /// Fixed delay between rows
        #[arg(long, conflicts_with = "timestamp_column")]
        interval_ms: Option<u64>,
        /// Pace rows by this date/time column
        #[arg(long)]
        timestamp_column: Option<String>,
    },
    /// Load a project and validate its frame parser
    Validate {
        #[arg(long)]
        project: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;
    let index_base = if cli.one_based_indices {
        IndexBase::One
    } else {
        IndexBase::Zero
    };

    match cli.command {
        Command::Connect {
            config,
            project,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if json {
                config.reader.operation_mode = OperationMode::DeviceSendsJson;
            }
            let (session_config, title) =
                session_config(&config, project.as_deref(), index_base)?;
            let sinks = build_sinks(&config, &title)?;
            let session = Session::start(
                session_config,
                Source::Transport(config.transport.clone()),
                sinks,
            )
            .context("Failed to start session")?;
            run_until_stopped(session)
        }
        Command::Replay {
            config,
            project,
            csv,
            interval_ms,
            timestamp_column,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(interval_ms) = interval_ms {
                config.replay.interval_ms = interval_ms;
                config.replay.timestamp_column = None;
            }
            if timestamp_column.is_some() {
                config.replay.timestamp_column = timestamp_column;
            }

            let replay_config = config.replay.to_replay_config();
            if let Pacing::FixedInterval(interval) = replay_config.pacing {
                tracing::info!("Replaying {:?} every {:?}", csv, interval);
            } else {
                tracing::info!("Replaying {:?} paced by its date/time column", csv);
            }
            let player = CsvPlayer::open(&csv, replay_config)
                .with_context(|| format!("Failed to open {:?}", csv))?;

            // Replayed rows are already split; there is no JSON to read
            if config.reader.operation_mode == OperationMode::DeviceSendsJson {
                tracing::warn!("Device JSON mode does not apply to replay");
                config.reader.operation_mode = OperationMode::ProjectFile;
            }
            let (session_config, title) =
                session_config(&config, project.as_deref(), index_base)?;
            let sinks = build_sinks(&config, &title)?;
            let session = Session::start(session_config, Source::Replay(player), sinks)
                .context("Failed to start replay")?;
            run_until_stopped(session)
        }
        Command::Validate { project } => validate(&project, index_base),
    }
}

/// Install the tracing subscriber; the guard must live until exit
fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,framevis_rs=debug"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "framevis.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => Ok(AppConfig::load(path)?),
        None => Ok(AppConfig::default()),
    }
}

/// Session settings and export title for the optional project
fn session_config(
    config: &AppConfig,
    project: Option<&Path>,
    index_base: IndexBase,
) -> anyhow::Result<(SessionConfig, String)> {
    match project {
        Some(path) => {
            let project = Arc::new(Project::load_with_base(path, index_base)?);
            let title = project.title.clone();
            Ok((config.session_config(project), title))
        }
        None if config.reader.operation_mode == OperationMode::DeviceSendsJson => {
            tracing::info!("Reading JSON frames from the device");
            let session_config = SessionConfig {
                max_buffer_size: config.reader.max_buffer_size,
                ..SessionConfig::device_json()
            };
            Ok((session_config, "Device JSON".to_string()))
        }
        None => {
            tracing::info!("No project given, using Quick Plot mode");
            let mut session_config = config.session_config(Arc::new(Project::quick_plot(0)));
            session_config.operation_mode = OperationMode::QuickPlot;
            Ok((session_config, "Quick Plot".to_string()))
        }
    }
}

fn build_sinks(config: &AppConfig, title: &str) -> anyhow::Result<Vec<Box<dyn FrameSink>>> {
    let mut sinks: Vec<Box<dyn FrameSink>> = Vec::new();

    if config.export.console_enabled {
        sinks.push(Box::new(
            ConsoleExport::new(config.export.console_mode)
                .with_timestamps(config.export.console_timestamps)
                .with_echo(true),
        ));
    }

    if config.export.csv_enabled {
        let export = CsvExport::in_directory(config.export.csv_directory(), title, Local::now())?;
        sinks.push(Box::new(export));
    }

    Ok(sinks)
}

/// Pump session messages until the session ends or Ctrl+C is pressed
fn run_until_stopped(mut session: Session) -> anyhow::Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::Release))
        .context("Failed to install Ctrl+C handler")?;

    tracing::info!("Running {} (Ctrl+C to stop)", session.description());
    let mut frames = 0u64;

    loop {
        if interrupted.load(Ordering::Acquire) {
            tracing::info!("Interrupted, stopping session");
            session.stop();
        }

        let Some(msg) = session.recv_timeout(Duration::from_millis(200)) else {
            if !session.is_running() && session.messages().is_empty() {
                break;
            }
            continue;
        };

        match msg {
            SessionMessage::Frame(_) => frames += 1,
            SessionMessage::TransportError(e) => tracing::error!("Transport error: {}", e),
            SessionMessage::WriteError(e) => tracing::warn!("Write failed: {}", e),
            SessionMessage::Stats(stats) => tracing::debug!(
                "{} frames, {} dropped, {:.1} frames/s",
                stats.frames_published,
                stats.dropped_frames,
                stats.effective_frame_rate
            ),
            SessionMessage::Stopped => break,
        }
    }

    session.stop();
    tracing::info!("Received {} frames", frames);
    Ok(())
}

fn validate(path: &Path, index_base: IndexBase) -> anyhow::Result<()> {
    let project = Arc::new(Project::load_with_base(path, index_base)?);
    let pipeline = FramePipeline::new(&SessionConfig::new(Arc::clone(&project)))
        .with_context(|| format!("Project {:?} is not valid", path))?;

    let parser = if !pipeline.engine().has_script() {
        format!("split on '{}'", project.separator())
    } else if pipeline.engine().is_legacy() {
        "script (legacy parse(frame, separator))".to_string()
    } else {
        "script".to_string()
    };

    println!(
        "{}: {} groups, {} datasets, {} fields per frame, {}, {} actions",
        project.title,
        project.groups.len(),
        project.dataset_count(),
        pipeline.builder().layout().required_fields(),
        parser,
        project.actions.len()
    );
    Ok(())
}
