//! Acquisition and replay sessions
//!
//! A [`Session`] connects one source (a live transport or a CSV replay) to
//! the frame pipeline and a set of sinks. It runs on two threads and talks
//! to its owner through crossbeam channels:
//!
//! - [`SessionCommand`] - Messages sent to the session (write, pause, seek, stop)
//! - [`SessionMessage`] - Messages sent by the session (frames, errors, stats)
//!
//! [`SessionManager`] keeps at most one session alive and tears the previous
//! one down completely before the next one starts.
//!
//! # Example
//!
//! ```ignore
//! use framevis_rs::session::{Session, SessionConfig, SessionMessage, Source};
//!
//! let project = Arc::new(Project::load("station.json")?);
//! let mut session = Session::start(
//!     SessionConfig::new(project),
//!     Source::Transport(transport_config),
//!     vec![Box::new(ConsoleExport::default())],
//! )?;
//!
//! while let Some(msg) = session.recv_timeout(Duration::from_secs(1)) {
//!     match msg {
//!         SessionMessage::Frame(frame) => println!("{} values", frame.len()),
//!         SessionMessage::Stopped => break,
//!         _ => {}
//!     }
//! }
//! session.stop();
//! ```

pub mod actions;
pub mod pipeline;
pub mod stats;
mod worker;

pub use actions::ActionScheduler;
pub use pipeline::FramePipeline;
pub use stats::PipelineStats;

use crate::builder::DataFrame;
use crate::error::Result;
use crate::export::FrameSink;
use crate::frame::{OperationMode, DEFAULT_MAX_BUFFER_SIZE};
use crate::project::Project;
use crate::replay::CsvPlayer;
use crate::transport::{self, TransportConfig, TransportDriver};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use worker::{DeviceWorker, ProcessingWorker, ReplayWorker};

/// Capacity of the command queue
pub const COMMAND_QUEUE: usize = 256;

/// Capacity of the source to processing queue
pub const EVENT_QUEUE: usize = 1024;

/// Capacity of the message queue to the consumer
pub const MESSAGE_QUEUE: usize = 10_000;

/// Default interval between statistics messages
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_millis(500);

/// Settings fixed for the lifetime of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub project: Arc<Project>,
    pub operation_mode: OperationMode,
    /// Frame reader buffer cap in bytes
    pub max_buffer_size: usize,
    /// Overrides the project separator
    pub separator: Option<String>,
    pub stats_interval: Duration,
}

impl SessionConfig {
    pub fn new(project: Arc<Project>) -> Self {
        Self {
            project,
            operation_mode: OperationMode::ProjectFile,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            separator: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }

    /// Line-oriented comma separated input without a project
    pub fn quick_plot() -> Self {
        Self {
            operation_mode: OperationMode::QuickPlot,
            ..Self::new(Arc::new(Project::quick_plot(0)))
        }
    }

    /// JSON frames that carry their own layout
    pub fn device_json() -> Self {
        Self {
            operation_mode: OperationMode::DeviceSendsJson,
            ..Self::new(Arc::new(Project::new("Device JSON")))
        }
    }
}

/// Where a session's data comes from
pub enum Source {
    /// Open a transport from its configuration
    Transport(TransportConfig),
    /// An already open driver
    Driver(Box<dyn TransportDriver>),
    /// Replay of a CSV capture
    Replay(CsvPlayer),
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Transport(config) => f.debug_tuple("Transport").field(config).finish(),
            Source::Driver(driver) => f
                .debug_tuple("Driver")
                .field(&format_args!("{} {}", driver.kind(), driver.target()))
                .finish(),
            Source::Replay(player) => f
                .debug_tuple("Replay")
                .field(&format_args!("{} rows", player.row_count()))
                .finish(),
        }
    }
}

/// A source ready to be handed to its thread
enum Opened {
    Driver(Box<dyn TransportDriver>),
    Replay(CsvPlayer),
}

/// Message sent to a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Write bytes to the device
    Write(Vec<u8>),
    /// Pause replay
    Pause,
    /// Resume replay
    Resume,
    /// Jump to a replay row
    Seek(usize),
    /// Emit the next replay row while paused
    StepForward,
    /// Emit the previous replay row while paused
    StepBackward,
    /// Send project action `n` to the device
    TriggerAction(usize),
    /// End the session
    Stop,
}

/// Message sent by a session to its owner
#[derive(Debug, Clone)]
pub enum SessionMessage {
    /// A published frame
    Frame(Arc<DataFrame>),
    /// The transport failed; the session is ending
    TransportError(String),
    /// A device write failed
    WriteError(String),
    /// Statistics update
    Stats(PipelineStats),
    /// The session has ended, nothing follows
    Stopped,
}

/// A running acquisition or replay
pub struct Session {
    description: String,
    commands: Sender<SessionCommand>,
    messages: Receiver<SessionMessage>,
    running: Arc<AtomicBool>,
    /// Driver cancellation token, for device sources
    cancel: Option<Arc<AtomicBool>>,
    io_thread: Option<JoinHandle<()>>,
    processing_thread: Option<JoinHandle<()>>,
}

impl Session {
    /// Validate the configuration, open the source and start both threads
    ///
    /// Project, script and transport-open errors are returned here; nothing
    /// is spawned in that case.
    pub fn start(
        config: SessionConfig,
        source: Source,
        sinks: Vec<Box<dyn FrameSink>>,
    ) -> Result<Self> {
        let mut pipeline = FramePipeline::new(&config)?.with_sinks(sinks);
        let actions = ActionScheduler::new(&config.project.actions)?;

        let source = match source {
            Source::Transport(transport_config) => {
                Opened::Driver(transport::open(&transport_config)?)
            }
            Source::Driver(driver) => Opened::Driver(driver),
            Source::Replay(player) => {
                pipeline.map_columns(&player.headers());
                Opened::Replay(player)
            }
        };

        let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE);
        let (event_tx, event_rx) = bounded(EVENT_QUEUE);
        // Bounded for backpressure; a slow consumer loses messages, not memory
        let (msg_tx, msg_rx) = bounded(MESSAGE_QUEUE);
        let running = Arc::new(AtomicBool::new(true));

        let processing = ProcessingWorker {
            pipeline,
            events: event_rx,
            messages: msg_tx,
            stats_interval: config.stats_interval,
        };
        let processing_thread = std::thread::Builder::new()
            .name("framevis-processing".to_string())
            .spawn(move || processing.run())?;

        let (description, cancel, io_thread) = match source {
            Opened::Driver(driver) => {
                let description = format!("{} {}", driver.kind(), driver.target());
                let cancel = driver.cancel_token();
                if !actions.is_empty() {
                    tracing::debug!("{} project actions available", actions.len());
                }
                let worker = DeviceWorker {
                    driver,
                    actions,
                    commands: cmd_rx,
                    events: event_tx,
                    running: Arc::clone(&running),
                };
                let handle = std::thread::Builder::new()
                    .name("framevis-io".to_string())
                    .spawn(move || worker.run())?;
                (description, Some(cancel), handle)
            }
            Opened::Replay(player) => {
                let description = format!("Replay ({} rows)", player.row_count());
                let worker = ReplayWorker {
                    player,
                    commands: cmd_rx,
                    events: event_tx,
                    running: Arc::clone(&running),
                };
                let handle = std::thread::Builder::new()
                    .name("framevis-replay".to_string())
                    .spawn(move || worker.run())?;
                (description, None, handle)
            }
        };

        tracing::info!("Session started: {}", description);
        Ok(Self {
            description,
            commands: cmd_tx,
            messages: msg_rx,
            running,
            cancel,
            io_thread: Some(io_thread),
            processing_thread: Some(processing_thread),
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the session is still producing messages
    pub fn is_running(&self) -> bool {
        self.processing_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Send a command to the session
    pub fn send_command(&self, cmd: SessionCommand) -> bool {
        self.commands.send(cmd).is_ok()
    }

    /// Write bytes to the device
    pub fn write(&self, data: impl Into<Vec<u8>>) -> bool {
        self.send_command(SessionCommand::Write(data.into()))
    }

    /// Send project action `index` through the device
    pub fn trigger_action(&self, index: usize) -> bool {
        self.send_command(SessionCommand::TriggerAction(index))
    }

    pub fn pause(&self) -> bool {
        self.send_command(SessionCommand::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send_command(SessionCommand::Resume)
    }

    pub fn seek(&self, row: usize) -> bool {
        self.send_command(SessionCommand::Seek(row))
    }

    pub fn step_forward(&self) -> bool {
        self.send_command(SessionCommand::StepForward)
    }

    pub fn step_backward(&self) -> bool {
        self.send_command(SessionCommand::StepBackward)
    }

    /// Try to receive a message without blocking
    pub fn try_recv(&self) -> Option<SessionMessage> {
        self.messages.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionMessage> {
        self.messages.recv_timeout(timeout).ok()
    }

    /// Receive all pending messages
    pub fn drain(&self) -> Vec<SessionMessage> {
        self.messages.try_iter().collect()
    }

    /// The message receiver, for `select!` or iteration
    pub fn messages(&self) -> &Receiver<SessionMessage> {
        &self.messages
    }

    /// Stop both threads and wait for them
    ///
    /// Queued data is still processed before the processing thread exits;
    /// a partially received frame is discarded. Undelivered messages remain
    /// available through [`drain`](Self::drain).
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.commands.try_send(SessionCommand::Stop);
        if let Some(cancel) = &self.cancel {
            cancel.store(true, Ordering::Release);
        }

        if let Some(handle) = self.io_thread.take() {
            if handle.join().is_err() {
                tracing::error!("I/O thread of '{}' panicked", self.description);
            }
        }
        if let Some(handle) = self.processing_thread.take() {
            if handle.join().is_err() {
                tracing::error!("Processing thread of '{}' panicked", self.description);
            }
            tracing::info!("Session stopped: {}", self.description);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns the active session
#[derive(Default)]
pub struct SessionManager {
    active: Option<Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(Session::is_running)
    }

    /// Stop the current session, if any, then start a new one
    ///
    /// Returns the messages the previous session left undelivered. If the
    /// new session fails to start, no session is active afterwards.
    pub fn switch_to(
        &mut self,
        config: SessionConfig,
        source: Source,
        sinks: Vec<Box<dyn FrameSink>>,
    ) -> Result<Vec<SessionMessage>> {
        let drained = self.stop();
        self.active = Some(Session::start(config, source, sinks)?);
        Ok(drained)
    }

    /// Stop the current session and return its undelivered messages
    pub fn stop(&mut self) -> Vec<SessionMessage> {
        match self.active.take() {
            Some(mut session) => {
                session.stop();
                session.drain()
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{Dataset, Group};
    use crate::replay::ReplayConfig;
    use crate::transport::LoopbackDriver;
    use std::io::Write;

    fn project() -> Arc<Project> {
        let mut project = Project::new("Loop");
        project.frame_detection = crate::frame::FrameDetectionMode::EndDelimiterOnly;
        project.frame_end = "\n".into();
        project
            .groups
            .push(Group::new("G").with_dataset(Dataset::new("A", 0)));
        Arc::new(project)
    }

    fn collect_until_stopped(session: &Session) -> Vec<SessionMessage> {
        let mut messages = Vec::new();
        while let Some(msg) = session.recv_timeout(Duration::from_secs(5)) {
            let stopped = matches!(msg, SessionMessage::Stopped);
            messages.push(msg);
            if stopped {
                break;
            }
        }
        messages
    }

    fn frames(messages: &[SessionMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                SessionMessage::Frame(frame) => Some(frame.values[0].text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_device_session() {
        let (driver, handle) = LoopbackDriver::pair();
        let session = Session::start(
            SessionConfig::new(project()),
            Source::Driver(Box::new(driver)),
            Vec::new(),
        )
        .unwrap();
        assert!(session.description().contains("loopback"));

        handle.send(b"1\n2".to_vec());
        handle.send(b"\n3\n".to_vec());
        assert!(session.write(b"ping".to_vec()));
        assert_eq!(
            handle.recv_written(Duration::from_secs(5)).unwrap(),
            b"ping"
        );
        drop(handle);

        let messages = collect_until_stopped(&session);
        assert_eq!(frames(&messages), vec!["1", "2", "3"]);
        assert!(messages
            .iter()
            .any(|m| matches!(m, SessionMessage::TransportError(_))));
        assert!(matches!(messages.last(), Some(SessionMessage::Stopped)));
    }

    #[test]
    fn test_invalid_project_fails_synchronously() {
        let (driver, _handle) = LoopbackDriver::pair();
        let empty = Arc::new(Project::new("Empty"));
        assert!(Session::start(
            SessionConfig::new(empty),
            Source::Driver(Box::new(driver)),
            Vec::new()
        )
        .is_err());
    }

    #[test]
    fn test_replay_session() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"A\n7\n8\n9\n").unwrap();
        let player = CsvPlayer::open(
            file.path(),
            ReplayConfig::fixed_interval(Duration::from_millis(5)),
        )
        .unwrap();

        let session = Session::start(
            SessionConfig::new(project()),
            Source::Replay(player),
            Vec::new(),
        )
        .unwrap();
        let messages = collect_until_stopped(&session);
        assert_eq!(frames(&messages), vec!["7", "8", "9"]);
    }

    #[test]
    fn test_manager_switch_stops_previous() {
        let mut manager = SessionManager::new();
        let (first, first_handle) = LoopbackDriver::pair();
        manager
            .switch_to(
                SessionConfig::new(project()),
                Source::Driver(Box::new(first)),
                Vec::new(),
            )
            .unwrap();
        assert!(manager.is_active());

        let (second, _second_handle) = LoopbackDriver::pair();
        let drained = manager
            .switch_to(
                SessionConfig::new(project()),
                Source::Driver(Box::new(second)),
                Vec::new(),
            )
            .unwrap();
        assert!(matches!(drained.last(), Some(SessionMessage::Stopped)));
        // The first driver was dropped with its I/O thread
        assert!(!first_handle.send(b"late\n".to_vec()));

        manager.stop();
        assert!(!manager.is_active());
    }
}
