//! Session threads
//!
//! A session runs two threads connected by a bounded event queue:
//!
//! - the source thread ([`DeviceWorker`] or [`ReplayWorker`]) reads the
//!   transport or paces the replay, and executes [`SessionCommand`]s
//! - the [`ProcessingWorker`] runs the [`FramePipeline`] and publishes
//!   [`SessionMessage`]s
//!
//! Only the processing thread sends messages, so consumers see frames,
//! transport errors and the final `Stopped` in arrival order.

use super::actions::ActionScheduler;
use super::pipeline::FramePipeline;
use super::{SessionCommand, SessionMessage};
use crate::error::TransportError;
use crate::replay::{CsvPlayer, PlayerState};
use crate::transport::{TransportDriver, CHUNK_SIZE};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest a worker blocks before re-checking its running flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Items passed from the source thread to the processing thread
#[derive(Debug)]
pub(crate) enum SourceEvent {
    Bytes(Vec<u8>),
    /// The device closed the stream on its own or the peer hung up
    EndOfStream,
    /// One replayed row, already split into fields
    Row(Vec<String>),
    Failed(TransportError),
    WriteFailed(String),
    Finished,
}

/// Queue an event, waiting for space while the session is running
fn forward(events: &Sender<SourceEvent>, event: SourceEvent, running: &AtomicBool) -> bool {
    let mut event = event;
    loop {
        match events.send_timeout(event, POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if !running.load(Ordering::Acquire) {
                    return false;
                }
                event = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Reads a transport driver and executes device commands
pub(crate) struct DeviceWorker {
    pub driver: Box<dyn TransportDriver>,
    pub actions: ActionScheduler,
    pub commands: Receiver<SessionCommand>,
    pub events: Sender<SourceEvent>,
    pub running: Arc<AtomicBool>,
}

impl DeviceWorker {
    pub fn run(mut self) {
        let target = self.driver.target().to_string();
        tracing::info!("I/O worker started for {} {}", self.driver.kind(), target);

        for payload in self.actions.on_connect(Instant::now()) {
            self.write_device(&payload);
        }

        let mut buf = vec![0u8; CHUNK_SIZE];
        while self.running.load(Ordering::Acquire) {
            if !self.process_commands() {
                break;
            }
            for payload in self.actions.due(Instant::now()) {
                self.write_device(&payload);
            }

            match self.driver.read_chunk(&mut buf) {
                Ok(0) => {
                    if !self.driver.is_open() {
                        // Cancellation clears `running` first
                        if self.running.load(Ordering::Acquire) {
                            let _ = self.events.send(SourceEvent::EndOfStream);
                        }
                        break;
                    }
                }
                Ok(n) => {
                    if !forward(
                        &self.events,
                        SourceEvent::Bytes(buf[..n].to_vec()),
                        &self.running,
                    ) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Transport error on {}: {}", target, e);
                    if matches!(e, TransportError::ConnectionLost(_)) {
                        let _ = self.events.send(SourceEvent::EndOfStream);
                    }
                    let _ = self.events.send(SourceEvent::Failed(e));
                    break;
                }
            }
        }

        self.driver.close();
        let _ = self.events.send(SourceEvent::Finished);
        tracing::info!("I/O worker stopped for {}", target);
    }

    /// Returns false when the session should stop
    fn process_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(SessionCommand::Stop) => return false,
                Ok(SessionCommand::Write(data)) => self.write_device(&data),
                Ok(SessionCommand::TriggerAction(index)) => {
                    if let Some(payload) = self.actions.trigger(index, Instant::now()) {
                        self.write_device(&payload);
                    }
                }
                Ok(other) => tracing::debug!("{:?} only applies to replay sessions", other),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn write_device(&mut self, data: &[u8]) {
        if let Err(e) = self.driver.write(data) {
            tracing::warn!("Write of {} bytes failed: {}", data.len(), e);
            let _ = self.events.send(SourceEvent::WriteFailed(e.to_string()));
        }
    }
}

/// Paces a CSV replay and executes playback commands
pub(crate) struct ReplayWorker {
    pub player: CsvPlayer,
    pub commands: Receiver<SessionCommand>,
    pub events: Sender<SourceEvent>,
    pub running: Arc<AtomicBool>,
}

impl ReplayWorker {
    pub fn run(mut self) {
        tracing::info!("Replay started ({} rows)", self.player.row_count());
        self.player.play();

        while self.running.load(Ordering::Acquire) {
            for row in self.player.poll(Instant::now()) {
                if !forward(&self.events, SourceEvent::Row(row), &self.running) {
                    return self.finish();
                }
            }
            if self.player.is_finished() && self.player.state() == PlayerState::Stopped {
                break;
            }

            // The command queue doubles as the pacing timer
            let wait = self
                .player
                .next_delay(Instant::now())
                .map_or(POLL_INTERVAL, |delay| delay.min(POLL_INTERVAL));
            match self.commands.recv_timeout(wait) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.finish();
    }

    fn finish(self) {
        let _ = self.events.send(SourceEvent::Finished);
        tracing::info!(
            "Replay stopped at row {} of {}",
            self.player.position(),
            self.player.row_count()
        );
    }

    fn handle_command(&mut self, command: SessionCommand) -> bool {
        let row = match command {
            SessionCommand::Stop => return false,
            SessionCommand::Pause => {
                self.player.pause();
                None
            }
            SessionCommand::Resume => {
                self.player.play();
                None
            }
            SessionCommand::Seek(row) => {
                self.player.seek(row);
                None
            }
            SessionCommand::StepForward => self.player.step_forward(),
            SessionCommand::StepBackward => self.player.step_backward(),
            SessionCommand::Write(_) | SessionCommand::TriggerAction(_) => {
                tracing::debug!("Writes are ignored during replay");
                None
            }
        };

        match row {
            Some(row) => forward(&self.events, SourceEvent::Row(row), &self.running),
            None => true,
        }
    }
}

/// Runs the frame pipeline and publishes results
pub(crate) struct ProcessingWorker {
    pub pipeline: FramePipeline,
    pub events: Receiver<SourceEvent>,
    pub messages: Sender<SessionMessage>,
    pub stats_interval: Duration,
}

impl ProcessingWorker {
    pub fn run(mut self) {
        tracing::debug!("Processing worker started");
        let mut last_stats = Instant::now();

        loop {
            match self.events.recv_timeout(POLL_INTERVAL) {
                Ok(SourceEvent::Bytes(data)) => {
                    for frame in self.pipeline.push_bytes(&data) {
                        self.try_send_message(SessionMessage::Frame(frame));
                    }
                }
                Ok(SourceEvent::EndOfStream) => {
                    for frame in self.pipeline.finish_stream() {
                        self.try_send_message(SessionMessage::Frame(frame));
                    }
                }
                Ok(SourceEvent::Row(fields)) => {
                    if let Some(frame) = self.pipeline.push_fields(&fields) {
                        self.try_send_message(SessionMessage::Frame(frame));
                    }
                }
                Ok(SourceEvent::Failed(e)) => {
                    self.try_send_message(SessionMessage::TransportError(e.to_string()))
                }
                Ok(SourceEvent::WriteFailed(e)) => {
                    self.try_send_message(SessionMessage::WriteError(e))
                }
                Ok(SourceEvent::Finished) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if last_stats.elapsed() >= self.stats_interval {
                self.try_send_message(SessionMessage::Stats(self.pipeline.stats()));
                last_stats = Instant::now();
            }
        }

        self.pipeline.reset();
        self.pipeline.flush_sinks();

        let stats = self.pipeline.stats();
        tracing::info!(
            "Session ended: {} frames published, {} dropped",
            stats.frames_published,
            stats.dropped_frames
        );
        self.try_send_message(SessionMessage::Stats(stats));
        self.try_send_message(SessionMessage::Stopped);
    }

    /// Send without blocking; a full queue drops the message and counts it
    fn try_send_message(&mut self, msg: SessionMessage) {
        if self.messages.try_send(msg).is_err() {
            self.pipeline.record_dropped_message();
        }
    }
}
