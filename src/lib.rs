//! # FrameVis-RS: Telemetry Frame Pipeline
//!
//! Turns the byte stream of a serial port, TCP/UDP socket or Bluetooth LE
//! characteristic into structured data frames, and replays CSV captures
//! through the same builder.
//!
//! ## Architecture
//!
//! ```text
//! TransportDriver -> FrameReader -> decode -> ScriptEngine | split -> FrameBuilder -> DataFrame
//!                                                         CsvPlayer -> FrameBuilder
//! ```
//!
//! - **Transport**: UART, network and BLE drivers behind [`TransportDriver`]
//! - **Frame**: delimiter-driven [`FrameReader`] and payload decoding
//! - **Scripting**: Rhai-based frame parsers run in a sandboxed engine
//! - **Builder**: maps field lists onto the project's datasets
//! - **Session**: source and processing threads connected by crossbeam channels
//! - **Export**: CSV and console sinks
//!
//! ## Example
//!
//! ```ignore
//! use framevis_rs::{
//!     export::ConsoleExport,
//!     project::Project,
//!     session::{Session, SessionConfig, SessionMessage, Source},
//!     transport::{TransportConfig, UartConfig},
//! };
//!
//! let project = Arc::new(Project::load("station.json")?);
//! let transport = TransportConfig::Uart(UartConfig {
//!     port: "/dev/ttyUSB0".into(),
//!     baud_rate: 115_200,
//!     ..Default::default()
//! });
//!
//! let session = Session::start(
//!     SessionConfig::new(project),
//!     Source::Transport(transport),
//!     vec![Box::new(ConsoleExport::default())],
//! )?;
//!
//! for msg in session.messages() {
//!     if let SessionMessage::Frame(frame) = msg {
//!         for (dataset, value) in frame.iter() {
//!             println!("{} = {}", dataset.title, value.text);
//!         }
//!     }
//! }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod export;
pub mod frame;
pub mod project;
pub mod replay;
pub mod scripting;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use builder::{DataFrame, FrameBuilder};
pub use config::AppConfig;
pub use error::{FrameVisError, Result};
pub use frame::{DecoderMethod, FrameDetectionMode, FrameReader, Payload, RawFrame};
pub use project::Project;
pub use replay::{CsvPlayer, Pacing, ReplayConfig};
pub use scripting::ScriptEngine;
pub use session::{Session, SessionConfig, SessionManager, SessionMessage, Source};
pub use transport::{TransportConfig, TransportDriver};
