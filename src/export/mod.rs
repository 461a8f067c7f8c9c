//! Frame consumers
//!
//! Sinks receive every raw frame the reader emits and every [`DataFrame`]
//! the builder publishes, on the session's processing thread and in arrival
//! order. A failing sink is logged and skipped; it never stops the pipeline.

pub mod console;
pub mod csv;

pub use self::console::{ConsoleExport, DisplayMode};
pub use self::csv::CsvExport;

use crate::builder::DataFrame;
use crate::error::Result;
use crate::frame::RawFrame;

/// Consumer of pipeline output
pub trait FrameSink: Send {
    /// Human-readable name of this sink
    fn name(&self) -> &str;

    /// Called for every frame the reader emits, before decoding
    fn on_raw_frame(&mut self, _frame: &RawFrame) -> Result<()> {
        Ok(())
    }

    /// Called for every published frame
    fn on_frame(&mut self, _frame: &DataFrame) -> Result<()> {
        Ok(())
    }

    /// Called when the session stops
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
