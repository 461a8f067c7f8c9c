//! Error handling for the FrameVis-RS pipeline
//!
//! Errors are split by pipeline stage so callers can tell session-fatal
//! problems (transport, configuration, script validation, replay setup) from
//! per-frame problems (framing, decoding, script runtime, mapping) that only
//! drop the offending frame.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by transport drivers
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Bluetooth adapter unavailable or powered off")]
    AdapterOff,

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Unsupported on this platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport is not open")]
    NotOpen,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Classify a std IO error into the closest transport error variant
    pub fn from_io(err: std::io::Error, target: &str) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(target.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => TransportError::ConnectionLost(target.to_string()),
            ErrorKind::PermissionDenied => TransportError::PermissionDenied(target.to_string()),
            ErrorKind::AddrInUse => TransportError::DeviceBusy(target.to_string()),
            ErrorKind::NotFound => TransportError::NotFound(target.to_string()),
            ErrorKind::TimedOut => TransportError::Timeout(target.to_string()),
            ErrorKind::AddrNotAvailable | ErrorKind::NotConnected => {
                TransportError::HostUnreachable(target.to_string())
            }
            _ => TransportError::Io(err),
        }
    }
}

/// Non-fatal errors raised while splitting the byte stream into frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The accumulator grew past its cap without a complete frame
    #[error("Frame buffer overflow: {size} bytes exceeds cap of {cap} bytes")]
    BufferOverflow { size: usize, cap: usize },

    /// A frame's trailing checksum did not match the computed one
    #[error("{algorithm} checksum mismatch (received {received}, calculated {calculated})")]
    ChecksumMismatch {
        algorithm: String,
        received: String,
        calculated: String,
    },
}

/// Non-fatal errors raised while decoding a frame payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid UTF-8 at byte {valid_up_to}")]
    InvalidUtf8 { valid_up_to: usize },

    #[error("Invalid hexadecimal payload: {0}")]
    InvalidHex(String),

    #[error("Invalid Base64 payload: {0}")]
    InvalidBase64(String),
}

/// Errors raised by the frame parser script engine
#[derive(Error, Debug, Clone)]
pub enum ScriptError {
    /// Compilation or validation failure; blocks session start
    #[error("Script validation failed: {0}")]
    Validation(String),

    /// Runtime failure for one frame; only that frame is dropped
    #[error("Script runtime error: {0}")]
    Runtime(String),
}

/// Errors raised when mapping a field list onto the project datasets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("Frame has {fields} fields but dataset '{dataset}' needs index {index}")]
    MissingField {
        dataset: String,
        index: usize,
        fields: usize,
    },

    #[error("Frame produced no fields")]
    Empty,

    #[error("Invalid JSON frame: {0}")]
    InvalidJson(String),
}

/// Errors raised while preparing or running a CSV replay
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("CSV file {0:?} has no header row")]
    MissingHeader(PathBuf),

    #[error("CSV file {path:?} needs at least {required} data rows, found {found}")]
    InsufficientData {
        path: PathBuf,
        found: usize,
        required: usize,
    },

    #[error("Invalid date/time column '{column}': {reason}")]
    InvalidTimestampColumn { column: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main error type for FrameVis-RS operations
#[derive(Error, Debug)]
pub enum FrameVisError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    Script(#[from] ScriptError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    /// Errors related to configuration or project loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FrameVisError>,
    },
}

impl FrameVisError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FrameVisError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the error only affects a single frame
    pub fn is_per_frame(&self) -> bool {
        match self {
            FrameVisError::Framing(_) | FrameVisError::Decode(_) | FrameVisError::Mapping(_) => {
                true
            }
            FrameVisError::Script(ScriptError::Runtime(_)) => true,
            FrameVisError::WithContext { source, .. } => source.is_per_frame(),
            _ => false,
        }
    }
}

/// Result type alias for FrameVis-RS operations
pub type Result<T> = std::result::Result<T, FrameVisError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<FrameVisError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FrameVisError::Config("missing groups".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing groups");
    }

    #[test]
    fn test_error_with_context() {
        let err = FrameVisError::from(DecodeError::InvalidHex("odd length".into()));
        let with_ctx = err.with_context("Frame 12");
        assert!(with_ctx.to_string().contains("Frame 12"));
        assert!(with_ctx.is_per_frame());
    }

    #[test]
    fn test_per_frame_classification() {
        assert!(FrameVisError::from(FramingError::BufferOverflow { size: 11, cap: 10 })
            .is_per_frame());
        assert!(FrameVisError::from(ScriptError::Runtime("boom".into())).is_per_frame());
        assert!(!FrameVisError::from(ScriptError::Validation("no parse".into())).is_per_frame());
        assert!(!FrameVisError::from(TransportError::AdapterOff).is_per_frame());
    }

    #[test]
    fn test_io_classification() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert!(matches!(
            TransportError::from_io(err, "127.0.0.1:9000"),
            TransportError::ConnectionRefused(_)
        ));

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            TransportError::from_io(err, "/dev/ttyUSB0"),
            TransportError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_mapping_error_display() {
        let err = MappingError::MissingField {
            dataset: "Temperature".into(),
            index: 3,
            fields: 3,
        };
        assert!(err.to_string().contains("Temperature"));
        assert!(err.to_string().contains("index 3"));
    }
}
