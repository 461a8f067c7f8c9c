//! Frame extraction and payload decoding
//!
//! This module turns the raw byte stream delivered by a transport into
//! decoded frame payloads:
//!
//! - [`FrameReader`] - Delimiter-driven state machine that emits [`RawFrame`]s
//! - [`decoder`] - Converts a raw frame into a canonical [`Payload`]
//! - [`ChecksumAlgorithm`] - Optional trailing checksum validation
//!
//! # Frame Detection
//!
//! | Mode                   | Frame boundary                                     |
//! |------------------------|----------------------------------------------------|
//! | `EndDelimiterOnly`     | bytes before each end delimiter                    |
//! | `StartDelimiterOnly`   | bytes between two consecutive start delimiters     |
//! | `StartAndEndDelimiter` | bytes between a start and the following end        |
//! | `NoDelimiter`          | every pushed chunk, verbatim                       |

pub mod checksum;
pub mod decoder;
pub mod reader;

pub use checksum::ChecksumAlgorithm;
pub use decoder::{decode, encode, Payload};
pub use reader::{FrameEvent, FrameReader, FrameReaderConfig, ReaderState};

use crate::error::{FrameVisError, Result};
use serde::{Deserialize, Serialize};

/// Default cap for the frame accumulator (10 MiB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// A complete, delimiter-bounded frame as received from the device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawFrame(Vec<u8>);

impl RawFrame {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for RawFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for RawFrame {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

/// Delimiter strategy used to split the byte stream into frames
///
/// Project files store the mode as an integer: `0` end delimiter only,
/// `1` start and end delimiters, `2` no delimiters, `3` start delimiter only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FrameDetectionMode {
    #[default]
    EndDelimiterOnly,
    StartAndEndDelimiter,
    NoDelimiter,
    StartDelimiterOnly,
}

impl FrameDetectionMode {
    pub fn uses_start(&self) -> bool {
        matches!(
            self,
            FrameDetectionMode::StartAndEndDelimiter | FrameDetectionMode::StartDelimiterOnly
        )
    }

    pub fn uses_end(&self) -> bool {
        matches!(
            self,
            FrameDetectionMode::StartAndEndDelimiter | FrameDetectionMode::EndDelimiterOnly
        )
    }
}

impl TryFrom<u8> for FrameDetectionMode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameDetectionMode::EndDelimiterOnly),
            1 => Ok(FrameDetectionMode::StartAndEndDelimiter),
            2 => Ok(FrameDetectionMode::NoDelimiter),
            3 => Ok(FrameDetectionMode::StartDelimiterOnly),
            other => Err(format!("unknown frame detection mode {}", other)),
        }
    }
}

impl From<FrameDetectionMode> for u8 {
    fn from(value: FrameDetectionMode) -> Self {
        match value {
            FrameDetectionMode::EndDelimiterOnly => 0,
            FrameDetectionMode::StartAndEndDelimiter => 1,
            FrameDetectionMode::NoDelimiter => 2,
            FrameDetectionMode::StartDelimiterOnly => 3,
        }
    }
}

impl std::fmt::Display for FrameDetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameDetectionMode::EndDelimiterOnly => write!(f, "End Delimiter Only"),
            FrameDetectionMode::StartAndEndDelimiter => write!(f, "Start + End Delimiter"),
            FrameDetectionMode::NoDelimiter => write!(f, "No Delimiters"),
            FrameDetectionMode::StartDelimiterOnly => write!(f, "Start Delimiter Only"),
        }
    }
}

/// Byte-level encoding applied to each frame before field extraction
///
/// Stored in project files as `0` plain text, `1` hexadecimal, `2` Base64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DecoderMethod {
    #[default]
    PlainText,
    Hexadecimal,
    Base64,
}

impl DecoderMethod {
    /// Whether decoded payloads are handed to scripts as text
    pub fn is_textual(&self) -> bool {
        matches!(self, DecoderMethod::PlainText)
    }
}

impl TryFrom<u8> for DecoderMethod {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(DecoderMethod::PlainText),
            1 => Ok(DecoderMethod::Hexadecimal),
            2 => Ok(DecoderMethod::Base64),
            other => Err(format!("unknown decoder method {}", other)),
        }
    }
}

impl From<DecoderMethod> for u8 {
    fn from(value: DecoderMethod) -> Self {
        match value {
            DecoderMethod::PlainText => 0,
            DecoderMethod::Hexadecimal => 1,
            DecoderMethod::Base64 => 2,
        }
    }
}

impl std::fmt::Display for DecoderMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecoderMethod::PlainText => write!(f, "Plain Text (UTF-8)"),
            DecoderMethod::Hexadecimal => write!(f, "Hexadecimal"),
            DecoderMethod::Base64 => write!(f, "Base64"),
        }
    }
}

/// How the pipeline interprets incoming data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Frames are parsed according to a project file
    #[default]
    ProjectFile,
    /// Line-oriented comma-separated values, datasets generated automatically
    QuickPlot,
    /// Each frame is a JSON document carrying its own groups and values
    DeviceSendsJson,
}

/// Start delimiter of device JSON frames
pub const JSON_FRAME_START: &str = "/*";

/// End delimiter of device JSON frames
pub const JSON_FRAME_END: &str = "*/";

/// Parse a delimiter declared either as literal text or as hexadecimal bytes
///
/// Hex delimiters may contain whitespace between bytes (`"0d 0a"`).
pub fn parse_delimiter(text: &str, hexadecimal: bool) -> Result<Vec<u8>> {
    if !hexadecimal {
        return Ok(text.as_bytes().to_vec());
    }

    let digits: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(&digits).map_err(|e| {
        FrameVisError::Config(format!("Invalid hexadecimal delimiter '{}': {}", text, e))
    })
}
