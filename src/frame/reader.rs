//! Delimiter-driven frame reader
//!
//! [`FrameReader`] accumulates transport chunks in an owned buffer and splits
//! them into [`RawFrame`]s according to a [`FrameDetectionMode`]. The buffer is
//! reused across frames; consumed bytes are drained from the front.
//!
//! # States
//!
//! - `Searching`: waiting for a start delimiter (or, in end-delimiter-only
//!   mode, for the next end delimiter)
//! - `Capturing`: a start delimiter was seen, frame bytes are accumulating
//! - `Idle`: no delimiters, each chunk is a frame
//!
//! Framing problems (buffer overflow, checksum mismatch) are reported as
//! [`FrameEvent::Error`] and never stop the reader.

use super::{
    ChecksumAlgorithm, FrameDetectionMode, OperationMode, RawFrame, JSON_FRAME_END,
    JSON_FRAME_START,
};
use crate::error::{FrameVisError, FramingError, Result};
use std::collections::VecDeque;

/// Line endings recognised in Quick Plot mode, longest first
const QUICK_PLOT_LINE_ENDINGS: [&[u8]; 3] = [b"\r\n", b"\n", b"\r"];

/// Framing configuration, resolved from a project or the app config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReaderConfig {
    pub mode: FrameDetectionMode,
    pub operation_mode: OperationMode,
    /// Start delimiter bytes
    pub start: Vec<u8>,
    /// End delimiter bytes
    pub end: Vec<u8>,
    pub checksum: ChecksumAlgorithm,
    /// Accumulator cap in bytes
    pub max_buffer_size: usize,
}

impl Default for FrameReaderConfig {
    fn default() -> Self {
        Self {
            mode: FrameDetectionMode::EndDelimiterOnly,
            operation_mode: OperationMode::ProjectFile,
            start: Vec::new(),
            end: b"\n".to_vec(),
            checksum: ChecksumAlgorithm::None,
            max_buffer_size: super::DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

impl FrameReaderConfig {
    /// Line-oriented framing used by Quick Plot
    pub fn quick_plot() -> Self {
        Self {
            operation_mode: OperationMode::QuickPlot,
            ..Default::default()
        }
    }

    /// `/*` ... `*/` framing used when the device sends JSON
    pub fn device_json() -> Self {
        Self {
            mode: FrameDetectionMode::StartAndEndDelimiter,
            operation_mode: OperationMode::DeviceSendsJson,
            start: JSON_FRAME_START.as_bytes().to_vec(),
            end: JSON_FRAME_END.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    /// Check that the delimiters required by the mode are present
    pub fn validate(&self) -> Result<()> {
        if self.operation_mode == OperationMode::QuickPlot {
            return Ok(());
        }
        if self.mode.uses_start() && self.start.is_empty() {
            return Err(FrameVisError::Config(format!(
                "{} mode requires a start delimiter",
                self.mode
            )));
        }
        if self.mode.uses_end() && self.end.is_empty() {
            return Err(FrameVisError::Config(format!(
                "{} mode requires an end delimiter",
                self.mode
            )));
        }
        if self.max_buffer_size == 0 {
            return Err(FrameVisError::Config(
                "max_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reader state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Searching,
    Capturing,
    Idle,
}

/// Output of the frame reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Frame(RawFrame),
    Error(FramingError),
}

/// Splits a byte stream into frames
#[derive(Debug)]
pub struct FrameReader {
    config: FrameReaderConfig,
    mode: FrameDetectionMode,
    /// Candidate end delimiters, longest first
    end_delimiters: Vec<Vec<u8>>,
    checksum: ChecksumAlgorithm,
    state: ReaderState,
    buffer: Vec<u8>,
    /// Offset below which no delimiter can start
    search_from: usize,
    pending: VecDeque<FrameEvent>,
}

impl FrameReader {
    pub fn new(config: FrameReaderConfig) -> Result<Self> {
        config.validate()?;

        let (mode, end_delimiters, checksum) = match config.operation_mode {
            OperationMode::QuickPlot => (
                FrameDetectionMode::EndDelimiterOnly,
                QUICK_PLOT_LINE_ENDINGS.iter().map(|d| d.to_vec()).collect(),
                ChecksumAlgorithm::None,
            ),
            OperationMode::DeviceSendsJson => (
                FrameDetectionMode::StartAndEndDelimiter,
                vec![config.end.clone()],
                ChecksumAlgorithm::None,
            ),
            OperationMode::ProjectFile => {
                (config.mode, vec![config.end.clone()], config.checksum)
            }
        };

        let state = Self::initial_state(mode);
        Ok(Self {
            config,
            mode,
            end_delimiters,
            checksum,
            state,
            buffer: Vec::with_capacity(4096),
            search_from: 0,
            pending: VecDeque::new(),
        })
    }

    fn initial_state(mode: FrameDetectionMode) -> ReaderState {
        match mode {
            FrameDetectionMode::NoDelimiter => ReaderState::Idle,
            _ => ReaderState::Searching,
        }
    }

    pub fn config(&self) -> &FrameReaderConfig {
        &self.config
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Bytes currently held in the accumulator
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk and drain the frames and errors it completed
    pub fn push(&mut self, data: &[u8]) -> impl Iterator<Item = FrameEvent> + '_ {
        if self.state == ReaderState::Idle {
            if !data.is_empty() {
                self.pending.push_back(FrameEvent::Frame(RawFrame::from(data)));
            }
        } else {
            self.buffer.extend_from_slice(data);
            self.process();
            self.check_overflow();
        }
        self.pending.drain(..)
    }

    /// Force out the trailing frame of a start-delimiter-only stream
    pub fn flush(&mut self) -> impl Iterator<Item = FrameEvent> + '_ {
        if self.mode == FrameDetectionMode::StartDelimiterOnly
            && self.state == ReaderState::Capturing
            && !self.buffer.is_empty()
        {
            let body: Vec<u8> = self.buffer.drain(..).collect();
            self.emit_with_trailing_checksum(body);
            self.state = ReaderState::Searching;
            self.search_from = 0;
        }
        self.pending.drain(..)
    }

    /// Drop any partial frame and return to the initial state
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending.clear();
        self.search_from = 0;
        self.state = Self::initial_state(self.mode);
    }

    fn process(&mut self) {
        loop {
            let progressed = match (self.mode, self.state) {
                (FrameDetectionMode::EndDelimiterOnly, _) => self.extract_end_delimited(),
                (_, ReaderState::Searching) => self.seek_start(),
                (FrameDetectionMode::StartAndEndDelimiter, ReaderState::Capturing) => {
                    self.extract_end_delimited()
                }
                (FrameDetectionMode::StartDelimiterOnly, ReaderState::Capturing) => {
                    self.extract_start_delimited()
                }
                _ => false,
            };
            if !progressed {
                break;
            }
        }
    }

    /// Discard everything before the next start delimiter
    fn seek_start(&mut self) -> bool {
        let start_len = self.config.start.len();
        match find(&self.buffer, &self.config.start, self.search_from) {
            Some(pos) => {
                self.buffer.drain(..pos + start_len);
                self.search_from = 0;
                self.state = ReaderState::Capturing;
                true
            }
            None => {
                // Keep a possible partial delimiter at the tail
                let keep = start_len.saturating_sub(1).min(self.buffer.len());
                let discard = self.buffer.len() - keep;
                self.buffer.drain(..discard);
                self.search_from = 0;
                false
            }
        }
    }

    fn extract_end_delimited(&mut self) -> bool {
        let Some((pos, delimiter_len)) = self.find_end() else {
            let longest = self.end_delimiters.first().map_or(1, Vec::len);
            self.search_from = self.buffer.len().saturating_sub(longest.saturating_sub(1));
            return false;
        };

        let checksum_len = self.checksum.len();
        let consumed = pos + delimiter_len + checksum_len;
        if self.buffer.len() < consumed {
            // Checksum bytes still in flight
            self.search_from = pos;
            return false;
        }

        let payload = self.buffer[..pos].to_vec();
        let received = self.buffer[pos + delimiter_len..consumed].to_vec();
        self.buffer.drain(..consumed);
        self.search_from = 0;
        if self.mode == FrameDetectionMode::StartAndEndDelimiter {
            self.state = ReaderState::Searching;
        }

        self.emit(payload, &received);
        true
    }

    fn extract_start_delimited(&mut self) -> bool {
        let start_len = self.config.start.len();
        match find(&self.buffer, &self.config.start, self.search_from) {
            Some(pos) => {
                let body = self.buffer[..pos].to_vec();
                self.buffer.drain(..pos + start_len);
                self.search_from = 0;
                self.emit_with_trailing_checksum(body);
                true
            }
            None => {
                self.search_from = self.buffer.len().saturating_sub(start_len.saturating_sub(1));
                false
            }
        }
    }

    /// Earliest end delimiter match; the longest wins at the same offset
    fn find_end(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for delimiter in &self.end_delimiters {
            if let Some(pos) = find(&self.buffer, delimiter, self.search_from) {
                if best.map_or(true, |(best_pos, _)| pos < best_pos) {
                    best = Some((pos, delimiter.len()));
                }
            }
        }
        best
    }

    fn emit_with_trailing_checksum(&mut self, mut body: Vec<u8>) {
        let checksum_len = self.checksum.len();
        if body.len() < checksum_len {
            self.report(FramingError::ChecksumMismatch {
                algorithm: self.checksum.name().to_string(),
                received: hex::encode_upper(&body),
                calculated: String::new(),
            });
            return;
        }
        let received = body.split_off(body.len() - checksum_len);
        self.emit(body, &received);
    }

    fn emit(&mut self, payload: Vec<u8>, received: &[u8]) {
        if !self.checksum.verify(&payload, received) {
            self.report(FramingError::ChecksumMismatch {
                algorithm: self.checksum.name().to_string(),
                received: hex::encode_upper(received),
                calculated: hex::encode_upper(self.checksum.compute(&payload)),
            });
            return;
        }

        if payload.is_empty() {
            tracing::trace!("Discarding empty frame");
            return;
        }
        self.pending.push_back(FrameEvent::Frame(RawFrame::new(payload)));
    }

    fn check_overflow(&mut self) {
        let size = self.buffer.len();
        let cap = self.config.max_buffer_size;
        if size > cap {
            tracing::warn!("Frame buffer overflow ({} > {} bytes), resetting reader", size, cap);
            self.buffer.clear();
            self.search_from = 0;
            self.state = Self::initial_state(self.mode);
            self.report(FramingError::BufferOverflow { size, cap });
        }
    }

    fn report(&mut self, error: FramingError) {
        tracing::debug!("{}", error);
        self.pending.push_back(FrameEvent::Error(error));
    }
}

/// Position of `needle` in `haystack`, starting at `from`
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reader(mode: FrameDetectionMode, start: &[u8], end: &[u8]) -> FrameReader {
        FrameReader::new(FrameReaderConfig {
            mode,
            start: start.to_vec(),
            end: end.to_vec(),
            ..Default::default()
        })
        .unwrap()
    }

    fn frames(events: impl Iterator<Item = FrameEvent>) -> Vec<Vec<u8>> {
        events
            .filter_map(|e| match e {
                FrameEvent::Frame(f) => Some(f.into_bytes()),
                FrameEvent::Error(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_start_and_end() {
        let mut r = reader(FrameDetectionMode::StartAndEndDelimiter, b"/*", b"*/");
        assert_eq!(frames(r.push(b"noise/*1,2,3*/junk")), vec![b"1,2,3".to_vec()]);
        assert_eq!(r.state(), ReaderState::Searching);
    }

    #[test]
    fn test_start_and_end_fragmented() {
        let mut r = reader(FrameDetectionMode::StartAndEndDelimiter, b"/*", b"*/");
        assert!(frames(r.push(b"xx/")).is_empty());
        assert!(frames(r.push(b"*10,2")).is_empty());
        assert_eq!(r.state(), ReaderState::Capturing);
        assert!(frames(r.push(b"0*")).is_empty());
        assert_eq!(frames(r.push(b"//*7*/")), vec![b"10,20".to_vec(), b"7".to_vec()]);
    }

    #[test]
    fn test_empty_frame_discarded() {
        let mut r = reader(FrameDetectionMode::StartAndEndDelimiter, b"$", b";");
        assert!(frames(r.push(b"$;$;")).is_empty());

        let mut r = reader(FrameDetectionMode::EndDelimiterOnly, b"", b"\n");
        assert_eq!(frames(r.push(b"\n\na\n")), vec![b"a".to_vec()]);
    }

    #[test]
    fn test_end_only() {
        let mut r = reader(FrameDetectionMode::EndDelimiterOnly, b"", b"\r\n");
        assert_eq!(frames(r.push(b"1,2\r")), Vec::<Vec<u8>>::new());
        assert_eq!(frames(r.push(b"\n3,4\r\n5")), vec![b"1,2".to_vec(), b"3,4".to_vec()]);
        assert_eq!(r.buffered(), 1);
    }

    #[test]
    fn test_start_only() {
        let mut r = reader(FrameDetectionMode::StartDelimiterOnly, b"$", b"");
        assert!(frames(r.push(b"garbage$1,2")).is_empty());
        assert_eq!(frames(r.push(b"$3,4$")), vec![b"1,2".to_vec(), b"3,4".to_vec()]);
        assert!(frames(r.push(b"5,6")).is_empty());
        assert_eq!(frames(r.flush()), vec![b"5,6".to_vec()]);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn test_no_delimiter() {
        let mut r = reader(FrameDetectionMode::NoDelimiter, b"", b"");
        assert_eq!(r.state(), ReaderState::Idle);
        assert_eq!(frames(r.push(b"abc")), vec![b"abc".to_vec()]);
        assert!(frames(r.push(b"")).is_empty());
        assert_eq!(frames(r.push(&[0, 1, 2])), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_quick_plot_line_endings() {
        let mut r = FrameReader::new(FrameReaderConfig::quick_plot()).unwrap();
        assert_eq!(
            frames(r.push(b"1,2\r\n3,4\n5,6\r7")),
            vec![b"1,2".to_vec(), b"3,4".to_vec(), b"5,6".to_vec()]
        );
    }

    #[test]
    fn test_device_json_framing() {
        let mut r = FrameReader::new(FrameReaderConfig::device_json()).unwrap();
        assert!(frames(r.push(b"boot log\n/*{\"title\":")).is_empty());
        assert_eq!(
            frames(r.push(b"\"A\"}*//*{}*/")),
            vec![b"{\"title\":\"A\"}".to_vec(), b"{}".to_vec()]
        );
    }

    #[test]
    fn test_missing_delimiter_rejected() {
        let config = FrameReaderConfig {
            mode: FrameDetectionMode::StartAndEndDelimiter,
            start: Vec::new(),
            ..Default::default()
        };
        assert!(FrameReader::new(config).is_err());
    }

    #[test]
    fn test_overflow_recovers() {
        let mut r = FrameReader::new(FrameReaderConfig {
            max_buffer_size: 64,
            ..Default::default()
        })
        .unwrap();

        let mut overflowed = false;
        for _ in 0..10 {
            for event in r.push(&[b'x'; 20]) {
                if matches!(event, FrameEvent::Error(FramingError::BufferOverflow { cap: 64, .. })) {
                    overflowed = true;
                }
            }
        }
        assert!(overflowed);
        assert!(r.buffered() <= 64);

        // The garbage left after the last overflow ends at the next newline
        let recovered = frames(r.push(b"\n1,2,3\n"));
        assert_eq!(recovered.last(), Some(&b"1,2,3".to_vec()));
    }

    #[test]
    fn test_overflow_recovers_without_reset() {
        let mut r = FrameReader::new(FrameReaderConfig {
            mode: FrameDetectionMode::EndDelimiterOnly,
            end: b"\n".to_vec(),
            max_buffer_size: 64,
            ..Default::default()
        })
        .unwrap();

        let events: Vec<_> = r.push(&[b'x'; 100]).collect();
        assert!(matches!(
            events.as_slice(),
            [FrameEvent::Error(FramingError::BufferOverflow { size: 100, cap: 64 })]
        ));
        assert_eq!(r.buffered(), 0);

        let events: Vec<_> = r.push(b"a,b\n").collect();
        assert_eq!(events.len(), 1);
        assert_eq!(frames(events.into_iter()), vec![b"a,b".to_vec()]);
    }

    #[test]
    fn test_overflow_while_capturing() {
        let mut r = FrameReader::new(FrameReaderConfig {
            mode: FrameDetectionMode::StartAndEndDelimiter,
            start: b"$".to_vec(),
            end: b";".to_vec(),
            max_buffer_size: 16,
            ..Default::default()
        })
        .unwrap();

        let events: Vec<_> = r.push(b"$0123456789abcdefghij").collect();
        assert!(matches!(
            events.as_slice(),
            [FrameEvent::Error(FramingError::BufferOverflow { .. })]
        ));
        assert_eq!(r.state(), ReaderState::Searching);
        assert_eq!(frames(r.push(b"$1,2;")), vec![b"1,2".to_vec()]);
    }

    #[test]
    fn test_checksum_after_end_delimiter() {
        let mut r = FrameReader::new(FrameReaderConfig {
            mode: FrameDetectionMode::StartAndEndDelimiter,
            start: b"$".to_vec(),
            end: b";".to_vec(),
            checksum: ChecksumAlgorithm::Xor8,
            ..Default::default()
        })
        .unwrap();

        let payload = b"1,2";
        let crc = ChecksumAlgorithm::Xor8.compute(payload)[0];

        // Checksum byte split across chunks
        assert!(frames(r.push(b"$1,2;")).is_empty());
        assert_eq!(frames(r.push(&[crc])), vec![payload.to_vec()]);

        let events: Vec<_> = r.push(&[b'$', b'1', b';', crc]).collect();
        assert!(matches!(
            events.as_slice(),
            [FrameEvent::Error(FramingError::ChecksumMismatch { .. })]
        ));
    }

    #[test]
    fn test_checksum_start_only() {
        let mut r = FrameReader::new(FrameReaderConfig {
            mode: FrameDetectionMode::StartDelimiterOnly,
            start: b"$".to_vec(),
            checksum: ChecksumAlgorithm::Crc16Modbus,
            ..Default::default()
        })
        .unwrap();

        let mut data = b"$4,5".to_vec();
        data.extend(ChecksumAlgorithm::Crc16Modbus.compute(b"4,5"));
        data.push(b'$');
        assert_eq!(frames(r.push(&data)), vec![b"4,5".to_vec()]);
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut r = reader(FrameDetectionMode::StartAndEndDelimiter, b"$", b";");
        assert!(frames(r.push(b"$1,2")).is_empty());
        r.reset();
        assert_eq!(r.state(), ReaderState::Searching);
        assert!(frames(r.push(b"3;")).is_empty());
        assert_eq!(frames(r.push(b"$4;")), vec![b"4".to_vec()]);
    }

    #[test]
    fn test_buffer_reused() {
        let mut r = reader(FrameDetectionMode::EndDelimiterOnly, b"", b"\n");
        let _ = frames(r.push(&[b'a'; 8192]));
        let _ = frames(r.push(b"\n"));
        assert_eq!(r.buffered(), 0);
        assert!(r.buffer.capacity() >= 8192);
    }

    proptest! {
        #[test]
        fn prop_start_payload_end_yields_one_frame(
            payload in "[a-zA-Z0-9,.\\- ]{1,128}",
            split in 0usize..160,
        ) {
            let mut r = reader(FrameDetectionMode::StartAndEndDelimiter, b"/*", b"*/");
            let mut stream = b"/*".to_vec();
            stream.extend_from_slice(payload.as_bytes());
            stream.extend_from_slice(b"*/");

            let split = split.min(stream.len());
            let mut out = frames(r.push(&stream[..split]));
            out.extend(frames(r.push(&stream[split..])));

            prop_assert_eq!(out, vec![payload.into_bytes()]);
        }

        #[test]
        fn prop_no_delimiter_chunks_verbatim(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 1..16)
        ) {
            let mut r = reader(FrameDetectionMode::NoDelimiter, b"", b"");
            let mut out = Vec::new();
            for chunk in &chunks {
                out.extend(frames(r.push(chunk)));
            }
            prop_assert_eq!(out, chunks);
        }
    }
}
