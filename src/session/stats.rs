//! Pipeline statistics

use crate::error::{FramingError, FrameVisError, ScriptError};

/// Counters for one session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    /// Bytes delivered by the source
    pub bytes_received: u64,
    /// Frames emitted by the frame reader
    pub raw_frames: u64,
    /// Data frames handed to consumers
    pub frames_published: u64,
    /// Frames lost to any per-frame error
    pub dropped_frames: u64,

    // Per-category drop counters
    pub buffer_overflows: u64,
    pub checksum_errors: u64,
    pub decode_errors: u64,
    pub script_errors: u64,
    pub mapping_errors: u64,

    /// Sink calls that returned an error
    pub sink_errors: u64,
    /// Messages dropped because the consumer queue was full
    pub dropped_messages: u64,
    /// Published frames per second since the session started
    pub effective_frame_rate: f64,
}

impl PipelineStats {
    /// Count a per-frame error in its category
    pub fn record_error(&mut self, err: &FrameVisError) {
        match err {
            FrameVisError::Framing(FramingError::BufferOverflow { .. }) => {
                self.buffer_overflows += 1
            }
            FrameVisError::Framing(FramingError::ChecksumMismatch { .. }) => {
                self.checksum_errors += 1
            }
            FrameVisError::Decode(_) => self.decode_errors += 1,
            FrameVisError::Script(ScriptError::Runtime(_)) => self.script_errors += 1,
            FrameVisError::Mapping(_) => self.mapping_errors += 1,
            FrameVisError::WithContext { source, .. } => return self.record_error(source),
            _ => return,
        }
        self.dropped_frames += 1;
    }

    /// Share of frames that made it through, as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.frames_published + self.dropped_frames;
        if total == 0 {
            100.0
        } else {
            (self.frames_published as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, MappingError, TransportError};

    #[test]
    fn test_record_error_categories() {
        let mut stats = PipelineStats::default();
        stats.record_error(&FramingError::BufferOverflow { size: 2, cap: 1 }.into());
        stats.record_error(&DecodeError::InvalidUtf8 { valid_up_to: 0 }.into());
        stats.record_error(&ScriptError::Runtime("x".into()).into());
        stats.record_error(&MappingError::Empty.into());
        stats.record_error(
            &FrameVisError::from(DecodeError::InvalidHex("z".into())).with_context("frame 3"),
        );

        assert_eq!(stats.buffer_overflows, 1);
        assert_eq!(stats.decode_errors, 2);
        assert_eq!(stats.script_errors, 1);
        assert_eq!(stats.mapping_errors, 1);
        assert_eq!(stats.dropped_frames, 5);
    }

    #[test]
    fn test_session_errors_not_counted() {
        let mut stats = PipelineStats::default();
        stats.record_error(&TransportError::NotOpen.into());
        stats.record_error(&ScriptError::Validation("x".into()).into());
        assert_eq!(stats.dropped_frames, 0);
    }

    #[test]
    fn test_success_rate() {
        let mut stats = PipelineStats::default();
        assert_eq!(stats.success_rate(), 100.0);
        stats.frames_published = 3;
        stats.dropped_frames = 1;
        assert_eq!(stats.success_rate(), 75.0);
    }
}
