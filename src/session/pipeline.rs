//! Frame processing chain
//!
//! [`FramePipeline`] owns every per-session stage: reader, decoder, parser
//! and builder, plus the sinks. It is driven by the session's processing
//! thread but has no threading of its own.

use super::{PipelineStats, SessionConfig};
use crate::builder::{ColumnMap, DataFrame, FrameBuilder};
use crate::error::{FrameVisError, Result};
use crate::export::FrameSink;
use crate::frame::{
    decode, DecoderMethod, FrameEvent, FrameReader, FrameReaderConfig, OperationMode, RawFrame,
};
use crate::project::DEFAULT_SEPARATOR;
use crate::scripting::ScriptEngine;
use std::sync::Arc;
use std::time::Instant;

pub struct FramePipeline {
    reader: FrameReader,
    decoder: DecoderMethod,
    engine: ScriptEngine,
    builder: FrameBuilder,
    /// Replay column placement, set for CSV sources
    columns: Option<ColumnMap>,
    sinks: Vec<Box<dyn FrameSink>>,
    stats: PipelineStats,
    started: Instant,
}

impl FramePipeline {
    /// Resolve every stage from the session configuration
    ///
    /// Fails when the project, its delimiters or its parser script are
    /// invalid.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let (reader_config, decoder, engine, builder) = match config.operation_mode {
            OperationMode::QuickPlot => {
                let reader_config = FrameReaderConfig {
                    max_buffer_size: config.max_buffer_size,
                    ..FrameReaderConfig::quick_plot()
                };
                let separator = config.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR);
                (
                    reader_config,
                    DecoderMethod::PlainText,
                    ScriptEngine::split_only(separator),
                    FrameBuilder::quick_plot(),
                )
            }
            OperationMode::DeviceSendsJson => (
                FrameReaderConfig {
                    max_buffer_size: config.max_buffer_size,
                    ..FrameReaderConfig::device_json()
                },
                DecoderMethod::PlainText,
                ScriptEngine::split_only(DEFAULT_SEPARATOR),
                FrameBuilder::device_json(),
            ),
            OperationMode::ProjectFile => {
                let project = &config.project;
                project.validate()?;
                let reader_config = project.reader_config(config.max_buffer_size)?;
                let separator = config
                    .separator
                    .as_deref()
                    .unwrap_or_else(|| project.separator());
                let engine = match project.parser_source() {
                    Some(source) => ScriptEngine::load(source, separator, project.decoder)?,
                    None => ScriptEngine::split_only(separator),
                };
                (
                    reader_config,
                    project.decoder,
                    engine,
                    FrameBuilder::new(Arc::clone(project)),
                )
            }
        };

        Ok(Self {
            reader: FrameReader::new(reader_config)?,
            decoder,
            engine,
            builder,
            columns: None,
            sinks: Vec::new(),
            stats: PipelineStats::default(),
            started: Instant::now(),
        })
    }

    pub fn with_sinks(mut self, sinks: Vec<Box<dyn FrameSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn FrameSink>) {
        self.sinks.push(sink);
    }

    pub fn builder(&self) -> &FrameBuilder {
        &self.builder
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    /// Feed bytes from the transport; returns the frames completed by them
    pub fn push_bytes(&mut self, data: &[u8]) -> Vec<Arc<DataFrame>> {
        self.stats.bytes_received += data.len() as u64;
        let events: Vec<FrameEvent> = self.reader.push(data).collect();
        events
            .into_iter()
            .filter_map(|event| self.handle_event(event))
            .collect()
    }

    /// Emit the frame still open when the device ended the stream
    ///
    /// Only start-delimited framing has one; other modes keep their
    /// partial frame, which [`reset`](Self::reset) later discards.
    pub fn finish_stream(&mut self) -> Vec<Arc<DataFrame>> {
        let events: Vec<FrameEvent> = self.reader.flush().collect();
        events
            .into_iter()
            .filter_map(|event| self.handle_event(event))
            .collect()
    }

    /// Place replayed rows by their column headers instead of by position
    pub fn map_columns(&mut self, headers: &[String]) {
        let map = ColumnMap::new(self.builder.layout(), headers);
        tracing::debug!(
            "Replay columns: {} of {} matched to datasets by name",
            map.matched(),
            headers.len()
        );
        self.columns = Some(map);
    }

    /// Feed an already split field list, as replay does
    pub fn push_fields(&mut self, fields: &[String]) -> Option<Arc<DataFrame>> {
        let result = match &self.columns {
            Some(map) => self.builder.build(&map.apply(fields)),
            None => self.builder.build(fields),
        };
        match result {
            Ok(frame) => Some(self.publish(frame)),
            Err(e) => {
                self.drop_frame(e.into());
                None
            }
        }
    }

    /// Discard any partially received frame
    pub fn reset(&mut self) {
        if self.reader.buffered() > 0 {
            tracing::debug!("Discarding {} buffered bytes", self.reader.buffered());
        }
        self.reader.reset();
    }

    pub fn flush_sinks(&mut self) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                tracing::warn!("{} failed to flush: {}", sink.name(), e);
                self.stats.sink_errors += 1;
            }
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> PipelineStats {
        let mut stats = self.stats.clone();
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            stats.effective_frame_rate = stats.frames_published as f64 / elapsed;
        }
        stats
    }

    pub(crate) fn record_dropped_message(&mut self) {
        self.stats.dropped_messages += 1;
    }

    fn handle_event(&mut self, event: FrameEvent) -> Option<Arc<DataFrame>> {
        match event {
            FrameEvent::Frame(raw) => {
                self.stats.raw_frames += 1;
                for sink in &mut self.sinks {
                    if let Err(e) = sink.on_raw_frame(&raw) {
                        tracing::warn!("{} rejected raw frame: {}", sink.name(), e);
                        self.stats.sink_errors += 1;
                    }
                }
                match self.process(&raw) {
                    Ok(frame) => Some(self.publish(frame)),
                    Err(e) => {
                        self.drop_frame(e);
                        None
                    }
                }
            }
            FrameEvent::Error(e) => {
                self.drop_frame(e.into());
                None
            }
        }
    }

    fn process(&mut self, raw: &RawFrame) -> Result<DataFrame> {
        let payload = decode(raw, self.decoder)?;
        if self.builder.is_device_json() {
            return Ok(self.builder.build_json(payload.as_text()?)?);
        }
        let fields = self.engine.parse(&payload)?;
        Ok(self.builder.build(&fields)?)
    }

    fn publish(&mut self, frame: DataFrame) -> Arc<DataFrame> {
        for sink in &mut self.sinks {
            if let Err(e) = sink.on_frame(&frame) {
                tracing::warn!("{} rejected frame: {}", sink.name(), e);
                self.stats.sink_errors += 1;
            }
        }
        self.stats.frames_published += 1;
        Arc::new(frame)
    }

    fn drop_frame(&mut self, err: FrameVisError) {
        tracing::debug!("Dropped frame: {}", err);
        self.stats.record_error(&err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDetectionMode;
    use crate::project::{Dataset, Group, Project};
    use std::sync::Mutex;

    fn project() -> Project {
        let mut project = Project::new("Station");
        project.frame_detection = FrameDetectionMode::StartAndEndDelimiter;
        project.frame_start = "$".into();
        project.frame_end = ";".into();
        project.groups.push(
            Group::new("Env")
                .with_dataset(Dataset::new("Temp", 0))
                .with_dataset(Dataset::new("Hum", 1)),
        );
        project
    }

    #[derive(Default, Clone)]
    struct Recorder {
        raw: Arc<Mutex<Vec<Vec<u8>>>>,
        frames: Arc<Mutex<usize>>,
    }

    impl FrameSink for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_raw_frame(&mut self, frame: &RawFrame) -> Result<()> {
            self.raw.lock().unwrap().push(frame.as_bytes().to_vec());
            Ok(())
        }

        fn on_frame(&mut self, _frame: &DataFrame) -> Result<()> {
            *self.frames.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_split_pipeline() {
        let config = SessionConfig::new(Arc::new(project()));
        let recorder = Recorder::default();
        let mut pipeline =
            FramePipeline::new(&config).unwrap().with_sinks(vec![Box::new(recorder.clone())]);

        assert!(pipeline.push_bytes(b"noise$21.5,").is_empty());
        let frames = pipeline.push_bytes(b"40;$1;$22,41;");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].get("Env", "Temp").unwrap().value, Some(21.5));
        assert_eq!(frames[1].get("Env", "Hum").unwrap().text, "41");

        let stats = pipeline.stats();
        assert_eq!(stats.raw_frames, 3);
        assert_eq!(stats.frames_published, 2);
        assert_eq!(stats.mapping_errors, 1);
        assert_eq!(stats.dropped_frames, 1);
        assert_eq!(recorder.raw.lock().unwrap().len(), 3);
        assert_eq!(*recorder.frames.lock().unwrap(), 2);
    }

    #[test]
    fn test_script_pipeline() {
        let mut project = project();
        project.frame_parser =
            Some("fn parse(frame) { let p = frame.split(\",\"); p.reverse(); p }".into());
        let mut pipeline = FramePipeline::new(&SessionConfig::new(Arc::new(project))).unwrap();
        assert!(pipeline.engine().has_script());

        let frames = pipeline.push_bytes(b"$10,20;");
        assert_eq!(frames[0].get("Env", "Temp").unwrap().text, "20");
    }

    #[test]
    fn test_invalid_script_blocks_start() {
        let mut project = project();
        project.frame_parser = Some("fn not_parse(x) { x }".into());
        let result = FramePipeline::new(&SessionConfig::new(Arc::new(project)));
        assert!(matches!(result, Err(FrameVisError::Script(_))));
    }

    #[test]
    fn test_quick_plot() {
        let mut pipeline = FramePipeline::new(&SessionConfig::quick_plot()).unwrap();
        let frames = pipeline.push_bytes(b"1,2,3\r\n4,5\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 3);
        assert_eq!(frames[1].len(), 2);
        assert!(pipeline.builder().is_quick_plot());
    }

    #[test]
    fn test_mapped_columns_follow_dataset_index() {
        let mut project = project();
        project.groups[0].datasets[0].index = 2;
        let mut pipeline = FramePipeline::new(&SessionConfig::new(Arc::new(project))).unwrap();
        pipeline.map_columns(&["Env/Temp".to_string(), "Env/Hum".to_string()]);

        let frame = pipeline
            .push_fields(&["21".to_string(), "40".to_string()])
            .unwrap();
        assert_eq!(frame.get("Env", "Temp").unwrap().text, "21");
        assert_eq!(frame.get("Env", "Hum").unwrap().text, "40");
        assert_eq!(pipeline.stats().mapping_errors, 0);
    }

    #[test]
    fn test_finish_stream_emits_trailing_frame() {
        let mut start_only = project();
        start_only.frame_detection = FrameDetectionMode::StartDelimiterOnly;
        let mut pipeline =
            FramePipeline::new(&SessionConfig::new(Arc::new(start_only))).unwrap();
        assert_eq!(pipeline.push_bytes(b"$1,2$3,4").len(), 1);
        let last = pipeline.finish_stream();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].get("Env", "Temp").unwrap().text, "3");

        let mut pipeline = FramePipeline::new(&SessionConfig::new(Arc::new(project()))).unwrap();
        pipeline.push_bytes(b"$1,2");
        assert!(pipeline.finish_stream().is_empty());
    }

    #[test]
    fn test_device_json() {
        let config = SessionConfig::device_json();
        let mut pipeline = FramePipeline::new(&config).unwrap();
        let frames = pipeline.push_bytes(
            b"/*{\"title\":\"Rover\",\"groups\":[{\"title\":\"Env\",\"datasets\":[{\"title\":\"Temp\",\"value\":21.5}]}]}*//*{oops}*/",
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].get("Env", "Temp").unwrap().value, Some(21.5));
        assert_eq!(pipeline.stats().mapping_errors, 1);
    }

    #[test]
    fn test_push_fields_and_reset() {
        let mut pipeline = FramePipeline::new(&SessionConfig::new(Arc::new(project()))).unwrap();
        let fields = vec!["1".to_string(), "2".to_string()];
        assert!(pipeline.push_fields(&fields).is_some());
        assert!(pipeline.push_fields(&fields[..1]).is_none());

        pipeline.push_bytes(b"$1,");
        pipeline.reset();
        assert!(pipeline.push_bytes(b"2;").is_empty());
    }
}
