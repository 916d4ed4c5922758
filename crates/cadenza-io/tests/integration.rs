//! Integration tests for cadenza-io file rendering and hardware streaming.

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use cadenza_core::{
    Completion, EngineConfig, Format, Graph, InputNode, MixerNode, OfflineRender, OfflineSource,
    Renderer, SampleBuffer, SampleFormat,
};
use cadenza_io::{
    AudioBackend, AudioDevice, AudioIo, BackendStreamConfig, Error, ErrorCallback, InputCallback,
    OutputCallback, StreamHandle, WavFileReader, WavFileWriter, read_wav_info,
};
use tempfile::NamedTempFile;

fn stereo(sample_format: SampleFormat) -> Format {
    Format::new(44_100.0, 2, sample_format).unwrap()
}

/// Source feeding a mixer with gain 2.0 into the output.
fn doubling_graph(source: OfflineSource, format: Format) -> (Graph, Renderer) {
    let config = EngineConfig::with_format(format).with_max_frames(1024);
    let (mut graph, renderer) = Graph::new(config).unwrap();
    let src = graph.add_node(source).unwrap();
    let mix = graph.add_node(MixerNode::new(1).with_gain(0, 2.0)).unwrap();
    graph.connect(src, 0, mix, 0).unwrap();
    graph.connect(mix, 0, graph.output(), 0).unwrap();
    graph.commit().unwrap();
    (graph, renderer)
}

fn write_constant(path: &std::path::Path, format: Format, frames: usize, value: f32) {
    let mut buffer = SampleBuffer::allocate(format, frames);
    let samples = vec![value; frames * format.channel_count()];
    buffer.write_interleaved(&samples).unwrap();

    let mut writer = WavFileWriter::create(path, format).unwrap();
    writer.append(&buffer.view()).unwrap();
    assert_eq!(writer.finalize().unwrap(), frames as u64);
}

fn read_all(path: &std::path::Path) -> SampleBuffer {
    let mut reader = WavFileReader::open(path).unwrap();
    let mut buffer = SampleBuffer::allocate(reader.format(), reader.frame_count() as usize);
    reader.read_chunk(&mut buffer).unwrap();
    buffer
}

// ---------------------------------------------------------------------------
// Offline file rendering
// ---------------------------------------------------------------------------

#[test]
fn file_to_file_render_applies_gain() {
    let format = stereo(SampleFormat::Float32);
    let input = NamedTempFile::new().unwrap();
    let output = NamedTempFile::new().unwrap();
    write_constant(input.path(), format, 1024, 0.25);

    let reader = WavFileReader::open(input.path()).unwrap();
    assert_eq!(reader.format(), format);
    let (_graph, mut renderer) = doubling_graph(reader.into_source().unwrap(), format);

    let mut writer = WavFileWriter::create(output.path(), format).unwrap();
    let outcome = OfflineRender::new(&mut renderer)
        .quantum(256)
        .run(&mut writer)
        .unwrap();
    assert_eq!(outcome.completion, Completion::Finished);
    assert_eq!(outcome.frames, 1024);
    assert_eq!(writer.finalize().unwrap(), 1024);

    let info = read_wav_info(output.path()).unwrap();
    assert_eq!(info.num_frames, 1024);
    assert_eq!(info.format, format);

    let rendered = read_all(output.path());
    for ch in 0..2 {
        assert!(rendered.channel(ch).iter().all(|&s| s == 0.5));
    }
}

#[test]
fn float_render_written_as_int16() {
    let format = stereo(SampleFormat::Float32);
    let source = OfflineSource::constant(format, 512, 0.25);
    let (_graph, mut renderer) = doubling_graph(source, format);

    let output = NamedTempFile::new().unwrap();
    let mut writer = WavFileWriter::create(output.path(), stereo(SampleFormat::Int16)).unwrap();
    OfflineRender::new(&mut renderer)
        .quantum(256)
        .run(&mut writer)
        .unwrap();
    writer.finalize().unwrap();

    let info = read_wav_info(output.path()).unwrap();
    assert_eq!(info.bits_per_sample, 16);
    assert_eq!(info.num_frames, 512);

    // 0.5 sits exactly on the 16-bit grid.
    let rendered = read_all(output.path());
    assert!(rendered.channel(1).iter().all(|&s| s == 0.5));
}

#[test]
fn render_limit_truncates_file() {
    let format = stereo(SampleFormat::Float32);
    let source = OfflineSource::constant(format, 4096, 0.25);
    let (_graph, mut renderer) = doubling_graph(source, format);

    let output = NamedTempFile::new().unwrap();
    let mut writer = WavFileWriter::create(output.path(), format).unwrap();
    let outcome = OfflineRender::new(&mut renderer)
        .limit(300)
        .run(&mut writer)
        .unwrap();
    assert_eq!(outcome.completion, Completion::LimitReached);
    assert_eq!(writer.finalize().unwrap(), 300);
}

#[test]
fn mismatched_sink_channels_cancel_render() {
    let format = stereo(SampleFormat::Float32);
    let source = OfflineSource::constant(format, 512, 0.25);
    let (_graph, mut renderer) = doubling_graph(source, format);

    let output = NamedTempFile::new().unwrap();
    let mono = Format::new(44_100.0, 1, SampleFormat::Float32).unwrap();
    let mut writer = WavFileWriter::create(output.path(), mono).unwrap();
    let cancelled = Cell::new(None);
    let result = OfflineRender::new(&mut renderer)
        .on_complete(|c| cancelled.set(Some(c)))
        .run(&mut writer);
    assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
    assert_eq!(cancelled.get(), Some(true));
}

// ---------------------------------------------------------------------------
// Hardware streaming through a hand-driven backend
// ---------------------------------------------------------------------------

type Slot<T> = Arc<Mutex<Option<T>>>;

/// Backend that keeps the stream callbacks so tests can stand in for the device.
#[derive(Default)]
struct ManualBackend {
    output: Slot<OutputCallback>,
    input: Slot<InputCallback>,
}

impl AudioBackend for ManualBackend {
    fn name(&self) -> &str {
        "manual"
    }

    fn list_devices(&self) -> cadenza_io::Result<Vec<AudioDevice>> {
        Ok(Vec::new())
    }

    fn default_output_device(&self) -> cadenza_io::Result<Option<AudioDevice>> {
        Ok(None)
    }

    fn default_input_device(&self) -> cadenza_io::Result<Option<AudioDevice>> {
        Ok(None)
    }

    fn build_output_stream(
        &self,
        _config: &BackendStreamConfig,
        callback: OutputCallback,
        _error_callback: ErrorCallback,
    ) -> cadenza_io::Result<StreamHandle> {
        *self.output.lock().unwrap() = Some(callback);
        Ok(StreamHandle::new(()))
    }

    fn build_input_stream(
        &self,
        _config: &BackendStreamConfig,
        callback: InputCallback,
        _error_callback: ErrorCallback,
    ) -> cadenza_io::Result<StreamHandle> {
        *self.input.lock().unwrap() = Some(callback);
        Ok(StreamHandle::new(()))
    }
}

fn device_pull(slot: &Slot<OutputCallback>, frames: usize) -> Vec<f32> {
    let mut data = vec![f32::NAN; frames * 2];
    let mut guard = slot.lock().unwrap();
    let callback = guard.as_mut().expect("output stream built");
    callback(&mut data);
    data
}

#[test]
fn audio_io_plays_graph_until_end_of_stream() {
    let format = stereo(SampleFormat::Float32);
    let backend = ManualBackend::default();
    let output = Arc::clone(&backend.output);
    let mut io = AudioIo::new(Box::new(backend));

    let (_graph, renderer) = doubling_graph(OfflineSource::constant(format, 1200, 0.5), format);
    let config = BackendStreamConfig::for_format(&format, 600, None);
    io.start(renderer, &config).unwrap();
    assert!(io.is_running());
    assert_eq!(io.backend().name(), "manual");

    assert!(device_pull(&output, 600).iter().all(|&s| s == 1.0));
    assert!(device_pull(&output, 600).iter().all(|&s| s == 1.0));
    assert!(!io.is_finished());
    assert!(device_pull(&output, 600).iter().all(|&s| s == 0.0));
    assert!(io.is_finished());

    io.stop();
    assert!(!io.is_running());
}

#[test]
fn audio_io_rejects_second_stream_and_wrong_format() {
    let format = stereo(SampleFormat::Float32);
    let mut io = AudioIo::new(Box::new(ManualBackend::default()));

    let (_g1, renderer) = doubling_graph(OfflineSource::constant(format, 16, 0.5), format);
    let mono = BackendStreamConfig {
        channels: 1,
        sample_rate: 44_100,
        ..BackendStreamConfig::default()
    };
    assert!(matches!(
        io.start(renderer, &mono),
        Err(Error::UnsupportedFormat(_))
    ));

    let config = BackendStreamConfig::for_format(&format, 256, None);
    let (_g2, renderer) = doubling_graph(OfflineSource::constant(format, 16, 0.5), format);
    io.start(renderer, &config).unwrap();
    let (_g3, renderer) = doubling_graph(OfflineSource::constant(format, 16, 0.5), format);
    assert!(matches!(
        io.start(renderer, &config),
        Err(Error::AlreadyRunning)
    ));
}

#[test]
fn audio_io_counts_dropped_input() {
    let format = stereo(SampleFormat::Float32);
    let backend = ManualBackend::default();
    let input = Arc::clone(&backend.input);
    let mut io = AudioIo::new(Box::new(backend));

    let (_node, feed) = InputNode::new(format, 4);
    let config = BackendStreamConfig::for_format(&format, 64, None);
    io.start_input(feed, &config).unwrap();

    let captured = vec![0.1; 10 * 2];
    let mut guard = input.lock().unwrap();
    let callback = guard.as_mut().expect("input stream built");
    callback(&captured);
    drop(guard);

    assert_eq!(io.dropped_input_frames(), 6);
}
