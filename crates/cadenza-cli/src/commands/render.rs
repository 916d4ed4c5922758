//! Offline file-to-file rendering command.

use std::path::PathBuf;

use anyhow::Context;
use cadenza_core::{BufferView, CancelToken, Completion, OfflineRender, OfflineSink};
use cadenza_io::{WavFileReader, WavFileWriter};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use super::common::{
    build_graph, load_settings, output_format, report_events, sample_format_for_bits,
};

#[derive(Args)]
pub struct RenderArgs {
    /// Input WAV file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output WAV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Linear gain applied by the mixer
    #[arg(short, long, default_value = "1.0")]
    gain: f32,

    /// Output sample rate in Hz (defaults to the input rate)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Output channel count (defaults to the input channel count)
    #[arg(long)]
    channels: Option<u16>,

    /// Output bit depth: 16, 24, or 32 (float). Defaults to the input encoding.
    #[arg(long)]
    bit_depth: Option<u16>,

    /// Frames rendered per pull (defaults to the configured max_frames)
    #[arg(long)]
    quantum: Option<usize>,

    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// WAV sink that advances a progress bar.
struct ProgressSink {
    writer: WavFileWriter,
    progress: ProgressBar,
}

impl OfflineSink for ProgressSink {
    type Error = cadenza_io::Error;

    fn write(&mut self, block: &BufferView<'_>) -> Result<(), Self::Error> {
        self.writer.append(block)?;
        self.progress.inc(block.frames() as u64);
        Ok(())
    }
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let settings = load_settings(args.config.as_deref())?;

    println!("Reading {}...", args.input.display());
    let reader = WavFileReader::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let input_format = reader.format();
    let input_frames = reader.frame_count();
    println!(
        "  {} frames, {}, {:.2}s",
        input_frames,
        input_format,
        input_frames as f64 / input_format.sample_rate()
    );

    let sample_format = args.bit_depth.map(sample_format_for_bits).transpose()?;
    let format = output_format(
        input_format.with_interleaved(false),
        args.sample_rate,
        args.channels,
        sample_format,
    )?;

    let mut config = settings.engine_config()?;
    config.format = format;
    if let Some(quantum) = args.quantum {
        config.max_frames = quantum;
    }

    let source = reader.into_source().context("decoding input")?;
    let (mut graph, mut renderer) = build_graph(source, args.gain, config)?;

    let writer = WavFileWriter::create(&args.output, format)
        .with_context(|| format!("creating {}", args.output.display()))?;

    // Output length at the output rate; the last quantum is trimmed to it.
    let expected =
        (input_frames as f64 * format.sample_rate() / input_format.sample_rate()).ceil() as u64;
    let progress = ProgressBar::new(expected);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    println!("Rendering to {}...", format);
    let mut sink = ProgressSink { writer, progress };
    let outcome = OfflineRender::new(&mut renderer)
        .limit(expected)
        .cancel_token(cancel)
        .run(&mut sink)
        .context("rendering")?;
    let ProgressSink { writer, progress } = sink;
    progress.finish_with_message("done");

    let frames = writer.finalize().context("finalizing output")?;
    let faults = report_events(&mut graph);

    match outcome.completion {
        Completion::Cancelled => println!("\nCancelled after {frames} frames"),
        Completion::Finished | Completion::LimitReached => println!(
            "\nWrote {} frames ({:.2}s) to {}",
            frames,
            frames as f64 / format.sample_rate(),
            args.output.display()
        ),
    }
    if faults > 0 {
        println!("  {faults} render fault(s), see log");
    }

    Ok(())
}
