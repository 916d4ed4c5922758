//! Audio file playback through the graph on a hardware device.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use cadenza_io::{AudioIo, BackendStreamConfig, CpalBackend, WavFileReader};
use clap::Args;

use super::common::{build_graph, load_settings, report_events};

#[derive(Args)]
pub struct PlayArgs {
    /// WAV file to play
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Linear gain applied by the mixer
    #[arg(short, long, default_value = "1.0")]
    gain: f32,

    /// Output device (exact or partial name)
    #[arg(short, long)]
    device: Option<String>,

    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

pub fn run(args: PlayArgs) -> anyhow::Result<()> {
    let settings = load_settings(args.config.as_deref())?;

    println!("Loading {}...", args.file.display());
    let reader = WavFileReader::open(&args.file)
        .with_context(|| format!("opening {}", args.file.display()))?;
    let frames = reader.frame_count();
    let file_format = reader.format();
    println!(
        "  {} frames, {}, {:.1}s",
        frames,
        file_format,
        frames as f64 / file_format.sample_rate()
    );

    // The source connection resamples the file to the device rate.
    let config = settings.engine_config()?;
    let (mut graph, renderer) = build_graph(reader.into_source()?, args.gain, config)?;

    let device = args.device.or_else(|| settings.output.device.clone());
    let stream_config =
        BackendStreamConfig::for_format(&config.format, settings.output.buffer_size, device);

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    let mut io = AudioIo::new(Box::new(CpalBackend::new()));
    io.start(renderer, &stream_config)
        .context("starting output stream")?;

    println!(
        "\nPlaying at {} Hz... Press Ctrl+C to stop.\n",
        stream_config.sample_rate
    );

    while running.load(Ordering::SeqCst) && !io.is_finished() {
        std::thread::sleep(Duration::from_millis(100));
        report_events(&mut graph);
    }
    io.stop();
    report_events(&mut graph);

    println!("Done!");
    Ok(())
}
