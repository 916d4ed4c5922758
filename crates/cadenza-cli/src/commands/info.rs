//! Display WAV file metadata.

use anyhow::Context;
use cadenza_io::read_wav_info;
use clap::Args;

/// Display WAV file information.
#[derive(Args)]
pub struct InfoArgs {
    /// Path to the WAV file
    pub file: std::path::PathBuf,
}

/// Run the info command.
pub fn run(args: InfoArgs) -> anyhow::Result<()> {
    let info =
        read_wav_info(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let encoding = if info.format.sample_format().is_float() {
        "IEEE Float"
    } else {
        "PCM"
    };

    println!("File:        {}", args.file.display());
    println!("Format:      {} {}-bit", encoding, info.bits_per_sample);
    println!("Channels:    {}", info.format.channel_count());
    println!("Sample Rate: {} Hz", info.format.sample_rate());
    println!(
        "Duration:    {:.3}s ({} frames)",
        info.duration_secs, info.num_frames
    );

    let file_size = std::fs::metadata(&args.file)?.len();
    println!("File Size:   {}", format_bytes(file_size));

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
