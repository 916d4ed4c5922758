//! Shared helpers for CLI commands.

use std::path::Path;

use anyhow::Context;
use cadenza_config::Settings;
use cadenza_core::{
    EngineConfig, Format, Graph, MixerNode, OfflineSource, RenderEvent, Renderer, SampleFormat,
};

/// Loads the settings file, or defaults when none exists.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = Settings::load_or_default(path).with_context(|| match path {
        Some(path) => format!("loading config {}", path.display()),
        None => "loading default config".to_string(),
    })?;
    Ok(settings)
}

/// Builds `source -> mixer(gain) -> output` and commits it.
///
/// The mixer runs in `Float32` at the output rate and channel count, so the
/// source connection does any resampling or channel mapping, and the output
/// boundary quantizes to the output encoding.
pub fn build_graph(
    source: OfflineSource,
    gain: f32,
    config: EngineConfig,
) -> anyhow::Result<(Graph, Renderer)> {
    let mix_format = config
        .format
        .with_sample_format(SampleFormat::Float32)
        .with_interleaved(false);
    let (mut graph, renderer) = Graph::new(config).context("creating graph")?;
    let src = graph.add_node(source)?;
    let mix = graph.add_node(MixerNode::new(1).with_format(mix_format).with_gain(0, gain))?;
    graph.connect(src, 0, mix, 0)?;
    graph.connect(mix, 0, graph.output(), 0)?;
    let version = graph.commit().context("committing graph")?;
    tracing::debug!(version, order = ?graph.render_order(), "graph committed");
    Ok((graph, renderer))
}

/// Output format from command-line overrides on top of a base format.
pub fn output_format(
    base: Format,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    sample_format: Option<SampleFormat>,
) -> anyhow::Result<Format> {
    let mut format = base;
    if let Some(rate) = sample_rate {
        format = format.with_sample_rate(f64::from(rate))?;
    }
    if let Some(channels) = channels {
        format = format.with_channel_count(channels)?;
    }
    if let Some(sample_format) = sample_format {
        format = format.with_sample_format(sample_format);
    }
    Ok(format)
}

/// Maps a WAV bit depth flag onto a sample encoding. 32 selects float.
pub fn sample_format_for_bits(bits: u16) -> anyhow::Result<SampleFormat> {
    match bits {
        16 => Ok(SampleFormat::Int16),
        24 => Ok(SampleFormat::Int24),
        32 => Ok(SampleFormat::Float32),
        other => anyhow::bail!("unsupported bit depth {other} (expected 16, 24, or 32)"),
    }
}

/// Logs render faults and returns how many there were.
pub fn report_events(graph: &mut Graph) -> usize {
    let mut faults = 0;
    for event in graph.drain_events() {
        match event {
            RenderEvent::Fault { node, fault } => {
                faults += 1;
                tracing::warn!(%node, ?fault, "render fault");
            }
            other => tracing::debug!(?other, "render event"),
        }
    }
    let dropped = graph.dropped_events();
    if dropped > 0 {
        tracing::warn!(dropped, "render events dropped");
    }
    faults
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_depth_mapping() {
        assert_eq!(sample_format_for_bits(16).unwrap(), SampleFormat::Int16);
        assert_eq!(sample_format_for_bits(24).unwrap(), SampleFormat::Int24);
        assert_eq!(sample_format_for_bits(32).unwrap(), SampleFormat::Float32);
        assert!(sample_format_for_bits(8).is_err());
    }

    #[test]
    fn test_output_format_overrides() {
        let base = Format::new(44_100.0, 1, SampleFormat::Int16).unwrap();
        let format = output_format(base, Some(48000), Some(2), None).unwrap();
        assert_eq!(format.sample_rate(), 48000.0);
        assert_eq!(format.channel_count(), 2);
        assert_eq!(format.sample_format(), SampleFormat::Int16);
        assert!(output_format(base, None, Some(0), None).is_err());
    }

    #[test]
    fn test_build_graph_renders_gain() {
        let format = Format::new(48_000.0, 2, SampleFormat::Float32).unwrap();
        let source = OfflineSource::constant(format, 64, 0.25);
        let config = EngineConfig::with_format(format).with_max_frames(64);
        let (mut graph, mut renderer) = build_graph(source, 2.0, config).unwrap();
        let mut out = vec![0.0; 128];
        renderer.render_interleaved(&mut out);
        assert!(out.iter().all(|&s| s == 0.5));
        assert_eq!(report_events(&mut graph), 0);
    }
}
