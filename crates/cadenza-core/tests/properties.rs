//! Property-based tests for graph compilation, conversion, and mixing.
//!
//! Random topologies check render ordering and cycle rejection; random
//! signals check converter accuracy and the mixer's sum-and-clamp law.

use cadenza_core::{
    EngineConfig, Error, Format, FormatConverter, Graph, MixerNode, NodeId, OfflineSource,
    Pulled, SampleBuffer, SampleFormat,
};
use proptest::prelude::*;

fn stereo() -> Format {
    Format::new(48_000.0, 2, SampleFormat::Float32).unwrap()
}

/// Builds `count` three-input mixers wired by `edges` (forward edges only)
/// with the last mixer feeding the output boundary.
fn random_dag(count: usize, edges: &[(usize, usize)]) -> (Graph, Vec<NodeId>) {
    let (mut graph, _renderer) = Graph::new(EngineConfig::with_format(stereo())).unwrap();
    let nodes: Vec<NodeId> = (0..count)
        .map(|_| graph.add_node(MixerNode::new(3)).unwrap())
        .collect();
    for &(a, b) in edges {
        let (a, b) = (a % count, b % count);
        if a >= b {
            continue;
        }
        if let Some(bus) = graph.next_available_input_bus(nodes[b]).unwrap() {
            graph.connect(nodes[a], 0, nodes[b], bus).unwrap();
        }
    }
    let last = nodes[count - 1];
    graph.connect(last, 0, graph.output(), 0).unwrap();
    (graph, nodes)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every scheduled node renders after all of its scheduled sources, and
    /// recompiling the same topology yields the same order.
    #[test]
    fn render_order_respects_connections(
        count in 1usize..10,
        edges in prop::collection::vec((0usize..10, 0usize..10), 0..30),
    ) {
        let (mut graph, nodes) = random_dag(count, &edges);
        graph.commit().unwrap();
        let order = graph.render_order().to_vec();
        prop_assert_eq!(order.last().copied(), Some(graph.output()));

        let position = |id: NodeId| order.iter().position(|&n| n == id);
        for &node in &nodes {
            for conn in graph.connections_of(node).unwrap() {
                let conn = graph.connection(conn).unwrap();
                if let (Some(src), Some(dst)) = (position(conn.source()), position(conn.destination())) {
                    prop_assert!(src < dst, "{} scheduled after {}", conn.source(), conn.destination());
                }
            }
        }

        graph.commit().unwrap();
        prop_assert_eq!(graph.render_order(), order.as_slice());
    }

    /// Closing a chain into a loop is rejected and leaves the graph and the
    /// committed snapshot untouched.
    #[test]
    fn back_edge_is_rejected(
        count in 2usize..10,
        from in 0usize..10,
        to in 0usize..10,
    ) {
        let (from, to) = (from % count, to % count);
        prop_assume!(from <= to);
        let chain: Vec<(usize, usize)> = (0..count - 1).map(|i| (i, i + 1)).collect();
        let (mut graph, nodes) = random_dag(count, &chain);
        let version = graph.commit().unwrap();
        let connections = graph.connection_count();

        let result = graph.connect(nodes[to], 0, nodes[from], 2);
        prop_assert_eq!(result, Err(Error::CycleDetected));
        prop_assert_eq!(graph.connection_count(), connections);
        prop_assert_eq!(graph.committed_version(), Some(version));
    }

    /// Float to int16 and back stays within one LSB of the clamped input.
    #[test]
    fn int16_round_trip_within_one_lsb(
        samples in prop::collection::vec(-1.5f32..1.5f32, 1..256),
    ) {
        let float = Format::new(48_000.0, 1, SampleFormat::Float32).unwrap();
        let int16 = float.with_sample_format(SampleFormat::Int16);
        let mut src = SampleBuffer::allocate(float, samples.len());
        src.write_interleaved(&samples).unwrap();
        let mut mid = SampleBuffer::allocate(int16, samples.len());
        let mut out = SampleBuffer::allocate(float, samples.len());
        FormatConverter::new(float, int16).unwrap().convert(&src.view(), &mut mid).unwrap();
        FormatConverter::new(int16, float).unwrap().convert(&mid.view(), &mut out).unwrap();

        let lsb = SampleFormat::Int16.lsb();
        for (&x, &y) in samples.iter().zip(out.channel(0)) {
            let expected = SampleFormat::Int16.clamp(x);
            prop_assert!((expected - y).abs() <= lsb, "{} -> {}", x, y);
        }
    }

    /// Linear resampling of a full-scale sine stays within (pi f / fs)^2 / 2
    /// of the ideal signal, delayed by one source frame.
    #[test]
    fn resampled_sine_error_bounded(freq in 20.0f64..5000.0) {
        let fs = 44_100.0;
        let source = Format::new(fs, 1, SampleFormat::Float32).unwrap();
        let destination = Format::new(48_000.0, 1, SampleFormat::Float32).unwrap();
        let omega = 2.0 * std::f64::consts::PI * freq / fs;
        let samples: Vec<f32> = (0..512).map(|n| (omega * n as f64).sin() as f32).collect();
        let mut src = SampleBuffer::allocate(source, 512);
        src.write_interleaved(&samples).unwrap();

        let mut converter = FormatConverter::new(source, destination).unwrap();
        let mut out = SampleBuffer::allocate(destination, converter.max_output_frames(512));
        let produced = converter.convert(&src.view(), &mut out).unwrap();

        let step = fs / 48_000.0;
        let bound = (std::f64::consts::PI * freq / fs).powi(2) / 2.0 + 1e-5;
        for (k, &y) in out.channel(0)[..produced].iter().enumerate().skip(2) {
            let x = k as f64 * step - 1.0;
            let ideal = (omega * x).sin();
            prop_assert!((ideal - y as f64).abs() <= bound, "frame {}: {} vs {}", k, y, ideal);
        }
    }

    /// Mixer output equals the gain-weighted input sum, clamped to full scale.
    #[test]
    fn mixer_sums_and_clamps(
        inputs in prop::collection::vec((-1.0f32..1.0f32, -2.0f32..2.0f32), 1..6),
    ) {
        let format = Format::new(48_000.0, 1, SampleFormat::Float32).unwrap();
        let (mut graph, mut renderer) =
            Graph::new(EngineConfig::with_format(format).with_max_frames(32)).unwrap();
        let mut mixer = MixerNode::new(inputs.len());
        for (bus, &(_, gain)) in inputs.iter().enumerate() {
            mixer = mixer.with_gain(bus, gain);
        }
        let mixer = graph.add_node(mixer).unwrap();
        for (bus, &(value, _)) in inputs.iter().enumerate() {
            let source = graph.add_node(OfflineSource::constant(format, 32, value)).unwrap();
            graph.connect(source, 0, mixer, bus).unwrap();
        }
        graph.connect(mixer, 0, graph.output(), 0).unwrap();
        graph.commit().unwrap();

        let expected = inputs
            .iter()
            .map(|&(value, gain)| value * gain)
            .sum::<f32>()
            .clamp(-1.0, 1.0);
        let Pulled::Frames(view) = renderer.pull(32).unwrap() else {
            panic!("sources ended early");
        };
        for &sample in view.channel(0) {
            prop_assert!((sample - expected).abs() < 1e-5, "{} vs {}", sample, expected);
        }
    }
}
