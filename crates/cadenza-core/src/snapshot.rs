//! Snapshot compilation: render order, format resolution, and buffer plan.
//!
//! Compiling a snapshot walks the graph in four passes:
//!
//! 1. **Sort**: Kahn's algorithm over every live node. Ties go to the node
//!    created first, so equal graphs always compile to equal orders.
//! 2. **Negotiate**: formats flow from sources toward the output boundary in
//!    sorted order, each node applying its [`FormatRule`](crate::node::FormatRule).
//! 3. **Select**: only nodes the output boundary can reach are scheduled.
//!    Every connection into a scheduled node whose formats differ gets a
//!    [`FormatConverter`].
//! 4. **Allocate**: each output bus and each converter target is a virtual
//!    buffer live from the step that writes it to the last step that reads it.
//!    Virtual buffers are packed into physical pool slots greedily, a slot
//!    becoming free the step after its last read.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::buffer::{BufferPool, SampleBuffer};
use crate::connection::{Connection, ConnectionId};
use crate::converter::FormatConverter;
use crate::error::{Error, Result};
use crate::format::{Format, rate_ratio_supported};
use crate::graph::NodeEntry;
use crate::node::NodeId;

/// A format conversion run just before the consuming node renders.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Conversion {
    pub converter: usize,
    pub source: usize,
    pub target: usize,
    /// Step that writes `source`.
    pub source_step: usize,
}

/// One node invocation within a quantum.
#[derive(Debug)]
pub(crate) struct Step {
    pub node: NodeId,
    /// Kernel arena slot.
    pub slot: usize,
    /// Source frames per render frame when this node runs at another rate.
    pub step_ratio: Option<f64>,
    pub conversions: Vec<Conversion>,
    /// Pool slot read on each input bus, after conversion.
    pub inputs: Vec<Option<usize>>,
    /// Step that produced each direct (unconverted) input.
    pub input_steps: Vec<Option<usize>>,
    pub outputs: Vec<usize>,
    pub output_formats: Vec<Format>,
    pub finite: bool,
}

/// Immutable render plan for one committed topology.
///
/// Only the pool contents, converter state, and scratch list change while
/// rendering; the plan itself never does.
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub version: u64,
    pub format: Format,
    pub steps: Vec<Step>,
    pub pool: BufferPool,
    pub converters: Vec<FormatConverter>,
    /// Pool slot holding the output boundary's audio.
    pub output_slot: Option<usize>,
    /// Scheduled nodes that can report end of stream.
    pub finite_sources: usize,
    /// Holding area for output buffers while a node renders.
    pub scratch: Vec<SampleBuffer>,
}

impl Snapshot {
    /// A snapshot that schedules nothing and renders silence.
    pub fn empty(version: u64, format: Format, pool: BufferPool) -> Self {
        Self {
            version,
            format,
            steps: Vec::new(),
            pool,
            converters: Vec::new(),
            output_slot: None,
            finite_sources: 0,
            scratch: Vec::new(),
        }
    }
}

/// Everything a successful compilation produces besides the snapshot.
#[derive(Debug)]
pub(crate) struct Compiled {
    pub snapshot: Snapshot,
    /// Scheduled nodes in render order.
    pub order: Vec<NodeId>,
    /// Resolved format and largest quantum per node index, for `prepare`.
    pub node_formats: Vec<Option<(Format, usize)>>,
    /// Effective format of every scheduled connection.
    pub connection_formats: Vec<(ConnectionId, Format)>,
}

/// Read-only view of the graph tables a compilation needs.
pub(crate) struct Topology<'g> {
    pub nodes: &'g [Option<NodeEntry>],
    pub connections: &'g [Option<Connection>],
    pub output: NodeId,
    pub format: Format,
    pub max_frames: usize,
}

/// Step-indexed instruction before physical slots are assigned.
struct RawStep {
    node_idx: usize,
    conversions: Vec<Conversion>,
    inputs: Vec<Option<usize>>,
    input_steps: Vec<Option<usize>>,
    outputs: Vec<usize>,
    output_formats: Vec<Format>,
    step_ratio: Option<f64>,
}

impl Topology<'_> {
    fn entry(&self, idx: usize) -> &NodeEntry {
        // Only called with indices produced by iterating live entries.
        self.nodes[idx]
            .as_ref()
            .unwrap_or_else(|| unreachable!("node {idx} vanished during compilation"))
    }

    fn connection(&self, id: ConnectionId) -> &Connection {
        self.connections[id.0 as usize]
            .as_ref()
            .unwrap_or_else(|| unreachable!("connection {id} vanished during compilation"))
    }

    /// Compiles the topology into a snapshot tagged `version`.
    pub fn compile(&self, version: u64) -> Result<Compiled> {
        let sorted = self.kahn_sort()?;
        let (outputs, required) = self.negotiate(&sorted);
        let reachable = self.reachable_from_output();

        let node_format = |idx: usize| -> Format {
            outputs[idx]
                .first()
                .copied()
                .flatten()
                .unwrap_or(self.format)
        };
        let step_ratio = |idx: usize| -> Result<Option<f64>> {
            let rate = node_format(idx).sample_rate();
            let render_rate = self.format.sample_rate();
            if rate == render_rate {
                return Ok(None);
            }
            if !rate_ratio_supported(rate, render_rate) {
                return Err(Error::UnsupportedFormat(format!(
                    "node {} runs at {rate} Hz, too far from the {render_rate} Hz render rate",
                    self.entry(idx).id
                )));
            }
            Ok(Some(rate / render_rate))
        };
        let frames_for = |ratio: Option<f64>| -> usize {
            ratio.map_or(self.max_frames, |r| {
                (self.max_frames as f64 * r).ceil() as usize + 1
            })
        };

        let scheduled: Vec<usize> = sorted.iter().copied().filter(|&i| reachable[i]).collect();
        let mut step_of = vec![None; self.nodes.len()];
        for (step, &idx) in scheduled.iter().enumerate() {
            step_of[idx] = Some(step);
        }

        // Virtual buffers: (first write step, last read step, format).
        let mut vbufs: Vec<(usize, usize, Format)> = Vec::new();
        let mut node_vbufs: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut raw_steps = Vec::with_capacity(scheduled.len());
        for (step, &idx) in scheduled.iter().enumerate() {
            let entry = self.entry(idx);
            let output_formats: Vec<Format> = (0..entry.outputs.len())
                .map(|bus| outputs[idx].get(bus).copied().flatten().unwrap_or(self.format))
                .collect();
            for &format in &output_formats {
                node_vbufs[idx].push(vbufs.len());
                vbufs.push((step, step, format));
            }
            raw_steps.push(RawStep {
                node_idx: idx,
                conversions: Vec::new(),
                inputs: vec![None; entry.inputs.len()],
                input_steps: vec![None; entry.inputs.len()],
                outputs: node_vbufs[idx].clone(),
                output_formats,
                step_ratio: step_ratio(idx)?,
            });
        }

        let mut converters = Vec::new();
        let mut connection_formats = Vec::new();
        let render_rate = self.format.sample_rate();
        for (step, &idx) in scheduled.iter().enumerate() {
            let entry = self.entry(idx);
            for (bus, conn_id) in entry.inputs.iter().enumerate() {
                let Some(conn_id) = *conn_id else { continue };
                let conn = self.connection(conn_id);
                let src_idx = conn.source.0 as usize;
                let Some(source_step) = step_of[src_idx] else {
                    unreachable!("source of a scheduled node is always scheduled");
                };
                if source_step >= step {
                    return Err(Error::OrderingViolation {
                        node: entry.id,
                        upstream: conn.source,
                    });
                }
                let src_vbuf = node_vbufs[src_idx][conn.source_bus];
                vbufs[src_vbuf].1 = vbufs[src_vbuf].1.max(step);
                let upstream = vbufs[src_vbuf].2;
                let wanted = required[idx].get(bus).copied().flatten().unwrap_or(upstream);

                let mapped = conn.channel_map.as_ref().is_some_and(|m| !m.is_identity());
                let raw = &mut raw_steps[step];
                if upstream.matches(&wanted) && !mapped {
                    raw.inputs[bus] = Some(src_vbuf);
                    raw.input_steps[bus] = Some(source_step);
                    connection_formats.push((conn_id, upstream));
                    continue;
                }
                if upstream.sample_rate() != wanted.sample_rate() && wanted.sample_rate() != render_rate {
                    return Err(Error::UnsupportedFormat(format!(
                        "{conn_id}: resampling {} Hz → {} Hz is only supported into the {render_rate} Hz render rate",
                        upstream.sample_rate(),
                        wanted.sample_rate()
                    )));
                }
                let converter = match &conn.channel_map {
                    Some(map) => FormatConverter::with_channel_map(upstream, wanted, map.clone())?,
                    None => FormatConverter::new(upstream, wanted)?,
                };
                let target = vbufs.len();
                vbufs.push((step, step, wanted));
                raw.conversions.push(Conversion {
                    converter: converters.len(),
                    source: src_vbuf,
                    target,
                    source_step,
                });
                raw.inputs[bus] = Some(target);
                converters.push(converter);
                connection_formats.push((conn_id, wanted));
            }
        }

        // The output boundary's buffer is read after the last step.
        let output_idx = self.output.0 as usize;
        let output_vbuf = node_vbufs[output_idx].first().copied();
        if let Some(v) = output_vbuf {
            vbufs[v].1 = scheduled.len();
        }

        let (phys, slot_count) = assign_buffers(&vbufs);
        let channels = vbufs.iter().map(|v| v.2.channel_count()).max().unwrap_or(0);
        let frames = raw_steps
            .iter()
            .map(|s| frames_for(s.step_ratio))
            .max()
            .unwrap_or(self.max_frames);
        let scratch_len = raw_steps.iter().map(|s| s.outputs.len()).max().unwrap_or(0);

        let mut finite_sources = 0;
        let steps: Vec<Step> = raw_steps
            .into_iter()
            .map(|raw| {
                let entry = self.entry(raw.node_idx);
                if entry.finite {
                    finite_sources += 1;
                }
                Step {
                    node: entry.id,
                    slot: entry.slot,
                    step_ratio: raw.step_ratio,
                    conversions: raw
                        .conversions
                        .into_iter()
                        .map(|c| Conversion {
                            source: phys[c.source],
                            target: phys[c.target],
                            ..c
                        })
                        .collect(),
                    inputs: raw.inputs.iter().map(|v| v.map(|v| phys[v])).collect(),
                    input_steps: raw.input_steps,
                    outputs: raw.outputs.iter().map(|&v| phys[v]).collect(),
                    output_formats: raw.output_formats,
                    finite: entry.finite,
                }
            })
            .collect();

        let mut node_formats = vec![None; self.nodes.len()];
        for &idx in &sorted {
            let ratio = step_ratio(idx).ok().flatten();
            node_formats[idx] = Some((node_format(idx), frames_for(ratio)));
        }

        let snapshot = Snapshot {
            version,
            format: self.format,
            steps,
            pool: BufferPool::new(slot_count, channels, frames),
            converters,
            output_slot: output_vbuf.map(|v| phys[v]),
            finite_sources,
            scratch: Vec::with_capacity(scratch_len),
        };
        Ok(Compiled {
            snapshot,
            order: scheduled.iter().map(|&i| self.entry(i).id).collect(),
            node_formats,
            connection_formats,
        })
    }

    /// Topologically sorts every live node, lowest ID first among ready nodes.
    fn kahn_sort(&self) -> Result<Vec<usize>> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut active = 0usize;
        for (i, entry) in self.nodes.iter().enumerate() {
            if let Some(entry) = entry {
                active += 1;
                in_degree[i] = entry.inputs.iter().flatten().count();
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| self.nodes[i].is_some() && in_degree[i] == 0)
            .map(Reverse)
            .collect();
        let mut sorted = Vec::with_capacity(active);
        while let Some(Reverse(idx)) = ready.pop() {
            sorted.push(idx);
            for conn_id in self.entry(idx).outputs.iter().flatten() {
                let to = self.connection(*conn_id).destination.0 as usize;
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    ready.push(Reverse(to));
                }
            }
        }

        if sorted.len() != active {
            return Err(Error::CycleDetected);
        }
        Ok(sorted)
    }

    /// Resolves output formats and required input formats in sorted order.
    #[allow(clippy::type_complexity)]
    fn negotiate(&self, sorted: &[usize]) -> (Vec<Vec<Option<Format>>>, Vec<Vec<Option<Format>>>) {
        let mut outputs: Vec<Vec<Option<Format>>> = vec![Vec::new(); self.nodes.len()];
        let mut required: Vec<Vec<Option<Format>>> = vec![Vec::new(); self.nodes.len()];
        for &idx in sorted {
            let entry = self.entry(idx);
            let upstream: Vec<Option<Format>> = entry
                .inputs
                .iter()
                .map(|conn| {
                    let conn = self.connection((*conn)?);
                    outputs[conn.source.0 as usize]
                        .get(conn.source_bus)
                        .copied()
                        .flatten()
                })
                .collect();
            let negotiated = entry.rule.negotiate(&upstream, entry.outputs.len());
            outputs[idx] = negotiated.outputs;
            required[idx] = negotiated.inputs;
        }
        (outputs, required)
    }

    /// Marks every node the output boundary pulls from.
    fn reachable_from_output(&self) -> Vec<bool> {
        let mut reachable = vec![false; self.nodes.len()];
        let mut stack = vec![self.output.0 as usize];
        while let Some(idx) = stack.pop() {
            if reachable[idx] {
                continue;
            }
            let Some(entry) = self.nodes.get(idx).and_then(Option::as_ref) else {
                continue;
            };
            reachable[idx] = true;
            for conn_id in entry.inputs.iter().flatten() {
                stack.push(self.connection(*conn_id).source.0 as usize);
            }
        }
        reachable
    }
}

/// Packs virtual buffers into physical slots by liveness.
///
/// Returns the physical slot of every virtual buffer and the slot count.
fn assign_buffers(vbufs: &[(usize, usize, Format)]) -> (Vec<usize>, usize) {
    let mut order: Vec<usize> = (0..vbufs.len()).collect();
    order.sort_by_key(|&v| vbufs[v].0);

    let mut phys = vec![0usize; vbufs.len()];
    let mut slot_count = 0usize;
    // (step at which the slot becomes free, slot)
    let mut free_at: Vec<(usize, usize)> = Vec::new();
    for v in order {
        let (first_write, last_read, _) = vbufs[v];
        let slot = match free_at.iter().position(|&(free, _)| free <= first_write) {
            Some(i) => free_at.remove(i).1,
            None => {
                slot_count += 1;
                slot_count - 1
            }
        };
        phys[v] = slot;
        free_at.push((last_read + 1, slot));
    }
    (phys, slot_count.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt() -> Format {
        Format::default()
    }

    #[test]
    fn test_linear_chain_ping_pongs() {
        // a -> b -> c -> d, each read only by the next step.
        let vbufs = vec![(0, 1, fmt()), (1, 2, fmt()), (2, 3, fmt()), (3, 4, fmt())];
        let (phys, count) = assign_buffers(&vbufs);
        assert_eq!(count, 2);
        assert_ne!(phys[0], phys[1]);
        assert_eq!(phys[0], phys[2]);
    }

    #[test]
    fn test_fan_out_keeps_source_live() {
        // Source read at steps 1 and 2; step 1 output read at 2.
        let vbufs = vec![(0, 2, fmt()), (1, 2, fmt()), (2, 3, fmt())];
        let (phys, count) = assign_buffers(&vbufs);
        assert_eq!(count, 3);
        assert_ne!(phys[0], phys[1]);
        assert_ne!(phys[2], phys[0]);
        assert_ne!(phys[2], phys[1]);
    }

    #[test]
    fn test_empty_plan_has_one_slot() {
        let (phys, count) = assign_buffers(&[]);
        assert!(phys.is_empty());
        assert_eq!(count, 1);
    }
}
