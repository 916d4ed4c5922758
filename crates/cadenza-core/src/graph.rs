//! Control-thread graph: node and connection ownership, validation, commit.
//!
//! [`Graph`] is the only way to change what the render thread plays. Every
//! mutation is validated before anything is touched, so a failed call leaves
//! the topology exactly as it was. Nothing reaches the render thread until
//! [`commit()`](Graph::commit) compiles the topology into a snapshot and stages
//! it; the paired [`Renderer`] adopts it at its next quantum start.
//!
//! # Usage
//!
//! 1. Create the pair with [`Graph::new`]; the output boundary already exists
//!    as [`Graph::output`]
//! 2. Add nodes with [`add_node`](Graph::add_node)
//! 3. Wire buses with [`connect`](Graph::connect)
//! 4. Publish with [`commit`](Graph::commit)
//! 5. Move the [`Renderer`] to the audio thread and [`pull`](Renderer::pull)

use std::collections::{BTreeSet, HashMap};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::config::EngineConfig;
use crate::connection::{Connection, ConnectionId};
use crate::converter::ChannelMap;
use crate::error::{Error, Result};
use crate::event::RenderEvent;
use crate::format::Format;
use crate::node::{FormatRule, NodeId, NodeKind, StorageAllocator};
use crate::nodes::OutputNode;
use crate::render::Renderer;
use crate::snapshot::Topology;
use crate::sync::{self, Publisher, SnapshotState, Transition};

/// Bookkeeping for one live node.
pub(crate) struct NodeEntry {
    pub id: NodeId,
    pub name: &'static str,
    /// Kernel arena slot on the render side.
    pub slot: usize,
    /// Incoming connection per input bus.
    pub inputs: Vec<Option<ConnectionId>>,
    /// Outgoing connections per output bus.
    pub outputs: Vec<Vec<ConnectionId>>,
    pub rule: FormatRule,
    pub finite: bool,
    /// Kernel waiting for its first commit. `None` once it lives on the render side.
    pub pending: Option<NodeKind>,
    /// Builds storage when the format changes after the first commit.
    pub allocator: Option<Box<dyn StorageAllocator>>,
    /// Format and largest quantum the kernel's storage is sized for.
    pub prepared: Option<(Format, usize)>,
}

/// Control-side copy of what the last commit produced.
#[derive(Debug, Default)]
struct CommitRecord {
    version: u64,
    order: Vec<NodeId>,
    connection_formats: HashMap<ConnectionId, Format>,
}

/// Audio graph owned by the control thread.
///
/// Node and connection handles index flat tables and are never reused, so a
/// removed node leaves an empty entry behind and the tables grow with every
/// node ever added. The render-side arena does not grow: its slots return to
/// the free list once a removal has been reclaimed, and `max_nodes` bounds
/// only the live nodes.
pub struct Graph {
    config: EngineConfig,
    nodes: Vec<Option<NodeEntry>>,
    connections: Vec<Option<Connection>>,
    output: NodeId,
    free_slots: Vec<usize>,
    /// Slots of removed nodes that the next commit evicts from the render side.
    evictions: Vec<usize>,
    publisher: Publisher,
    events: Consumer<RenderEvent>,
    /// Arena slots the render thread resets at its next quantum start.
    resets: Producer<usize>,
    next_version: u64,
    committed: Option<CommitRecord>,
    /// Versions staged and not yet reclaimed.
    live_versions: BTreeSet<u64>,
}

impl Graph {
    /// Creates a graph and the renderer that plays it.
    ///
    /// The graph starts with a single node, the output boundary, whose format
    /// is `config.format`. The renderer renders silence until the first commit.
    pub fn new(config: EngineConfig) -> Result<(Self, Renderer)> {
        config.validate()?;
        let (publisher, receiver) = sync::channel(config.staging_depth, config.retire_depth());
        let (event_tx, event_rx) = RingBuffer::new(config.event_capacity);
        let (reset_tx, reset_rx) = RingBuffer::new(config.max_nodes);
        let mut graph = Self {
            config,
            nodes: Vec::new(),
            connections: Vec::new(),
            output: NodeId(0),
            free_slots: (0..config.max_nodes).rev().collect(),
            evictions: Vec::new(),
            publisher,
            events: event_rx,
            resets: reset_tx,
            next_version: 1,
            committed: None,
            live_versions: BTreeSet::new(),
        };
        graph.output = graph.insert(NodeKind::Output(OutputNode::new(config.format)))?;
        let renderer = Renderer::new(&config, receiver, event_tx, reset_rx);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "graph_new: {} max_frames={} max_nodes={}",
            config.format,
            config.max_frames,
            config.max_nodes
        );

        Ok((graph, renderer))
    }

    /// Engine limits and output format.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The output boundary node.
    pub fn output(&self) -> NodeId {
        self.output
    }

    /// Adds a node. It becomes audible after the next commit that connects it
    /// to the output boundary.
    pub fn add_node(&mut self, kind: impl Into<NodeKind>) -> Result<NodeId> {
        let kind = kind.into();
        if kind.is_output() {
            return Err(Error::BoundaryNode(self.output));
        }
        self.insert(kind)
    }

    fn insert(&mut self, kind: NodeKind) -> Result<NodeId> {
        let Some(slot) = self.free_slots.pop() else {
            return Err(Error::CapacityExceeded {
                requested: self.config.max_nodes + 1,
                capacity: self.config.max_nodes,
            });
        };
        let processor = kind.processor();
        let id = NodeId(self.nodes.len() as u32);
        let entry = NodeEntry {
            id,
            name: processor.name(),
            slot,
            inputs: vec![None; processor.input_bus_count()],
            outputs: vec![Vec::new(); processor.output_bus_count()],
            rule: processor.format_rule(),
            finite: processor.is_finite(),
            allocator: processor.storage_allocator(),
            prepared: None,
            pending: Some(kind),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("graph_add_node: {id} ({})", entry.name);

        self.nodes.push(Some(entry));
        Ok(id)
    }

    /// Removes a node and every connection touching it.
    ///
    /// The render thread keeps playing the node until the next commit, and
    /// the node is dropped only once no snapshot in flight references it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.entry(id)?;
        if id == self.output {
            return Err(Error::BoundaryNode(id));
        }
        let attached: Vec<ConnectionId> = self
            .entry(id)?
            .inputs
            .iter()
            .flatten()
            .chain(self.entry(id)?.outputs.iter().flatten())
            .copied()
            .collect();
        for conn in attached {
            self.unlink(conn);
        }
        let Some(entry) = self.nodes[id.0 as usize].take() else {
            return Err(Error::InvalidHandle(id));
        };
        if entry.pending.is_some() {
            // Never reached the render thread.
            self.free_slots.push(entry.slot);
        } else {
            self.evictions.push(entry.slot);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("graph_remove_node: {id} ({})", entry.name);

        Ok(())
    }

    /// Clears a node's internal state without reallocating.
    ///
    /// A node not yet committed is reset right away. Otherwise the render
    /// thread resets it at its next quantum start; no commit is needed. Fails
    /// with [`Error::CapacityExceeded`] while `max_nodes` resets are waiting.
    pub fn reset_node(&mut self, id: NodeId) -> Result<()> {
        let capacity = self.config.max_nodes;
        let entry = self
            .nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidHandle(id))?;
        match entry.pending.as_mut() {
            Some(kernel) => kernel.processor_mut().reset(),
            None => {
                if self.resets.push(entry.slot).is_err() {
                    return Err(Error::CapacityExceeded {
                        requested: capacity + 1,
                        capacity,
                    });
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("graph_reset_node: {id} ({})", entry.name);

        Ok(())
    }

    /// Connects `source`'s output bus `source_bus` to `destination`'s input
    /// bus `destination_bus`, using the derived channel map.
    pub fn connect(
        &mut self,
        source: NodeId,
        source_bus: usize,
        destination: NodeId,
        destination_bus: usize,
    ) -> Result<ConnectionId> {
        self.link(source, source_bus, destination, destination_bus, None)
    }

    /// Like [`connect`](Self::connect), with an explicit channel map applied
    /// when the connection converts formats.
    pub fn connect_mapped(
        &mut self,
        source: NodeId,
        source_bus: usize,
        destination: NodeId,
        destination_bus: usize,
        map: ChannelMap,
    ) -> Result<ConnectionId> {
        self.link(source, source_bus, destination, destination_bus, Some(map))
    }

    fn link(
        &mut self,
        source: NodeId,
        source_bus: usize,
        destination: NodeId,
        destination_bus: usize,
        channel_map: Option<ChannelMap>,
    ) -> Result<ConnectionId> {
        let src = self.entry(source)?;
        let dst = self.entry(destination)?;
        if source == self.output {
            return Err(Error::BoundaryNode(source));
        }
        if source_bus >= src.outputs.len() {
            return Err(Error::InvalidBus {
                node: source,
                bus: source_bus,
            });
        }
        match dst.inputs.get(destination_bus) {
            None => {
                return Err(Error::InvalidBus {
                    node: destination,
                    bus: destination_bus,
                });
            }
            Some(Some(_)) => {
                return Err(Error::BusOccupied {
                    node: destination,
                    bus: destination_bus,
                });
            }
            Some(None) => {}
        }
        if source == destination || self.can_reach(destination, source) {
            return Err(Error::CycleDetected);
        }

        let id = ConnectionId(self.connections.len() as u32);
        self.connections.push(Some(Connection {
            source,
            source_bus,
            destination,
            destination_bus,
            channel_map,
        }));
        if let Some(src) = self.nodes[source.0 as usize].as_mut() {
            src.outputs[source_bus].push(id);
        }
        if let Some(dst) = self.nodes[destination.0 as usize].as_mut() {
            dst.inputs[destination_bus] = Some(id);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "graph_connect: {source}[{source_bus}] → {destination}[{destination_bus}] as {id}"
        );

        Ok(id)
    }

    /// Removes a connection.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Result<()> {
        if self.connection(connection).is_none() {
            return Err(Error::InvalidConnection(connection));
        }
        self.unlink(connection);

        #[cfg(feature = "tracing")]
        tracing::debug!("graph_disconnect: {connection}");

        Ok(())
    }

    fn unlink(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        if let Some(Some(src)) = self.nodes.get_mut(conn.source.0 as usize) {
            src.outputs[conn.source_bus].retain(|&c| c != id);
        }
        if let Some(Some(dst)) = self.nodes.get_mut(conn.destination.0 as usize) {
            dst.inputs[conn.destination_bus] = None;
        }
    }

    /// Compiles the topology and stages it for the render thread.
    ///
    /// Sorts nodes (Kahn's algorithm, ties broken by creation order), resolves
    /// formats and converters, prepares nodes committed for the first time,
    /// reallocates storage for live nodes whose format or quantum changed,
    /// and publishes the snapshot. Never blocks: if the render thread has not
    /// consumed earlier commits, fails with [`Error::StagingFull`]. On any
    /// error the graph and the snapshot being rendered are unchanged.
    ///
    /// Returns the new snapshot version.
    pub fn commit(&mut self) -> Result<u64> {
        self.reclaim();
        if !self.publisher.can_stage() {
            return Err(Error::StagingFull);
        }
        let version = self.next_version;
        let compiled = Topology {
            nodes: &self.nodes,
            connections: &self.connections,
            output: self.output,
            format: self.config.format,
            max_frames: self.config.max_frames,
        }
        .compile(version)?;

        let mut install = Vec::new();
        let mut storage = Vec::new();
        for (idx, entry) in self.nodes.iter_mut().enumerate() {
            let Some(entry) = entry else { continue };
            let (format, frames) = compiled.node_formats[idx]
                .unwrap_or((self.config.format, self.config.max_frames));
            if entry.prepared == Some((format, frames)) {
                continue;
            }
            match entry.pending.take() {
                Some(mut kernel) => {
                    kernel.processor_mut().prepare(&format, frames);
                    install.push((entry.slot, kernel));
                }
                None => {
                    if let Some(allocator) = &entry.allocator {
                        storage.push((entry.slot, allocator.allocate(&format, frames)));
                    }
                }
            }
            entry.prepared = Some((format, frames));
        }
        let evict = std::mem::take(&mut self.evictions);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "graph_commit: version {version}, {} steps, {} buffers, {} converters, {} new, {} resized, {} evicted",
            compiled.snapshot.steps.len(),
            compiled.snapshot.pool.count(),
            compiled.snapshot.converters.len(),
            install.len(),
            storage.len(),
            evict.len()
        );

        self.publisher.stage(
            Transition::new(compiled.snapshot, install, evict).with_storage(storage),
        )?;
        self.next_version += 1;
        self.live_versions.insert(version);
        self.committed = Some(CommitRecord {
            version,
            order: compiled.order,
            connection_formats: compiled.connection_formats.into_iter().collect(),
        });
        Ok(version)
    }

    /// Drops snapshots and removed nodes the render thread has released.
    ///
    /// Called by [`commit`](Self::commit); call it directly to release memory
    /// sooner. Returns the number of snapshots reclaimed.
    pub fn reclaim(&mut self) -> usize {
        let reclaimed = self.publisher.reclaim();
        for version in &reclaimed.versions {
            self.live_versions.remove(version);
        }
        self.free_slots.extend(reclaimed.slots.iter().copied());

        #[cfg(feature = "tracing")]
        if !reclaimed.versions.is_empty() {
            tracing::trace!("graph_reclaim: versions {:?}", reclaimed.versions);
        }

        reclaimed.versions.len()
    }

    /// Adoption state of snapshot `version`.
    pub fn snapshot_state(&self, version: u64) -> SnapshotState {
        if !self.live_versions.contains(&version) {
            return SnapshotState::Idle;
        }
        let adopted = self.publisher.adopted_version();
        match version.cmp(&adopted) {
            core::cmp::Ordering::Greater => SnapshotState::Staged,
            core::cmp::Ordering::Equal => SnapshotState::Committed,
            core::cmp::Ordering::Less => SnapshotState::Retiring,
        }
    }

    /// Version of the last successful commit.
    pub fn committed_version(&self) -> Option<u64> {
        self.committed.as_ref().map(|c| c.version)
    }

    /// Version the render thread is currently playing.
    pub fn adopted_version(&self) -> Option<u64> {
        Some(self.publisher.adopted_version()).filter(|&v| v != 0)
    }

    /// Scheduled nodes of the last commit, in render order.
    pub fn render_order(&self) -> &[NodeId] {
        self.committed.as_ref().map_or(&[], |c| c.order.as_slice())
    }

    /// Format carried by `connection` as of the last commit, after conversion.
    pub fn connection_format(&self, connection: ConnectionId) -> Option<Format> {
        self.committed
            .as_ref()?
            .connection_formats
            .get(&connection)
            .copied()
    }

    /// Takes every pending render event.
    pub fn drain_events(&mut self) -> Vec<RenderEvent> {
        let mut events = Vec::with_capacity(self.events.slots());
        while let Ok(event) = self.events.pop() {
            events.push(event);
        }
        events
    }

    /// Events the render thread dropped because the ring was full.
    pub fn dropped_events(&self) -> u64 {
        self.publisher
            .shared
            .dropped_events
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Returns true if `id` is a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_ok()
    }

    /// Number of live nodes, including the output boundary.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Number of connections.
    pub fn connection_count(&self) -> usize {
        self.connections.iter().flatten().count()
    }

    /// Diagnostic name of a node.
    pub fn node_name(&self, id: NodeId) -> Result<&'static str> {
        Ok(self.entry(id)?.name)
    }

    /// Looks up a connection.
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id.0 as usize)?.as_ref()
    }

    /// Every connection into or out of `id`, inputs first.
    pub fn connections_of(&self, id: NodeId) -> Result<Vec<ConnectionId>> {
        let entry = self.entry(id)?;
        Ok(entry
            .inputs
            .iter()
            .flatten()
            .chain(entry.outputs.iter().flatten())
            .copied()
            .collect())
    }

    /// Lowest input bus of `id` with no connection.
    pub fn next_available_input_bus(&self, id: NodeId) -> Result<Option<usize>> {
        Ok(self.entry(id)?.inputs.iter().position(Option::is_none))
    }

    /// Lowest output bus of `id` with no outgoing connection.
    pub fn next_available_output_bus(&self, id: NodeId) -> Result<Option<usize>> {
        if id == self.output {
            return Ok(None);
        }
        Ok(self.entry(id)?.outputs.iter().position(Vec::is_empty))
    }

    fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidHandle(id))
    }

    /// DFS: can audio flow from `from` to `to` along existing connections?
    fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            let idx = current.0 as usize;
            if idx >= visited.len() || visited[idx] {
                continue;
            }
            visited[idx] = true;

            if let Some(Some(node)) = self.nodes.get(idx) {
                for conn in node.outputs.iter().flatten() {
                    if let Some(c) = self.connection(*conn) {
                        stack.push(c.destination);
                    }
                }
            }
        }
        false
    }
}
