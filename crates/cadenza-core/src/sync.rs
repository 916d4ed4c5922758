//! Lock-free snapshot handoff between the control and render threads.
//!
//! Two SPSC rings connect the threads:
//!
//! ```text
//!  control ──staged──▶ render      Box<Transition> carrying a new snapshot,
//!                                  kernels to install, storage for live
//!                                  kernels, slots to evict
//!  control ◀─retired── render      the same Box, now carrying the previous
//!                                  snapshot, the replaced storage, and the
//!                                  evicted kernels
//! ```
//!
//! The render thread swaps snapshots only at a quantum start. It moves the
//! outgoing snapshot into the transition it just consumed and sends it back,
//! so nothing is allocated or freed on the render thread. The control thread
//! drops returned transitions only once the render thread's published quantum
//! counter shows the quantum that retired them has finished.
//!
//! A snapshot version moves through [`SnapshotState`]: `Staged` while waiting
//! in the ring, `Committed` while rendering, `Retiring` until reclaimed, and
//! `Idle` before staging and after reclamation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::{Error, Result};
use crate::node::{NodeKind, NodeStorage};
use crate::snapshot::Snapshot;

/// Adoption state of a snapshot version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    /// Not staged, or already reclaimed.
    Idle,
    /// Committed by the control thread, not yet adopted.
    Staged,
    /// Currently rendered by the render thread.
    Committed,
    /// Replaced, waiting for reclamation.
    Retiring,
}

/// Payload exchanged through the staged and retired rings.
pub(crate) struct Transition {
    /// Incoming snapshot on the way in, outgoing snapshot on the way back.
    pub snapshot: Option<Box<Snapshot>>,
    /// Version carried in. Unchanged on the way back.
    pub version: u64,
    /// Kernels to place into arena slots.
    pub install: Vec<(usize, NodeKind)>,
    /// Storage swapped into live kernels. Holds the replaced storage on the way back.
    pub storage: Vec<(usize, NodeStorage)>,
    /// Arena slots to empty.
    pub evict: Vec<usize>,
    /// Kernels removed from evicted slots. Capacity reserved by the control thread.
    pub evicted: Vec<NodeKind>,
    /// Quantum in which the render thread retired this transition.
    pub quantum: u64,
}

impl Transition {
    pub fn new(snapshot: Snapshot, install: Vec<(usize, NodeKind)>, evict: Vec<usize>) -> Self {
        let evicted = Vec::with_capacity(evict.len());
        Self {
            version: snapshot.version,
            snapshot: Some(Box::new(snapshot)),
            install,
            storage: Vec::new(),
            evict,
            evicted,
            quantum: 0,
        }
    }

    /// Adds storage for kernels already on the render thread.
    pub fn with_storage(mut self, storage: Vec<(usize, NodeStorage)>) -> Self {
        self.storage = storage;
        self
    }
}

/// Counters published by the render thread.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    /// Version of the snapshot currently rendering, 0 before the first adoption.
    adopted: AtomicU64,
    /// Incremented at quantum start and end: odd while a quantum is in flight.
    sequence: AtomicU64,
    /// Events dropped because the event ring was full.
    pub dropped_events: AtomicU64,
}

impl Shared {
    /// Quanta that have finished rendering.
    fn completed_quanta(&self) -> u64 {
        self.sequence.load(Ordering::Acquire) / 2
    }
}

/// Creates the connected control and render halves.
pub(crate) fn channel(staging_depth: usize, retire_depth: usize) -> (Publisher, Receiver) {
    let (staged_tx, staged_rx) = RingBuffer::new(staging_depth);
    let (retired_tx, retired_rx) = RingBuffer::new(retire_depth);
    let shared = Arc::new(Shared::default());
    (
        Publisher {
            staged: staged_tx,
            retired: retired_rx,
            shared: Arc::clone(&shared),
            pending: Vec::new(),
        },
        Receiver {
            staged: staged_rx,
            retired: retired_tx,
            shared,
            quantum: 0,
        },
    )
}

/// Reclaimed resources handed back to the graph.
#[derive(Debug, Default)]
pub(crate) struct Reclaimed {
    /// Versions of reclaimed snapshots.
    pub versions: Vec<u64>,
    /// Arena slots whose kernels were dropped.
    pub slots: Vec<usize>,
}

/// Control-thread half.
pub(crate) struct Publisher {
    staged: Producer<Box<Transition>>,
    retired: Consumer<Box<Transition>>,
    pub shared: Arc<Shared>,
    /// Returned transitions whose quantum may still be in flight.
    pending: Vec<Box<Transition>>,
}

impl Publisher {
    /// Returns true if a transition can be staged without blocking.
    pub fn can_stage(&self) -> bool {
        self.staged.slots() > 0
    }

    /// Stages a transition for adoption at the next quantum start.
    pub fn stage(&mut self, transition: Transition) -> Result<()> {
        self.staged
            .push(Box::new(transition))
            .map_err(|_| Error::StagingFull)
    }

    /// Version the render thread is currently using.
    pub fn adopted_version(&self) -> u64 {
        self.shared.adopted.load(Ordering::Acquire)
    }

    /// Drops every returned transition whose retiring quantum has completed.
    pub fn reclaim(&mut self) -> Reclaimed {
        while let Ok(transition) = self.retired.pop() {
            self.pending.push(transition);
        }
        let completed = self.shared.completed_quanta();
        let mut reclaimed = Reclaimed::default();
        self.pending.retain_mut(|t| {
            if t.quantum > completed {
                return true;
            }
            if let Some(old) = t.snapshot.take() {
                reclaimed.versions.push(old.version);
            }
            reclaimed.slots.extend(t.evict.iter().copied());
            false
        });
        reclaimed
    }
}

/// Render-thread half.
pub(crate) struct Receiver {
    staged: Consumer<Box<Transition>>,
    retired: Producer<Box<Transition>>,
    shared: Arc<Shared>,
    quantum: u64,
}

impl Receiver {
    /// Marks the start of a quantum.
    #[inline]
    pub fn begin_quantum(&mut self) {
        self.quantum += 1;
        self.shared.sequence.fetch_add(1, Ordering::AcqRel);
    }

    /// Marks the end of a quantum.
    #[inline]
    pub fn end_quantum(&mut self) {
        self.shared.sequence.fetch_add(1, Ordering::AcqRel);
    }

    /// Takes the next staged transition, if there is room to send it back.
    #[inline]
    pub fn next_staged(&mut self) -> Option<Box<Transition>> {
        if self.retired.slots() == 0 {
            return None;
        }
        self.staged.pop().ok()
    }

    /// Publishes the adopted version and returns the transition for reclamation.
    #[inline]
    pub fn retire(&mut self, mut transition: Box<Transition>) {
        self.shared
            .adopted
            .store(transition.version, Ordering::Release);
        transition.quantum = self.quantum;
        // next_staged checked for a free slot and only this thread pushes.
        let _ = self.retired.push(transition);
    }

    /// Counts an event that did not fit the event ring.
    #[inline]
    pub fn drop_event(&self) {
        self.shared.dropped_events.fetch_add(1, Ordering::Relaxed);
    }
}
