//! Observer tap: forwards audio and publishes copies off the render path.
//!
//! Blocks circulate between two SPSC rings. The tap pops an empty block,
//! fills it, and pushes it to the observer; [`TapObserver::poll`] hands each
//! filled block to a callback on the calling (control) thread and recycles it.
//! When no empty block is available the quantum is dropped and counted.
//!
//! Blocks are sized for one format. When a commit changes the tap's format,
//! a fresh generation of blocks arrives with the snapshot. Blocks of older
//! generations still in flight go back to the observer, which drops them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::buffer::{BufferView, SampleBuffer};
use crate::error::RenderFault;
use crate::format::Format;
use crate::node::{
    FormatRule, Inputs, NodeStorage, Outputs, Processor, RenderStatus, StorageAllocator,
};

/// One quantum of audio captured by a [`TapNode`].
#[derive(Debug)]
pub struct TapBlock {
    buffer: SampleBuffer,
    sequence: u64,
    generation: u64,
    /// Sized for an earlier format; never delivered.
    stale: bool,
}

impl TapBlock {
    fn allocate(format: &Format, max_frames: usize, generation: u64) -> Self {
        Self {
            buffer: SampleBuffer::allocate(*format, max_frames),
            sequence: 0,
            generation,
            stale: false,
        }
    }

    /// Captured audio.
    pub fn view(&self) -> BufferView<'_> {
        self.buffer.view()
    }

    /// Index of the quantum this block was captured in, counted per tap.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Pass-through node that copies every quantum to a [`TapObserver`].
pub struct TapNode {
    depth: usize,
    reserve: Vec<TapBlock>,
    free: Consumer<TapBlock>,
    filled: Producer<TapBlock>,
    dropped: Arc<AtomicU64>,
    sequence: u64,
    generation: u64,
    /// Generation the observer recycles; older blocks are dropped.
    current: Arc<AtomicU64>,
}

/// Control-thread side of a [`TapNode`].
pub struct TapObserver {
    free: Producer<TapBlock>,
    filled: Consumer<TapBlock>,
    dropped: Arc<AtomicU64>,
    current: Arc<AtomicU64>,
}

/// A generation of blocks for a new format.
struct TapStorage {
    generation: u64,
    blocks: Vec<TapBlock>,
    /// Older blocks taken off the free ring during adoption.
    retired: Vec<TapBlock>,
}

struct TapAllocator {
    depth: usize,
    next_generation: AtomicU64,
}

impl StorageAllocator for TapAllocator {
    fn allocate(&self, format: &Format, max_frames: usize) -> NodeStorage {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        Box::new(TapStorage {
            generation,
            blocks: (0..self.depth)
                .map(|_| TapBlock::allocate(format, max_frames, generation))
                .collect(),
            retired: Vec::with_capacity(self.depth),
        })
    }
}

impl TapNode {
    /// Creates a tap holding up to `depth` blocks in flight, and its observer.
    pub fn new(depth: usize) -> (Self, TapObserver) {
        let depth = depth.max(1);
        let (free_tx, free_rx) = RingBuffer::new(depth);
        let (filled_tx, filled_rx) = RingBuffer::new(depth);
        let dropped = Arc::new(AtomicU64::new(0));
        let current = Arc::new(AtomicU64::new(0));
        let tap = Self {
            depth,
            reserve: Vec::new(),
            free: free_rx,
            filled: filled_tx,
            dropped: Arc::clone(&dropped),
            sequence: 0,
            generation: 0,
            current: Arc::clone(&current),
        };
        let observer = TapObserver {
            free: free_tx,
            filled: filled_rx,
            dropped,
            current,
        };
        (tap, observer)
    }

    fn take_block(&mut self) -> Option<TapBlock> {
        self.reserve.pop().or_else(|| self.free.pop().ok())
    }

    fn capture(&mut self, input: &BufferView<'_>) {
        // Every push back into the reserve follows a pop, so it never reallocates.
        while let Some(mut block) = self.take_block() {
            if block.generation != self.generation {
                block.stale = true;
                if let Err(rtrb::PushError::Full(block)) = self.filled.push(block) {
                    self.reserve.push(block);
                    break;
                }
                continue;
            }
            let fits = block.buffer.set_format(*input.format()).is_ok()
                && block.buffer.copy_from(input).is_ok();
            if !fits {
                self.reserve.push(block);
                break;
            }
            block.sequence = self.sequence;
            match self.filled.push(block) {
                Ok(()) => return,
                Err(rtrb::PushError::Full(block)) => {
                    self.reserve.push(block);
                    break;
                }
            }
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl Processor for TapNode {
    fn name(&self) -> &'static str {
        "tap"
    }

    fn format_rule(&self) -> FormatRule {
        FormatRule::Follow
    }

    fn prepare(&mut self, format: &Format, max_frames: usize) {
        self.reserve = (0..self.depth)
            .map(|_| TapBlock::allocate(format, max_frames, self.generation))
            .collect();
    }

    fn render(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
    ) -> Result<RenderStatus, RenderFault> {
        let Some(mut out) = outputs.get_mut(0) else {
            return Ok(RenderStatus::Continue);
        };
        match inputs.get(0) {
            Some(input) => {
                for ch in 0..out.channel_count().min(input.channel_count()) {
                    out.channel_mut(ch).copy_from_slice(input.channel(ch));
                }
                self.capture(&input);
            }
            None => out.clear(),
        }
        self.sequence += 1;
        Ok(RenderStatus::Continue)
    }

    fn reset(&mut self) {
        self.sequence = 0;
    }

    fn storage_allocator(&self) -> Option<Box<dyn StorageAllocator>> {
        Some(Box::new(TapAllocator {
            depth: self.depth,
            next_generation: AtomicU64::new(self.generation + 1),
        }))
    }

    fn adopt_storage(&mut self, storage: &mut NodeStorage) {
        let Some(storage) = storage.downcast_mut::<TapStorage>() else {
            return;
        };
        core::mem::swap(&mut self.reserve, &mut storage.blocks);
        while storage.retired.len() < storage.retired.capacity() {
            let Ok(block) = self.free.pop() else { break };
            storage.retired.push(block);
        }
        self.generation = storage.generation;
        self.current.store(self.generation, Ordering::Release);
    }
}

impl TapObserver {
    /// Hands every captured block to `callback` in capture order and recycles
    /// it. Returns the number of blocks delivered.
    pub fn poll(&mut self, mut callback: impl FnMut(&TapBlock)) -> usize {
        let current = self.current.load(Ordering::Acquire);
        let mut delivered = 0;
        while let Ok(block) = self.filled.pop() {
            if !block.stale {
                callback(&block);
                delivered += 1;
            }
            if block.generation == current && !block.stale {
                // The free ring holds every block, so this cannot be full.
                let _ = self.free.push(block);
            }
        }
        delivered
    }

    /// Quanta skipped because no empty block was available.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::format::SampleFormat;

    fn run(tap: &mut TapNode, value: f32) -> SampleBuffer {
        let format = Format::new(48_000.0, 2, SampleFormat::Float32).unwrap();
        let mut pool = BufferPool::new(1, 2, 16);
        pool.get_mut(0).set_format(format).unwrap();
        pool.get_mut(0).frames(16).unwrap().fill(value);
        let slots = [Some(0)];
        let inputs = Inputs {
            pool: &pool,
            slots: &slots,
            frames: 16,
        };
        let mut out = [SampleBuffer::allocate(format, 16)];
        out[0].set_frame_length(16).unwrap();
        let mut outputs = Outputs {
            buffers: &mut out,
            frames: 16,
        };
        tap.render(&inputs, &mut outputs).unwrap();
        let [buffer] = out;
        buffer
    }

    #[test]
    fn test_forwards_and_captures() {
        let (mut tap, mut observer) = TapNode::new(4);
        let format = Format::new(48_000.0, 2, SampleFormat::Float32).unwrap();
        tap.prepare(&format, 16);
        let out = run(&mut tap, 0.3);
        assert_eq!(out.channel(0), &[0.3; 16]);

        let mut seen = Vec::new();
        let n = observer.poll(|block| {
            seen.push((block.sequence(), block.view().channel(1)[15]));
        });
        assert_eq!(n, 1);
        assert_eq!(seen, vec![(0, 0.3)]);
        assert_eq!(observer.dropped_blocks(), 0);
    }

    #[test]
    fn test_drops_when_observer_lags() {
        let (mut tap, mut observer) = TapNode::new(2);
        let format = Format::new(48_000.0, 2, SampleFormat::Float32).unwrap();
        tap.prepare(&format, 16);
        for i in 0..5 {
            run(&mut tap, i as f32 * 0.1);
        }
        assert_eq!(observer.dropped_blocks(), 3);
        let mut sequences = Vec::new();
        observer.poll(|block| sequences.push(block.sequence()));
        assert_eq!(sequences, vec![0, 1]);

        // Recycled blocks become available again.
        run(&mut tap, 0.9);
        assert_eq!(observer.poll(|_| {}), 1);
    }

    #[test]
    fn test_adopted_storage_fits_new_format() {
        let (mut tap, mut observer) = TapNode::new(2);
        let mono = Format::new(48_000.0, 1, SampleFormat::Float32).unwrap();
        tap.prepare(&mono, 8);
        // Blocks sized for 8 mono frames cannot hold 16 stereo frames.
        run(&mut tap, 0.1);
        assert_eq!(observer.dropped_blocks(), 1);

        let stereo = Format::new(48_000.0, 2, SampleFormat::Float32).unwrap();
        let allocator = tap.storage_allocator().unwrap();
        let mut storage = allocator.allocate(&stereo, 16);
        tap.adopt_storage(&mut storage);
        let replaced = storage.downcast::<TapStorage>().unwrap();
        assert_eq!(replaced.blocks.len(), 2);

        run(&mut tap, 0.4);
        let mut seen = Vec::new();
        observer.poll(|block| {
            let view = block.view();
            seen.push((view.channel_count(), view.channel(1)[15]));
        });
        assert_eq!(seen, vec![(2, 0.4)]);
        assert_eq!(observer.dropped_blocks(), 1);
    }

    #[test]
    fn test_older_blocks_are_retired() {
        let (mut tap, mut observer) = TapNode::new(2);
        let stereo = Format::new(48_000.0, 2, SampleFormat::Float32).unwrap();
        tap.prepare(&stereo, 16);
        run(&mut tap, 0.2);
        // The delivered block lands on the free ring in the old generation.
        assert_eq!(observer.poll(|_| {}), 1);

        let allocator = tap.storage_allocator().unwrap();
        let mut storage = allocator.allocate(&stereo, 32);
        tap.adopt_storage(&mut storage);
        let replaced = storage.downcast::<TapStorage>().unwrap();
        assert_eq!(replaced.retired.len(), 1);
        assert_eq!(replaced.blocks.len(), 1);

        for _ in 0..3 {
            run(&mut tap, 0.3);
        }
        assert_eq!(observer.poll(|_| {}), 2);
        assert_eq!(observer.dropped_blocks(), 1);
    }
}
