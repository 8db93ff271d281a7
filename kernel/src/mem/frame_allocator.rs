//! Core-map frame allocator for simulated physical memory.

pub mod placement_algorithms;

use alloc::{boxed::Box, vec};
use bitbybit::bitfield;
use core::ops::Range;
use placement_algorithms::PlacementAlgorithm;

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    /// Frame holds kernel data (a page table) and is never a swap victim.
    #[bit(2, rw)]
    is_kernel: bool,
    /// Frame is followed by another frame of the same allocation.
    #[bit(3, rw)]
    next: bool,
}

pub struct FrameAllocator<P: PlacementAlgorithm> {
    core_map: Box<[CoreMapEntry]>,
    placement: P,
    frames_allocated: usize,
}

impl<P: PlacementAlgorithm> FrameAllocator<P> {
    pub fn new(num_frames: usize) -> Self {
        Self {
            core_map: vec![CoreMapEntry::default(); num_frames].into_boxed_slice(),
            placement: P::default(),
            frames_allocated: 0,
        }
    }

    /// Allocates `frames_requested` contiguous frames, or `None` if memory is
    /// full.
    pub fn alloc(&mut self, frames_requested: usize, kernel: bool) -> Option<Range<usize>> {
        if frames_requested == 0 || self.frames_allocated + frames_requested > self.core_map.len()
        {
            return None;
        }

        let range = self.placement.place(&self.core_map, frames_requested)?;
        for i in range.clone() {
            assert!(!self.core_map[i].allocated(), "frame {i} double allocated");
            self.core_map[i] = CoreMapEntry::DEFAULT
                .with_allocated(true)
                .with_is_kernel(kernel)
                .with_next(i + 1 < range.end);
        }
        self.frames_allocated += range.len();

        Some(range)
    }

    /// Frees the allocation starting at frame `start`, returning how many
    /// frames it covered.
    pub fn dealloc(&mut self, start: usize) -> usize {
        let mut frames_freed = 0;
        for i in start..self.core_map.len() {
            let entry = self.core_map[i];
            assert!(entry.allocated(), "freeing unallocated frame {i}");
            self.core_map[i] = CoreMapEntry::DEFAULT;
            frames_freed += 1;
            if !entry.next() {
                break;
            }
        }
        self.frames_allocated -= frames_freed;
        frames_freed
    }

    pub fn is_kernel(&self, frame: usize) -> bool {
        self.core_map[frame].is_kernel()
    }

    pub fn frames_free(&self) -> usize {
        self.core_map.len() - self.frames_allocated
    }
}
