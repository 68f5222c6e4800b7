// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Physical frame pool with per-frame reference counts.
//!
//! A frame's count is the number of page-table entries (or page-directory
//! slots, for page-table frames) that reference it. Frames return to the free
//! list when the count drops to zero. Frame 0 is reserved so that a zero PTE
//! never names a usable frame.

extern crate alloc;

use alloc::{vec, vec::Vec};

use nexus_abi::PGSIZE;

const PAGE: usize = PGSIZE as usize;

/// Backing store and bookkeeping for every physical frame.
pub struct FrameTable {
    memory: Vec<u8>,
    refs: Vec<u32>,
    free: Vec<u32>,
}

impl FrameTable {
    /// Creates a pool of `frames` zeroed frames (including reserved frame 0).
    pub fn new(frames: usize) -> Self {
        let frames = frames.max(1);
        // Popped from the back: low frame numbers are handed out first.
        let free = (1..frames as u32).rev().collect();
        Self { memory: vec![0; frames * PAGE], refs: vec![0; frames], free }
    }

    /// Total frames in the pool, including the reserved one.
    pub fn capacity(&self) -> usize {
        self.refs.len()
    }

    /// Frames currently referenced by some mapping or table.
    pub fn in_use(&self) -> usize {
        self.capacity() - 1 - self.free.len()
    }

    /// Takes a zeroed frame off the free list with a reference count of zero.
    ///
    /// The caller must either reference it (`incref`) or hand it back with
    /// [`FrameTable::reclaim`].
    pub fn alloc(&mut self) -> Option<u32> {
        let frame = self.free.pop()?;
        self.page_mut(frame).fill(0);
        Some(frame)
    }

    /// Returns an allocated but still unreferenced frame to the pool.
    pub fn reclaim(&mut self, frame: u32) {
        if self.refcount(frame) == 0 && !self.free.contains(&frame) && frame != 0 {
            self.free.push(frame);
        }
    }

    /// Adds one reference to `frame`.
    pub fn incref(&mut self, frame: u32) {
        if let Some(count) = self.refs.get_mut(frame as usize) {
            *count += 1;
        }
    }

    /// Drops one reference; returns `true` if the frame went back to the pool.
    pub fn decref(&mut self, frame: u32) -> bool {
        let Some(count) = self.refs.get_mut(frame as usize) else {
            return false;
        };
        if *count == 0 {
            return false;
        }
        *count -= 1;
        if *count == 0 {
            self.free.push(frame);
            return true;
        }
        false
    }

    /// Current reference count of `frame` (0 for out-of-range frames).
    pub fn refcount(&self, frame: u32) -> u32 {
        self.refs.get(frame as usize).copied().unwrap_or(0)
    }

    /// Contents of `frame`.
    pub fn page(&self, frame: u32) -> &[u8] {
        let base = frame as usize * PAGE;
        &self.memory[base..base + PAGE]
    }

    /// Mutable contents of `frame`.
    pub fn page_mut(&mut self, frame: u32) -> &mut [u8] {
        let base = frame as usize * PAGE;
        &mut self.memory[base..base + PAGE]
    }

    /// Returns `true` if `frame` names a frame in this pool other than the reserved one.
    pub fn contains(&self, frame: u32) -> bool {
        frame != 0 && (frame as usize) < self.capacity()
    }
}
