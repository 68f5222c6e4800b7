// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Two-level page table with lazy allocation of second-level tables.
//!
//! Directory and table pages are charged against the [`FrameTable`] like any
//! other frame, so running out of frames can surface while installing a
//! mapping, not only while allocating the data page.

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};

use nexus_abi::{pdx, ptx, FaultErr, Pde, Pte, PteFlags, NPDENTRIES, NPTENTRIES, UTOP};

use super::frame::FrameTable;

/// Error returned when manipulating page tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// No frame left for the directory or a second-level table.
    OutOfFrames,
}

/// Flags installed in directory entries; leaf entries carry the real permissions.
const PDE_FLAGS: PteFlags = PteFlags::P.union(PteFlags::W).union(PteFlags::U);

struct PageTablePage {
    frame: u32,
    entries: Box<[Pte; NPTENTRIES]>,
}

/// Address space of one env: a page directory of lazily created page tables.
pub struct PageTable {
    dir_frame: u32,
    tables: Vec<Option<PageTablePage>>,
}

impl PageTable {
    /// Creates an empty address space, charging one frame for the directory.
    pub fn new(frames: &mut FrameTable) -> Result<Self, MapError> {
        let dir_frame = frames.alloc().ok_or(MapError::OutOfFrames)?;
        frames.incref(dir_frame);
        let mut tables = Vec::with_capacity(NPDENTRIES);
        tables.resize_with(NPDENTRIES, || None);
        Ok(Self { dir_frame, tables })
    }

    /// Frame holding the page directory.
    pub fn dir_frame(&self) -> u32 {
        self.dir_frame
    }

    /// Directory entry for slot `index`; `Pde::EMPTY` when no table is installed.
    pub fn pde(&self, index: usize) -> Pde {
        match self.tables.get(index) {
            Some(Some(table)) => Pde::new(table.frame, PDE_FLAGS),
            _ => Pde::EMPTY,
        }
    }

    /// Leaf entry for `va` (any offset within the page); `Pte::EMPTY` if absent.
    pub fn lookup(&self, va: u32) -> Pte {
        match &self.tables[pdx(va)] {
            Some(table) => table.entries[ptx(va)],
            None => Pte::EMPTY,
        }
    }

    /// Mutable leaf entry for `va`, if its page table exists.
    pub fn entry_mut(&mut self, va: u32) -> Option<&mut Pte> {
        self.tables[pdx(va)].as_mut().map(|table| &mut table.entries[ptx(va)])
    }

    fn walk_create(&mut self, frames: &mut FrameTable, va: u32) -> Result<&mut Pte, MapError> {
        let slot = &mut self.tables[pdx(va)];
        if slot.is_none() {
            let frame = frames.alloc().ok_or(MapError::OutOfFrames)?;
            frames.incref(frame);
            *slot = Some(PageTablePage { frame, entries: Box::new([Pte::EMPTY; NPTENTRIES]) });
        }
        match slot {
            Some(table) => Ok(&mut table.entries[ptx(va)]),
            None => Err(MapError::OutOfFrames),
        }
    }

    /// Maps `frame` at `va` with `flags`, replacing any present mapping.
    ///
    /// The new reference is taken before the old one is dropped, so remapping
    /// a frame onto itself never frees it.
    pub fn insert(
        &mut self,
        frames: &mut FrameTable,
        va: u32,
        frame: u32,
        flags: PteFlags,
    ) -> Result<(), MapError> {
        let entry = self.walk_create(frames, va)?;
        let old = *entry;
        frames.incref(frame);
        *entry = Pte::new(frame, flags | PteFlags::P);
        if old.is_present() {
            frames.decref(old.frame());
        }
        Ok(())
    }

    /// Removes the mapping at `va`; returns the entry that was removed.
    pub fn remove(&mut self, frames: &mut FrameTable, va: u32) -> Option<Pte> {
        let entry = self.entry_mut(va)?;
        if !entry.is_present() {
            return None;
        }
        let old = core::mem::replace(entry, Pte::EMPTY);
        frames.decref(old.frame());
        Some(old)
    }

    /// Translates a user access, setting `A` (and `D` on stores) on success.
    ///
    /// Returns the frame on success and the fault error bits otherwise.
    pub fn translate(&mut self, va: u32, write: bool) -> Result<u32, FaultErr> {
        let mut err = FaultErr::USER;
        if write {
            err |= FaultErr::WRITE;
        }
        if va >= UTOP {
            return Err(err);
        }
        let Some(entry) = self.entry_mut(va) else {
            return Err(err);
        };
        if !entry.is_present() || !entry.has(PteFlags::U) {
            return Err(err);
        }
        if write && !entry.has(PteFlags::W) {
            return Err(err | FaultErr::PRESENT);
        }
        let mut flags = entry.flags() | PteFlags::A;
        if write {
            flags |= PteFlags::D;
        }
        *entry = entry.with_flags(flags);
        Ok(entry.frame())
    }

    /// Number of present leaf entries below `UTOP`.
    pub fn mapped_pages(&self) -> usize {
        self.tables
            .iter()
            .flatten()
            .map(|table| table.entries.iter().filter(|pte| pte.is_present()).count())
            .sum()
    }

    /// Drops every mapping and returns all table and directory frames.
    pub fn teardown(self, frames: &mut FrameTable) {
        for table in self.tables.into_iter().flatten() {
            for pte in table.entries.iter().filter(|pte| pte.is_present()) {
                frames.decref(pte.frame());
            }
            frames.decref(table.frame);
        }
        frames.decref(self.dir_frame);
    }
}
