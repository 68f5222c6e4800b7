// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-table entry encoding.
//!
//! The bit layout is the contract between the memory manager, the fork runtime
//! and the kernel monitor, which renders and edits the same bits.

use core::fmt;

use bitflags::bitflags;

use crate::layout::PGSHIFT;

bitflags! {
    /// Permission and status bits stored in the low 12 bits of a PTE.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        /// Entry is valid and references a frame.
        const P = 0x001;
        /// Writes are permitted.
        const W = 0x002;
        /// Accessible outside privileged mode.
        const U = 0x004;
        /// Write-through caching.
        const PWT = 0x008;
        /// Caching disabled.
        const PCD = 0x010;
        /// Set by the MMU on any access.
        const A = 0x020;
        /// Set by the MMU on store.
        const D = 0x040;
        /// Page size / attribute index.
        const PS = 0x080;
        /// Not flushed on address-space switch.
        const G = 0x100;
        /// Frame intentionally shared across fork; never COW-split.
        const SHARE = 0x400;
        /// Frame shared copy-on-write; a store must fault and copy.
        const COW = 0x800;
    }
}

impl PteFlags {
    /// Bits reserved for software use.
    pub const AVAIL: Self = Self::from_bits_retain(0xe00);
    /// Bits a syscall may request; anything else is rejected.
    pub const SYSCALL: Self = Self::from_bits_retain(0xe07);
    /// Bits maintained by the MMU rather than by software.
    pub const HARDWARE: Self = Self::A.union(Self::D);
}

/// A single page-table entry: `frame << 12 | flags`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pte(u32);

impl Pte {
    /// The all-zero, non-present entry.
    pub const EMPTY: Self = Self(0);

    /// Builds an entry for `frame` with `flags`.
    #[inline]
    pub const fn new(frame: u32, flags: PteFlags) -> Self {
        Self((frame << PGSHIFT) | (flags.bits() & 0xfff))
    }

    /// Reinterprets a raw entry.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw 32-bit value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Frame number referenced by the entry.
    #[inline]
    pub const fn frame(self) -> u32 {
        self.0 >> PGSHIFT
    }

    /// Physical address of the referenced frame.
    #[inline]
    pub const fn phys_addr(self) -> u32 {
        self.0 & !0xfff
    }

    /// Flag bits, including unnamed software bits.
    #[inline]
    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_retain(self.0 & 0xfff)
    }

    /// Returns `true` if the entry is present.
    #[inline]
    pub const fn is_present(self) -> bool {
        self.0 & PteFlags::P.bits() != 0
    }

    /// Returns `true` if every bit in `flags` is set.
    #[inline]
    pub fn has(self, flags: PteFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Same frame, different flags.
    #[inline]
    pub const fn with_flags(self, flags: PteFlags) -> Self {
        Self::new(self.frame(), flags)
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pte").field("frame", &self.frame()).field("flags", &self.flags()).finish()
    }
}

/// Page-directory entry as exposed through the read-only `uvpd` view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Pde(u32);

impl Pde {
    /// Directory slot without a page table.
    pub const EMPTY: Self = Self(0);

    /// Builds a directory entry pointing at page-table frame `frame`.
    #[inline]
    pub const fn new(frame: u32, flags: PteFlags) -> Self {
        Self((frame << PGSHIFT) | (flags.bits() & 0xfff))
    }

    /// Raw 32-bit value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` if a page table is installed in this slot.
    #[inline]
    pub const fn is_present(self) -> bool {
        self.0 & PteFlags::P.bits() != 0
    }
}
