// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Physical frames and two-level page tables for the NEURON host model
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FrameTable, PageTable, MapError, failpoints (feature = "failpoints")
//! DEPENDS_ON: nexus_abi::{Pte, PteFlags, layout}
//! INVARIANTS: refcount(frame) == number of entries naming it; frame 0 never handed out;
//!             a replaced mapping is released only after the new reference is taken
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

pub mod frame;
pub mod page_table;

pub use frame::FrameTable;
pub use page_table::{MapError, PageTable};

#[cfg(feature = "failpoints")]
pub mod failpoints {
    //! Per-kernel fault injection for the privileged memory operations.

    /// Operation a failpoint can be armed on.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Failpoint {
        /// `page_alloc` reports `NoMemory`.
        PageAlloc,
        /// `page_map` reports `NoMemory`.
        PageMap,
        /// `exofork` reports `NoFreeEnv`.
        Exofork,
    }

    impl Failpoint {
        const fn index(self) -> usize {
            match self {
                Failpoint::PageAlloc => 0,
                Failpoint::PageMap => 1,
                Failpoint::Exofork => 2,
            }
        }
    }

    /// Armed failpoints; each fires once after skipping the given number of calls.
    #[derive(Debug, Default)]
    pub struct Failpoints {
        armed: [Option<u32>; 3],
    }

    impl Failpoints {
        /// Makes the call after the next `skip` successful ones fail.
        pub fn arm(&mut self, point: Failpoint, skip: u32) {
            self.armed[point.index()] = Some(skip);
        }

        /// Disarms every failpoint.
        pub fn clear(&mut self) {
            self.armed = [None; 3];
        }

        /// Returns `true` if `point` fires for this call.
        pub(crate) fn hit(&mut self, point: Failpoint) -> bool {
            let slot = &mut self.armed[point.index()];
            match *slot {
                Some(0) => {
                    *slot = None;
                    true
                }
                Some(n) => {
                    *slot = Some(n - 1);
                    false
                }
                None => false,
            }
        }
    }
}
