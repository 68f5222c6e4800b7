// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Env table and lifecycle records for the NEURON host model
//! OWNERS: @kernel-sched-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below + syscall/trap tests
//! PUBLIC API: Env, EnvTable, EnvStats, Origin, Trapframe
//! DEPENDS_ON: mm::PageTable, nexus_abi::{EnvId, EnvStatus, ExitReason, Upcall}
//! INVARIANTS: id = generation << 10 | slot; generation bumps on every reuse so stale ids miss;
//!             exit reasons of destroyed envs stay queryable
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

extern crate alloc;

use alloc::{collections::BTreeMap, vec::Vec};

use nexus_abi::{EnvId, EnvStatus, ExitReason, Upcall};
use static_assertions::const_assert;

use crate::mm::PageTable;

/// Bits of an env id that select the table slot.
pub const ENV_SLOT_BITS: u32 = 10;
/// Upper bound on the env table size.
pub const NENV: usize = 1 << ENV_SLOT_BITS;

const_assert!(NENV <= 1024);

/// Saved user register state that matters to the host model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Trapframe {
    /// Return register observed when the env resumes.
    pub retval: u32,
}

/// How an env came into existence; decides what its first run looks like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Created by the kernel with a fresh image.
    Created,
    /// Cloned by `exofork`; resumes inside the parent's call.
    Exoforked,
}

/// Per-env counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnvStats {
    /// Times the env was handed the CPU.
    pub runs: u64,
    /// Syscalls issued.
    pub syscalls: u64,
    /// Page faults delivered to the upcall.
    pub faults: u64,
    /// Deepest nesting of fault deliveries observed.
    pub max_fault_depth: u32,
    /// Frames allocated through `page_alloc`.
    pub pages_allocated: u64,
}

/// A live env.
pub struct Env {
    pub(crate) id: EnvId,
    pub(crate) parent: EnvId,
    pub(crate) status: EnvStatus,
    pub(crate) origin: Origin,
    pub(crate) launched: bool,
    pub(crate) tf: Trapframe,
    pub(crate) space: PageTable,
    pub(crate) upcall: Option<Upcall>,
    pub(crate) fault_depth: u32,
    pub(crate) stats: EnvStats,
}

impl Env {
    /// Id of this env.
    pub fn id(&self) -> EnvId {
        self.id
    }

    /// Id of the env that created it (`EnvId::SELF` for kernel-created envs).
    pub fn parent(&self) -> EnvId {
        self.parent
    }

    /// Scheduling state.
    pub fn status(&self) -> EnvStatus {
        self.status
    }
}

struct Slot {
    generation: u32,
    env: Option<Env>,
}

/// Error returned when the table cannot take another env.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableFull;

/// Fixed-size env table with generation-tagged ids.
pub struct EnvTable {
    slots: Vec<Slot>,
    exits: BTreeMap<u32, ExitReason>,
}

impl EnvTable {
    /// Creates a table with `capacity` slots (clamped to `1..=NENV`).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, NENV);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot { generation: 0, env: None });
        Self { slots, exits: BTreeMap::new() }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Reserves the lowest free slot and returns the id the new env will carry.
    pub fn reserve(&mut self) -> Result<EnvId, TableFull> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.env.is_none())
            .ok_or(TableFull)?;
        slot.generation = match slot.generation.wrapping_add(1) & (u32::MAX >> ENV_SLOT_BITS) {
            0 => 1,
            next => next,
        };
        Ok(EnvId::from_raw((slot.generation << ENV_SLOT_BITS) | index as u32))
    }

    /// Installs `env` in the slot named by its id.
    pub fn install(&mut self, env: Env) {
        let index = slot_index(env.id);
        if let Some(slot) = self.slots.get_mut(index) {
            slot.env = Some(env);
        }
    }

    /// Looks up a live env by exact id.
    pub fn get(&self, id: EnvId) -> Option<&Env> {
        self.slots.get(slot_index(id))?.env.as_ref().filter(|env| env.id == id)
    }

    /// Mutable lookup by exact id.
    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots.get_mut(slot_index(id))?.env.as_mut().filter(|env| env.id == id)
    }

    /// Removes a live env and records why it went away.
    pub fn remove(&mut self, id: EnvId, reason: ExitReason) -> Option<Env> {
        let slot = self.slots.get_mut(slot_index(id))?;
        if slot.env.as_ref().map(|env| env.id) != Some(id) {
            return None;
        }
        self.exits.insert(id.raw(), reason);
        slot.env.take()
    }

    /// Exit reason recorded for a destroyed env.
    pub fn exit_reason(&self, id: EnvId) -> Option<ExitReason> {
        self.exits.get(&id.raw()).copied()
    }

    /// Live envs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Env> {
        self.slots.iter().filter_map(|slot| slot.env.as_ref())
    }
}

/// Slot index encoded in `id`.
pub fn slot_index(id: EnvId) -> usize {
    (id.raw() & ((1 << ENV_SLOT_BITS) - 1)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::FrameTable;

    fn env(id: EnvId, frames: &mut FrameTable) -> Env {
        Env {
            id,
            parent: EnvId::SELF,
            status: EnvStatus::Runnable,
            origin: Origin::Created,
            launched: false,
            tf: Trapframe::default(),
            space: PageTable::new(frames).unwrap(),
            upcall: None,
            fault_depth: 0,
            stats: EnvStats::default(),
        }
    }

    #[test]
    fn ids_are_positive_and_generation_tagged() {
        let mut frames = FrameTable::new(8);
        let mut table = EnvTable::new(2);
        let first = table.reserve().unwrap();
        assert_eq!(first.raw(), 1 << ENV_SLOT_BITS);
        table.install(env(first, &mut frames));
        let second = table.reserve().unwrap();
        assert_eq!(slot_index(second), 1);
        table.install(env(second, &mut frames));
        assert_eq!(table.reserve(), Err(TableFull));

        let gone = table.remove(first, ExitReason::Exited).unwrap();
        gone.space.teardown(&mut frames);
        let reused = table.reserve().unwrap();
        assert_eq!(slot_index(reused), 0);
        assert_ne!(reused, first);
        table.install(env(reused, &mut frames));
        assert!(table.get(first).is_none(), "stale id must not resolve");
        assert_eq!(table.exit_reason(first), Some(ExitReason::Exited));
        assert_eq!(table.iter().count(), 2);
    }
}
