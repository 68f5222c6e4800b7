// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Scheduler hand-off for the NEURON host model
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Entry, RunError, Kernel::run, Kernel::schedule
//! DEPENDS_ON: task::{Env, Origin}
//! INVARIANTS: only Runnable (or the already running) env can be handed the CPU;
//!             an exoforked env's first entry carries its saved return register (0);
//!             round-robin in slot order starting after the current env
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

extern crate alloc;

use alloc::vec::Vec;

use nexus_abi::{EnvId, EnvStatus};

use crate::kernel::Kernel;
use crate::task::Origin;

/// How an env observes being handed the CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entry {
    /// First run of a kernel-created env: start at its entry point.
    Start,
    /// First run of an exoforked env: return from the cloned syscall with `retval`.
    Exofork { retval: u32 },
    /// Any later run: continue where it left off.
    Resume,
}

/// Reasons the scheduler refuses a hand-off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunError {
    /// No live env carries this id.
    BadEnv,
    /// The env exists but is not runnable.
    NotRunnable,
}

impl Kernel {
    /// Makes `id` the current env.
    ///
    /// The previously running env, if any and still alive, goes back to `Runnable`.
    pub fn run(&mut self, id: EnvId) -> Result<Entry, RunError> {
        let env = self.envs.get(id).ok_or(RunError::BadEnv)?;
        let already_current = self.current == Some(id);
        if env.status != EnvStatus::Runnable && !already_current {
            return Err(RunError::NotRunnable);
        }
        if let Some(prev) = self.current.filter(|prev| *prev != id) {
            if let Some(prev) = self.envs.get_mut(prev) {
                if prev.status == EnvStatus::Running {
                    prev.status = EnvStatus::Runnable;
                }
            }
        }
        let env = self.envs.get_mut(id).ok_or(RunError::BadEnv)?;
        env.status = EnvStatus::Running;
        env.stats.runs += 1;
        let entry = match (env.launched, env.origin) {
            (true, _) => Entry::Resume,
            (false, Origin::Created) => Entry::Start,
            (false, Origin::Exoforked) => Entry::Exofork { retval: env.tf.retval },
        };
        env.launched = true;
        self.current = Some(id);
        log_trace!(target: "env", "run {} {:?}", id, entry);
        Ok(entry)
    }

    /// Picks the next runnable env after the current one (round-robin) and runs it.
    ///
    /// Keeps the current env if it is the only candidate; returns `None` when
    /// nothing can run.
    pub fn schedule(&mut self) -> Option<(EnvId, Entry)> {
        let ids: Vec<EnvId> = self.live_envs().collect();
        let start = self
            .current
            .and_then(|cur| ids.iter().position(|id| *id == cur))
            .map_or(0, |pos| pos + 1);
        let next = (0..ids.len())
            .map(|step| ids[(start + step) % ids.len()])
            .find(|id| self.status(*id) == Some(EnvStatus::Runnable))
            .or_else(|| self.current.filter(|cur| self.is_alive(*cur)))?;
        let entry = self.run(next).ok()?;
        Some((next, entry))
    }
}
