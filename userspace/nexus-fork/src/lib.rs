// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Copy-on-write fork for the Nexus libos
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (recording context) + tests/fork.rs against the neuron host model
//! PUBLIC API: fork, resume_child, sfork, ForkRet, duppage, Sharing, pgfault, pgfault_upcall,
//!             PgfaultHandler, set_pgfault_handler, libmain, thisenv, ForkError
//! DEPENDS_ON: nexus_abi::Context (syscalls + read-only page-table views)
//! INVARIANTS: handler installed before any COW mapping exists; child mapped COW before the
//!             parent is re-marked; child runnable only after every mapping, exception stack and
//!             upcall are in place; one new frame per resolved fault
//! ADR: docs/adr/0016-kernel-libs-architecture.md

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod duppage;
mod error;
mod fork;
mod pgfault;
mod runtime;

pub use duppage::{duppage, Sharing};
pub use error::ForkError;
pub use fork::{fork, resume_child, sfork, ForkRet};
pub use pgfault::{pgfault, pgfault_upcall, PgfaultHandler};
pub use runtime::{
    installed_handler, libmain, set_pgfault_handler, thisenv, HANDLER_VA, THISENV_VA,
};

#[cfg(test)]
mod testing;
