// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: NEURON memory manager host model
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + proptest (mm, syscall, monitor)
//! PUBLIC API: Kernel, KernelConfig, Entry, RunError, monitor, mm::failpoints
//! DEPENDS_ON: nexus-abi (Syscalls/Memory seam, PTE encoding, layout)
//! INVARIANTS: single owner of all kernel state (&mut Kernel); user code reaches it only
//!             through nexus_abi::Context; no unsafe
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

extern crate alloc;

#[macro_use]
pub mod diag;

pub mod config;
pub mod kernel;
pub mod mm;
pub mod monitor;
pub mod sched;
pub mod syscall;
pub mod task;
pub mod trap;

pub use config::KernelConfig;
pub use kernel::Kernel;
pub use sched::{Entry, RunError};
pub use task::EnvStats;
pub use trap::MAX_FAULT_RETRIES;
