// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(missing_docs)]

//! CONTEXT: Shared ABI definitions between the NEURON memory manager and the userland fork runtime
//! OWNERS: @runtime
//! PUBLIC API: layout::*, PteFlags/Pte/Pde, EnvId/EnvStatus, UTrapframe/FaultErr, Fatal/ExitReason/Trap,
//!             AbiError/SysResult, Syscalls/Memory/Context, Upcall
//! DEPENDS_ON: no_std, bitflags, static_assertions
//! INVARIANTS: PTE bit encoding is shared with the kernel monitor; env id 0 always means "caller";
//!             after fork a frame mapped by two envs is writable only through `SHARE` entries
//! ADR: docs/adr/0016-kernel-libs-architecture.md

pub mod env;
pub mod fault;
pub mod layout;
pub mod pte;
pub mod syscall;

pub use env::{EnvId, EnvStatus};
pub use fault::{ExitReason, Fatal, FaultErr, Trap, UTrapframe};
pub use layout::*;
pub use pte::{Pde, Pte, PteFlags};
pub use syscall::{AbiError, Context, Memory, SysResult, Syscalls, Upcall};
